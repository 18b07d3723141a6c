//! Device inventory model.
//!
//! A [`Device`] is the unit the store keeps; [`DeviceEvent`] is what the
//! change feed hands to subscribers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use utoipa::ToSchema;

// =============================================================================
// Identity & Revision
// =============================================================================

/// Unique device identifier, used as the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Store-assigned version stamp. Zero means "no prior version known".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(value_type = u64)]
pub struct Revision(pub u64);

impl Revision {
    pub const NONE: Revision = Revision(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Device
// =============================================================================

/// Device login credentials
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct Credentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// TLS material used when connecting to the device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub ca_cert: String,
    /// Connect over plaintext
    #[serde(default)]
    pub plain: bool,
    /// Skip certificate verification
    #[serde(default)]
    pub insecure: bool,
}

/// Southbound protocol a device speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[default]
    Unknown,
    Gnmi,
    P4Runtime,
    Gnoi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    #[default]
    Unknown,
    Available,
    Unavailable,
    Connecting,
}

/// Connection state of one protocol on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct ProtocolState {
    pub protocol: Protocol,
    #[serde(default)]
    pub connectivity_state: ConnectivityState,
    #[serde(default)]
    pub channel_state: ChannelState,
    #[serde(default)]
    pub service_state: ServiceState,
}

/// Network device record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct Device {
    #[serde(default)]
    pub id: DeviceId,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub target: String,
    /// host:port
    #[serde(default)]
    pub address: String,
    /// Device software version (MAJOR.MINOR.PATCH)
    #[serde(default)]
    pub version: String,
    /// Connection timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub protocols: Vec<ProtocolState>,
    /// Assigned by the store; zero on create
    #[serde(default)]
    pub revision: Revision,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Render protocol states as `GNMI: {Connectivity: REACHABLE, ...}` lines.
    pub fn state_summary(&self) -> String {
        self.protocols
            .iter()
            .map(|p| {
                format!(
                    "{:?}: {{Connectivity: {:?}, Channel: {:?}, Service: {:?}}}",
                    p.protocol, p.connectivity_state, p.channel_state, p.service_state
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Events
// =============================================================================

/// Kind of change carried by a [`DeviceEvent`].
///
/// `None` marks records delivered as part of a replay of existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    #[default]
    None,
    Inserted,
    Updated,
    Removed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::None => "NONE",
            EventType::Inserted => "INSERTED",
            EventType::Updated => "UPDATED",
            EventType::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a device change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub device: Device,
}

impl DeviceEvent {
    pub fn replayed(device: Device) -> Self {
        Self {
            event_type: EventType::None,
            device,
        }
    }
}
