//! DeviceStore trait definition.
//!
//! The trait abstracts away the underlying map, allowing the service to work
//! with devices and revisions instead of keys and bytes.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::{Device, DeviceId};

use super::error::Result;
use super::feed::Subscription;

/// Finite stream of devices produced by [`DeviceStore::list`].
pub type DeviceStream = BoxStream<'static, Result<Device>>;

/// Store trait for device records.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Load a device by ID.
    async fn load(&self, id: &DeviceId) -> Result<Option<Device>>;

    /// Create a device that must not exist yet.
    ///
    /// Fails with `AlreadyExists` if the id is taken, even when a concurrent
    /// create wins the race. Returns the device carrying its revision.
    async fn create(&self, device: Device) -> Result<Device>;

    /// Store a device.
    ///
    /// A zero revision writes unconditionally; any other revision must match
    /// the stored one. Returns the device carrying its new revision.
    async fn store(&self, device: Device) -> Result<Device>;

    /// Delete a device, guarded by its revision when non-zero.
    ///
    /// Returns the last stored snapshot of the device.
    async fn delete(&self, device: &Device) -> Result<Device>;

    /// Enumerate the devices present when the call is made (best effort).
    async fn list(&self) -> Result<DeviceStream>;

    /// Replay all devices, then follow live changes.
    async fn watch(&self) -> Result<Subscription>;
}
