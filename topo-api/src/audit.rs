use std::sync::Arc;

/// Audit trail for device inventory changes.
///
/// Entries are emitted as `tracing` events on the `audit` target so they can
/// be routed separately from operational logs (`RUST_LOG=audit=info`).
pub struct DeviceAuditLogger {
    source: String,
    enabled: bool,
}

impl DeviceAuditLogger {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            enabled: true,
        }
    }

    pub fn new_noop() -> Self {
        Self {
            source: String::new(),
            enabled: false,
        }
    }

    fn log(&self, message: String, device_id: &str) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            target: "audit",
            source = %self.source,
            device_id,
            "{}",
            message
        );
    }

    pub fn device_added(&self, device_id: &str, address: &str, revision: u64) {
        self.log(
            format!("Device added: {} at {} (revision {})", device_id, address, revision),
            device_id,
        );
    }

    pub fn device_updated(&self, device_id: &str, revision: u64) {
        self.log(
            format!("Device updated: {} (revision {})", device_id, revision),
            device_id,
        );
    }

    pub fn device_removed(&self, device_id: &str) {
        self.log(format!("Device removed: {}", device_id), device_id);
    }

    pub fn leader_elected(&self, node_id: u64) {
        self.log(format!("Leader elected: node {}", node_id), "");
    }
}

pub fn create_audit_logger(source: &str) -> Arc<DeviceAuditLogger> {
    Arc::new(DeviceAuditLogger::new(source))
}
