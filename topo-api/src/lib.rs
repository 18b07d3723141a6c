pub mod audit;
pub mod command;
pub mod device;
pub mod map;
pub mod rest;
pub mod service;
pub mod state;
pub mod store;

pub use audit::{DeviceAuditLogger, create_audit_logger};
pub use command::{Command, Entry, Response};
pub use device::{Device, DeviceEvent, DeviceId, EventType, Revision};
pub use map::{LocalMap, MapEvent, RaftMap, VersionedMap};
pub use mraft::NodeId;
pub use service::{DeviceService, ListStream, ServiceError};
pub use state::MapState;
pub use store::{ChangeFeed, DeviceStore, MapDeviceStore, StoreError, Subscription};
