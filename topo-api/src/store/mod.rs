//! Versioned device store and change feed.
//!
//! ```text
//! DeviceService → Arc<dyn DeviceStore>
//!                        ↓
//!                 MapDeviceStore ── ChangeFeed ── Subscription (per watcher)
//!                        ↓
//!                 Arc<dyn VersionedMap>
//! ```
//!
//! The store owns revision assignment: a device revision is the version of
//! its map entry, so it strictly increases with every write to the same id.

mod codec;
mod error;
mod feed;
mod map_store;
mod traits;

pub use error::{Result, StoreError};
pub use feed::{ChangeFeed, SUBSCRIBER_BUFFER, StreamPhase, Subscription};
pub use map_store::{DEFAULT_TIMEOUT, MapDeviceStore};
pub use traits::{DeviceStore, DeviceStream};
