//! DeviceStore backed by a VersionedMap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::device::{Device, DeviceId};
use crate::map::{ABSENT, VersionedMap};

use super::codec::{decode, decode_or_skip, encode};
use super::error::{Result, StoreError};
use super::feed::{ChangeFeed, Subscription};
use super::traits::{DeviceStore, DeviceStream};

/// Per-call deadline for map operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Device store over a versioned map.
///
/// Devices are stored as JSON under their id; the entry version is the
/// device revision.
pub struct MapDeviceStore {
    map: Arc<dyn VersionedMap>,
    feed: ChangeFeed,
    timeout: Duration,
}

impl MapDeviceStore {
    pub fn new(map: Arc<dyn VersionedMap>) -> Self {
        Self {
            feed: ChangeFeed::new(map.clone()),
            map,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The change feed serving [`DeviceStore::watch`].
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn deadline<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Store {} timed out after {:?}", operation, self.timeout);
                Err(StoreError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

fn guard(device: &Device) -> Option<u64> {
    (!device.revision.is_none()).then_some(device.revision.0)
}

#[async_trait]
impl DeviceStore for MapDeviceStore {
    async fn load(&self, id: &DeviceId) -> Result<Option<Device>> {
        let entry = self
            .deadline("load", async {
                self.map.get(id.as_str()).await.map_err(StoreError::from)
            })
            .await?;
        entry.as_ref().map(decode).transpose()
    }

    async fn create(&self, device: Device) -> Result<Device> {
        let value = encode(&device)?;
        let entry = self
            .deadline("create", async {
                self.map
                    .put(device.id.as_str(), value, Some(ABSENT))
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        tracing::debug!("Created device {} at revision {}", entry.key, entry.version);
        decode(&entry)
    }

    async fn store(&self, device: Device) -> Result<Device> {
        let value = encode(&device)?;
        let if_version = guard(&device);
        let entry = self
            .deadline("store", async {
                self.map
                    .put(device.id.as_str(), value, if_version)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        tracing::debug!("Stored device {} at revision {}", entry.key, entry.version);
        decode(&entry)
    }

    async fn delete(&self, device: &Device) -> Result<Device> {
        let if_version = guard(device);
        let entry = self
            .deadline("delete", async {
                self.map
                    .remove(device.id.as_str(), if_version)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        tracing::debug!("Deleted device {}", entry.key);
        decode(&entry)
    }

    async fn list(&self) -> Result<DeviceStream> {
        let entries = self
            .deadline("list", async { self.map.entries().await.map_err(StoreError::from) })
            .await?;
        let devices = entries.filter_map(|entry| async move {
            match entry {
                Ok(entry) => decode_or_skip(&entry).map(Ok),
                Err(e) => Some(Err(StoreError::from(e))),
            }
        });
        Ok(devices.boxed())
    }

    async fn watch(&self) -> Result<Subscription> {
        self.deadline("watch", self.feed.subscribe(true)).await
    }
}
