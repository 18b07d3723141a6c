//! Validating device service.
//!
//! The caller-facing layer: requests are validated before the store is
//! touched, and store results are translated into [`ServiceError`]s.

mod error;
pub mod validate;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};

use crate::device::{Device, DeviceEvent, DeviceId};
use crate::store::{DeviceStore, DeviceStream, Subscription};

pub use error::{Result, ServiceError};
pub use validate::ValidationError;

/// Device inventory operations.
pub struct DeviceService {
    store: Arc<dyn DeviceStore>,
}

impl DeviceService {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Get a device by ID.
    pub async fn get(&self, id: &DeviceId) -> Result<Device> {
        if id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        self.store
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device '{}' not found", id)))
    }

    /// Create a device. The returned device carries its assigned revision.
    pub async fn add(&self, device: Device) -> Result<Device> {
        validate::validate_new(&device)?;

        let device = self.store.create(device).await?;
        tracing::debug!("Added device {} at revision {}", device.id, device.revision);
        Ok(device)
    }

    /// Replace a device, guarded by the revision it carries.
    pub async fn update(&self, device: Device) -> Result<Device> {
        validate::validate_update(&device)?;

        let device = self.store.store(device).await?;
        tracing::debug!("Updated device {} to revision {}", device.id, device.revision);
        Ok(device)
    }

    /// Remove a device; guarded when it carries a revision.
    ///
    /// Returns the last stored version of the device.
    pub async fn remove(&self, device: &Device) -> Result<Device> {
        if device.id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }

        let removed = self.store.delete(device).await?;
        tracing::debug!("Removed device {}", removed.id);
        Ok(removed)
    }

    /// Stream every current device as a `NONE` event, then either end or,
    /// when `subscribe` is set, continue with live changes.
    pub async fn list(&self, subscribe: bool) -> Result<ListStream> {
        let source = if subscribe {
            ListSource::Live(self.store.watch().await?)
        } else {
            ListSource::Snapshot(self.store.list().await?)
        };
        Ok(ListStream {
            source,
            failed: false,
        })
    }
}

enum ListSource {
    Snapshot(DeviceStream),
    Live(Subscription),
}

/// Event stream returned by [`DeviceService::list`].
///
/// The stream ends after the first error it yields.
pub struct ListStream {
    source: ListSource,
    failed: bool,
}

impl ListStream {
    /// Whether the stream follows live changes after the replay.
    pub fn is_subscribed(&self) -> bool {
        matches!(self.source, ListSource::Live(_))
    }

    /// Stop the stream and wait until its resources are released.
    pub async fn close(self) {
        if let ListSource::Live(subscription) = self.source {
            subscription.cancel().await;
        }
    }
}

impl Stream for ListStream {
    type Item = Result<DeviceEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.failed {
            return Poll::Ready(None);
        }
        let item = match &mut self.source {
            ListSource::Snapshot(devices) => ready!(devices.poll_next_unpin(cx))
                .map(|r| r.map(DeviceEvent::replayed).map_err(ServiceError::from)),
            ListSource::Live(subscription) => {
                ready!(subscription.poll_next_unpin(cx)).map(|r| r.map_err(ServiceError::from))
            }
        };
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        Poll::Ready(item)
    }
}
