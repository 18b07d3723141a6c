use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Sse, sse::Event as SseEvent},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};

use crate::audit::DeviceAuditLogger;
use crate::device::{Device, DeviceId, Revision};
use crate::service::{DeviceService, ServiceError};

/// Shared application state
pub struct AppState {
    pub service: Arc<DeviceService>,
    pub audit: Arc<DeviceAuditLogger>,
}

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl ApiError {
    fn bad_request(error: String) -> Self {
        ApiError { error, code: 400 }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            400 => StatusCode::BAD_REQUEST,
            404 => StatusCode::NOT_FOUND,
            409 => StatusCode::CONFLICT,
            503 => StatusCode::SERVICE_UNAVAILABLE,
            504 => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let code = match &e {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::AlreadyExists(_) | ServiceError::Conflict(_) => 409,
            ServiceError::Unavailable(_) => 503,
            ServiceError::Timeout(_) => 504,
            ServiceError::Stream(_) | ServiceError::Internal(_) => 500,
        };
        ApiError {
            error: e.to_string(),
            code,
        }
    }
}

// === Version ===

/// Version information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Get service version
#[utoipa::path(
    get,
    path = "/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// === Devices ===

/// List all devices
#[utoipa::path(
    get,
    path = "/v1/devices",
    responses(
        (status = 200, description = "List of devices", body = Vec<Device>),
        (status = 504, description = "Store timed out", body = ApiError)
    ),
    tag = "devices"
)]
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Device>>, ApiError> {
    let mut events = state.service.list(false).await?;
    let mut devices = Vec::new();
    while let Some(event) = events.next().await {
        devices.push(event?.device);
    }
    Ok(Json(devices))
}

/// Query parameters for the device event stream
#[derive(Deserialize, IntoParams)]
pub struct DeviceEventsQuery {
    /// Keep the stream open for live changes after the replay
    #[serde(default)]
    pub subscribe: bool,
}

/// Stream devices as Server-Sent Events
///
/// Every current device is sent as a `NONE` event. With `subscribe=true`
/// the stream then carries `INSERTED`, `UPDATED` and `REMOVED` events until
/// the client disconnects.
#[utoipa::path(
    get,
    path = "/v1/devices/events",
    params(DeviceEventsQuery),
    responses(
        (status = 200, description = "Event stream of DeviceEvent JSON payloads", body = String, content_type = "text/event-stream")
    ),
    tag = "devices"
)]
pub async fn device_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceEventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let mut events = state.service.list(query.subscribe).await?;

    // Dropping the stream on client disconnect releases the subscription
    let stream = async_stream::stream! {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(data) => {
                        yield Ok(SseEvent::default().event(event.event_type.as_str()).data(data));
                    }
                    Err(e) => tracing::warn!("Failed to encode device event: {}", e),
                },
                Err(e) => {
                    tracing::warn!("Device event stream failed: {}", e);
                    yield Ok(SseEvent::default().event("error").data(e.to_string()));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    ))
}

/// Add a device
#[utoipa::path(
    post,
    path = "/v1/devices",
    request_body = Device,
    responses(
        (status = 201, description = "Device added", body = Device),
        (status = 400, description = "Invalid device", body = ApiError),
        (status = 409, description = "Device already exists", body = ApiError)
    ),
    tag = "devices"
)]
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(device): Json<Device>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    let device = state.service.add(device).await?;
    state
        .audit
        .device_added(device.id.as_str(), &device.address, device.revision.0);
    Ok((StatusCode::CREATED, Json(device)))
}

/// Get a device
#[utoipa::path(
    get,
    path = "/v1/devices/{id}",
    params(
        ("id" = String, Path, description = "Device ID")
    ),
    responses(
        (status = 200, description = "Device", body = Device),
        (status = 404, description = "Device not found", body = ApiError)
    ),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device = state.service.get(&DeviceId(id)).await?;
    Ok(Json(device))
}

/// Update a device
///
/// The body must carry the revision it was read at; a stale revision is
/// rejected with 409.
#[utoipa::path(
    put,
    path = "/v1/devices/{id}",
    params(
        ("id" = String, Path, description = "Device ID")
    ),
    request_body = Device,
    responses(
        (status = 200, description = "Device updated", body = Device),
        (status = 400, description = "Invalid device", body = ApiError),
        (status = 404, description = "Device not found", body = ApiError),
        (status = 409, description = "Revision conflict", body = ApiError)
    ),
    tag = "devices"
)]
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut device): Json<Device>,
) -> Result<Json<Device>, ApiError> {
    if device.id.is_empty() {
        device.id = DeviceId(id);
    } else if device.id.as_str() != id {
        return Err(ApiError::bad_request(format!(
            "device ID '{}' does not match path '{}'",
            device.id, id
        )));
    }

    let device = state.service.update(device).await?;
    state
        .audit
        .device_updated(device.id.as_str(), device.revision.0);
    Ok(Json(device))
}

/// Query parameters for device removal
#[derive(Deserialize, IntoParams)]
pub struct DeleteDeviceQuery {
    /// Only remove the device if it is still at this revision
    pub revision: Option<u64>,
}

/// Remove a device
#[utoipa::path(
    delete,
    path = "/v1/devices/{id}",
    params(
        ("id" = String, Path, description = "Device ID"),
        DeleteDeviceQuery
    ),
    responses(
        (status = 200, description = "Removed device", body = Device),
        (status = 404, description = "Device not found", body = ApiError),
        (status = 409, description = "Revision conflict", body = ApiError)
    ),
    tag = "devices"
)]
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteDeviceQuery>,
) -> Result<Json<Device>, ApiError> {
    let mut device = Device::new(id);
    device.revision = Revision(query.revision.unwrap_or(0));

    let removed = state.service.remove(&device).await?;
    state.audit.device_removed(removed.id.as_str());
    Ok(Json(removed))
}
