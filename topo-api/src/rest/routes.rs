use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};
use crate::device;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "topo API Server",
        version = "0.1.0",
        description = "REST API for the network device inventory. Device records are versioned; updates and removals are guarded by revision.",
        license(name = "MIT")
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "devices", description = "Device inventory and change events")
    ),
    paths(
        handlers::get_version,
        handlers::list_devices,
        handlers::device_events,
        handlers::create_device,
        handlers::get_device,
        handlers::update_device,
        handlers::delete_device,
    ),
    components(schemas(
        handlers::VersionInfo,
        handlers::ApiError,
        device::Device,
        device::DeviceId,
        device::Revision,
        device::Credentials,
        device::TlsConfig,
        device::Protocol,
        device::ConnectivityState,
        device::ChannelState,
        device::ServiceState,
        device::ProtocolState,
        device::EventType,
        device::DeviceEvent,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        // System
        .route("/version", get(handlers::get_version))
        // Devices
        .route(
            "/devices",
            get(handlers::list_devices).post(handlers::create_device),
        )
        .route("/devices/events", get(handlers::device_events))
        .route(
            "/devices/{id}",
            get(handlers::get_device)
                .put(handlers::update_device)
                .delete(handlers::delete_device),
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/v1", routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
