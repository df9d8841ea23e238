//! HTTP API used by the control panel
//!
//! Thin axum layer over [`RelayGateway`]: handlers deserialize the panel's
//! request bodies, call the gateway and map its errors to status codes.

pub mod handlers;
pub mod models;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Json, Router,
};
use deckrelay_lib::{ConfigStore, RelayGateway};
use std::future::Future;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tokio::sync::Notify;
use tracing::info;
use utoipa::OpenApi;

/// Application state shared across handlers
pub struct AppState {
    pub gateway: Arc<RelayGateway>,
    pub config_store: ConfigStore,
    /// Signalled by the stop/restart endpoints
    pub shutdown: Arc<Notify>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Deck Relay API",
        version = "0.1.0",
        description = "Control panel API relaying actions to a PC agent and LAN devices",
        contact(
            name = "Deck Relay Team",
            email = "team@deckrelay.dev"
        )
    ),
    paths(
        handlers::health_check,
        handlers::server_status,
        handlers::get_config,
        handlers::save_config,
        handlers::execute_action,
        handlers::yeelight_toggle,
        handlers::yeelight_brightness,
        handlers::yeelight_color_temp,
        handlers::yeelight_color,
        handlers::yeelight_hue,
        handlers::set_master_volume,
        handlers::restart_pc_server,
        handlers::stop_pc_server,
        handlers::get_cpu_usage,
        handlers::get_ram_usage,
        handlers::get_gpu_usage,
        handlers::get_vram_usage_percent,
        handlers::get_vram_usage_gb,
        handlers::get_xiaomi_temperature,
        handlers::get_xiaomi_humidity,
        handlers::get_xiaomi_battery,
        handlers::restart_server,
        handlers::stop_server,
    ),
    components(
        schemas(
            models::HealthResponse,
            models::ServerStatusResponse,
            models::MessageResponse,
            models::ErrorResponse,
            models::ValueResponse,
            models::ActionTargetModel,
            models::WolConfigModel,
            models::ExecuteActionRequest,
            models::ExecuteActionResponse,
            models::YeelightToggleRequest,
            models::YeelightBrightnessRequest,
            models::YeelightColorTempRequest,
            models::YeelightColorRequest,
            models::YeelightHueRequest,
            models::VolumeRequest,
            deckrelay_proto::AgentAddress,
        )
    ),
    tags(
        (name = "system", description = "Health and agent status"),
        (name = "config", description = "Panel configuration"),
        (name = "actions", description = "Tile actions"),
        (name = "lights", description = "Yeelight bulbs"),
        (name = "agent", description = "PC agent controls"),
        (name = "telemetry", description = "PC agent gauges"),
        (name = "sensors", description = "Xiaomi sensor gauges")
    )
)]
pub struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Allow cross-origin requests (panel served from another origin)
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_cors: true,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, gateway: Arc<RelayGateway>, config_store: ConfigStore) -> Self {
        let state = Arc::new(AppState {
            gateway,
            config_store,
            shutdown: Arc::new(Notify::new()),
        });

        Self { config, state }
    }

    /// Signal that stops [`ApiServer::start`], as the stop/restart endpoints do
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.state.shutdown.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route("/api/server-status", get(handlers::server_status))
            .route(
                "/api/config",
                get(handlers::get_config).post(handlers::save_config),
            )
            .route("/api/execute-action", post(handlers::execute_action))
            .route("/api/yeelight-toggle", post(handlers::yeelight_toggle))
            .route("/api/yeelight-brightness", post(handlers::yeelight_brightness))
            .route("/api/yeelight-color-temp", post(handlers::yeelight_color_temp))
            .route("/api/yeelight-color", post(handlers::yeelight_color))
            .route("/api/yeelight-hue", post(handlers::yeelight_hue))
            .route("/api/set-master-volume", post(handlers::set_master_volume))
            .route("/api/restart-pc-server", post(handlers::restart_pc_server))
            .route("/api/stop-pc-server", post(handlers::stop_pc_server))
            .route("/api/get-cpu-usage", get(handlers::get_cpu_usage))
            .route("/api/get-ram-usage", get(handlers::get_ram_usage))
            .route("/api/get-gpu-usage", get(handlers::get_gpu_usage))
            .route("/api/get-cuda-usage", get(handlers::get_gpu_usage))
            .route(
                "/api/get-vram-usage-percent",
                get(handlers::get_vram_usage_percent),
            )
            .route("/api/get-vram-usage-gb", get(handlers::get_vram_usage_gb))
            .route(
                "/api/get-xiaomi-temperature",
                get(handlers::get_xiaomi_temperature),
            )
            .route("/api/get-xiaomi-humidity", get(handlers::get_xiaomi_humidity))
            .route("/api/get-xiaomi-battery", get(handlers::get_xiaomi_battery))
            .route("/api/restart-server", post(handlers::restart_server))
            .route("/api/stop-server", post(handlers::stop_server))
            .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
            .with_state(self.state.clone());

        let mut router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_origin(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Serve until `shutdown` resolves or the panel asks the server to stop
    pub async fn start<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("Starting API server on {}", listener.local_addr()?);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        let requested = self.state.shutdown.clone();
        let stop = async move {
            tokio::select! {
                _ = shutdown => {}
                _ = requested.notified() => info!("Shutdown requested via API"),
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(stop)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();

        assert!(json["paths"]["/api/execute-action"].is_object());
        assert!(json["paths"]["/api/get-vram-usage-gb"].is_object());
        assert!(json["paths"]["/api/get-xiaomi-battery"].is_object());
        assert!(json["paths"]["/api/stop-server"].is_object());
    }
}
