use axum::{extract::State, http::StatusCode, Json};
use deckrelay_lib::{LightCommand, PanelConfig, RelayError, SensorReading, TelemetryMetric};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            stderr: None,
        }),
    )
}

/// Map a gateway failure to a status code
fn relay_error(err: RelayError) -> ApiError {
    let status = match &err {
        RelayError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    debug!(status = %status, error = %err, "Request failed");

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            stderr: err.stderr().map(str::to_string),
        }),
    )
}

fn in_range<T: TryFrom<i64>>(value: i64, message: &str) -> Result<T, ApiError> {
    T::try_from(value).map_err(|_| api_error(StatusCode::BAD_REQUEST, message))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agent_status: state.gateway.status().as_str().to_string(),
        agent: state.gateway.link().target(),
    })
}

/// PC agent reachability
#[utoipa::path(
    get,
    path = "/api/server-status",
    responses(
        (status = 200, description = "Agent status", body = ServerStatusResponse)
    ),
    tag = "system"
)]
pub async fn server_status(State(state): State<Arc<AppState>>) -> Json<ServerStatusResponse> {
    Json(ServerStatusResponse {
        status: state.gateway.status().as_str().to_string(),
    })
}

/// Read the panel configuration
#[utoipa::path(
    get,
    path = "/api/config",
    responses(
        (status = 200, description = "Stored configuration document"),
        (status = 500, description = "Configuration unreadable", body = ErrorResponse)
    ),
    tag = "config"
)]
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let config = state.config_store.load().await.map_err(|e| {
        error!("Failed to read config: {:#}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read config.")
    })?;

    config
        .to_value()
        .map(Json)
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read config."))
}

/// Replace the panel configuration
///
/// A `pcServer` entry re-targets the agent link.
#[utoipa::path(
    post,
    path = "/api/config",
    responses(
        (status = 200, description = "Configuration saved", body = MessageResponse),
        (status = 400, description = "Malformed configuration", body = ErrorResponse),
        (status = 500, description = "Configuration not written", body = ErrorResponse)
    ),
    tag = "config"
)]
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<MessageResponse> {
    let config = PanelConfig::from_value(body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{:#}", e)))?;

    state.config_store.save(&config).await.map_err(|e| {
        error!("Failed to save config: {:#}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save config.")
    })?;

    state.gateway.apply_config(&config);

    Ok(Json(MessageResponse::new("Config saved.")))
}

/// Execute a panel action
#[utoipa::path(
    post,
    path = "/api/execute-action",
    request_body = ExecuteActionRequest,
    responses(
        (status = 200, description = "Action executed", body = ExecuteActionResponse),
        (status = 400, description = "Action not understood", body = ErrorResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse),
        (status = 504, description = "PC agent did not answer", body = ErrorResponse),
        (status = 500, description = "Action failed", body = ErrorResponse)
    ),
    tag = "actions"
)]
pub async fn execute_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteActionRequest>,
) -> ApiResult<ExecuteActionResponse> {
    let outcome = state
        .gateway
        .execute(req.into())
        .await
        .map_err(relay_error)?;

    Ok(Json(outcome.into()))
}

async fn light(state: &AppState, address: &str, command: LightCommand) -> ApiResult<MessageResponse> {
    let message = state
        .gateway
        .control_light(address, command)
        .await
        .map_err(relay_error)?;
    Ok(Json(MessageResponse::new(message)))
}

/// Switch a bulb on, off, or toggle it
#[utoipa::path(
    post,
    path = "/api/yeelight-toggle",
    request_body = YeelightToggleRequest,
    responses(
        (status = 200, description = "Command applied", body = MessageResponse),
        (status = 400, description = "Invalid action", body = ErrorResponse),
        (status = 500, description = "Bulb unreachable or rejected the command", body = ErrorResponse)
    ),
    tag = "lights"
)]
pub async fn yeelight_toggle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YeelightToggleRequest>,
) -> ApiResult<MessageResponse> {
    let command = LightCommand::power(&req.action).map_err(|e| relay_error(e.into()))?;
    light(&state, &req.yeelight_ip, command).await
}

/// Set bulb brightness
#[utoipa::path(
    post,
    path = "/api/yeelight-brightness",
    request_body = YeelightBrightnessRequest,
    responses(
        (status = 200, description = "Command applied", body = MessageResponse),
        (status = 400, description = "Brightness out of range", body = ErrorResponse),
        (status = 500, description = "Bulb unreachable or rejected the command", body = ErrorResponse)
    ),
    tag = "lights"
)]
pub async fn yeelight_brightness(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YeelightBrightnessRequest>,
) -> ApiResult<MessageResponse> {
    let brightness = in_range(req.brightness, "Brightness must be 1-100")?;
    light(&state, &req.yeelight_ip, LightCommand::Brightness(brightness)).await
}

/// Set bulb colour temperature
#[utoipa::path(
    post,
    path = "/api/yeelight-color-temp",
    request_body = YeelightColorTempRequest,
    responses(
        (status = 200, description = "Command applied", body = MessageResponse),
        (status = 400, description = "Temperature out of range", body = ErrorResponse),
        (status = 500, description = "Bulb unreachable or rejected the command", body = ErrorResponse)
    ),
    tag = "lights"
)]
pub async fn yeelight_color_temp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YeelightColorTempRequest>,
) -> ApiResult<MessageResponse> {
    let kelvin = in_range(req.color_temp, "Color temperature must be 1700-6500K")?;
    light(&state, &req.yeelight_ip, LightCommand::ColorTemperature(kelvin)).await
}

/// Set bulb RGB colour
#[utoipa::path(
    post,
    path = "/api/yeelight-color",
    request_body = YeelightColorRequest,
    responses(
        (status = 200, description = "Command applied", body = MessageResponse),
        (status = 400, description = "Invalid hex colour", body = ErrorResponse),
        (status = 500, description = "Bulb unreachable or rejected the command", body = ErrorResponse)
    ),
    tag = "lights"
)]
pub async fn yeelight_color(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YeelightColorRequest>,
) -> ApiResult<MessageResponse> {
    light(&state, &req.yeelight_ip, LightCommand::Rgb(req.color)).await
}

/// Set bulb hue
#[utoipa::path(
    post,
    path = "/api/yeelight-hue",
    request_body = YeelightHueRequest,
    responses(
        (status = 200, description = "Command applied", body = MessageResponse),
        (status = 400, description = "Hue out of range", body = ErrorResponse),
        (status = 500, description = "Bulb unreachable or rejected the command", body = ErrorResponse)
    ),
    tag = "lights"
)]
pub async fn yeelight_hue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YeelightHueRequest>,
) -> ApiResult<MessageResponse> {
    let hue = in_range(req.hue, "Hue must be 0-359")?;
    light(&state, &req.yeelight_ip, LightCommand::Hue(hue)).await
}

/// Set the PC master volume
#[utoipa::path(
    post,
    path = "/api/set-master-volume",
    request_body = VolumeRequest,
    responses(
        (status = 200, description = "Volume sent", body = MessageResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn set_master_volume(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<MessageResponse> {
    state.gateway.set_volume(req.value).map_err(relay_error)?;
    Ok(Json(MessageResponse::new("Volume sent")))
}

/// Restart the PC agent
#[utoipa::path(
    post,
    path = "/api/restart-pc-server",
    responses(
        (status = 200, description = "Restart sent", body = MessageResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn restart_pc_server(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    state.gateway.restart_agent().map_err(relay_error)?;
    info!("Restart command sent to PC agent");
    Ok(Json(MessageResponse::new("Restart command sent to PC")))
}

/// Stop the PC agent
#[utoipa::path(
    post,
    path = "/api/stop-pc-server",
    responses(
        (status = 200, description = "Stop sent", body = MessageResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn stop_pc_server(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    state.gateway.stop_agent().map_err(relay_error)?;
    info!("Stop command sent to PC agent");
    Ok(Json(MessageResponse::new("Stop command sent to PC")))
}

async fn read_metric(state: &AppState, metric: TelemetryMetric) -> ApiResult<ValueResponse> {
    let value = state
        .gateway
        .telemetry(metric)
        .await
        .map_err(relay_error)?;
    Ok(Json(ValueResponse { value }))
}

/// CPU usage in percent
#[utoipa::path(
    get,
    path = "/api/get-cpu-usage",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse),
        (status = 504, description = "PC agent did not answer", body = ErrorResponse)
    ),
    tag = "telemetry"
)]
pub async fn get_cpu_usage(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_metric(&state, TelemetryMetric::Cpu).await
}

/// RAM usage in percent
#[utoipa::path(
    get,
    path = "/api/get-ram-usage",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse),
        (status = 504, description = "PC agent did not answer", body = ErrorResponse)
    ),
    tag = "telemetry"
)]
pub async fn get_ram_usage(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_metric(&state, TelemetryMetric::Ram).await
}

/// GPU usage in percent (also served as `/api/get-cuda-usage`)
#[utoipa::path(
    get,
    path = "/api/get-gpu-usage",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse),
        (status = 504, description = "PC agent did not answer", body = ErrorResponse)
    ),
    tag = "telemetry"
)]
pub async fn get_gpu_usage(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_metric(&state, TelemetryMetric::Gpu).await
}

/// VRAM usage in percent
#[utoipa::path(
    get,
    path = "/api/get-vram-usage-percent",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse),
        (status = 504, description = "PC agent did not answer", body = ErrorResponse)
    ),
    tag = "telemetry"
)]
pub async fn get_vram_usage_percent(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ValueResponse> {
    read_metric(&state, TelemetryMetric::VramPercent).await
}

/// VRAM usage in GB
#[utoipa::path(
    get,
    path = "/api/get-vram-usage-gb",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 503, description = "PC agent offline", body = ErrorResponse),
        (status = 504, description = "PC agent did not answer", body = ErrorResponse)
    ),
    tag = "telemetry"
)]
pub async fn get_vram_usage_gb(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_metric(&state, TelemetryMetric::VramGb).await
}

async fn read_sensor(state: &AppState, reading: SensorReading) -> ApiResult<ValueResponse> {
    let value = state.gateway.sensor(reading).await.map_err(relay_error)?;
    Ok(Json(ValueResponse { value }))
}

/// Xiaomi thermometer temperature in °C
#[utoipa::path(
    get,
    path = "/api/get-xiaomi-temperature",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 500, description = "Sensor bridge unreachable", body = ErrorResponse)
    ),
    tag = "sensors"
)]
pub async fn get_xiaomi_temperature(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_sensor(&state, SensorReading::Temperature).await
}

/// Xiaomi thermometer relative humidity
#[utoipa::path(
    get,
    path = "/api/get-xiaomi-humidity",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 500, description = "Sensor bridge unreachable", body = ErrorResponse)
    ),
    tag = "sensors"
)]
pub async fn get_xiaomi_humidity(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_sensor(&state, SensorReading::Humidity).await
}

/// Xiaomi thermometer battery level
#[utoipa::path(
    get,
    path = "/api/get-xiaomi-battery",
    responses(
        (status = 200, description = "Current reading", body = ValueResponse),
        (status = 500, description = "Sensor bridge unreachable", body = ErrorResponse)
    ),
    tag = "sensors"
)]
pub async fn get_xiaomi_battery(State(state): State<Arc<AppState>>) -> ApiResult<ValueResponse> {
    read_sensor(&state, SensorReading::Battery).await
}

/// Restart the panel backend
///
/// The server shuts down gracefully; the service manager starts it again.
#[utoipa::path(
    post,
    path = "/api/restart-server",
    responses(
        (status = 200, description = "Shutdown scheduled", body = MessageResponse)
    ),
    tag = "system"
)]
pub async fn restart_server(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    info!("Restart requested from the panel");
    state.shutdown.notify_one();
    Json(MessageResponse::new("Restarting Client..."))
}

/// Stop the panel backend
#[utoipa::path(
    post,
    path = "/api/stop-server",
    responses(
        (status = 200, description = "Shutdown scheduled", body = MessageResponse)
    ),
    tag = "system"
)]
pub async fn stop_server(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    info!("Stop requested from the panel");
    state.shutdown.notify_one();
    Json(MessageResponse::new("Stopping Client..."))
}
