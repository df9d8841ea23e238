use deckrelay_lib::{ActionOutcome, ActionRequest, ActionTarget, WolConfig};
use deckrelay_proto::AgentAddress;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// PC agent reachability (`online` or `offline`)
    pub agent_status: String,
    /// Configured PC agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentAddress>,
}

/// PC agent reachability
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerStatusResponse {
    /// `online` or `offline`
    pub status: String,
}

/// Generic success message
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Captured stderr of a failed local command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Telemetry reading
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValueResponse {
    #[schema(value_type = Object)]
    pub value: Value,
}

/// Where an action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionTargetModel {
    /// The PC running the agent
    Server,
    /// The panel host
    Client,
}

/// Wake-on-LAN settings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WolConfigModel {
    /// `AA:BB:CC:DD:EE:FF`
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Action triggered from a panel tile
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteActionRequest {
    /// Command line, or a keyword (`WOL`, `STOP_AUDIO`, `STOP_ALL_AUDIO`, `PLAY_AUDIO <file>`)
    #[serde(default)]
    pub command: Option<String>,
    /// Keyboard shortcut sent to the PC
    #[serde(default)]
    pub shortcut: Option<String>,
    #[serde(default)]
    pub wol_config: Option<WolConfigModel>,
    #[serde(default)]
    pub target: Option<ActionTargetModel>,
}

impl From<ExecuteActionRequest> for ActionRequest {
    fn from(req: ExecuteActionRequest) -> Self {
        ActionRequest {
            command: req.command,
            shortcut: req.shortcut,
            wol_config: req.wol_config.map(|wol| WolConfig {
                mac: wol.mac,
                method: wol.method,
            }),
            target: req.target.map(|target| match target {
                ActionTargetModel::Server => ActionTarget::Server,
                ActionTargetModel::Client => ActionTarget::Client,
            }),
        }
    }
}

/// Result of an executed action
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecuteActionResponse {
    pub message: String,
    /// Output of a local command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Raw agent reply
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<Value>,
}

impl From<ActionOutcome> for ExecuteActionResponse {
    fn from(outcome: ActionOutcome) -> Self {
        Self {
            message: outcome.message,
            stdout: outcome.stdout,
            details: outcome.details,
        }
    }
}

/// Power action for a bulb
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct YeelightToggleRequest {
    pub yeelight_ip: String,
    /// `toggle`, `on` or `off`
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct YeelightBrightnessRequest {
    pub yeelight_ip: String,
    /// 1-100
    pub brightness: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct YeelightColorTempRequest {
    pub yeelight_ip: String,
    /// Kelvin, 1700-6500
    pub color_temp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct YeelightColorRequest {
    pub yeelight_ip: String,
    /// `#rrggbb`
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct YeelightHueRequest {
    pub yeelight_ip: String,
    /// 0-359
    pub hue: i64,
}

/// Master volume
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VolumeRequest {
    /// Panel slider position, 0 - 65535, forwarded to the agent unchanged
    pub value: f64,
}
