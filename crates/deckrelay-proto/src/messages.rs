//! Protocol message types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::DEFAULT_AGENT_PORT;

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

/// Network location of the PC agent (persisted as `pcServer`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentAddress {
    /// Host name or IP address of the agent
    pub ip: String,
    /// WebSocket port of the agent
    #[serde(default = "default_agent_port")]
    pub port: u16,
}

impl AgentAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// URL the link dials
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("Agent address is empty")]
    Empty,

    #[error("Invalid agent port: {0}")]
    InvalidPort(String),
}

impl FromStr for AgentAddress {
    type Err = AddressParseError;

    /// Accepts `host:port` or a bare `host` (default port)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| AddressParseError::InvalidPort(port.to_string()))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(AddressParseError::Empty),
            None => Ok(Self::new(s, DEFAULT_AGENT_PORT)),
        }
    }
}

/// Audio sub-command understood by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioAction {
    Play,
    Stop,
    StopAll,
}

/// Request executed by the agent on the PC it runs on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Run a program with arguments
    Command { command: String, args: Vec<String> },

    /// Send a keyboard shortcut
    Shortcut { shortcut: String },

    /// Play or stop audio
    Audio {
        audio_action: AudioAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
    },

    /// Set the master volume
    Volume { value: f64 },

    /// Restart the agent process
    RestartServer,

    /// Stop the agent process
    StopServer,

    // Telemetry
    GetCpu,
    GetRam,
    GetGpu,
    GetVramPercent,
    GetVramGb,
}

/// Gauges the agent can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMetric {
    Cpu,
    Ram,
    Gpu,
    VramPercent,
    VramGb,
}

impl TelemetryMetric {
    pub fn request(self) -> AgentRequest {
        match self {
            TelemetryMetric::Cpu => AgentRequest::GetCpu,
            TelemetryMetric::Ram => AgentRequest::GetRam,
            TelemetryMetric::Gpu => AgentRequest::GetGpu,
            TelemetryMetric::VramPercent => AgentRequest::GetVramPercent,
            TelemetryMetric::VramGb => AgentRequest::GetVramGb,
        }
    }
}

/// Outbound envelope: `{ id?, type, ...fields }`
///
/// `id` is only present when the sender waits for a correlated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub request: AgentRequest,
}

impl RelayMessage {
    /// Fire-and-forget message
    pub fn notify(request: AgentRequest) -> Self {
        Self { id: None, request }
    }

    /// Message expecting a reply carrying the same `id`
    pub fn correlated(id: impl Into<String>, request: AgentRequest) -> Self {
        Self {
            id: Some(id.into()),
            request,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outcome reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Inbound reply: `{ id, status, value?, message? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Agent-specific extras (stdout, stderr, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentResponse {
    pub fn success(id: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            status: ResponseStatus::Success,
            value,
            message: None,
            extra: Map::new(),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: ResponseStatus::Error,
            value: None,
            message: Some(message.into()),
            extra: Map::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notify_has_no_id() {
        let msg = RelayMessage::notify(AgentRequest::Volume { value: 0.4 });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value, json!({ "type": "volume", "value": 0.4 }));
    }

    #[test]
    fn test_correlated_message_shape() {
        let msg = RelayMessage::correlated(
            "abc123",
            AgentRequest::Command {
                command: "notepad.exe".to_string(),
                args: vec!["todo.txt".to_string()],
            },
        );
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "id": "abc123",
                "type": "command",
                "command": "notepad.exe",
                "args": ["todo.txt"],
            })
        );
    }

    #[test]
    fn test_unit_requests_use_snake_case_tags() {
        let cases = [
            (AgentRequest::RestartServer, "restart_server"),
            (AgentRequest::StopServer, "stop_server"),
            (TelemetryMetric::Cpu.request(), "get_cpu"),
            (TelemetryMetric::VramPercent.request(), "get_vram_percent"),
            (TelemetryMetric::VramGb.request(), "get_vram_gb"),
        ];

        for (request, tag) in cases {
            let value = serde_json::to_value(RelayMessage::notify(request)).unwrap();
            assert_eq!(value, json!({ "type": tag }));
        }
    }

    #[test]
    fn test_audio_file_path_omitted_when_absent() {
        let stop = serde_json::to_value(AgentRequest::Audio {
            audio_action: AudioAction::StopAll,
            file_path: None,
        })
        .unwrap();
        assert_eq!(stop, json!({ "type": "audio", "audio_action": "stop_all" }));

        let play = serde_json::to_value(AgentRequest::Audio {
            audio_action: AudioAction::Play,
            file_path: Some("C:/sounds/airhorn.mp3".to_string()),
        })
        .unwrap();
        assert_eq!(play["file_path"], "C:/sounds/airhorn.mp3");
    }

    #[test]
    fn test_parse_success_response_keeps_extras() {
        let response =
            AgentResponse::parse(r#"{"id":"x1","status":"success","value":42.5,"stdout":"ok"}"#)
                .unwrap();

        assert_eq!(response.id.as_deref(), Some("x1"));
        assert!(!response.is_error());
        assert_eq!(response.value, Some(json!(42.5)));
        assert_eq!(response.extra.get("stdout"), Some(&json!("ok")));
    }

    #[test]
    fn test_parse_error_response() {
        let response =
            AgentResponse::parse(r#"{"id":"x2","status":"error","message":"boom"}"#).unwrap();

        assert!(response.is_error());
        assert_eq!(response.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_parse_rejects_message_without_status() {
        assert!(AgentResponse::parse(r#"{"id":"x3"}"#).is_err());
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!(
            "192.168.1.20:9000".parse::<AgentAddress>().unwrap(),
            AgentAddress::new("192.168.1.20", 9000)
        );
        assert_eq!(
            "desktop.lan".parse::<AgentAddress>().unwrap(),
            AgentAddress::new("desktop.lan", DEFAULT_AGENT_PORT)
        );
        assert_eq!("".parse::<AgentAddress>(), Err(AddressParseError::Empty));
        assert!(matches!(
            "host:notaport".parse::<AgentAddress>(),
            Err(AddressParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_address_defaults_port_when_missing_in_json() {
        let address: AgentAddress = serde_json::from_value(json!({ "ip": "10.0.0.2" })).unwrap();

        assert_eq!(address.port, DEFAULT_AGENT_PORT);
        assert_eq!(address.ws_url(), "ws://10.0.0.2:8765");
        assert_eq!(address.to_string(), "10.0.0.2:8765");
    }
}
