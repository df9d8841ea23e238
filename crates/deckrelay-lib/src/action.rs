//! Action requests from the panel and how they are routed

use deckrelay_proto::{AgentRequest, AudioAction};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::wol::parse_mac;

/// Where an action should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionTarget {
    /// The PC running the agent
    Server,
    /// This host
    Client,
}

/// Wake-on-LAN parameters attached to a `WOL` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WolConfig {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Body of `POST /api/execute-action`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wol_config: Option<WolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActionTarget>,
}

impl ActionRequest {
    pub fn server_command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            target: Some(ActionTarget::Server),
            ..Default::default()
        }
    }

    pub fn server_shortcut(shortcut: impl Into<String>) -> Self {
        Self {
            shortcut: Some(shortcut.into()),
            target: Some(ActionTarget::Server),
            ..Default::default()
        }
    }

    pub fn client_command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            target: Some(ActionTarget::Client),
            ..Default::default()
        }
    }

    fn command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    fn shortcut(&self) -> Option<&str> {
        self.shortcut.as_deref().filter(|s| !s.is_empty())
    }
}

/// Where a classified action goes
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Correlated call to the PC agent
    Agent(AgentRequest),
    /// Magic packet for this MAC
    WakeOnLan([u8; 6]),
    /// Shell command run on this host
    Local(String),
    /// Looks like a PC action but was not targeted at the server
    Legacy,
}

const PLAY_AUDIO: &str = "PLAY_AUDIO";

/// Decide where an action runs
pub fn classify(action: &ActionRequest) -> Result<Dispatch, RelayError> {
    if action.target == Some(ActionTarget::Server) {
        return agent_request(action).map(Dispatch::Agent);
    }

    let command = action.command();

    if command == Some("WOL") {
        if let Some(wol) = &action.wol_config {
            let mac = parse_mac(&wol.mac)?;
            return Ok(Dispatch::WakeOnLan(mac));
        }
    }

    if let Some(command) = command {
        if command.starts_with("curl") || command.starts_with("start") {
            return Ok(Dispatch::Local(command.to_string()));
        }
    }

    let legacy = command.is_some_and(|c| {
        c.contains("nircmd") || c.contains("AUDIO") || action.shortcut().is_some()
    });
    if legacy {
        return Ok(Dispatch::Legacy);
    }

    Err(RelayError::InvalidRequest(
        "Command not handled on Client.".to_string(),
    ))
}

/// Build the agent request for a server-targeted action
fn agent_request(action: &ActionRequest) -> Result<AgentRequest, RelayError> {
    if let Some(shortcut) = action.shortcut() {
        return Ok(AgentRequest::Shortcut {
            shortcut: shortcut.to_string(),
        });
    }

    let Some(command) = action.command() else {
        return Err(RelayError::InvalidRequest("Nothing to execute".to_string()));
    };

    let request = match command {
        "STOP_ALL_AUDIO" => AgentRequest::Audio {
            audio_action: AudioAction::StopAll,
            file_path: None,
        },
        "STOP_AUDIO" => AgentRequest::Audio {
            audio_action: AudioAction::Stop,
            file_path: None,
        },
        _ if command.starts_with(PLAY_AUDIO) => AgentRequest::Audio {
            audio_action: AudioAction::Play,
            file_path: Some(command[PLAY_AUDIO.len()..].trim().to_string()),
        },
        _ => {
            let mut parts = command.split_whitespace().map(str::to_string);
            // `command()` filtered blank strings, so there is a first word
            let program = parts.next().unwrap_or_default();
            AgentRequest::Command {
                command: program,
                args: parts.collect(),
            }
        }
    };

    Ok(request)
}
