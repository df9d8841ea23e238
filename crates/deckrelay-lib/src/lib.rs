//! Deck Relay Library - gateway between the control panel, the PC agent and LAN devices
//!
//! The panel never talks to the agent or the bulbs directly. Every action goes
//! through [`RelayGateway`], which decides per action whether it runs on the PC
//! (over the [`AgentLink`]), on a smart bulb (through the [`DevicePool`]), as a
//! Wake-on-LAN packet, or as a local command on this host. It also proxies the
//! Xiaomi sensor bridge for the panel's client-side gauges.
//!
//! ```ignore
//! use deckrelay_lib::{ActionRequest, AgentAddress, GatewayConfig, RelayGateway};
//!
//! let gateway = RelayGateway::new(GatewayConfig::default());
//! gateway.start(Some(AgentAddress::new("192.168.1.10", 8765)));
//!
//! let outcome = gateway
//!     .execute(ActionRequest::server_command("notepad.exe todo.txt"))
//!     .await?;
//! println!("{}", outcome.message);
//! ```
//!
//! # Architecture
//!
//! - **`deckrelay-proto`**: agent wire protocol
//! - **`deckrelay-control`**: request correlator (`PendingRequests`)
//! - **`deckrelay-connection`**: agent link state machine
//! - **`deckrelay-device`**: pooled smart-bulb sessions
//!
//! The commonly used types from these crates are re-exported here.

pub mod action;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod sensors;
pub mod wol;

pub use action::{classify, ActionRequest, ActionTarget, Dispatch, WolConfig};
pub use config::{ConfigStore, PanelConfig};
pub use error::RelayError;
pub use executor::{ExecOutput, LocalExecutor, ShellExecutor};
pub use gateway::{ActionOutcome, AgentStatus, GatewayConfig, RelayGateway};
pub use sensors::{SensorConfig, SensorProxy, SensorReading, DEFAULT_SENSOR_URL};

// Re-export building blocks
pub use deckrelay_connection::{AgentLink, LinkConfig, LinkError, LinkState};
pub use deckrelay_control::{CorrelationError, PendingRequests};
pub use deckrelay_device::{
    DeviceError, DevicePool, DevicePoolConfig, LightCommand, YeelightConnector, YEELIGHT_PORT,
};
pub use deckrelay_proto::{AgentAddress, AgentRequest, AgentResponse, TelemetryMetric};

// Re-export async_trait for custom executors
pub use async_trait::async_trait;
