//! Relay gateway
//!
//! Entry point for the HTTP layer. Classifies each action and routes it to the
//! agent link, the smart-bulb pool, Wake-on-LAN or local execution. Sensor gauges
//! are read through the cached bridge proxy.

use deckrelay_connection::{AgentLink, LinkConfig};
use deckrelay_device::{DevicePool, DevicePoolConfig, LightCommand, YeelightConnector};
use deckrelay_proto::{AgentAddress, AgentRequest, TelemetryMetric};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::action::{classify, ActionRequest, Dispatch};
use crate::config::PanelConfig;
use crate::error::RelayError;
use crate::executor::{LocalExecutor, ShellExecutor};
use crate::sensors::{SensorConfig, SensorProxy, SensorReading};
use crate::wol::send_magic_packet;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub link: LinkConfig,
    pub devices: DevicePoolConfig,
    pub lights: YeelightConnector,
    pub sensors: SensorConfig,
    /// Deadline for actions executed on the PC
    pub call_timeout: Duration,
    /// Deadline for telemetry reads
    pub telemetry_timeout: Duration,
    /// Where Wake-on-LAN packets are sent
    pub wol_target: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            devices: DevicePoolConfig::default(),
            lights: YeelightConnector::default(),
            sensors: SensorConfig::default(),
            call_timeout: Duration::from_secs(5),
            telemetry_timeout: Duration::from_secs(2),
            wol_target: SocketAddr::from(([255, 255, 255, 255], 9)),
        }
    }
}

/// Reachability of the PC agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Connected,
    Disconnected,
}

impl AgentStatus {
    /// Label reported to the panel
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Connected => "online",
            AgentStatus::Disconnected => "offline",
        }
    }
}

/// Result of an executed action
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ActionOutcome {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Routes panel actions to their destination
pub struct RelayGateway {
    config: GatewayConfig,
    link: AgentLink,
    lights: DevicePool<YeelightConnector>,
    sensors: SensorProxy,
    executor: Arc<dyn LocalExecutor>,
}

impl RelayGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_executor(config, Arc::new(ShellExecutor))
    }

    pub fn with_executor(config: GatewayConfig, executor: Arc<dyn LocalExecutor>) -> Self {
        let link = AgentLink::new(config.link.clone());
        let lights = DevicePool::new(config.lights.clone(), config.devices.clone());
        let sensors = SensorProxy::new(config.sensors.clone());

        Self {
            config,
            link,
            lights,
            sensors,
            executor,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn link(&self) -> &AgentLink {
        &self.link
    }

    pub fn lights(&self) -> &DevicePool<YeelightConnector> {
        &self.lights
    }

    pub fn sensors(&self) -> &SensorProxy {
        &self.sensors
    }

    /// Begin connecting to the agent, if an address is known
    pub fn start(&self, agent: Option<AgentAddress>) {
        match agent {
            Some(address) => {
                self.update_agent_address(address);
            }
            None => info!("No PC agent configured"),
        }
    }

    /// Point the link at a (possibly new) agent address
    pub fn update_agent_address(&self, address: AgentAddress) -> bool {
        info!(agent = %address, "Using PC agent address");
        self.link.set_target(address)
    }

    /// React to a saved panel configuration
    pub fn apply_config(&self, config: &PanelConfig) {
        self.sensors.set_url(config.sensor_endpoint());
        if let Some(address) = &config.pc_server {
            self.update_agent_address(address.clone());
        }
    }

    /// Current agent reachability, read straight from the link
    pub fn status(&self) -> AgentStatus {
        if self.link.is_connected() {
            AgentStatus::Connected
        } else {
            AgentStatus::Disconnected
        }
    }

    /// Execute a panel action
    pub async fn execute(&self, action: ActionRequest) -> Result<ActionOutcome, RelayError> {
        let dispatch = classify(&action)?;
        debug!(?dispatch, "Classified action");

        match dispatch {
            Dispatch::Agent(request) => {
                let response = self.link.call(request, self.config.call_timeout).await?;
                Ok(ActionOutcome {
                    message: "Executed on Server".to_string(),
                    stdout: None,
                    details: serde_json::to_value(&response).ok(),
                })
            }
            Dispatch::WakeOnLan(mac) => {
                send_magic_packet(&mac, self.config.wol_target).await?;
                Ok(ActionOutcome::message("Magic Packet sent"))
            }
            Dispatch::Local(command) => {
                let output = self.executor.execute(&command).await?;
                Ok(ActionOutcome {
                    message: "Executed on Client".to_string(),
                    stdout: Some(output.stdout),
                    details: None,
                })
            }
            Dispatch::Legacy => {
                if self.link.is_connected() {
                    Err(RelayError::InvalidRequest(
                        "Please configure target to 'Server' for this block.".to_string(),
                    ))
                } else {
                    Err(RelayError::NotConnected)
                }
            }
        }
    }

    /// Run a light command on the bulb at `address`
    pub async fn control_light(
        &self,
        address: &str,
        command: LightCommand,
    ) -> Result<String, RelayError> {
        command.validate()?;

        let message = self
            .lights
            .with_session(address, move |session| {
                Box::pin(async move { command.apply(session).await })
            })
            .await?;

        info!(address = %address, message = %message, "Light command done");
        Ok(message)
    }

    /// Set the PC master volume; the value (panel slider range 0-65535) is forwarded as is
    pub fn set_volume(&self, value: f64) -> Result<(), RelayError> {
        self.notify(AgentRequest::Volume { value })
    }

    pub fn restart_agent(&self) -> Result<(), RelayError> {
        self.notify(AgentRequest::RestartServer)
    }

    pub fn stop_agent(&self) -> Result<(), RelayError> {
        self.notify(AgentRequest::StopServer)
    }

    fn notify(&self, request: AgentRequest) -> Result<(), RelayError> {
        self.link.send(request)?;
        Ok(())
    }

    /// Read one gauge from the agent
    pub async fn telemetry(&self, metric: TelemetryMetric) -> Result<Value, RelayError> {
        let response = self
            .link
            .call(metric.request(), self.config.telemetry_timeout)
            .await?;
        Ok(response.value.unwrap_or(Value::Null))
    }

    /// Read one Xiaomi sensor gauge
    pub async fn sensor(&self, reading: SensorReading) -> Result<Value, RelayError> {
        self.sensors.read(reading).await
    }

    /// Stop the link and close every bulb session
    pub async fn shutdown(&self) {
        self.link.shutdown();
        self.lights.close_all().await;
        info!("Relay gateway stopped");
    }
}

impl fmt::Debug for RelayGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayGateway")
            .field("link", &self.link)
            .field("lights", &self.lights)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.telemetry_timeout, Duration::from_secs(2));
        assert_eq!(config.wol_target.to_string(), "255.255.255.255:9");
        assert_eq!(config.lights.port, 55443);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(AgentStatus::Connected.as_str(), "online");
        assert_eq!(AgentStatus::Disconnected.as_str(), "offline");
    }

    #[tokio::test]
    async fn test_new_gateway_is_offline() {
        let gateway = RelayGateway::new(GatewayConfig::default());
        gateway.start(None);

        assert_eq!(gateway.status(), AgentStatus::Disconnected);
        assert!(matches!(
            gateway.telemetry(TelemetryMetric::Cpu).await,
            Err(RelayError::NotConnected)
        ));
        assert!(matches!(
            gateway.set_volume(0.5),
            Err(RelayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_invalid_light_command_skips_pool() {
        let gateway = RelayGateway::new(GatewayConfig::default());

        let result = gateway
            .control_light("192.0.2.1", LightCommand::Brightness(0))
            .await;
        assert!(matches!(result, Err(RelayError::InvalidRequest(_))));
        assert_eq!(gateway.lights().handshakes(), 0);
    }

    #[test]
    fn test_apply_config_points_sensors_at_bridge() {
        let gateway = RelayGateway::new(GatewayConfig::default());

        let config = PanelConfig::from_value(serde_json::json!({
            "xiaomiUrl": "http://10.0.0.9:5000/api/current",
        }))
        .unwrap();
        gateway.apply_config(&config);
        assert_eq!(gateway.sensors().url(), "http://10.0.0.9:5000/api/current");
        assert!(gateway.link().target().is_none());

        gateway.apply_config(&PanelConfig::default());
        assert_eq!(gateway.sensors().url(), crate::sensors::DEFAULT_SENSOR_URL);
    }
}
