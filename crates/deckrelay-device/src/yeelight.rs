//! Yeelight LAN control
//!
//! Bulbs listen on TCP port 55443 and speak newline-delimited JSON:
//! `{"id":1,"method":"set_power","params":["on","smooth",500]}\r\n` with replies
//! `{"id":1,"result":["ok"]}` or `{"id":1,"error":{"code":-1,"message":"..."}}`.
//! Bulbs also push `{"method":"props",...}` notifications to every open session.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::DeviceError;
use crate::pool::{DeviceConnector, DeviceSession};

/// Default Yeelight control port
pub const YEELIGHT_PORT: u16 = 55443;

const TRANSITION: &str = "smooth";
const TRANSITION_MS: u32 = 500;

/// Opens TCP sessions to Yeelight bulbs
#[derive(Debug, Clone)]
pub struct YeelightConnector {
    /// Port used when the address carries none
    pub port: u16,
    /// Upper bound on one command round-trip
    pub command_timeout: Duration,
}

impl Default for YeelightConnector {
    fn default() -> Self {
        Self {
            port: YEELIGHT_PORT,
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl YeelightConnector {
    /// `host:port` to dial; bare IPv6 addresses get the default port too
    fn endpoint(&self, address: &str) -> String {
        if address.parse::<SocketAddr>().is_ok() {
            return address.to_string();
        }

        let bare = address.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return SocketAddr::new(ip, self.port).to_string();
        }

        if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, self.port)
        }
    }
}

#[async_trait]
impl DeviceConnector for YeelightConnector {
    type Session = YeelightSession;

    async fn connect(&self, address: &str) -> Result<YeelightSession, DeviceError> {
        let endpoint = self.endpoint(address);
        let stream = TcpStream::connect(&endpoint)
            .await
            .map_err(|e| DeviceError::ConnectError(format!("{}: {}", endpoint, e)))?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        Ok(YeelightSession {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_id: 1,
            command_timeout: self.command_timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    #[serde(default)]
    message: String,
}

/// An open control connection to one bulb
pub struct YeelightSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
    command_timeout: Duration,
}

impl YeelightSession {
    /// Send one command and wait for its result
    pub async fn command(&mut self, method: &str, params: Value) -> Result<Value, DeviceError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = json!({ "id": id, "method": method, "params": params }).to_string();
        line.push_str("\r\n");
        debug!(id, method, "Sending bulb command");
        self.writer.write_all(line.as_bytes()).await?;

        tokio::time::timeout(self.command_timeout, self.read_reply(id))
            .await
            .map_err(|_| DeviceError::Timeout)?
    }

    async fn read_reply(&mut self, id: u64) -> Result<Value, DeviceError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(DeviceError::ConnectionClosed);
            }

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let reply: Reply = serde_json::from_str(text)
                .map_err(|e| DeviceError::Protocol(format!("{}: {}", e, text)))?;

            if reply.id != Some(id) {
                trace!(line = %text, "Skipping bulb notification");
                continue;
            }

            if let Some(error) = reply.error {
                return Err(DeviceError::Command(error.message));
            }
            return Ok(reply.result.unwrap_or(Value::Null));
        }
    }

    pub async fn toggle(&mut self) -> Result<(), DeviceError> {
        self.command("toggle", json!([])).await.map(|_| ())
    }

    pub async fn set_power(&mut self, on: bool) -> Result<(), DeviceError> {
        let state = if on { "on" } else { "off" };
        self.command("set_power", json!([state, TRANSITION, TRANSITION_MS]))
            .await
            .map(|_| ())
    }

    pub async fn set_bright(&mut self, brightness: u8) -> Result<(), DeviceError> {
        self.command("set_bright", json!([brightness, TRANSITION, TRANSITION_MS]))
            .await
            .map(|_| ())
    }

    pub async fn set_ct_abx(&mut self, kelvin: u16) -> Result<(), DeviceError> {
        self.command("set_ct_abx", json!([kelvin, TRANSITION, TRANSITION_MS]))
            .await
            .map(|_| ())
    }

    /// `rgb` is packed as `0xRRGGBB`
    pub async fn set_rgb(&mut self, rgb: u32) -> Result<(), DeviceError> {
        self.command("set_rgb", json!([rgb, TRANSITION, TRANSITION_MS]))
            .await
            .map(|_| ())
    }

    pub async fn set_hsv(&mut self, hue: u16, saturation: u8) -> Result<(), DeviceError> {
        self.command("set_hsv", json!([hue, saturation, TRANSITION, TRANSITION_MS]))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl DeviceSession for YeelightSession {
    async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// A validated light operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightCommand {
    Toggle,
    On,
    Off,
    /// Percent, 1-100
    Brightness(u8),
    /// Kelvin, 1700-6500
    ColorTemperature(u16),
    /// `#rrggbb` or `rrggbb`
    Rgb(String),
    /// Degrees, 0-359
    Hue(u16),
}

impl LightCommand {
    /// Parse a power action name (`toggle`, `on`, `off`)
    pub fn power(action: &str) -> Result<Self, DeviceError> {
        match action {
            "toggle" => Ok(LightCommand::Toggle),
            "on" => Ok(LightCommand::On),
            "off" => Ok(LightCommand::Off),
            other => Err(DeviceError::InvalidArgument(format!(
                "Unknown power action '{}'",
                other
            ))),
        }
    }

    /// Check arguments without touching the device
    pub fn validate(&self) -> Result<(), DeviceError> {
        match self {
            LightCommand::Brightness(value) if !(1..=100).contains(value) => Err(
                DeviceError::InvalidArgument("Brightness must be 1-100".to_string()),
            ),
            LightCommand::ColorTemperature(value) if !(1700..=6500).contains(value) => Err(
                DeviceError::InvalidArgument("Color temperature must be 1700-6500K".to_string()),
            ),
            LightCommand::Hue(value) if *value > 359 => Err(DeviceError::InvalidArgument(
                "Hue must be 0-359".to_string(),
            )),
            LightCommand::Rgb(color) => parse_hex_color(color).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Run the command on an open session, returning a user-facing message
    pub async fn apply(&self, session: &mut YeelightSession) -> Result<String, DeviceError> {
        self.validate()?;

        match self {
            LightCommand::Toggle => {
                session.toggle().await?;
                Ok("Yeelight toggle success.".to_string())
            }
            LightCommand::On => {
                session.set_power(true).await?;
                Ok("Yeelight on success.".to_string())
            }
            LightCommand::Off => {
                session.set_power(false).await?;
                Ok("Yeelight off success.".to_string())
            }
            LightCommand::Brightness(value) => {
                session.set_bright(*value).await?;
                Ok(format!("Brightness set to {}%.", value))
            }
            LightCommand::ColorTemperature(kelvin) => {
                session.set_ct_abx(*kelvin).await?;
                Ok(format!("Color Temp set to {}K.", kelvin))
            }
            LightCommand::Rgb(color) => {
                session.set_rgb(parse_hex_color(color)?).await?;
                Ok(format!("Color set to {}.", color))
            }
            LightCommand::Hue(hue) => {
                session.set_hsv(*hue, 100).await?;
                Ok(format!("Hue set to {}.", hue))
            }
        }
    }
}

/// Parse `#rrggbb` into `0xRRGGBB`
pub fn parse_hex_color(color: &str) -> Result<u32, DeviceError> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DeviceError::InvalidArgument(format!(
            "Invalid hex color '{}'",
            color
        )));
    }
    u32::from_str_radix(hex, 16).map_err(|e| DeviceError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_adds_default_port() {
        let connector = YeelightConnector::default();

        assert_eq!(connector.endpoint("192.168.1.5"), "192.168.1.5:55443");
        assert_eq!(connector.endpoint("192.168.1.5:1234"), "192.168.1.5:1234");
        assert_eq!(connector.endpoint("bulb.local"), "bulb.local:55443");
        assert_eq!(connector.endpoint("bulb.local:1234"), "bulb.local:1234");
        assert_eq!(connector.endpoint("fe80::1"), "[fe80::1]:55443");
        assert_eq!(connector.endpoint("[::1]"), "[::1]:55443");
        assert_eq!(connector.endpoint("[::1]:9000"), "[::1]:9000");
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff8000").unwrap(), 0xFF8000);
        assert_eq!(parse_hex_color("00FF00").unwrap(), 0x00FF00);
        assert!(parse_hex_color("#ff80").is_err());
        assert!(parse_hex_color("#gg0000").is_err());
        assert!(parse_hex_color("").is_err());
    }

    #[test]
    fn test_validate_ranges() {
        assert!(LightCommand::Brightness(1).validate().is_ok());
        assert!(LightCommand::Brightness(100).validate().is_ok());
        assert!(LightCommand::Brightness(0).validate().is_err());
        assert!(LightCommand::Brightness(101).validate().is_err());

        assert!(LightCommand::ColorTemperature(1700).validate().is_ok());
        assert!(LightCommand::ColorTemperature(6501).validate().is_err());

        assert!(LightCommand::Hue(359).validate().is_ok());
        assert!(LightCommand::Hue(360).validate().is_err());

        assert!(LightCommand::Rgb("#123456".to_string()).validate().is_ok());
        assert!(LightCommand::Rgb("blue".to_string()).validate().is_err());
    }

    #[test]
    fn test_power_action_parsing() {
        assert_eq!(LightCommand::power("toggle").unwrap(), LightCommand::Toggle);
        assert_eq!(LightCommand::power("on").unwrap(), LightCommand::On);
        assert_eq!(LightCommand::power("off").unwrap(), LightCommand::Off);
        assert!(matches!(
            LightCommand::power("dim"),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_endpoint_uses_default_port() {
        let connector = YeelightConnector::default();
        assert_eq!(connector.endpoint("192.168.1.40"), "192.168.1.40:55443");
        assert_eq!(connector.endpoint("127.0.0.1:9999"), "127.0.0.1:9999");
    }
}
