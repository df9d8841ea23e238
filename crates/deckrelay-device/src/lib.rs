//! Warm sessions to LAN smart bulbs
//!
//! [`DevicePool`] keeps one session per device address and closes it after a
//! period without commands. [`yeelight`] implements the session for Yeelight bulbs.

pub mod error;
pub mod pool;
pub mod yeelight;

pub use error::DeviceError;
pub use pool::{DeviceConnector, DeviceLease, DevicePool, DevicePoolConfig, DeviceSession};
pub use yeelight::{LightCommand, YeelightConnector, YeelightSession, YEELIGHT_PORT};
