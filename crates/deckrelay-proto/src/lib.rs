//! Agent Protocol Definitions
//!
//! This crate defines the JSON messages exchanged between the control panel
//! and the PC agent over the persistent WebSocket link.

pub mod messages;

pub use messages::*;

/// Port the PC agent listens on when the configuration does not name one
pub const DEFAULT_AGENT_PORT: u16 = 8765;
