//! Persistent connection to the PC agent
//!
//! [`AgentLink`] keeps a single WebSocket open to the agent, reconnects after
//! failures, and turns requests into correlated calls with deadlines.

pub mod config;
pub mod error;
pub mod link;

pub use config::LinkConfig;
pub use error::LinkError;
pub use link::{AgentLink, LinkState};
