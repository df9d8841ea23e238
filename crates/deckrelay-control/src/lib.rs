//! Request correlation for the agent relay
pub mod pending_requests;

pub use pending_requests::{Completion, CorrelationError, PendingRequests};
