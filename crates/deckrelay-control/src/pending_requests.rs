//! Pending requests tracker
//!
//! Tracks calls sent to the agent and routes replies back to the callers waiting on them.
//! Each entry owns a deadline timer; the reply and the deadline race to remove the entry,
//! and whichever removes it decides the outcome.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Why a pending request completed without a reply
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,
}

struct Pending<T> {
    tx: oneshot::Sender<Result<T, CorrelationError>>,
    deadline: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Handle the caller awaits for the outcome of a registered request
pub struct Completion<T> {
    id: String,
    rx: oneshot::Receiver<Result<T, CorrelationError>>,
}

impl<T> Completion<T> {
    /// Correlation id this completion belongs to
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply or the deadline
    pub async fn wait(self) -> Result<T, CorrelationError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CorrelationError::Cancelled),
        }
    }
}

/// Tracks requests awaiting a correlated reply
pub struct PendingRequests<T> {
    /// Maps correlation id -> waiting caller
    requests: Arc<DashMap<String, Pending<T>>>,
}

impl<T> Clone for PendingRequests<T> {
    fn clone(&self) -> Self {
        Self {
            requests: Arc::clone(&self.requests),
        }
    }
}

impl<T: Send + 'static> PendingRequests<T> {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
        }
    }

    /// Register a new pending request
    ///
    /// Returns a fresh correlation id (unique among outstanding requests) and the
    /// completion handle that resolves with the reply or with `Timeout` once
    /// `timeout` has elapsed.
    pub fn register(&self, timeout: Duration) -> (String, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string();
            match self.requests.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Pending {
                        tx,
                        deadline,
                        timer: None,
                    });
                    break candidate;
                }
            }
        };

        let requests = Arc::clone(&self.requests);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some((_, pending)) = requests.remove(&timer_id) {
                debug!(id = %timer_id, "Pending request timed out");
                let _ = pending.tx.send(Err(CorrelationError::Timeout));
            }
        });

        match self.requests.get_mut(&id) {
            Some(mut entry) => entry.timer = Some(timer),
            // Already completed before the timer could be attached
            None => timer.abort(),
        }

        debug!(id = %id, timeout_ms = timeout.as_millis() as u64, "Registered pending request");

        (id.clone(), Completion { id, rx })
    }

    /// Deliver a reply for a pending request
    ///
    /// Returns true if a request with this id was waiting. Unknown or already
    /// completed ids are discarded.
    pub fn resolve(&self, id: &str, payload: T) -> bool {
        match self.requests.remove(id) {
            Some((_, pending)) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                if pending.tx.send(Ok(payload)).is_err() {
                    debug!(id = %id, "Caller went away before the reply arrived");
                }
                true
            }
            None => {
                debug!(id = %id, "Discarding reply with no pending request");
                false
            }
        }
    }

    /// Drop a pending request without a reply (its caller sees `Cancelled`)
    pub fn cancel(&self, id: &str) -> bool {
        match self.requests.remove(id) {
            Some((_, pending)) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                debug!(id = %id, "Cancelled pending request");
                true
            }
            None => false,
        }
    }

    /// Get count of pending requests
    pub fn count(&self) -> usize {
        self.requests.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    /// Deadline of an outstanding request
    pub fn deadline(&self, id: &str) -> Option<Instant> {
        self.requests.get(id).map(|pending| pending.deadline)
    }
}

impl<T: Send + 'static> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}
