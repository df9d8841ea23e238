//! Agent link state machine
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`. All transitions happen
//! under a single lock. Every connection attempt is tagged with a generation number so
//! that callbacks from a superseded attempt (address change, shutdown) are ignored.

use deckrelay_control::PendingRequests;
use deckrelay_proto::{AgentAddress, AgentRequest, AgentResponse, RelayMessage};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;

/// Connectivity of the agent link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

struct LinkInner {
    state: LinkState,
    target: Option<AgentAddress>,
    /// Bumped on every attempt and every teardown
    generation: u64,
    /// Writer half of the live connection (only while Connected)
    outbound: Option<mpsc::UnboundedSender<Message>>,
    /// Task owning the socket of the current attempt
    driver: Option<JoinHandle<()>>,
    /// Scheduled reconnect (at most one)
    retry: Option<JoinHandle<()>>,
    shut_down: bool,
}

struct Shared {
    config: LinkConfig,
    inner: Mutex<LinkInner>,
    pending: PendingRequests<AgentResponse>,
    attempts: AtomicU64,
}

/// Single persistent connection to the PC agent
///
/// Cloning yields another handle to the same link.
#[derive(Clone)]
pub struct AgentLink {
    shared: Arc<Shared>,
}

impl AgentLink {
    /// Create an idle link. Nothing is dialed until a target is set.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(LinkInner {
                    state: LinkState::Disconnected,
                    target: None,
                    generation: 0,
                    outbound: None,
                    driver: None,
                    retry: None,
                    shut_down: false,
                }),
                pending: PendingRequests::new(),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn target(&self) -> Option<AgentAddress> {
        self.shared.lock().target.clone()
    }

    /// Number of connection attempts started since creation
    pub fn connect_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Whether a reconnect is waiting on its timer
    pub fn retry_scheduled(&self) -> bool {
        self.shared.lock().retry.is_some()
    }

    /// Correlation table of calls awaiting a reply
    pub fn pending(&self) -> &PendingRequests<AgentResponse> {
        &self.shared.pending
    }

    /// Start a connection attempt to the current target
    ///
    /// No-op (returns false) while an attempt is in flight, while connected,
    /// after shutdown, or when no target is configured.
    pub fn connect(&self) -> bool {
        let mut inner = self.shared.lock();
        self.shared.begin_attempt(&mut inner)
    }

    /// Point the link at an agent address
    ///
    /// A different address tears down the current connection (or attempt) and dials
    /// the new one right away. The same address only connects if the link is idle.
    pub fn set_target(&self, target: AgentAddress) -> bool {
        let mut inner = self.shared.lock();
        if inner.shut_down {
            return false;
        }

        if inner.target.as_ref() != Some(&target) {
            if let Some(previous) = &inner.target {
                info!(previous = %previous, address = %target, "Agent address changed");
            }
            teardown(&mut inner);
            inner.target = Some(target);
        }

        self.shared.begin_attempt(&mut inner)
    }

    /// Fire-and-forget send (no correlation id)
    pub fn send(&self, request: AgentRequest) -> Result<(), LinkError> {
        let outbound = self.shared.outbound()?;
        let frame = RelayMessage::notify(request).to_json()?;

        outbound
            .send(Message::Text(frame))
            .map_err(|_| LinkError::NotConnected)
    }

    /// Send a request and wait for the reply carrying its correlation id
    ///
    /// Fails with `NotConnected` without registering anything when the link is not
    /// connected, with `Timeout` when no reply arrives within `timeout`, and with
    /// `Remote` when the agent answers `status: "error"`. A link drop after the
    /// request left does not fail the call early; it runs to its deadline.
    pub async fn call(
        &self,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<AgentResponse, LinkError> {
        let outbound = self.shared.outbound()?;
        let (id, completion) = self.shared.pending.register(timeout);

        let frame = match RelayMessage::correlated(id.clone(), request).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.pending.cancel(&id);
                return Err(e.into());
            }
        };

        if outbound.send(Message::Text(frame)).is_err() {
            // Writer went away between the state check and the send
            self.shared.pending.cancel(&id);
            return Err(LinkError::NotConnected);
        }
        debug!(id = %id, "Sent correlated request to PC agent");

        let response = completion.wait().await?;
        if response.is_error() {
            let message = response
                .message
                .unwrap_or_else(|| "Agent reported an error".to_string());
            return Err(LinkError::Remote(message));
        }

        Ok(response)
    }

    /// Close the connection and stop reconnecting
    ///
    /// Pending calls are left to their own deadlines.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        teardown(&mut inner);
        info!("Agent link shut down");
    }
}

impl fmt::Debug for AgentLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("AgentLink")
            .field("state", &inner.state)
            .field("target", &inner.target)
            .field("pending", &self.shared.pending.count())
            .finish()
    }
}

/// Drop the current connection or attempt and any scheduled retry
fn teardown(inner: &mut LinkInner) {
    inner.generation += 1;
    if let Some(driver) = inner.driver.take() {
        driver.abort();
    }
    if let Some(retry) = inner.retry.take() {
        retry.abort();
    }
    inner.outbound = None;
    inner.state = LinkState::Disconnected;
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outbound(&self) -> Result<mpsc::UnboundedSender<Message>, LinkError> {
        let inner = self.lock();
        match (inner.state, &inner.outbound) {
            (LinkState::Connected, Some(tx)) => Ok(tx.clone()),
            _ => Err(LinkError::NotConnected),
        }
    }

    /// Disconnected -> Connecting. Caller holds the lock.
    fn begin_attempt(self: &Arc<Self>, inner: &mut LinkInner) -> bool {
        if inner.shut_down || inner.state != LinkState::Disconnected {
            return false;
        }
        let Some(target) = inner.target.clone() else {
            debug!("No agent address configured, not connecting");
            return false;
        };

        if let Some(retry) = inner.retry.take() {
            retry.abort();
        }

        inner.generation += 1;
        inner.state = LinkState::Connecting;
        self.attempts.fetch_add(1, Ordering::Relaxed);
        info!(address = %target, "Connecting to PC agent");

        let shared = Arc::clone(self);
        let generation = inner.generation;
        inner.driver = Some(tokio::spawn(async move {
            shared.drive(generation, target).await;
        }));
        true
    }

    /// Owns the socket for one attempt: dial, pump frames both ways, report the close
    async fn drive(self: Arc<Self>, generation: u64, target: AgentAddress) {
        let url = target.ws_url();
        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                warn!(address = %target, error = %e, "Failed to connect to PC agent");
                self.on_closed(generation);
                return;
            }
            Err(_) => {
                warn!(address = %target, "Connection to PC agent timed out");
                self.on_closed(generation);
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if !self.on_open(generation, tx) {
            debug!(address = %target, "Discarding superseded agent connection");
            return;
        }

        let (mut sink, mut source) = stream.split();
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(message) = outbound else { break };
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "Failed to write to PC agent");
                        break;
                    }
                }
                inbound = source.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.on_message(&text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.on_message(text),
                        Err(_) => warn!("Ignoring non UTF-8 frame from PC agent"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("PC agent closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "PC agent connection error");
                        break;
                    }
                },
            }
        }

        let _ = sink.close().await;
        self.on_closed(generation);
    }

    /// Connecting -> Connected
    fn on_open(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        let mut inner = self.lock();
        if inner.shut_down
            || inner.generation != generation
            || inner.state != LinkState::Connecting
        {
            return false;
        }

        inner.state = LinkState::Connected;
        inner.outbound = Some(tx);
        if let Some(target) = &inner.target {
            info!(address = %target, "Connected to PC agent");
        }
        true
    }

    fn on_message(&self, text: &str) {
        match AgentResponse::parse(text) {
            Ok(response) => match response.id.clone() {
                Some(id) => {
                    self.pending.resolve(&id, response);
                }
                None => debug!("Ignoring uncorrelated message from PC agent"),
            },
            Err(e) => warn!(error = %e, "Malformed message from PC agent"),
        }
    }

    /// Connecting/Connected -> Disconnected, then schedule the single retry
    fn on_closed(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.shut_down || inner.generation != generation {
            return;
        }

        if inner.state == LinkState::Connected {
            info!("Disconnected from PC agent");
        }
        inner.state = LinkState::Disconnected;
        inner.outbound = None;
        inner.driver = None;

        if inner.retry.is_some() {
            return;
        }

        let delay = self.config.retry_delay;
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling agent reconnect");
        let shared = Arc::downgrade(self);
        inner.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.on_retry();
            }
        }));
    }

    fn on_retry(self: &Arc<Self>) {
        let mut inner = self.lock();
        inner.retry = None;
        self.begin_attempt(&mut inner);
    }
}
