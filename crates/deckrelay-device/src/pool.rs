//! Device connection pool
//!
//! Keeps at most one warm session per device address. Each session has an idle
//! timer that is reset on every use; when it fires the session is closed and
//! dropped. All work on one address (handshake, commands, eviction) is serialized
//! by that address's slot lock, while different addresses proceed independently.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::DeviceError;

/// Opens sessions to devices
#[async_trait]
pub trait DeviceConnector: Send + Sync + 'static {
    type Session: DeviceSession;

    /// Perform the device handshake
    async fn connect(&self, address: &str) -> Result<Self::Session, DeviceError>;
}

/// A live session to one device
#[async_trait]
pub trait DeviceSession: Send + 'static {
    /// Close the underlying connection
    async fn close(&mut self);
}

/// Device pool configuration
#[derive(Debug, Clone)]
pub struct DevicePoolConfig {
    /// How long a session may sit unused before it is closed
    pub idle_timeout: Duration,
    /// Upper bound on a device handshake
    pub connect_timeout: Duration,
}

impl Default for DevicePoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct Live<S> {
    session: S,
    /// Bumped on every use; a timer only evicts the epoch it was armed for
    epoch: u64,
    last_used: Instant,
    idle_timer: Option<JoinHandle<()>>,
}

struct Slot<S> {
    /// Detached from the table; waiters must look the address up again
    retired: bool,
    live: Option<Live<S>>,
}

type SlotRef<S> = Arc<Mutex<Slot<S>>>;

struct PoolInner<C: DeviceConnector> {
    connector: C,
    config: DevicePoolConfig,
    slots: std::sync::Mutex<HashMap<String, SlotRef<C::Session>>>,
    handshakes: AtomicU64,
}

/// Pool of warm device sessions keyed by address
pub struct DevicePool<C: DeviceConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: DeviceConnector> Clone for DevicePool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Exclusive use of a warm session
///
/// Other commands to the same address wait until the lease is dropped. Dropping
/// the lease counts as a use and restarts the idle window.
pub struct DeviceLease<C: DeviceConnector> {
    guard: OwnedMappedMutexGuard<Slot<C::Session>, Live<C::Session>>,
    pool: Arc<PoolInner<C>>,
    slot: SlotRef<C::Session>,
    address: String,
}

impl<C: DeviceConnector> Deref for DeviceLease<C> {
    type Target = C::Session;

    fn deref(&self) -> &C::Session {
        &self.guard.session
    }
}

impl<C: DeviceConnector> DerefMut for DeviceLease<C> {
    fn deref_mut(&mut self) -> &mut C::Session {
        &mut self.guard.session
    }
}

impl<C: DeviceConnector> Drop for DeviceLease<C> {
    fn drop(&mut self) {
        self.pool.touch_live(&self.address, &self.slot, &mut self.guard);
    }
}

impl<C: DeviceConnector> DevicePool<C> {
    pub fn new(connector: C, config: DevicePoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                slots: std::sync::Mutex::new(HashMap::new()),
                handshakes: AtomicU64::new(0),
            }),
        }
    }

    /// Number of handshakes performed since creation
    pub fn handshakes(&self) -> u64 {
        self.inner.handshakes.load(Ordering::Relaxed)
    }

    /// Addresses with a session (or a handshake in progress)
    pub fn len(&self) -> usize {
        self.inner.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `address` currently has a live session
    pub async fn is_warm(&self, address: &str) -> bool {
        self.last_used(address).await.is_some()
    }

    /// When the session for `address` was last used
    pub async fn last_used(&self, address: &str) -> Option<Instant> {
        let slot = self.inner.table().get(address).cloned()?;
        let guard = slot.lock().await;
        if guard.retired {
            return None;
        }
        guard.live.as_ref().map(|live| live.last_used)
    }

    /// Get the session for `address`, opening one if needed, and reset its idle timer
    pub async fn acquire(&self, address: &str) -> Result<DeviceLease<C>, DeviceError> {
        let (slot, guard) = self.inner.lock_live(address).await?;

        OwnedMutexGuard::try_map(guard, |slot| slot.live.as_mut())
            .map(|guard| DeviceLease {
                guard,
                pool: Arc::clone(&self.inner),
                slot,
                address: address.to_string(),
            })
            .map_err(|_| DeviceError::ConnectionClosed)
    }

    /// Run `op` against the session for `address`
    ///
    /// The idle timer is reset before and after the operation. Failures of `op` are
    /// returned unchanged; a connection-level failure also discards the session so
    /// the next command performs a fresh handshake.
    pub async fn with_session<T, F>(&self, address: &str, op: F) -> Result<T, DeviceError>
    where
        F: for<'s> FnOnce(&'s mut C::Session) -> BoxFuture<'s, Result<T, DeviceError>>,
    {
        let (slot, mut guard) = self.inner.lock_live(address).await?;

        let result = match guard.live.as_mut() {
            Some(live) => op(&mut live.session).await,
            None => Err(DeviceError::ConnectionClosed),
        };

        match &result {
            Err(e) if e.is_connection_error() => {
                warn!(address = %address, error = %e, "Dropping device session after connection error");
                self.inner.discard(address, &slot, &mut guard).await;
            }
            _ => self.inner.touch(address, &slot, &mut guard),
        }

        result
    }

    /// Close every session (shutdown)
    pub async fn close_all(&self) {
        let slots: Vec<(String, SlotRef<C::Session>)> = self.inner.table().drain().collect();

        for (address, slot) in slots {
            let mut guard = slot.lock().await;
            guard.retired = true;
            if let Some(mut live) = guard.live.take() {
                if let Some(timer) = live.idle_timer.take() {
                    timer.abort();
                }
                live.session.close().await;
                debug!(address = %address, "Closed device session");
            }
        }
    }
}

impl<C: DeviceConnector> fmt::Debug for DevicePool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicePool")
            .field("config", &self.inner.config)
            .field("sessions", &self.len())
            .finish()
    }
}

impl<C: DeviceConnector> PoolInner<C> {
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, SlotRef<C::Session>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot_for(&self, address: &str) -> SlotRef<C::Session> {
        self.table()
            .entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    retired: false,
                    live: None,
                }))
            })
            .clone()
    }

    /// Remove `slot` from the table if it is still the entry for `address`
    fn detach(&self, address: &str, slot: &SlotRef<C::Session>) {
        let mut table = self.table();
        if table
            .get(address)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            table.remove(address);
        }
    }

    /// Lock the slot for `address` with a live, freshly touched session in it
    async fn lock_live(
        self: &Arc<Self>,
        address: &str,
    ) -> Result<(SlotRef<C::Session>, OwnedMutexGuard<Slot<C::Session>>), DeviceError> {
        loop {
            let slot = self.slot_for(address);
            let mut guard = Arc::clone(&slot).lock_owned().await;
            if guard.retired {
                continue;
            }

            if guard.live.is_none() {
                match self.handshake(address).await {
                    Ok(session) => {
                        guard.live = Some(Live {
                            session,
                            epoch: 0,
                            last_used: Instant::now(),
                            idle_timer: None,
                        });
                    }
                    Err(e) => {
                        guard.retired = true;
                        self.detach(address, &slot);
                        return Err(e);
                    }
                }
            }

            self.touch(address, &slot, &mut guard);
            return Ok((slot, guard));
        }
    }

    async fn handshake(&self, address: &str) -> Result<C::Session, DeviceError> {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
        debug!(address = %address, "Connecting to device");

        match tokio::time::timeout(self.config.connect_timeout, self.connector.connect(address))
            .await
        {
            Ok(Ok(session)) => {
                info!(address = %address, "Device session opened");
                Ok(session)
            }
            Ok(Err(e)) => {
                warn!(address = %address, error = %e, "Device handshake failed");
                Err(match e {
                    DeviceError::ConnectTimeout | DeviceError::ConnectError(_) => e,
                    other => DeviceError::ConnectError(other.to_string()),
                })
            }
            Err(_) => {
                warn!(address = %address, "Device handshake timed out");
                Err(DeviceError::ConnectTimeout)
            }
        }
    }

    /// Record a use and re-arm the idle timer
    fn touch(self: &Arc<Self>, address: &str, slot: &SlotRef<C::Session>, state: &mut Slot<C::Session>) {
        if let Some(live) = state.live.as_mut() {
            self.touch_live(address, slot, live);
        }
    }

    fn touch_live(self: &Arc<Self>, address: &str, slot: &SlotRef<C::Session>, live: &mut Live<C::Session>) {
        live.epoch += 1;
        live.last_used = Instant::now();
        if let Some(timer) = live.idle_timer.take() {
            timer.abort();
        }

        let epoch = live.epoch;
        let idle_timeout = self.config.idle_timeout;
        let pool = Arc::downgrade(self);
        let slot = Arc::downgrade(slot);
        let address = address.to_string();
        live.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let (Some(pool), Some(slot)) = (pool.upgrade(), slot.upgrade()) {
                pool.expire(&address, &slot, epoch).await;
            }
        }));
    }

    /// Idle timer fired: evict unless the session was used since the timer was armed
    async fn expire(&self, address: &str, slot: &SlotRef<C::Session>, epoch: u64) {
        let mut guard = slot.lock().await;
        let current = guard.live.as_ref().map(|live| live.epoch);
        if guard.retired || current != Some(epoch) {
            return;
        }

        if let Some(mut live) = guard.live.take() {
            guard.retired = true;
            self.detach(address, slot);
            live.session.close().await;
            info!(
                address = %address,
                idle_secs = live.last_used.elapsed().as_secs(),
                "Evicted idle device session"
            );
        }
    }

    /// Close and forget the session held under `state`
    async fn discard(&self, address: &str, slot: &SlotRef<C::Session>, state: &mut Slot<C::Session>) {
        state.retired = true;
        self.detach(address, slot);
        if let Some(mut live) = state.live.take() {
            if let Some(timer) = live.idle_timer.take() {
                timer.abort();
            }
            live.session.close().await;
        }
    }
}
