//! Process-wide, reference-counted broker connection pool.
//!
//! One entry per [`ConnectionKey`]. Each [`ConnectionHandle`] holds one
//! reference; when the last reference is released an idle timer is armed and,
//! if nobody re-acquires the key before it fires, the connection is removed
//! from the registry and drained.
//!
//! ```text
//!  acquire ──▶ [absent] ──open──▶ [live rc=1] ──release──▶ [idle rc=0, timer]
//!                  ▲                  ▲  │                        │
//!                  │                  └──┘ acquire/release        │ fire
//!                  └──────────── removed + drain ◀────────────────┘
//! ```
//!
//! A broker-side close removes the entry immediately, whatever its count.

mod connector;
mod handle;

pub use connector::{NatsConnection, NatsConnector};
pub use handle::ConnectionHandle;

use crate::credentials::ConnectParams;
use crate::error::BridgeError;
use crate::metrics::PoolMetrics;
use async_trait::async_trait;
use handle::ReleaseToken;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Default grace period before an unreferenced connection is drained.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(180);

/// Identity under which connections are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The explicit connection name when set, otherwise the caller's execution identity.
    pub fn resolve(params: &ConnectParams, execution_id: &str) -> Self {
        match params.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Self(name.to_string()),
            _ => Self(execution_id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live broker session owned by the pool.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// The broker or network closed the session for good.
    fn is_closed(&self) -> bool;

    /// A drain has been requested.
    fn is_draining(&self) -> bool;

    /// Let in-flight work finish, then close.
    async fn drain(&self) -> Result<(), BridgeError>;
}

/// Opens broker sessions for the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Open a new session. `on_closed` must be fired when the session closes
    /// permanently so the pool can forget it.
    async fn connect(
        &self,
        params: &ConnectParams,
        on_closed: CloseSignal,
    ) -> Result<Self::Connection, BridgeError>;
}

/// Callback handed to a [`Connector`] for broker-initiated closes.
#[derive(Clone)]
pub struct CloseSignal {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl CloseSignal {
    fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Tell the pool the connection is gone.
    pub fn notify(&self) {
        (self.notify)()
    }
}

impl fmt::Debug for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal").finish_non_exhaustive()
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an unreferenced connection stays open
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Diagnostic snapshot of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub exists: bool,
    pub entry_id: Option<u64>,
    pub ref_count: usize,
    pub is_closed: bool,
    pub is_draining: bool,
    pub has_timer: bool,
}

struct IdleTimer {
    seq: u64,
    task: AbortHandle,
}

struct Entry<C> {
    id: u64,
    connection: Arc<C>,
    ref_count: usize,
    idle_timer: Option<IdleTimer>,
}

impl<C> Entry<C> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.task.abort();
        }
    }
}

pub(crate) struct PoolInner<K: Connector> {
    connector: K,
    config: PoolConfig,
    registry: Mutex<HashMap<ConnectionKey, Entry<K::Connection>>>,
    /// Serializes first-time opens per key.
    creation_gates: Mutex<HashMap<ConnectionKey, Arc<tokio::sync::Mutex<()>>>>,
    next_entry_id: AtomicU64,
    next_timer_seq: AtomicU64,
    metrics: PoolMetrics,
}

/// Shared connection pool. Cloning is cheap and yields the same registry.
pub struct ConnectionPool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for ConnectionPool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The pool type used against a real NATS deployment.
pub type NatsPool = ConnectionPool<NatsConnector>;

static SHARED_POOL: Lazy<NatsPool> =
    Lazy::new(|| ConnectionPool::new(NatsConnector, PoolConfig::default()));

/// The process-wide NATS pool.
pub fn shared_pool() -> &'static NatsPool {
    &SHARED_POOL
}

impl<K: Connector> ConnectionPool<K> {
    /// Create a new pool.
    pub fn new(connector: K, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                registry: Mutex::new(HashMap::new()),
                creation_gates: Mutex::new(HashMap::new()),
                next_entry_id: AtomicU64::new(0),
                next_timer_seq: AtomicU64::new(0),
                metrics: PoolMetrics,
            }),
        }
    }

    /// Check out a handle to the live connection for `key`, opening it if needed.
    ///
    /// Concurrent first acquisitions of the same key result in a single open.
    /// A failed open leaves nothing registered.
    pub async fn acquire(
        &self,
        key: ConnectionKey,
        params: &ConnectParams,
    ) -> Result<ConnectionHandle<K>, BridgeError> {
        if let Some(handle) = self.inner.checkout(&key) {
            return Ok(handle);
        }

        let gate = self.inner.creation_gate(&key);
        let result = {
            let _creating = gate.lock().await;
            // Someone may have opened the key while we waited for the gate.
            match self.inner.checkout(&key) {
                Some(handle) => Ok(handle),
                None => self.inner.open(&key, params).await,
            }
        };
        self.inner.retire_creation_gate(&key, gate);

        result
    }

    /// Diagnostic view of one key. No side effects.
    pub fn status_of(&self, key: &ConnectionKey) -> ConnectionStatus {
        let registry = self.inner.registry();
        match registry.get(key) {
            None => ConnectionStatus::default(),
            Some(entry) => ConnectionStatus {
                exists: true,
                entry_id: Some(entry.id),
                ref_count: entry.ref_count,
                is_closed: entry.connection.is_closed(),
                is_draining: entry.connection.is_draining(),
                has_timer: entry.idle_timer.is_some(),
            },
        }
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.inner.registry().len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<K: Connector> PoolInner<K> {
    fn registry(&self) -> MutexGuard<'_, HashMap<ConnectionKey, Entry<K::Connection>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_for(self: &Arc<Self>, key: &ConnectionKey, entry: &Entry<K::Connection>) -> ConnectionHandle<K> {
        ConnectionHandle::new(
            self.clone(),
            entry.connection.clone(),
            ReleaseToken {
                key: key.clone(),
                entry_id: entry.id,
            },
        )
    }

    /// Increment an existing open entry, dropping it first if it is closed.
    fn checkout(self: &Arc<Self>, key: &ConnectionKey) -> Option<ConnectionHandle<K>> {
        let mut registry = self.registry();

        if registry
            .get(key)
            .is_some_and(|entry| entry.connection.is_closed())
        {
            if let Some(mut stale) = registry.remove(key) {
                stale.cancel_timer();
                debug!(key = %key, entry_id = stale.id, "Dropped closed connection before reuse");
            }
            self.metrics.references(key, 0);
            return None;
        }

        let entry = registry.get_mut(key)?;
        entry.ref_count += 1;
        if entry.ref_count == 1 {
            entry.cancel_timer();
        }

        debug!(
            key = %key,
            entry_id = entry.id,
            ref_count = entry.ref_count,
            "Reusing pooled connection"
        );
        self.metrics.references(key, entry.ref_count);

        Some(self.handle_for(key, entry))
    }

    fn creation_gate(&self, key: &ConnectionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self
            .creation_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        gates.entry(key.clone()).or_default().clone()
    }

    fn retire_creation_gate(&self, key: &ConnectionKey, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self
            .creation_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map and this caller still hold it.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(key);
        }
    }

    async fn open(
        self: &Arc<Self>,
        key: &ConnectionKey,
        params: &ConnectParams,
    ) -> Result<ConnectionHandle<K>, BridgeError> {
        let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);

        let weak: Weak<Self> = Arc::downgrade(self);
        let signal_key = key.clone();
        let on_closed = CloseSignal::new(move || {
            if let Some(pool) = weak.upgrade() {
                pool.evict_closed(&signal_key, entry_id);
            }
        });

        let connection = self
            .connector
            .connect(params, on_closed)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Failed to open NATS connection"))?;

        let entry = Entry {
            id: entry_id,
            connection: Arc::new(connection),
            ref_count: 1,
            idle_timer: None,
        };
        let handle = self.handle_for(key, &entry);

        if let Some(mut replaced) = self.registry().insert(key.clone(), entry) {
            replaced.cancel_timer();
            warn!(key = %key, entry_id = replaced.id, "Replaced an entry that was opened concurrently");
        }

        info!(key = %key, entry_id, "Opened pooled NATS connection");
        self.metrics.opened(key);
        self.metrics.references(key, 1);

        Ok(handle)
    }

    /// Give back one reference. Stale or already-consumed tokens are ignored.
    pub(crate) fn release(self: &Arc<Self>, token: ReleaseToken) {
        let mut registry = self.registry();

        let Some(entry) = registry.get_mut(&token.key) else {
            return;
        };
        if entry.id != token.entry_id {
            return;
        }

        if entry.connection.is_closed() {
            if let Some(mut closed) = registry.remove(&token.key) {
                closed.cancel_timer();
            }
            self.metrics.references(&token.key, 0);
            return;
        }

        if entry.ref_count == 0 {
            return;
        }
        entry.ref_count -= 1;
        self.metrics.references(&token.key, entry.ref_count);

        debug!(
            key = %token.key,
            entry_id = entry.id,
            ref_count = entry.ref_count,
            "Released pooled connection"
        );

        if entry.ref_count > 0 {
            return;
        }

        let seq = self.next_timer_seq.fetch_add(1, Ordering::Relaxed);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let weak = Arc::downgrade(self);
                let key = token.key.clone();
                let entry_id = entry.id;
                let idle_timeout = self.config.idle_timeout;
                let task = runtime.spawn(async move {
                    tokio::time::sleep(idle_timeout).await;
                    if let Some(pool) = weak.upgrade() {
                        pool.expire(&key, entry_id, seq).await;
                    }
                });
                entry.idle_timer = Some(IdleTimer {
                    seq,
                    task: task.abort_handle(),
                });
            }
            Err(_) => {
                // No runtime to run the timer or the drain on; closing on drop is all that is left.
                warn!(
                    key = %token.key,
                    "Tokio runtime unavailable; discarding idle connection without drain"
                );
                registry.remove(&token.key);
            }
        }
    }

    /// Idle timer fired: evict and drain if nothing changed since it was armed.
    async fn expire(&self, key: &ConnectionKey, entry_id: u64, seq: u64) {
        let connection = {
            let mut registry = self.registry();
            let still_idle = registry.get(key).is_some_and(|entry| {
                entry.id == entry_id
                    && entry.ref_count == 0
                    && entry.idle_timer.as_ref().is_some_and(|t| t.seq == seq)
            });
            if !still_idle {
                return;
            }
            match registry.remove(key) {
                Some(entry) => entry.connection,
                None => return,
            }
        };

        info!(key = %key, entry_id, "Idle timeout reached, draining NATS connection");
        self.metrics.references(key, 0);

        match connection.drain().await {
            Ok(()) => self.metrics.drained(key),
            Err(e) => warn!(key = %key, error = %e, "Connection drain failed"),
        }
    }

    /// The broker closed the connection: forget it regardless of references.
    fn evict_closed(&self, key: &ConnectionKey, entry_id: u64) {
        let mut registry = self.registry();
        if registry.get(key).is_some_and(|entry| entry.id == entry_id) {
            if let Some(mut entry) = registry.remove(key) {
                entry.cancel_timer();
                info!(
                    key = %key,
                    entry_id,
                    ref_count = entry.ref_count,
                    "NATS connection closed, removed from pool"
                );
                self.metrics.closed(key);
                self.metrics.references(key, 0);
            }
        }
    }
}
