//! Scoped checkout of a pooled connection.

use super::{Connector, ConnectionKey, PoolInner};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Identifies one reference on one pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReleaseToken {
    pub(crate) key: ConnectionKey,
    pub(crate) entry_id: u64,
}

/// A reference to a pooled connection.
///
/// The reference is returned to the pool exactly once: either by an explicit
/// [`release`](ConnectionHandle::release) or when the handle is dropped,
/// whichever comes first. Handles never close or drain the connection.
pub struct ConnectionHandle<K: Connector> {
    pool: Arc<PoolInner<K>>,
    connection: Arc<K::Connection>,
    token: Option<ReleaseToken>,
}

impl<K: Connector> ConnectionHandle<K> {
    pub(crate) fn new(
        pool: Arc<PoolInner<K>>,
        connection: Arc<K::Connection>,
        token: ReleaseToken,
    ) -> Self {
        Self {
            pool,
            connection,
            token: Some(token),
        }
    }

    /// The shared connection.
    pub fn connection(&self) -> &K::Connection {
        &self.connection
    }

    /// The key this handle was checked out under.
    pub fn key(&self) -> Option<&ConnectionKey> {
        self.token.as_ref().map(|token| &token.key)
    }

    /// Whether the reference is still held.
    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    /// Return the reference to the pool. Further calls are no-ops.
    pub fn release(&mut self) {
        if let Some(token) = self.token.take() {
            self.pool.release(token);
        }
    }
}

impl<K: Connector> Deref for ConnectionHandle<K> {
    type Target = K::Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<K: Connector> Drop for ConnectionHandle<K> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<K: Connector> fmt::Debug for ConnectionHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
