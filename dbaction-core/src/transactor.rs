//! Connection lifecycle contract consumed by [`Action`](crate::Action).
//!
//! A [`Transactor`] hands out single-use [`Session`]s in one of two modes:
//!
//! - `conn()`: plain checkout, the connection is released when the session ends
//! - `transact()`: the connection sits inside an open transaction, which is
//!   committed or rolled back depending on the [`Outcome`] the session is
//!   ended with, then released
//!
//! The session owns the connection for its whole life. The action only ever
//! sees a [`Conn`] handle, which every `flat_map` step and `sequence` member
//! of one execution shares.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// Shared handle to the one connection borrowed by an execution.
///
/// Cloning is cheap and every clone points at the same connection. Commands
/// are issued while holding [`Conn::lock`], so concurrent members of a
/// `sequence` never interleave on the wire.
pub struct Conn<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for Conn<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for Conn<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("handles", &self.handles())
            .finish()
    }
}

impl<C> Conn<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Wait for exclusive access to the connection.
    pub async fn lock(&self) -> MutexGuard<'_, C> {
        self.inner.lock().await
    }

    /// Number of live handles to this connection
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Take the connection back if this is the last handle.
    pub fn try_unwrap(self) -> std::result::Result<C, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

/// How the work run inside a session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// One acquire/use/finalize cycle for a single connection.
#[async_trait]
pub trait Session: Send {
    type Connection: Send + 'static;

    /// Yield the session's connection handle. Succeeds at most once;
    /// later calls return [`Error::ConnectionTaken`](crate::Error::ConnectionTaken).
    fn connection(&mut self) -> Result<Conn<Self::Connection>>;

    /// End the session: commit or roll back if transactional, then release.
    ///
    /// Finalizer failures are reported as
    /// [`Error::Finalization`](crate::Error::Finalization).
    async fn end(self, outcome: Outcome) -> Result<()>;
}

/// Capability that mints connection sessions.
#[async_trait]
pub trait Transactor: Send + Sync {
    type Connection: Send + 'static;
    type Session: Session<Connection = Self::Connection>;

    /// Check out a connection with no transaction semantics.
    async fn conn(&self) -> Result<Self::Session>;

    /// Check out a connection inside a freshly opened transaction.
    async fn transact(&self) -> Result<Self::Session>;

    /// Release provider-wide resources such as a pool.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
