//! In-memory transactor
//!
//! A deterministic [`Transactor`] over a single table of `i64` primary keys.
//! Plain sessions write straight to the table. Transactional sessions read
//! and write a snapshot taken at begin and keep a log of their writes, which
//! commit replays onto the table and rollback discards. Session counters
//! and fault switches make it the reference implementation the action tests
//! run against.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result, Stage};
use crate::transactor::{Conn, Outcome, Session, Transactor};

/// Errors raised by the in-memory store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("duplicate key value violates primary key: {0}")]
    DuplicateKey(i64),

    #[error("transactor is closed")]
    Closed,

    #[error("injected {0} failure")]
    Injected(&'static str),
}

/// Snapshot of session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub acquired: usize,
    pub released: usize,
    pub begun: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Default)]
struct Store {
    rows: Mutex<BTreeSet<i64>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    begun: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_acquire: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    closed: AtomicBool,
}

impl Store {
    fn rows(&self) -> MutexGuard<'_, BTreeSet<i64>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle to one in-memory database
#[derive(Clone, Default)]
pub struct MemoryTransactor {
    store: Arc<Store>,
}

impl std::fmt::Debug for MemoryTransactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransactor")
            .field("stats", &self.stats())
            .finish()
    }
}

impl MemoryTransactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed keys, ascending
    pub fn keys(&self) -> Vec<i64> {
        self.store.rows().iter().copied().collect()
    }

    pub fn stats(&self) -> SessionStats {
        let s = &self.store;
        SessionStats {
            acquired: s.acquired.load(Ordering::SeqCst),
            released: s.released.load(Ordering::SeqCst),
            begun: s.begun.load(Ordering::SeqCst),
            commits: s.commits.load(Ordering::SeqCst),
            rollbacks: s.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Make the next `conn()` or `transact()` fail.
    pub fn fail_next_acquire(&self) {
        self.store.fail_acquire.store(true, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.store.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.store.fail_rollback.store(fail, Ordering::SeqCst);
    }

    fn checkout(&self, transactional: bool) -> Result<MemorySession> {
        let store = &self.store;
        if store.closed.load(Ordering::SeqCst) {
            return Err(Error::acquisition(MemoryError::Closed));
        }
        if store.fail_acquire.swap(false, Ordering::SeqCst) {
            return Err(Error::acquisition(MemoryError::Injected("acquire")));
        }

        let staged = if transactional {
            store.begun.fetch_add(1, Ordering::SeqCst);
            Some(Staged::new(store.rows().clone()))
        } else {
            None
        };
        store.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(MemorySession {
            conn: Conn::new(MemoryConn {
                store: Arc::clone(store),
                staged,
            }),
            taken: false,
        })
    }
}

/// Connection to the in-memory table
pub struct MemoryConn {
    store: Arc<Store>,
    staged: Option<Staged>,
}

/// Open transaction: private view plus the writes to replay on commit
struct Staged {
    view: BTreeSet<i64>,
    log: Vec<Write>,
}

enum Write {
    Insert(i64),
    DeleteAll,
}

impl Staged {
    fn new(view: BTreeSet<i64>) -> Self {
        Self {
            view,
            log: Vec::new(),
        }
    }

    /// Replay the log onto `rows`. The table is left untouched if any
    /// insert collides with a key committed since the snapshot was taken.
    fn publish(self, rows: &mut BTreeSet<i64>) -> std::result::Result<(), MemoryError> {
        let mut next = rows.clone();
        for write in self.log {
            match write {
                Write::Insert(key) => {
                    if !next.insert(key) {
                        return Err(MemoryError::DuplicateKey(key));
                    }
                }
                Write::DeleteAll => next.clear(),
            }
        }
        *rows = next;
        Ok(())
    }
}

impl MemoryConn {
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    pub fn insert(&mut self, key: i64) -> std::result::Result<(), MemoryError> {
        let inserted = match &mut self.staged {
            Some(tx) => {
                let inserted = tx.view.insert(key);
                if inserted {
                    tx.log.push(Write::Insert(key));
                }
                inserted
            }
            None => self.store.rows().insert(key),
        };
        if inserted {
            Ok(())
        } else {
            Err(MemoryError::DuplicateKey(key))
        }
    }

    /// Remove every row, returning how many were removed.
    pub fn delete_all(&mut self) -> usize {
        match &mut self.staged {
            Some(tx) => {
                tx.log.push(Write::DeleteAll);
                std::mem::take(&mut tx.view).len()
            }
            None => std::mem::take(&mut *self.store.rows()).len(),
        }
    }

    pub fn count(&self) -> usize {
        match &self.staged {
            Some(tx) => tx.view.len(),
            None => self.store.rows().len(),
        }
    }

    pub fn keys(&self) -> Vec<i64> {
        match &self.staged {
            Some(tx) => tx.view.iter().copied().collect(),
            None => self.store.rows().iter().copied().collect(),
        }
    }
}

impl Drop for MemoryConn {
    fn drop(&mut self) {
        if self.staged.take().is_some() {
            // Dropped without commit or rollback: abandon the transaction.
            self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        self.store.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemorySession {
    conn: Conn<MemoryConn>,
    taken: bool,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("conn", &self.conn)
            .field("taken", &self.taken)
            .finish()
    }
}

#[async_trait]
impl Session for MemorySession {
    type Connection = MemoryConn;

    fn connection(&mut self) -> Result<Conn<MemoryConn>> {
        if std::mem::replace(&mut self.taken, true) {
            return Err(Error::ConnectionTaken);
        }
        Ok(self.conn.clone())
    }

    async fn end(self, outcome: Outcome) -> Result<()> {
        let transactional = self.conn.lock().await.in_transaction();
        if !transactional {
            debug!("memory session released");
            return Ok(());
        }

        let stage = match outcome {
            Outcome::Success => Stage::Commit,
            Outcome::Failure => Stage::Rollback,
        };
        let mut conn = self.conn.try_unwrap().map_err(|conn| {
            Error::finalization(
                Stage::Release,
                anyhow::anyhow!("connection still held by {} handle(s)", conn.handles() - 1),
            )
        })?;
        let store = Arc::clone(&conn.store);
        let Some(staged) = conn.staged.take() else {
            return Ok(());
        };

        match stage {
            Stage::Commit if store.fail_commit.load(Ordering::SeqCst) => {
                Err(Error::finalization(stage, MemoryError::Injected("commit")))
            }
            Stage::Commit => {
                staged
                    .publish(&mut store.rows())
                    .map_err(|e| Error::finalization(stage, e))?;
                store.commits.fetch_add(1, Ordering::SeqCst);
                debug!("memory transaction committed");
                Ok(())
            }
            _ => {
                store.rollbacks.fetch_add(1, Ordering::SeqCst);
                if store.fail_rollback.load(Ordering::SeqCst) {
                    return Err(Error::finalization(stage, MemoryError::Injected("rollback")));
                }
                debug!("memory transaction rolled back");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Transactor for MemoryTransactor {
    type Connection = MemoryConn;
    type Session = MemorySession;

    async fn conn(&self) -> Result<MemorySession> {
        self.checkout(false)
    }

    async fn transact(&self) -> Result<MemorySession> {
        self.checkout(true)
    }

    async fn close(&self) -> Result<()> {
        self.store.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_yields_connection_once() {
        let tr = MemoryTransactor::new();
        let mut session = tr.conn().await.unwrap();

        let conn = session.connection().unwrap();
        assert!(matches!(session.connection(), Err(Error::ConnectionTaken)));

        drop(conn);
        session.end(Outcome::Success).await.unwrap();
        assert_eq!(tr.stats().released, 1);
    }

    #[tokio::test]
    async fn transaction_is_invisible_until_commit() {
        let tr = MemoryTransactor::new();
        let mut session = tr.transact().await.unwrap();
        let conn = session.connection().unwrap();

        conn.lock().await.insert(1).unwrap();
        assert!(tr.keys().is_empty());

        drop(conn);
        session.end(Outcome::Success).await.unwrap();
        assert_eq!(tr.keys(), vec![1]);
    }

    #[tokio::test]
    async fn dropped_session_rolls_back_and_releases() {
        let tr = MemoryTransactor::new();
        {
            let mut session = tr.transact().await.unwrap();
            session.connection().unwrap().lock().await.insert(1).unwrap();
        }

        assert!(tr.keys().is_empty());
        let stats = tr.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn closed_transactor_refuses_sessions() {
        let tr = MemoryTransactor::new();
        tr.close().await.unwrap();

        let err = tr.conn().await.unwrap_err();
        assert!(err.is_acquisition());
        assert_eq!(err.downcast_ref::<MemoryError>(), Some(&MemoryError::Closed));
    }

    #[tokio::test]
    async fn delete_all_in_plain_mode_is_immediate() {
        let tr = MemoryTransactor::new();
        let mut session = tr.conn().await.unwrap();
        let conn = session.connection().unwrap();

        {
            let mut c = conn.lock().await;
            c.insert(1).unwrap();
            c.insert(2).unwrap();
            assert_eq!(c.delete_all(), 2);
        }
        assert!(tr.keys().is_empty());

        drop(conn);
        session.end(Outcome::Success).await.unwrap();
    }
}
