//! PostgreSQL transactor over a sqlx pool
//!
//! Plain sessions borrow a pooled connection and hand it back on end.
//! Transactional sessions open a transaction with `pool.begin()` and end it
//! with `COMMIT` or `ROLLBACK` according to the action's outcome.

use std::fmt;
use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use dbaction_core::{Conn, Error, Outcome, Result, Session, Stage, Transactor};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use crate::config::PgConfig;
use crate::pool::{create_pool, create_pool_lazy};

/// Connection handed to PostgreSQL actions
///
/// Dereferences to [`PgConnection`], so queries run with
/// `.fetch_all(&mut **conn.lock().await)`.
pub enum PgConn {
    Pooled(PoolConnection<Postgres>),
    Transaction(Transaction<'static, Postgres>),
}

impl PgConn {
    pub fn in_transaction(&self) -> bool {
        matches!(self, PgConn::Transaction(_))
    }
}

impl fmt::Debug for PgConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgConn::Pooled(_) => f.write_str("PgConn::Pooled"),
            PgConn::Transaction(_) => f.write_str("PgConn::Transaction"),
        }
    }
}

impl Deref for PgConn {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            PgConn::Pooled(conn) => &**conn,
            PgConn::Transaction(tx) => &**tx,
        }
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            PgConn::Pooled(conn) => &mut **conn,
            PgConn::Transaction(tx) => &mut **tx,
        }
    }
}

#[derive(Debug)]
pub struct PgSession {
    conn: Conn<PgConn>,
    taken: bool,
}

impl PgSession {
    fn new(conn: PgConn) -> Self {
        Self {
            conn: Conn::new(conn),
            taken: false,
        }
    }
}

#[async_trait]
impl Session for PgSession {
    type Connection = PgConn;

    fn connection(&mut self) -> Result<Conn<PgConn>> {
        if std::mem::replace(&mut self.taken, true) {
            return Err(Error::ConnectionTaken);
        }
        Ok(self.conn.clone())
    }

    async fn end(self, outcome: Outcome) -> Result<()> {
        let conn = match self.conn.try_unwrap() {
            Ok(conn) => conn,
            Err(shared) => {
                let others = shared.handles() - 1;
                if !shared.lock().await.in_transaction() {
                    // The pool takes the connection back when the last handle drops.
                    debug!(others, "connection release deferred to outstanding handles");
                    return Ok(());
                }
                return Err(Error::finalization(
                    Stage::Release,
                    anyhow::anyhow!("connection still held by {others} handle(s)"),
                ));
            }
        };

        match (conn, outcome) {
            (PgConn::Pooled(conn), _) => {
                drop(conn);
                debug!("connection returned to pool");
                Ok(())
            }
            (PgConn::Transaction(tx), Outcome::Success) => {
                tx.commit()
                    .await
                    .map_err(|e| Error::finalization(Stage::Commit, e))?;
                debug!("transaction committed");
                Ok(())
            }
            (PgConn::Transaction(tx), Outcome::Failure) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "rollback failed");
                    return Err(Error::finalization(Stage::Rollback, e));
                }
                debug!("transaction rolled back");
                Ok(())
            }
        }
    }
}

/// [`Transactor`] backed by a [`PgPool`]
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgTransactor {
    pool: PgPool,
}

impl PgTransactor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from `config` and open its first connection.
    pub async fn connect(config: &PgConfig) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self::new(create_pool(config).await?))
    }

    /// Build a pool from `config` without connecting yet.
    pub fn connect_lazy(config: &PgConfig) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self::new(create_pool_lazy(config)?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<PgPool> for PgTransactor {
    fn from(pool: PgPool) -> Self {
        Self::new(pool)
    }
}

#[async_trait]
impl Transactor for PgTransactor {
    type Connection = PgConn;
    type Session = PgSession;

    async fn conn(&self) -> Result<PgSession> {
        let conn = self.pool.acquire().await.map_err(Error::acquisition)?;
        debug!(idle = self.pool.num_idle(), "connection acquired");
        Ok(PgSession::new(PgConn::Pooled(conn)))
    }

    async fn transact(&self) -> Result<PgSession> {
        let tx = self.pool.begin().await.map_err(Error::acquisition)?;
        debug!("transaction begun");
        Ok(PgSession::new(PgConn::Transaction(tx)))
    }

    /// Wait for checked-out connections to return, then close the pool.
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!("pool closed");
        Ok(())
    }
}
