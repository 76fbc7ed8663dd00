//! The deferred database action.
//!
//! An [`Action`] is a description of work against a connection. Nothing runs
//! until it is handed to [`Action::run`] or [`Action::transact`], which check a
//! connection out of a [`Transactor`], drive the composed function to
//! completion and end the session.

use std::fmt;
use std::future::Future;

use anyhow::Context as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::transactor::{Conn, Outcome, Session, Transactor};

type ActionFn<C, T> = Box<dyn FnOnce(Conn<C>) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Deferred unit of work against a connection of type `C`, producing `T`.
#[must_use = "actions do nothing until run or transacted"]
pub struct Action<C, T> {
    f: ActionFn<C, T>,
}

impl<C, T> fmt::Debug for Action<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("output", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<C, T> Action<C, T>
where
    C: Send + 'static,
    T: Send + 'static,
{
    /// Wrap a function from a connection handle to a future result.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Conn<C>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            f: Box::new(move |conn| f(conn).boxed()),
        }
    }

    /// Action that resolves to `value` without touching the connection.
    pub fn value(value: T) -> Self {
        Self::new(move |_| async move { Ok(value) })
    }

    /// Action that awaits `fut` when executed.
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(move |_| fut)
    }

    /// Action that calls `thunk` only when executed.
    pub fn lazy<F, Fut>(thunk: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(move |_| thunk())
    }

    /// Action that always fails with `err`.
    pub fn fail(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        Self::new(move |_| async move { Err(err) })
    }

    pub fn map<K, F>(self, f: F) -> Action<C, K>
    where
        K: Send + 'static,
        F: FnOnce(T) -> K + Send + 'static,
    {
        Action::new(move |conn| async move { self.execute(conn).await.map(f) })
    }

    /// Like [`Action::map`], for transforms that can fail.
    pub fn try_map<K, E, F>(self, f: F) -> Action<C, K>
    where
        K: Send + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce(T) -> std::result::Result<K, E> + Send + 'static,
    {
        Action::new(move |conn| async move {
            let value = self.execute(conn).await?;
            f(value).map_err(Into::into)
        })
    }

    /// Feed the result into `f` and run the action it returns on the same
    /// connection.
    pub fn flat_map<K, F>(self, f: F) -> Action<C, K>
    where
        K: Send + 'static,
        F: FnOnce(T) -> Action<C, K> + Send + 'static,
    {
        Action::new(move |conn: Conn<C>| async move {
            let value = self.execute(conn.clone()).await?;
            f(value).execute(conn).await
        })
    }

    /// Attach context to a failure of this action.
    pub fn context<M>(self, msg: M) -> Self
    where
        M: fmt::Display + Send + Sync + 'static,
    {
        Action::new(move |conn| async move { self.execute(conn).await.context(msg) })
    }

    /// Drive the wrapped function against an existing connection handle.
    pub fn execute(self, conn: Conn<C>) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.f)(conn)
    }

    /// Run on a plain connection checkout, with no transaction.
    #[instrument(name = "action", skip_all, fields(mode = "run"))]
    pub async fn run<X>(self, transactor: &X) -> Result<T>
    where
        X: Transactor<Connection = C> + ?Sized,
    {
        let session = transactor.conn().await?;
        debug!("session acquired");
        self.drive(session).await
    }

    /// Run inside a transaction: commit on success, roll back on failure.
    #[instrument(name = "action", skip_all, fields(mode = "transact"))]
    pub async fn transact<X>(self, transactor: &X) -> Result<T>
    where
        X: Transactor<Connection = C> + ?Sized,
    {
        let session = transactor.transact().await?;
        debug!("transaction opened");
        self.drive(session).await
    }

    async fn drive<S>(self, mut session: S) -> Result<T>
    where
        S: Session<Connection = C>,
    {
        let conn = match session.connection() {
            Ok(conn) => conn,
            Err(err) => {
                session.end(Outcome::Failure).await?;
                return Err(err);
            }
        };

        match self.execute(conn).await {
            Ok(value) => {
                session.end(Outcome::Success).await?;
                debug!("session ended");
                Ok(value)
            }
            Err(err) => match session.end(Outcome::Failure).await {
                Ok(()) => {
                    debug!(error = %err, "session ended after failure");
                    Err(Error::Execution(err))
                }
                Err(finalize) => {
                    warn!(error = %finalize, original = %err, "finalizer failed after action error");
                    Err(finalize.superseding(err))
                }
            },
        }
    }
}
