//! SQL statement actions
//!
//! Each helper returns a [`PgAction`] that runs one statement on the
//! session's connection when the action is executed.

use dbaction_core::{Action, Conn};
use sqlx::postgres::{PgArguments, PgRow};

use crate::transactor::PgConn;
use crate::PgAction;

/// Fetch every row returned by `sql`.
pub fn query(sql: impl Into<String>) -> PgAction<Vec<PgRow>> {
    query_with(sql, PgArguments::default())
}

/// Fetch every row returned by `sql` with bound parameters `$1..$n`.
///
/// ```ignore
/// let mut args = PgArguments::default();
/// args.add(7_i64)?;
/// let rows = query_with("SELECT $1 + 1 AS num", args).run(&tr).await?;
/// ```
pub fn query_with(sql: impl Into<String>, args: PgArguments) -> PgAction<Vec<PgRow>> {
    let sql = sql.into();
    Action::new(move |conn: Conn<PgConn>| async move {
        let mut guard = conn.lock().await;
        let rows = sqlx::query_with(&sql, args).fetch_all(&mut **guard).await?;
        Ok(rows)
    })
}

/// Run a statement and return the number of rows it affected.
pub fn execute(sql: impl Into<String>) -> PgAction<u64> {
    execute_with(sql, PgArguments::default())
}

pub fn execute_with(sql: impl Into<String>, args: PgArguments) -> PgAction<u64> {
    let sql = sql.into();
    Action::new(move |conn: Conn<PgConn>| async move {
        let mut guard = conn.lock().await;
        let done = sqlx::query_with(&sql, args).execute(&mut **guard).await?;
        Ok(done.rows_affected())
    })
}
