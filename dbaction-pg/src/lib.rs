//! dbaction-pg: PostgreSQL transactor for dbaction-core
//!
//! [`PgTransactor`] runs [`PgAction`]s on a sqlx [`PgPool`](sqlx::PgPool):
//! `run` borrows a pooled connection, `transact` wraps the action in
//! `BEGIN`/`COMMIT`, rolling back when it fails.
//!
//! ```ignore
//! use dbaction_pg::{chain, execute, query, PgConfig, PgTransactor};
//!
//! let tr = PgTransactor::connect(&PgConfig::from_env()?).await?;
//! let rows = chain!(
//!     execute("INSERT INTO users (name) VALUES ('ada')"),
//!     |_| query("SELECT COUNT(*) AS n FROM users"),
//! )
//! .transact(&tr)
//! .await?;
//! tr.close().await?;
//! ```

pub mod config;
pub mod pool;
pub mod query;
pub mod transactor;

pub use config::{ConfigError, PgConfig};
pub use dbaction_core::{
    chain, flatten, pure, sequence, sequence_all, Action, Conn, Error, Pure, Result, Stage,
    Transactor,
};
pub use query::{execute, execute_with, query, query_with};
pub use sqlx::postgres::{PgArguments, PgRow};
pub use transactor::{PgConn, PgSession, PgTransactor};

/// Action against a PostgreSQL connection
pub type PgAction<T> = Action<PgConn, T>;
