//! Database connection pool construction
//!
//! Uses sqlx PgPool with explicit connection limits taken from [`PgConfig`].

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::PgConfig;

/// Pool options described by `config`.
pub fn pool_options(config: &PgConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
}

/// Create a PostgreSQL connection pool.
///
/// # Errors
///
/// Returns an error if the first connection fails.
///
/// # Example
///
/// ```ignore
/// let pool = create_pool(&PgConfig::from_env()?).await?;
/// ```
pub async fn create_pool(config: &PgConfig) -> Result<PgPool, sqlx::Error> {
    pool_options(config).connect(&config.database_url).await
}

/// Create a pool that opens connections on first use.
pub fn create_pool_lazy(config: &PgConfig) -> Result<PgPool, sqlx::Error> {
    pool_options(config).connect_lazy(&config.database_url)
}
