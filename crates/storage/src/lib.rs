pub mod models;
pub mod repos;

pub use sqlx::postgres::PgPool;

use blinkshare_core::Settings;
use blinkshare_core::config::{DATABASE_NAME, DATABASE_PORT, DATABASE_SCHEMA};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;

/// Process-wide handle to the store, built once at startup and passed to
/// whoever needs it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Connection options for the fixed port, database, and schema.
pub fn connect_options(settings: &Settings) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&settings.database_host)
        .port(DATABASE_PORT)
        .username(&settings.database_user)
        .password(&settings.database_password)
        .database(DATABASE_NAME)
        .options([("search_path", DATABASE_SCHEMA)])
}

/// Connect to PostgreSQL with a production-ready connection pool.
pub async fn connect(options: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect_with(options)
        .await
}

/// Connect using `settings`. Failures are logged and handed back so the
/// caller decides whether startup continues.
pub async fn initialize(settings: &Settings) -> Result<Database, sqlx::Error> {
    match connect(connect_options(settings)).await {
        Ok(pool) => {
            tracing::info!(host = %settings.database_host, "Database connected successfully");
            Ok(Database::from_pool(pool))
        }
        Err(e) => {
            tracing::error!(host = %settings.database_host, error = %e, "Error during database initialization");
            Err(e)
        }
    }
}
