use crate::AppError;

/// PostgreSQL port; not configurable.
pub const DATABASE_PORT: u16 = 5432;

/// Database name; not configurable.
pub const DATABASE_NAME: &str = "postgres";

/// Schema every table lives in.
pub const DATABASE_SCHEMA: &str = "public";

/// Global application settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// PostgreSQL host name.
    pub database_host: String,

    /// PostgreSQL role to connect as.
    pub database_user: String,

    /// Password for `database_user`.
    pub database_password: String,

    /// Port for the API server.
    pub api_port: u16,

    /// Seconds between two expiring-purchase scans.
    pub expiry_scan_interval_secs: u64,
}

impl Settings {
    /// Load settings from environment variables (with optional `.env` file).
    pub fn from_env() -> eyre::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source; absent keys fall back to
    /// defaults, except the database password.
    pub fn from_lookup<F>(lookup: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        Ok(Self {
            database_host: var("DATABASE_HOST", "localhost"),
            database_user: var("DATABASE_USER", "postgres"),
            database_password: lookup("DATABASE_PASSWORD")
                .ok_or_else(|| AppError::Config("DATABASE_PASSWORD must be set".into()))?,
            api_port: var("API_PORT", "3000").parse()?,
            expiry_scan_interval_secs: var("EXPIRY_SCAN_INTERVAL_SECS", "3600").parse()?,
        })
    }
}
