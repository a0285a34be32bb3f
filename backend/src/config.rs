//! Configuration management for the stock ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with the LEDGER__ prefix (e.g. LEDGER__LEDGER__BACKEND=memory)

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Ledger engine configuration
    pub ledger: LedgerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection before reporting busy
    pub acquire_timeout_secs: u64,
}

/// Which store backs the ledger
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Transaction isolation used for ledger postings
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub backend: StoreBackend,

    pub isolation: IsolationLevel,

    /// Longest wait for a position row lock
    pub lock_timeout_ms: u64,

    /// Longest single statement inside a posting
    pub statement_timeout_ms: u64,

    /// Attempts after the first when a posting reports busy
    pub busy_retries: u32,

    /// Initial backoff between busy retries, doubled per attempt
    pub retry_backoff_ms: u64,

    /// Active reservations older than this are reported as orphans
    pub orphan_reservation_minutes: i64,
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn orphan_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.orphan_reservation_minutes)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            isolation: IsolationLevel::Serializable,
            lock_timeout_ms: 5_000,
            statement_timeout_ms: 15_000,
            busy_retries: 3,
            retry_backoff_ms: 50,
            orphan_reservation_minutes: 1_440,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/stock_ledger")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("ledger.backend", "postgres")?
            .set_default("ledger.isolation", "serializable")?
            .set_default("ledger.lock_timeout_ms", 5_000)?
            .set_default("ledger.statement_timeout_ms", 15_000)?
            .set_default("ledger.busy_retries", 3)?
            .set_default("ledger.retry_backoff_ms", 50)?
            .set_default("ledger.orphan_reservation_minutes", 1_440)?
            .set_default(
                "logging.filter",
                "stock_ledger=debug,stock_ledger_server=debug,tower_http=debug,sqlx=warn",
            )?
            .set_default("logging.json", false)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER__ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/stock_ledger".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "stock_ledger=debug,tower_http=debug,sqlx=warn".to_string(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            ledger: LedgerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
