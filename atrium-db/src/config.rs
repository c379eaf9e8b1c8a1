//! Database configuration.

use crate::error::DbResult;
use atrium_core::{env_duration_millis, env_duration_secs, env_list, env_parse, env_string};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::time::Duration;
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Clone)]
pub struct DbConfig {
    /// Full connection string. When set, the discrete fields below are ignored.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a connection, both from the pool and when dialing.
    pub timeout: Duration,
    /// Startup connectivity attempts before giving up.
    pub connect_attempts: u32,
    /// Base delay between startup attempts; attempt `n` waits `n * backoff`.
    pub connect_backoff: Duration,
    /// Extensions ensured at startup (`CREATE EXTENSION IF NOT EXISTS`).
    pub extensions: Vec<String>,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("max_size", &self.max_size)
            .field("timeout", &self.timeout)
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_backoff", &self.connect_backoff)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "atrium".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
            connect_attempts: 5,
            connect_backoff: Duration::from_secs(1),
            extensions: vec!["pg_trgm".to_string()],
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// - `ATRIUM_DATABASE_URL`: connection string (overrides the fields below)
    /// - `ATRIUM_DB_HOST`, `ATRIUM_DB_PORT`, `ATRIUM_DB_NAME`, `ATRIUM_DB_USER`,
    ///   `ATRIUM_DB_PASSWORD`
    /// - `ATRIUM_DB_POOL_SIZE` (default: 16)
    /// - `ATRIUM_DB_TIMEOUT` seconds (default: 30)
    /// - `ATRIUM_DB_CONNECT_ATTEMPTS` (default: 5)
    /// - `ATRIUM_DB_CONNECT_BACKOFF_MS` (default: 1000)
    /// - `ATRIUM_DB_EXTENSIONS`: comma-separated (default: pg_trgm)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let extensions = match std::env::var("ATRIUM_DB_EXTENSIONS") {
            Ok(_) => env_list("ATRIUM_DB_EXTENSIONS"),
            Err(_) => defaults.extensions,
        };
        Self {
            url: env_string("ATRIUM_DATABASE_URL"),
            host: env_string("ATRIUM_DB_HOST").unwrap_or(defaults.host),
            port: env_parse("ATRIUM_DB_PORT", defaults.port),
            dbname: env_string("ATRIUM_DB_NAME").unwrap_or(defaults.dbname),
            user: env_string("ATRIUM_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("ATRIUM_DB_PASSWORD").unwrap_or_default(),
            max_size: env_parse("ATRIUM_DB_POOL_SIZE", defaults.max_size),
            timeout: env_duration_secs("ATRIUM_DB_TIMEOUT", defaults.timeout),
            connect_attempts: env_parse("ATRIUM_DB_CONNECT_ATTEMPTS", defaults.connect_attempts).max(1),
            connect_backoff: env_duration_millis("ATRIUM_DB_CONNECT_BACKOFF_MS", defaults.connect_backoff),
            extensions,
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// Creating the pool does not dial; connections open lazily.
    pub fn create_pool(&self) -> DbResult<Pool> {
        let mut cfg = Config::new();
        match &self.url {
            Some(url) => cfg.url = Some(url.clone()),
            None => {
                cfg.host = Some(self.host.clone());
                cfg.port = Some(self.port);
                cfg.dbname = Some(self.dbname.clone());
                cfg.user = Some(self.user.clone());
                cfg.password = Some(self.password.clone());
            }
        }

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size.max(1));
        pool.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool);

        Ok(cfg.create_pool(Some(Runtime::Tokio1), NoTls)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.extensions, vec!["pg_trgm".to_string()]);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = DbConfig {
            url: Some("postgres://u:hunter2@db/app".to_string()),
            password: "hunter2".to_string(),
            ..DbConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        let pool = DbConfig::default().create_pool().unwrap();
        assert_eq!(pool.status().size, 0);
        assert_eq!(pool.status().max_size, 16);
    }
}
