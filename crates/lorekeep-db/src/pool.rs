//! Connection pool sizing and setup.
//!
//! One pool per process, shared by every repository. The worker and any API
//! process size it from the environment; tests that need a pool pass an
//! explicit config instead.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use lorekeep_core::{Error, Result};

/// Pool sizing, resolved from the environment or supplied directly.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

impl PoolConfig {
    /// Read sizing from `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` and
    /// `DB_ACQUIRE_TIMEOUT_SECS`, falling back to defaults for anything
    /// unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_parse("DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout_secs: env_parse("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Open a PostgreSQL pool with the given sizing.
pub async fn create_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool established"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizing() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout_secs, 30);
    }

    #[test]
    fn test_env_parse_falls_back_on_missing_or_garbage() {
        assert_eq!(env_parse("LOREKEEP_POOL_TEST_UNSET_VAR", 7u32), 7);
        std::env::set_var("LOREKEEP_POOL_TEST_GARBAGE_VAR", "not-a-number");
        assert_eq!(env_parse("LOREKEEP_POOL_TEST_GARBAGE_VAR", 7u32), 7);
        std::env::remove_var("LOREKEEP_POOL_TEST_GARBAGE_VAR");
    }

    #[test]
    fn test_env_parse_reads_value() {
        std::env::set_var("LOREKEEP_POOL_TEST_SET_VAR", "42");
        assert_eq!(env_parse("LOREKEEP_POOL_TEST_SET_VAR", 7u32), 42);
        std::env::remove_var("LOREKEEP_POOL_TEST_SET_VAR");
    }
}
