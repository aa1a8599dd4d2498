// PostgreSQL pool construction.
//
// One pool is shared by session verification, room resolution, and
// message persistence. Plaintext connections are a configuration
// error, not a fallback: the connection string must request TLS.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;

/// Pool sizing, overridable per deployment through
/// `WAYPOINT_SERVER_DB_{MIN_CONNECTIONS,MAX_CONNECTIONS,ACQUIRE_TIMEOUT_SECS}`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 20,
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_connections: parsed_env(
                "WAYPOINT_SERVER_DB_MIN_CONNECTIONS",
                defaults.min_connections,
            ),
            max_connections: parsed_env(
                "WAYPOINT_SERVER_DB_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            acquire_timeout: Duration::from_secs(parsed_env(
                "WAYPOINT_SERVER_DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )),
        }
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

pub async fn create_pg_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let options: PgConnectOptions =
        database_url.parse().context("invalid PostgreSQL connection string")?;
    require_tls(&options)?;

    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .context("failed to open the PostgreSQL pool")
}

fn require_tls(options: &PgConnectOptions) -> Result<()> {
    let mode = options.get_ssl_mode();
    if matches!(mode, PgSslMode::Require | PgSslMode::VerifyCa | PgSslMode::VerifyFull) {
        return Ok(());
    }
    bail!("refusing plaintext PostgreSQL connection (sslmode={mode:?}); use sslmode=require or stricter")
}

/// One round trip through the pool, run at startup so a misconfigured
/// database fails the boot instead of the first user.
pub async fn check_pool_health(pool: &PgPool) -> Result<()> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .context("PostgreSQL liveness probe failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(url: &str) -> PgConnectOptions {
        url.parse().expect("connection string should parse")
    }

    #[test]
    fn tls_requiring_modes_pass() {
        for mode in ["require", "verify-ca", "verify-full"] {
            let url = format!("postgres://waypoint:pw@db.example.lt/waypoint?sslmode={mode}");
            require_tls(&options(&url)).unwrap_or_else(|_| panic!("{mode} should be accepted"));
        }
    }

    #[test]
    fn plaintext_modes_are_refused() {
        for mode in ["disable", "prefer", "allow"] {
            let url = format!("postgres://waypoint:pw@db.example.lt/waypoint?sslmode={mode}");
            let error = require_tls(&options(&url)).expect_err("plaintext must be refused");
            assert!(error.to_string().contains("refusing plaintext"), "mode {mode}");
        }
    }

    #[test]
    fn default_sizing_is_two_to_twenty_connections() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
    }
}
