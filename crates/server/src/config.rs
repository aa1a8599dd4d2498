// Server configuration, read from the environment at boot.
//
// Everything has a development default so `cargo run` works with no
// setup beyond a database. The DB pool sizing lives in db::pool with
// its own WAYPOINT_SERVER_DB_* variables.

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: Option<String>,
    /// Log filter directive (e.g. `info`, `waypoint_server=debug`).
    pub log_filter: String,
    /// Interval between server liveness pings.
    pub heartbeat_interval: Duration,
    /// Disconnect when no pong arrives within this window.
    pub heartbeat_timeout: Duration,
    /// Presence broadcast coalescing window; zero pushes the full
    /// roster on every single change, which is the historical behavior.
    pub presence_debounce: Duration,
}

impl ServerConfig {
    /// Environment variables and their defaults:
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `WAYPOINT_SERVER_HOST` | `0.0.0.0` |
    /// | `WAYPOINT_SERVER_PORT` | `3000` |
    /// | `WAYPOINT_SERVER_DATABASE_URL` | *(none)* |
    /// | `WAYPOINT_SERVER_LOG_FILTER` | `info` |
    /// | `WAYPOINT_SERVER_HEARTBEAT_INTERVAL_MS` | `10000` |
    /// | `WAYPOINT_SERVER_HEARTBEAT_TIMEOUT_MS` | `30000` |
    /// | `WAYPOINT_SERVER_PRESENCE_DEBOUNCE_MS` | `0` |
    ///
    /// CORS origins are read separately in cors.rs.
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor taking an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("WAYPOINT_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = env("WAYPOINT_SERVER_PORT")
            .ok()
            .and_then(|raw| raw.parse::<u16>().ok())
            .unwrap_or(3000);

        Self {
            listen_addr: format!("{host}:{port}")
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port))),
            database_url: env("WAYPOINT_SERVER_DATABASE_URL").ok(),
            log_filter: env("WAYPOINT_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into()),
            heartbeat_interval: window_ms(&env, "WAYPOINT_SERVER_HEARTBEAT_INTERVAL_MS", 10_000),
            heartbeat_timeout: window_ms(&env, "WAYPOINT_SERVER_HEARTBEAT_TIMEOUT_MS", 30_000),
            presence_debounce: window_ms(&env, "WAYPOINT_SERVER_PRESENCE_DEBOUNCE_MS", 0),
        }
    }
}

fn window_ms<F>(env: &F, key: &str, default_ms: u64) -> Duration
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    Duration::from_millis(env(key).ok().and_then(|raw| raw.parse().ok()).unwrap_or(default_ms))
}
