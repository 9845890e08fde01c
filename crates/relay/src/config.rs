// Relay settings, read from `CODESYNC_RELAY_*` environment variables.
//
// Every variable is optional; unset or unparsable values fall back to
// defaults suitable for a local relay.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8001;
/// How long a room without sessions is kept before its state is dropped.
pub const DEFAULT_ROOM_IDLE_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `codesync_relay=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    pub room_idle: Duration,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CODESYNC_RELAY_HOST` | `0.0.0.0` |
    /// | `CODESYNC_RELAY_PORT` | `8001` |
    /// | `CODESYNC_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `CODESYNC_RELAY_LOG_FILTER` | `info` |
    /// | `CODESYNC_RELAY_LOG_JSON` | `false` |
    /// | `CODESYNC_RELAY_ROOM_IDLE_SECS` | `300` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("CODESYNC_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("CODESYNC_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let cors_origins = env("CODESYNC_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("CODESYNC_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("CODESYNC_RELAY_LOG_JSON")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let room_idle_secs = env("CODESYNC_RELAY_ROOM_IDLE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_ROOM_IDLE_SECS);

        Self {
            listen_addr,
            cors_origins,
            log_filter,
            log_json,
            room_idle: Duration::from_secs(room_idle_secs),
        }
    }
}
