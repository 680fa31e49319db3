//! Server configuration for `roastd`.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::time::Duration;

use roastd_store::Dialect;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// SQL dialect.
    pub database_type: Dialect,
    /// Database URL for the chosen dialect.
    pub database_url: String,
    /// Base URL of a remote mission kernel. When set, the dispatcher and
    /// workers speak HTTP to it instead of the local store.
    pub kernel_url: Option<String>,
    /// MQTT broker URL for the dispatcher.
    pub mqtt_url: String,
    /// Dispatcher topic filters.
    pub dispatcher_topics: Vec<String>,
    /// Dispatcher goals; the first is used for created missions.
    pub dispatcher_goals: Vec<String>,
    /// Max attempts on dispatcher-created missions.
    pub dispatcher_max_attempts: Option<u32>,
    /// Whether the replay endpoint is enabled.
    pub dispatcher_replay_enabled: bool,
    /// Whether to run the dispatcher at all.
    pub dispatcher_enabled: bool,
    /// Number of in-process worker tasks.
    pub workers: u32,
    /// Worker poll interval.
    pub poll_interval: Duration,
    /// Per-mission execution timeout.
    pub mission_timeout: Duration,
    /// Worker heartbeat interval. Must stay under half the lease TTL.
    pub heartbeat_interval: Duration,
    /// Mission lease TTL.
    pub lease_ttl: Duration,
    /// Whether the circuit breaker loop runs.
    pub circuit_breaker_enabled: bool,
    /// Circuit breaker tick interval.
    pub circuit_breaker_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `ROASTD_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8700`)
    /// - `ROASTD_LOG_LEVEL` — log filter (default: `info`)
    /// - `DATABASE_TYPE` — `sqlite` or `postgres` (default: `sqlite`)
    /// - `DATABASE_URL` — connection URL (overrides `COMMAND_DB_PATH`)
    /// - `COMMAND_DB_PATH` — SQLite file path (default: `./roastd.db`)
    /// - `KERNEL_URL` — remote mission kernel base URL (default: unset, use the local store)
    /// - `DISPATCHER_MQTT_URL` — broker (default: `mqtt://127.0.0.1:1883`)
    /// - `DISPATCHER_TOPICS` — comma-separated filters (default: `ops/+/+/+/session/closed`)
    /// - `DISPATCHER_GOALS` — comma-separated goals (default: `generate-roast-report`)
    /// - `DISPATCHER_MAX_ATTEMPTS` — attempts cap for created missions (default: kernel default)
    /// - `DISPATCHER_REPLAY_ENABLED` — enable the replay endpoint (default: `false`)
    /// - `ROASTD_ENABLE_DISPATCHER` — run the dispatcher (default: `true`)
    /// - `ROASTD_WORKERS` — worker task count (default: `1`; `0` disables)
    /// - `POLL_INTERVAL_MS` — worker poll interval (default: `5000`)
    /// - `MISSION_TIMEOUT_MS` — mission timeout (default: `300000`)
    /// - `WORKER_HEARTBEAT_MS` — heartbeat interval (default: `10000`)
    /// - `ROASTD_LEASE_TTL_SECS` — mission lease TTL (default: `60`)
    /// - `CIRCUIT_BREAKER_ENABLED` — run the breaker loop (default: `true`)
    /// - `CIRCUIT_BREAKER_INTERVAL` — breaker tick seconds (default: `60`)
    pub fn from_env() -> Result<Self, String> {
        let bind_addr = if let Ok(addr) = std::env::var("ROASTD_BIND_ADDR") {
            addr.parse()
                .map_err(|_| format!("bad ROASTD_BIND_ADDR '{addr}'"))?
        } else if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.parse().map_err(|_| format!("bad PORT '{port}'"))?;
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8700))
        };

        let log_level = env_or("ROASTD_LOG_LEVEL", "info");

        let database_type = Dialect::parse(&env_or("DATABASE_TYPE", "sqlite"))
            .map_err(|e| e.to_string())?;
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            let path = env_or("COMMAND_DB_PATH", "./roastd.db");
            format!("sqlite://{path}?mode=rwc")
        });

        let config = Self {
            bind_addr,
            log_level,
            database_type,
            database_url,
            kernel_url: std::env::var("KERNEL_URL").ok().filter(|s| !s.is_empty()),
            mqtt_url: env_or("DISPATCHER_MQTT_URL", "mqtt://127.0.0.1:1883"),
            dispatcher_topics: split_csv(&env_or(
                "DISPATCHER_TOPICS",
                roastd_fabric::dispatcher::DEFAULT_TOPIC,
            )),
            dispatcher_goals: split_csv(&env_or(
                "DISPATCHER_GOALS",
                roastd_fabric::dispatcher::DEFAULT_GOAL,
            )),
            dispatcher_max_attempts: env_parse("DISPATCHER_MAX_ATTEMPTS")?,
            dispatcher_replay_enabled: env_bool("DISPATCHER_REPLAY_ENABLED", false),
            dispatcher_enabled: env_bool("ROASTD_ENABLE_DISPATCHER", true),
            workers: env_parse("ROASTD_WORKERS")?.unwrap_or(1),
            poll_interval: Duration::from_millis(
                env_parse("POLL_INTERVAL_MS")?.unwrap_or(5_000),
            ),
            mission_timeout: Duration::from_millis(
                env_parse("MISSION_TIMEOUT_MS")?.unwrap_or(300_000),
            ),
            heartbeat_interval: Duration::from_millis(
                env_parse("WORKER_HEARTBEAT_MS")?.unwrap_or(10_000),
            ),
            lease_ttl: Duration::from_secs(env_parse("ROASTD_LEASE_TTL_SECS")?.unwrap_or(60)),
            circuit_breaker_enabled: env_bool("CIRCUIT_BREAKER_ENABLED", true),
            circuit_breaker_interval: Duration::from_secs(
                env_parse("CIRCUIT_BREAKER_INTERVAL")?.unwrap_or(60),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval >= self.lease_ttl / 2 {
            return Err(format!(
                "WORKER_HEARTBEAT_MS ({:?}) must be < half of ROASTD_LEASE_TTL_SECS ({:?})",
                self.heartbeat_interval, self.lease_ttl
            ));
        }
        if self.dispatcher_goals.is_empty() {
            return Err("DISPATCHER_GOALS must not be empty".to_owned());
        }
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "true" || v == "1",
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match std::env::var(name) {
        Ok(v) if v.is_empty() => Ok(None),
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| format!("bad {name} '{v}'")),
        Err(_) => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_csv("ops/+/+/+/session/closed, ops/+/+/+/session/late,"),
            vec![
                "ops/+/+/+/session/closed".to_owned(),
                "ops/+/+/+/session/late".to_owned()
            ]
        );
    }

    #[test]
    fn heartbeat_must_stay_under_half_lease() {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8700)),
            log_level: "info".to_owned(),
            database_type: Dialect::Sqlite,
            database_url: "sqlite::memory:".to_owned(),
            kernel_url: None,
            mqtt_url: "mqtt://127.0.0.1:1883".to_owned(),
            dispatcher_topics: vec!["ops/#".to_owned()],
            dispatcher_goals: vec!["generate-roast-report".to_owned()],
            dispatcher_max_attempts: None,
            dispatcher_replay_enabled: false,
            dispatcher_enabled: false,
            workers: 1,
            poll_interval: Duration::from_secs(5),
            mission_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(40),
            lease_ttl: Duration::from_secs(60),
            circuit_breaker_enabled: true,
            circuit_breaker_interval: Duration::from_secs(60),
        };
        assert!(config.validate().is_err());
    }
}
