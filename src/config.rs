//! Tracker configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable values fall back to
//! the defaults below.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;

use crate::domain::{DuplicatePolicy, ProxyRules, SenderGuard};
use crate::service::RecorderSettings;
use crate::signals::{SignalLimits, SignalMode};

/// Top-level tracker configuration.
///
/// Loaded once at startup via [`TrackerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// SQLite connection string.
    pub database_url: String,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// SQLite busy timeout in seconds.
    pub database_busy_timeout_secs: u64,

    /// Base URL of issued pixel links.
    pub public_base_url: String,

    /// Active sender-signal channel.
    pub signal_mode: SignalMode,

    /// Duplicate window in milliseconds.
    pub dedup_window_ms: i64,

    /// Guard window after `sent_at` in milliseconds.
    pub sender_guard_window_ms: i64,

    /// Lifetime of an unconsumed explicit signal in milliseconds.
    pub suppression_ttl_ms: i64,

    /// Heartbeat look-back in milliseconds.
    pub heartbeat_lookback_ms: i64,

    /// Maximum message ids held by the signal store.
    pub signal_map_limit: usize,

    /// Debug ring capacity.
    pub debug_event_limit: usize,

    /// Latency sample capacity.
    pub latency_sample_limit: usize,

    /// Lower-case user-agent substrings that mark proxy fetches.
    pub proxy_ua_tokens: Vec<String>,

    /// Address prefixes of proxy fleets.
    pub proxy_ip_prefixes: Vec<String>,

    /// Bound on one recorder transaction in milliseconds.
    pub store_timeout_ms: u64,

    /// JSON API request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Optional JSON range table for geo lookups.
    pub geo_db_path: Option<PathBuf>,

    /// Shared secret for dashboard endpoints; dashboards are closed when
    /// unset.
    pub dashboard_token: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let proxy = ProxyRules::default();
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://data/tracker.db".to_string(),
            database_max_connections: 5,
            database_busy_timeout_secs: 5,
            public_base_url: "http://localhost:8080".to_string(),
            signal_mode: SignalMode::Heartbeat,
            dedup_window_ms: 10_000,
            sender_guard_window_ms: 10_000,
            suppression_ttl_ms: 10_000,
            heartbeat_lookback_ms: 30_000,
            signal_map_limit: 10_000,
            debug_event_limit: 5_000,
            latency_sample_limit: 1_000,
            proxy_ua_tokens: proxy.agent_tokens,
            proxy_ip_prefixes: proxy.ip_prefixes,
            store_timeout_ms: 3_000,
            request_timeout_secs: 10,
            geo_db_path: None,
            dashboard_token: None,
        }
    }
}

impl TrackerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to [`TrackerConfig::default`] when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`], or `SIGNAL_MODE` names an unknown channel.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };
        let signal_mode: SignalMode = match std::env::var("SIGNAL_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.signal_mode,
        };

        Ok(Self {
            listen_addr,
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            database_busy_timeout_secs: parse_env(
                "DATABASE_BUSY_TIMEOUT_SECS",
                defaults.database_busy_timeout_secs,
            ),
            public_base_url: std::env::var("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            signal_mode,
            dedup_window_ms: parse_env("DEDUP_WINDOW_MS", defaults.dedup_window_ms),
            sender_guard_window_ms: parse_env(
                "SENDER_GUARD_WINDOW_MS",
                defaults.sender_guard_window_ms,
            ),
            suppression_ttl_ms: parse_env("SUPPRESSION_TTL_MS", defaults.suppression_ttl_ms),
            heartbeat_lookback_ms: parse_env(
                "HEARTBEAT_LOOKBACK_MS",
                defaults.heartbeat_lookback_ms,
            ),
            signal_map_limit: parse_env("SIGNAL_MAP_LIMIT", defaults.signal_map_limit),
            debug_event_limit: parse_env("DEBUG_EVENT_LIMIT", defaults.debug_event_limit),
            latency_sample_limit: parse_env("LATENCY_SAMPLE_LIMIT", defaults.latency_sample_limit),
            proxy_ua_tokens: parse_env_list("PROXY_UA_TOKENS", defaults.proxy_ua_tokens, true),
            proxy_ip_prefixes: parse_env_list(
                "PROXY_IP_PREFIXES",
                defaults.proxy_ip_prefixes,
                false,
            ),
            store_timeout_ms: parse_env("STORE_TIMEOUT_MS", defaults.store_timeout_ms),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            geo_db_path: std::env::var("GEO_DB_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            dashboard_token: std::env::var("DASHBOARD_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
        })
    }

    /// Proxy recognition rules.
    #[must_use]
    pub fn proxy_rules(&self) -> ProxyRules {
        ProxyRules {
            agent_tokens: self.proxy_ua_tokens.clone(),
            ip_prefixes: self.proxy_ip_prefixes.clone(),
        }
    }

    /// Caps and time bound for the active signal channel. The heartbeat
    /// channel uses the look-back as its TTL.
    #[must_use]
    pub fn signal_limits(&self) -> SignalLimits {
        let ttl_ms = match self.signal_mode {
            SignalMode::Heartbeat => self.heartbeat_lookback_ms,
            SignalMode::Explicit => self.suppression_ttl_ms,
        };
        SignalLimits {
            ttl: TimeDelta::milliseconds(ttl_ms.max(0)),
            map_limit: self.signal_map_limit,
            debug_event_limit: self.debug_event_limit,
            latency_sample_limit: self.latency_sample_limit,
        }
    }

    /// Classification policy for the recorder.
    #[must_use]
    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            dedup: DuplicatePolicy::new(
                TimeDelta::milliseconds(self.dedup_window_ms.max(0)),
                self.proxy_rules(),
            ),
            guard: SenderGuard {
                window: TimeDelta::milliseconds(self.sender_guard_window_ms.max(0)),
            },
            store_timeout: Duration::from_millis(self.store_timeout_ms.max(1)),
        }
    }

    /// JSON API request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// SQLite busy timeout.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.database_busy_timeout_secs)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a comma-separated list, dropping blank items. Returns `default`
/// when the variable is unset.
fn parse_env_list(key: &str, default: Vec<String>, lowercase: bool) -> Vec<String> {
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            if lowercase {
                item.to_lowercase()
            } else {
                item.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.signal_mode, SignalMode::Heartbeat);
        assert_eq!(config.signal_limits().ttl, TimeDelta::seconds(30));
        assert_eq!(config.dashboard_token, None);

        let settings = config.recorder_settings();
        assert_eq!(settings.dedup.window, TimeDelta::seconds(10));
        assert_eq!(settings.guard.window, TimeDelta::seconds(10));
        assert_eq!(settings.store_timeout, Duration::from_secs(3));
    }

    #[test]
    fn explicit_mode_uses_suppression_ttl() {
        let config = TrackerConfig {
            signal_mode: SignalMode::Explicit,
            suppression_ttl_ms: 2_500,
            ..TrackerConfig::default()
        };
        assert_eq!(config.signal_limits().ttl, TimeDelta::milliseconds(2_500));
    }
}
