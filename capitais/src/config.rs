//! Configuration surface for the token watchdog and credential namespace.
//!
//! Values are read from environment variables following the same
//! `from_env()` convention used elsewhere in the ecosystem (see
//! `tucano-profitdll::Credentials::from_env`), falling back to the defaults
//! named by the spec when a variable is unset or unparsable.

use std::env;
use std::time::Duration;

/// Tunables for the [`TokenWatchdog`](crate::watchdog::TokenWatchdog) pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// TTL, in seconds, applied to a freshly written credential.
    pub token_ttl_seconds: u64,
    /// Remaining TTL (ms) at or below which a credential is rotated.
    pub rotate_threshold_ms: i64,
    /// Shortened TTL (ms) applied to a superseded key during its grace window.
    pub grace_ms: i64,
    /// Period between watchdog passes.
    pub interval: Duration,
    /// Whether the watchdog loop should be started at all.
    pub enabled: bool,
    /// Prefix namespace for credential keys, e.g. `tok` in `tok:<opaque>`.
    pub namespace: String,
    /// Bounded scan size for the consumed-cleanup phase.
    pub consumed_scan_limit: i64,
    /// Bounded scan size for the keep-alive/rotate phase.
    pub active_scan_limit: i64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 300,
            rotate_threshold_ms: 3_000,
            grace_ms: 2_000,
            interval: Duration::from_millis(1_000),
            enabled: true,
            namespace: "tok".to_string(),
            consumed_scan_limit: 200,
            active_scan_limit: 500,
        }
    }
}

impl WatchdogConfig {
    /// Builds a [`WatchdogConfig`] from environment variables, falling back
    /// to [`WatchdogConfig::default`] for anything unset or unparsable.
    ///
    /// Variables: `TOKEN_TTL_SECONDS`, `TOKEN_ROTATE_THRESHOLD_MS`,
    /// `TOKEN_GRACE_MS`, `TOKEN_WATCHDOG_INTERVAL_MS`,
    /// `TOKEN_WATCHDOG_ENABLED`, `OPAQUE_TOKEN_NAMESPACE`.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            token_ttl_seconds: env_parse("TOKEN_TTL_SECONDS", default.token_ttl_seconds),
            rotate_threshold_ms: env_parse(
                "TOKEN_ROTATE_THRESHOLD_MS",
                default.rotate_threshold_ms,
            ),
            grace_ms: env_parse("TOKEN_GRACE_MS", default.grace_ms),
            interval: Duration::from_millis(env_parse(
                "TOKEN_WATCHDOG_INTERVAL_MS",
                default.interval.as_millis() as u64,
            )),
            enabled: env_parse("TOKEN_WATCHDOG_ENABLED", default.enabled),
            namespace: env::var("OPAQUE_TOKEN_NAMESPACE").unwrap_or(default.namespace),
            ..default
        }
    }

    /// Builds the full key string for an opaque token, e.g. `tok:<opaque>`.
    pub fn key_for(&self, opaque: &str) -> String {
        format!("{}:{}", self.namespace, opaque)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = raw, "ignoring unparsable config value, using default");
            default
        }),
        Err(_) => default,
    }
}
