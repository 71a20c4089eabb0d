//! Runtime configuration.
//!
//! Everything is env-driven with sensible defaults so a bare `ringline`
//! invocation comes up listening on the default port with a log-only
//! delivery channel. Invalid values fall back to the default with a warning
//! rather than refusing to start.
//!
//! | Variable                        | Default        |
//! |---------------------------------|----------------|
//! | `RINGLINE_BIND`                 | `0.0.0.0:3000` |
//! | `RINGLINE_WEBHOOK_SECRET`       | unset (verification disabled) |
//! | `RINGLINE_DEDUPE_BUCKET_SECS`   | `5`            |
//! | `RINGLINE_DEDUPE_TTL_SECS`      | `300`          |
//! | `RINGLINE_DRAIN_INTERVAL_SECS`  | `10`           |
//! | `RINGLINE_RETRY_INTERVAL_SECS`  | `300`          |
//! | `RINGLINE_DRAIN_BATCH`          | `10`           |
//! | `RINGLINE_RETRY_BATCH`          | `10`           |
//! | `RINGLINE_INTER_MESSAGE_MS`     | `500`          |
//! | `RINGLINE_MAX_DELIVERY_ATTEMPTS`| `3`            |
//! | `RINGLINE_RETRY_BACKOFF_SECS`   | `600`          |

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use crate::dispatch::DispatchConfig;
use crate::webhooks::DedupeConfig;

/// Default bind address for the HTTP server.
const DEFAULT_BIND: &str = "0.0.0.0:3000";

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,

    /// Shared secret for webhook signature verification. `None` disables
    /// verification (development mode).
    pub webhook_secret: Option<Vec<u8>>,

    pub dedupe: DedupeConfig,
    pub dispatch: DispatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: DEFAULT_BIND.parse().expect("default bind address parses"),
            webhook_secret: None,
            dedupe: DedupeConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the environment, falling back to defaults
    /// (with a warning) on missing or invalid values.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let default_dispatch = DispatchConfig::default();
        let default_dedupe = DedupeConfig::default();

        let bind_addr = match std::env::var("RINGLINE_BIND") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid RINGLINE_BIND, using default");
                defaults.bind_addr
            }),
            Err(_) => defaults.bind_addr,
        };

        let webhook_secret = std::env::var("RINGLINE_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.into_bytes());

        let dedupe = DedupeConfig {
            bucket: env_duration_secs("RINGLINE_DEDUPE_BUCKET_SECS", default_dedupe.bucket),
            ttl: env_duration_secs("RINGLINE_DEDUPE_TTL_SECS", default_dedupe.ttl),
        };

        let dispatch = DispatchConfig {
            drain_interval: env_duration_secs(
                "RINGLINE_DRAIN_INTERVAL_SECS",
                default_dispatch.drain_interval,
            ),
            retry_interval: env_duration_secs(
                "RINGLINE_RETRY_INTERVAL_SECS",
                default_dispatch.retry_interval,
            ),
            drain_batch: env_usize("RINGLINE_DRAIN_BATCH", default_dispatch.drain_batch),
            retry_batch: env_usize("RINGLINE_RETRY_BATCH", default_dispatch.retry_batch),
            inter_message_delay: env_duration_millis(
                "RINGLINE_INTER_MESSAGE_MS",
                default_dispatch.inter_message_delay,
            ),
            max_attempts: env_u32(
                "RINGLINE_MAX_DELIVERY_ATTEMPTS",
                default_dispatch.max_attempts,
            ),
            backoff_step: env_duration_secs(
                "RINGLINE_RETRY_BACKOFF_SECS",
                default_dispatch.backoff_step,
            ),
        };

        Config {
            bind_addr,
            webhook_secret,
            dedupe,
            dispatch,
        }
    }
}

fn env_duration_secs(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(variable = name, value = %raw, "invalid duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_duration_millis(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!(variable = name, value = %raw, "invalid duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "invalid count, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "invalid count, using default");
            default
        }),
        Err(_) => default,
    }
}
