//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use inventory::{DEFAULT_RESERVATION_TTL_SECS, DEFAULT_RESOLVED_RETENTION_SECS};
use saga::{CommitFailurePolicy, SagaConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `SEED_FILE`: JSON file with customers, products and stock to load at startup
/// - `RESERVATION_TTL_SECS`: reservation lifetime (default: `900`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period (default: `30`)
/// - `RESERVATION_RETENTION_SECS`: how long finished reservations stay
///   queryable (default: `86400`)
/// - `MAX_LINE_QUANTITY`: largest quantity per line item (default: `100`)
/// - `PAYMENT_TIMEOUT_MS`: per-call payment timeout (default: `5000`)
/// - `PAYMENT_MAX_ATTEMPTS`: payment authorization attempts (default: `3`)
/// - `COMMIT_FAILURE_POLICY`: `reconcile` or `fail_order` (default: `reconcile`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub seed_file: Option<PathBuf>,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub reservation_retention: Duration,
    pub saga: SagaConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let saga = SagaConfig {
            max_line_quantity: lookup("MAX_LINE_QUANTITY")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.saga.max_line_quantity),
            payment_timeout: parsed("PAYMENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.saga.payment_timeout),
            payment_max_attempts: lookup("PAYMENT_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.saga.payment_max_attempts),
            commit_failure_policy: lookup("COMMIT_FAILURE_POLICY")
                .and_then(|v| v.trim().to_ascii_lowercase().parse::<CommitFailurePolicy>().ok())
                .unwrap_or(defaults.saga.commit_failure_policy),
            ..defaults.saga
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            seed_file: lookup("SEED_FILE")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            reservation_ttl: parsed("RESERVATION_TTL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_ttl),
            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            reservation_retention: parsed("RESERVATION_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_retention),
            saga,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            seed_file: None,
            reservation_ttl: Duration::from_secs(DEFAULT_RESERVATION_TTL_SECS as u64),
            sweep_interval: Duration::from_secs(30),
            reservation_retention: Duration::from_secs(DEFAULT_RESOLVED_RETENTION_SECS as u64),
            saga: SagaConfig::default(),
        }
    }
}
