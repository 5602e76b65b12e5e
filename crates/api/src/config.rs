//! Application configuration loaded from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use domain::FeeRate;
use saga::LifecyclePolicy;

/// A value that must never reach the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: PostgreSQL for events and inventory; in-memory when unset
/// - `PAYMENT_WEBHOOK_SECRET`: shared secret for gateway signatures
/// - `PLATFORM_FEE_BPS`: fee applied until an admin sets one (default 500)
/// - `CHECKOUT_TIMEOUT_SECS`, `RETURN_WINDOW_DAYS`, `PAYOUT_HOLD_DAYS`,
///   `PROCESSING_GRACE_SECS`: lifecycle timings
/// - `SWEEP_INTERVAL_SECS`, `PAYOUT_INTERVAL_SECS`: background worker periods
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<Secret>,
    pub webhook_secret: Secret,
    pub platform_fee_bps: u32,
    pub checkout_timeout_secs: i64,
    pub return_window_days: i64,
    pub payout_hold_days: i64,
    pub processing_grace_secs: i64,
    pub sweep_interval_secs: u64,
    pub payout_interval_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty())
                .map(Secret::new),
            webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET")
                .map(Secret::new)
                .unwrap_or(defaults.webhook_secret),
            platform_fee_bps: env_or("PLATFORM_FEE_BPS", defaults.platform_fee_bps),
            checkout_timeout_secs: env_or("CHECKOUT_TIMEOUT_SECS", defaults.checkout_timeout_secs),
            return_window_days: env_or("RETURN_WINDOW_DAYS", defaults.return_window_days),
            payout_hold_days: env_or("PAYOUT_HOLD_DAYS", defaults.payout_hold_days),
            processing_grace_secs: env_or("PROCESSING_GRACE_SECS", defaults.processing_grace_secs),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            payout_interval_secs: env_or("PAYOUT_INTERVAL_SECS", defaults.payout_interval_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga timings. An out-of-range fee keeps the built-in default.
    pub fn policy(&self) -> LifecyclePolicy {
        let base = LifecyclePolicy::default();
        LifecyclePolicy {
            checkout_timeout: chrono::Duration::seconds(self.checkout_timeout_secs),
            return_window: chrono::Duration::days(self.return_window_days),
            payout_hold: chrono::Duration::days(self.payout_hold_days),
            processing_grace: chrono::Duration::seconds(self.processing_grace_secs),
            default_fee_rate: FeeRate::from_bps(self.platform_fee_bps)
                .unwrap_or(base.default_fee_rate),
            ..base
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn payout_interval(&self) -> Duration {
        Duration::from_secs(self.payout_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            webhook_secret: Secret::new("dev-webhook-secret"),
            platform_fee_bps: 500,
            checkout_timeout_secs: 1800,
            return_window_days: 7,
            payout_hold_days: 7,
            processing_grace_secs: 30,
            sweep_interval_secs: 120,
            payout_interval_secs: 300,
        }
    }
}
