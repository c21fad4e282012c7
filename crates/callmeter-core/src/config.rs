//! Application configuration
//!
//! Centralized configuration management using the `config` crate.
//! Sources are layered: built-in defaults, `config/default`,
//! `config/{RUN_MODE}`, then `CALLMETER__*` environment variables.

use crate::models::{BillingProfile, ExpiryChargePolicy, Rounding};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub billing: BillingConfig,
    /// Per-organization overrides keyed by org_id
    #[serde(default)]
    pub tenants: HashMap<String, TenantOverride>,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9100
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
///
/// When `url` is absent the ledger runs on the in-memory store.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            run_migrations: true,
        }
    }
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (kill-signal publishing and profile caching)
    pub url: Option<String>,

    /// TTL for cached tenant billing profiles in seconds
    #[serde(default = "default_profile_ttl")]
    pub profile_ttl_secs: u64,
}

fn default_profile_ttl() -> u64 {
    30
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            profile_ttl_secs: default_profile_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Default currency for new wallets
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Price of one minute in minor units
    #[serde(default = "default_rate")]
    pub rate_per_minute: Decimal,

    /// Billing increment in seconds (1 = per-second, 60 = per-minute)
    #[serde(default = "default_billing_increment")]
    pub billing_increment_secs: u32,

    /// Rounding applied to fractional minor units
    #[serde(default)]
    pub rounding: Rounding,

    /// Debt ceiling for organizations without an override
    #[serde(default)]
    pub default_debt_ceiling: i64,

    /// Reservation TTL in seconds
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: i64,

    /// Estimated session length used when a start event carries none
    #[serde(default = "default_estimated_secs")]
    pub default_estimated_secs: i64,

    /// Remaining runway (seconds of talk time) below which a warning is raised
    #[serde(default = "default_runway")]
    pub low_balance_runway_secs: i64,

    /// Interval between expiry sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum wait for a session or organization lock in milliseconds
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Attempts for retryable event failures
    #[serde(default = "default_max_attempts")]
    pub max_event_attempts: u32,

    /// Concurrent event workers
    #[serde(default = "default_workers")]
    pub event_workers: usize,

    /// Bounded capacity of the in-process event queue
    #[serde(default = "default_queue_capacity")]
    pub event_queue_capacity: usize,

    /// What to charge when a reservation expires without a session end
    #[serde(default)]
    pub expiry_charge_policy: ExpiryChargePolicy,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_rate() -> Decimal {
    Decimal::from(56)
}

fn default_billing_increment() -> u32 {
    60
}

fn default_reservation_ttl() -> i64 {
    2700 // 45 minutes
}

fn default_estimated_secs() -> i64 {
    300
}

fn default_runway() -> i64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_lock_timeout() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            rate_per_minute: default_rate(),
            billing_increment_secs: default_billing_increment(),
            rounding: Rounding::default(),
            default_debt_ceiling: 0,
            reservation_ttl_secs: default_reservation_ttl(),
            default_estimated_secs: default_estimated_secs(),
            low_balance_runway_secs: default_runway(),
            sweep_interval_secs: default_sweep_interval(),
            lock_timeout_ms: default_lock_timeout(),
            max_event_attempts: default_max_attempts(),
            event_workers: default_workers(),
            event_queue_capacity: default_queue_capacity(),
            expiry_charge_policy: ExpiryChargePolicy::default(),
        }
    }
}

impl BillingConfig {
    /// Resolve the billing profile for one organization.
    pub fn profile_for(&self, overrides: Option<&TenantOverride>) -> BillingProfile {
        let o = overrides.cloned().unwrap_or_default();
        BillingProfile {
            rate_per_minute: o.rate_per_minute.unwrap_or(self.rate_per_minute),
            billing_increment_secs: o
                .billing_increment_secs
                .unwrap_or(self.billing_increment_secs),
            rounding: o.rounding.unwrap_or(self.rounding),
            debt_ceiling: o.debt_ceiling.unwrap_or(self.default_debt_ceiling),
            reservation_ttl_secs: o.reservation_ttl_secs.unwrap_or(self.reservation_ttl_secs),
            default_estimated_secs: self.default_estimated_secs,
            low_balance_runway_secs: o
                .low_balance_runway_secs
                .unwrap_or(self.low_balance_runway_secs),
            expiry_charge_policy: o
                .expiry_charge_policy
                .unwrap_or(self.expiry_charge_policy),
        }
    }
}

/// Tenant-level overrides of the billing defaults
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TenantOverride {
    pub rate_per_minute: Option<Decimal>,
    pub billing_increment_secs: Option<u32>,
    pub rounding: Option<Rounding>,
    pub debt_ceiling: Option<i64>,
    pub reservation_ttl_secs: Option<i64>,
    pub low_balance_runway_secs: Option<i64>,
    pub expiry_charge_policy: Option<ExpiryChargePolicy>,
}

impl AppConfig {
    /// Load configuration from environment and optional config files
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9100)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("billing.currency", "USD")?
            .set_default("billing.rate_per_minute", "56")?
            .set_default("billing.billing_increment_secs", 60)?
            .set_default("billing.rounding", "up")?
            .set_default("billing.default_debt_ceiling", 0)?
            .set_default("billing.reservation_ttl_secs", 2700)?
            .set_default("billing.default_estimated_secs", 300)?
            .set_default("billing.low_balance_runway_secs", 60)?
            .set_default("billing.sweep_interval_secs", 30)?
            .set_default("billing.lock_timeout_ms", 2000)?
            .set_default("billing.max_event_attempts", 3)?
            .set_default("billing.event_workers", num_cpus::get() as i64)?
            .set_default("billing.event_queue_capacity", 1024)?
            .set_default("billing.expiry_charge_policy", "release")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("CALLMETER")
                    .separator("__")
                    .try_parsing(true),
            )
            // Conventional variables win when present
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
