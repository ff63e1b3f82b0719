use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Fixed courier fee charged on every order, in minor currency units.
const DEFAULT_SHIPPING_FEE: i64 = 500;
/// Fee for the optional product-verification add-on, in minor currency units.
const DEFAULT_VERIFICATION_FEE: i64 = 200;
const DEFAULT_CURRENCY: &str = "ALL";
const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 5;
const DEFAULT_OUTBOX_POLL_MS: u64 = 500;

/// Checkout pricing knobs. These are configuration constants, never user
/// input.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    #[serde(default = "default_shipping_fee")]
    #[validate(range(min = 0))]
    pub shipping_fee: i64,

    #[serde(default = "default_verification_fee")]
    #[validate(range(min = 0))]
    pub verification_fee: i64,

    /// Bounded attempts at generating a fresh order code when the store
    /// reports a collision.
    #[serde(default = "default_code_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub code_generation_attempts: u32,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            shipping_fee: DEFAULT_SHIPPING_FEE,
            verification_fee: DEFAULT_VERIFICATION_FEE,
            code_generation_attempts: default_code_attempts(),
        }
    }
}

/// Hosted payment provider endpoints and callback URLs.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    #[serde(default = "default_payment_base_url")]
    #[validate(url)]
    pub base_url: String,

    #[serde(default = "default_payment_success_url")]
    #[validate(url)]
    pub success_url: String,

    #[serde(default = "default_payment_failure_url")]
    #[validate(url)]
    pub failure_url: String,

    /// Hard timeout on session construction; timeout is a hard failure
    /// surfaced to the buyer.
    #[serde(default = "default_outbound_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: default_payment_base_url(),
            success_url: default_payment_success_url(),
            failure_url: default_payment_failure_url(),
            request_timeout_secs: DEFAULT_OUTBOUND_TIMEOUT_SECS,
        }
    }
}

/// Outbound email dispatch service. With no endpoint configured, dispatch
/// degrades to structured log lines.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Timeout on a single delivery attempt; timeout is a soft failure.
    #[serde(default = "default_outbound_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Poll interval of the outbox drain worker.
    #[serde(default = "default_outbox_poll_ms")]
    pub outbox_poll_ms: u64,
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// ISO currency code used on every order and payment session.
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,

    #[serde(default)]
    #[validate]
    pub email: EmailConfig,
}

impl AppConfig {
    /// Programmatic constructor used by tests and tooling; everything not
    /// passed in takes its default.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            currency: DEFAULT_CURRENCY.to_string(),
            checkout: CheckoutConfig::default(),
            payment: PaymentConfig::default(),
            email: EmailConfig::default(),
        }
    }

}

fn default_database_url() -> String {
    "sqlite://treg.db?mode=rwc".to_string()
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_shipping_fee() -> i64 {
    DEFAULT_SHIPPING_FEE
}
fn default_verification_fee() -> i64 {
    DEFAULT_VERIFICATION_FEE
}
fn default_code_attempts() -> u32 {
    3
}
fn default_payment_base_url() -> String {
    "https://pay.treg.al".to_string()
}
fn default_payment_success_url() -> String {
    "https://treg.al/checkout/success".to_string()
}
fn default_payment_failure_url() -> String {
    "https://treg.al/checkout/failure".to_string()
}
fn default_outbound_timeout_secs() -> u64 {
    DEFAULT_OUTBOUND_TIMEOUT_SECS
}
fn default_outbox_poll_ms() -> u64 {
    DEFAULT_OUTBOX_POLL_MS
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `TREG_`-prefixed environment variables (nested keys joined
/// with `__`, e.g. `TREG_CHECKOUT__SHIPPING_FEE`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("TREG_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("TREG").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::new(
            "sqlite://test.db?mode=rwc".into(),
            "127.0.0.1".into(),
            0,
            "test".into(),
        );
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.checkout.shipping_fee, 500);
        assert_eq!(cfg.checkout.verification_fee, 200);
        assert_eq!(cfg.currency, "ALL");
    }

    #[test]
    fn negative_fees_are_rejected() {
        let mut cfg = AppConfig::new(
            "sqlite://test.db?mode=rwc".into(),
            "127.0.0.1".into(),
            0,
            "test".into(),
        );
        cfg.checkout.shipping_fee = -1;
        assert!(cfg.validate().is_err());
    }
}
