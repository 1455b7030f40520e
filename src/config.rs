use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::entities::PaymentMethod;
use crate::money::CURRENCY;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://storefront.db?mode=rwc";

/// Per-method processing-fee percentages.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct FeeSchedule {
    #[validate(custom = "validate_fee_rate")]
    pub credit_card: Decimal,
    #[validate(custom = "validate_fee_rate")]
    pub debit_card: Decimal,
    #[validate(custom = "validate_fee_rate")]
    pub pix: Decimal,
    #[validate(custom = "validate_fee_rate")]
    pub boleto: Decimal,
    #[validate(custom = "validate_fee_rate")]
    pub bank_transfer: Decimal,
    #[validate(custom = "validate_fee_rate")]
    pub cash: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            credit_card: PaymentMethod::CreditCard.default_fee_rate(),
            debit_card: PaymentMethod::DebitCard.default_fee_rate(),
            pix: PaymentMethod::Pix.default_fee_rate(),
            boleto: PaymentMethod::Boleto.default_fee_rate(),
            bank_transfer: PaymentMethod::BankTransfer.default_fee_rate(),
            cash: PaymentMethod::Cash.default_fee_rate(),
        }
    }
}

impl FeeSchedule {
    /// Fee percentage charged for `method`.
    pub fn rate_for(&self, method: PaymentMethod) -> Decimal {
        match method {
            PaymentMethod::CreditCard => self.credit_card,
            PaymentMethod::DebitCard => self.debit_card,
            PaymentMethod::Pix => self.pix,
            PaymentMethod::Boleto => self.boleto,
            PaymentMethod::BankTransfer => self.bank_transfer,
            PaymentMethod::Cash => self.cash,
        }
    }

    /// Returns a copy with the rate for `method` replaced.
    pub fn with_rate(mut self, method: PaymentMethod, rate: Decimal) -> Self {
        let slot = match method {
            PaymentMethod::CreditCard => &mut self.credit_card,
            PaymentMethod::DebitCard => &mut self.debit_card,
            PaymentMethod::Pix => &mut self.pix,
            PaymentMethod::Boleto => &mut self.boleto,
            PaymentMethod::BankTransfer => &mut self.bank_transfer,
            PaymentMethod::Cash => &mut self.cash,
        };
        *slot = rate;
        self
    }
}

/// Payment engine configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct PaymentConfig {
    /// Settlement currency; only BRL is supported
    #[validate(custom = "validate_currency")]
    pub currency: String,

    /// Processing-fee table
    #[validate]
    pub fees: FeeSchedule,

    /// Deadline for a single gateway authorization call
    #[validate(range(min = 1, max = 120000))]
    pub gateway_timeout_ms: u64,

    /// Approval probability of the simulated gateway
    #[validate(range(min = 0.0, max = 1.0))]
    pub gateway_approval_rate: f64,

    /// Period of the background expiry sweep
    #[validate(range(min = 1))]
    pub expiry_sweep_interval_secs: u64,

    /// Attempts at generating a unique transaction id
    #[validate(range(min = 1, max = 20))]
    pub transaction_id_attempts: u32,

    /// PIX key used when the payer supplies none
    #[validate(length(min = 1, max = 77))]
    pub pix_key: String,

    #[validate(length(min = 1, max = 25))]
    pub merchant_name: String,

    #[validate(length(min = 1, max = 15))]
    pub merchant_city: String,

    #[validate(length(min = 1))]
    pub boleto_base_url: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: CURRENCY.to_string(),
            fees: FeeSchedule::default(),
            gateway_timeout_ms: 5_000,
            gateway_approval_rate: 0.9,
            expiry_sweep_interval_secs: 60,
            transaction_id_attempts: 5,
            pix_key: "store@storefront.example".to_string(),
            merchant_name: "Storefront".to_string(),
            merchant_city: "SAO PAULO".to_string(),
            boleto_base_url: "https://boleto.example.com/view".to_string(),
        }
    }
}

impl PaymentConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}

/// Order engine configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct OrderConfig {
    /// Shipping cost applied when checkout does not supply one
    #[validate(custom = "validate_non_negative")]
    pub default_shipping_cost: Decimal,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            default_shipping_cost: Decimal::ZERO,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub payments: PaymentConfig,

    #[serde(default)]
    #[validate]
    pub orders: OrderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            payments: PaymentConfig::default(),
            orders: OrderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true_bool() -> bool {
    true
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
fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency == CURRENCY {
        return Ok(());
    }
    let mut err = ValidationError::new("currency");
    err.message = Some(format!("Only {} is supported", CURRENCY).into());
    Err(err)
}

fn validate_fee_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::ONE_HUNDRED {
        let mut err = ValidationError::new("fee_rate");
        err.message = Some("fee rates are percentages between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

fn validate_non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("amount must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_core={},sea_orm=warn,sqlx=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

fn base_builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<AppConfig, AppConfigError> {
    let app_config: AppConfig = builder.build()?.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = base_builder()?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let app_config = finish(builder)?;
    info!("Configuration loaded successfully");
    Ok(app_config)
}
