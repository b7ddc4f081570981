use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_CURRENCY: &str = "gbp";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Shared secret used to verify identity-provider session tokens
    #[validate(length(min = 32))]
    pub identity_jwt_secret: String,

    /// Expected issuer of identity-provider tokens (optional)
    #[serde(default)]
    pub identity_issuer: Option<String>,

    /// Base URL of the identity provider's management API, used for
    /// out-of-band profile fetches (optional; profile fetch is skipped
    /// when unset)
    #[serde(default)]
    pub identity_api_url: Option<String>,

    /// API key for the identity provider's management API
    #[serde(default)]
    pub identity_api_key: Option<String>,

    /// Secret for verifying identity-provider lifecycle webhooks
    #[serde(default)]
    pub identity_webhook_secret: Option<String>,

    /// Base URL of the payment provider's API
    pub payment_api_url: String,

    /// Secret key for the payment provider's API
    pub payment_secret_key: String,

    /// Secret for verifying payment-provider webhook signatures
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Allowed clock skew for webhook timestamps (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Bounded timeout for outbound provider calls (seconds)
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// URL the provider redirects to after successful payment
    #[serde(default = "default_checkout_success_url")]
    pub checkout_success_url: String,

    /// URL the provider redirects to after abandoned payment
    #[serde(default = "default_checkout_cancel_url")]
    pub checkout_cancel_url: String,

    /// ISO currency code sent to the payment provider
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Subtotal below which delivery orders incur the delivery fee.
    /// Deliberately separate from `points_min_subtotal` even though both
    /// default to the same value.
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: Decimal,

    /// Flat fee added to small delivery orders
    #[serde(default = "default_delivery_fee")]
    pub delivery_fee: Decimal,

    /// Minimum item subtotal for a points redemption or award to apply
    #[serde(default = "default_points_min_subtotal")]
    pub points_min_subtotal: Decimal,

    /// Points equivalent to one currency unit of discount
    #[serde(default = "default_points_per_unit")]
    pub points_per_unit: u32,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }

    /// Pricing knobs bundled for the order engine and reconciliation
    /// handler so they never reach into the full config.
    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            free_delivery_threshold: self.free_delivery_threshold,
            delivery_fee: self.delivery_fee,
            points_min_subtotal: self.points_min_subtotal,
            points_per_unit: self.points_per_unit,
        }
    }
}

/// The subset of configuration that drives order totals and loyalty math
#[derive(Clone, Copy, Debug)]
pub struct PricingConfig {
    pub free_delivery_threshold: Decimal,
    pub delivery_fee: Decimal,
    pub points_min_subtotal: Decimal,
    pub points_per_unit: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_delivery_threshold: default_free_delivery_threshold(),
            delivery_fee: default_delivery_fee(),
            points_min_subtotal: default_points_min_subtotal(),
            points_per_unit: default_points_per_unit(),
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

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_checkout_success_url() -> String {
    "http://localhost:3000/cart?success=true".to_string()
}

fn default_checkout_cancel_url() -> String {
    "http://localhost:3000/cart?canceled=true".to_string()
}

fn default_free_delivery_threshold() -> Decimal {
    // 9.99
    Decimal::new(999, 2)
}

fn default_delivery_fee() -> Decimal {
    // 1.99
    Decimal::new(199, 2)
}

fn default_points_min_subtotal() -> Decimal {
    // 9.99
    Decimal::new(999, 2)
}

fn default_points_per_unit() -> u32 {
    10
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
    8
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("bakehouse_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Load configuration from `config/` files layered with `APP__`-prefixed
/// environment variables.
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

    // identity_jwt_secret and payment_secret_key have no defaults; they
    // must come from the environment or a config file.
    let config = Config::builder()
        .set_default("database_url", "sqlite://bakehouse.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("payment_api_url", "https://api.stripe.com")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("identity_jwt_secret").is_err() {
        error!("Identity secret is not configured. Set APP__IDENTITY_JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "identity_jwt_secret is required but not configured".into(),
        )));
    }

    if config.get_string("payment_secret_key").is_err() {
        error!("Payment secret key is not configured. Set APP__PAYMENT_SECRET_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "payment_secret_key is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
