use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 3000;
const CONFIG_DIR: &str = "config";
const DEFAULT_STORE_BACKEND: &str = "in-memory";
const DEFAULT_CURRENCY: &str = "INR";

/// Stripe Checkout credentials.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
}

/// Razorpay Orders API credentials.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RazorpayConfig {
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub key_secret: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_razorpay_api_base")]
    pub api_base: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            api_base: default_stripe_api_base(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
        }
    }
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: None,
            key_secret: None,
            webhook_secret: None,
            api_base: default_razorpay_api_base(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Store backend: "in-memory" or "redis"
    #[serde(default = "default_store_backend")]
    #[validate(custom = "validate_store_backend")]
    pub store_backend: String,

    pub redis_url: String,

    /// Upper bound for a single store command, in milliseconds
    #[validate(range(min = 50, max = 60000))]
    pub store_timeout_ms: u64,

    /// Upper bound for an outbound gateway call, in seconds
    #[validate(range(min = 1, max = 120))]
    pub gateway_timeout_secs: u64,

    #[validate(range(min = 60))]
    pub session_ttl_secs: u64,

    #[validate(range(min = 60))]
    pub cart_ttl_secs: u64,

    /// Lifetime of an inventory hold placed at checkout
    #[validate(range(min = 30, max = 86400))]
    pub reservation_ttl_secs: u64,

    /// How often expired holds are swept; 0 disables the sweeper
    pub reservation_sweep_interval_secs: u64,

    /// Accepted clock skew for timestamped webhook signatures
    pub webhook_tolerance_secs: u64,

    /// How long processed webhook event ids are remembered
    #[validate(range(min = 60))]
    pub webhook_dedupe_ttl_secs: u64,

    /// Event channel capacity for async event processing
    #[validate(range(min = 1, max = 1000000))]
    pub event_channel_capacity: usize,

    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Seed the demo catalog at startup
    #[serde(default)]
    pub seed_catalog: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_true_bool")]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub razorpay: RazorpayConfig,
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn uses_redis(&self) -> bool {
        self.store_backend.eq_ignore_ascii_case("redis")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cart_ttl(&self) -> Duration {
        Duration::from_secs(self.cart_ttl_secs)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs as i64)
    }

    pub fn webhook_dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.webhook_dedupe_ttl_secs)
    }

    /// Checks that span more than one field.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development()
            && !self.cors_allow_any_origin
            && self
                .cors_allowed_origins
                .as_deref()
                .map(|s| s.trim().is_empty())
                .unwrap_or(true)
        {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message =
                Some("Set cors_allowed_origins or cors_allow_any_origin outside development".into());
            errors.add("cors_allowed_origins", err);
        }

        if self.stripe.secret_key.is_some() && self.stripe.webhook_secret.is_none() {
            let mut err = ValidationError::new("stripe.webhook_secret");
            err.message = Some("Stripe webhooks cannot be verified without a webhook secret".into());
            errors.add("stripe", err);
        }

        if self.razorpay.key_id.is_some() != self.razorpay.key_secret.is_some() {
            let mut err = ValidationError::new("razorpay.key_secret");
            err.message = Some("Razorpay key_id and key_secret must be set together".into());
            errors.add("razorpay", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            store_backend: DEFAULT_STORE_BACKEND.to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_timeout_ms: 2000,
            gateway_timeout_secs: 10,
            session_ttl_secs: 1800,
            cart_ttl_secs: 1800,
            reservation_ttl_secs: 300,
            reservation_sweep_interval_secs: 60,
            webhook_tolerance_secs: 300,
            webhook_dedupe_ttl_secs: 86_400,
            event_channel_capacity: 1024,
            currency: DEFAULT_CURRENCY.to_string(),
            seed_catalog: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: true,
            stripe: StripeConfig::default(),
            razorpay: RazorpayConfig::default(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_store_backend() -> String {
    DEFAULT_STORE_BACKEND.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_true_bool() -> bool {
    true
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_razorpay_api_base() -> String {
    "https://api.razorpay.com".to_string()
}

fn default_success_url() -> String {
    "http://localhost:3000/payment-success?orderId={ORDER_ID}".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/payment-cancelled?orderId={ORDER_ID}".to_string()
}

fn validate_store_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("store_backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
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

/// Installs the global tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("axionik_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
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

    let defaults = AppConfig::default();
    let config = Config::builder()
        .set_default("host", defaults.host.as_str())?
        .set_default("port", i64::from(defaults.port))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", defaults.log_level.as_str())?
        .set_default("log_json", defaults.log_json)?
        .set_default("store_backend", defaults.store_backend.as_str())?
        .set_default("redis_url", defaults.redis_url.as_str())?
        .set_default("store_timeout_ms", defaults.store_timeout_ms)?
        .set_default("gateway_timeout_secs", defaults.gateway_timeout_secs)?
        .set_default("session_ttl_secs", defaults.session_ttl_secs)?
        .set_default("cart_ttl_secs", defaults.cart_ttl_secs)?
        .set_default("reservation_ttl_secs", defaults.reservation_ttl_secs)?
        .set_default(
            "reservation_sweep_interval_secs",
            defaults.reservation_sweep_interval_secs,
        )?
        .set_default("webhook_tolerance_secs", defaults.webhook_tolerance_secs)?
        .set_default("webhook_dedupe_ttl_secs", defaults.webhook_dedupe_ttl_secs)?
        .set_default("event_channel_capacity", defaults.event_channel_capacity as u64)?
        .set_default("currency", defaults.currency.as_str())?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        store_backend = %app_config.store_backend,
        port = app_config.port,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
