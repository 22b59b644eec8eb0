use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const CONFIG_DIR: &str = "config";

/// Application configuration.
///
/// Secrets (gateway key, webhook secret, JWT secret, URL signing secret)
/// live here and are handed to the components that need them at
/// construction time; nothing reads the environment mid-request.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Application environment ("development", "production", ...)
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

    /// Charge currency (ISO 4217, lowercase as the processor expects)
    #[serde(default = "default_currency")]
    pub currency: String,

    /// JWT secret used to verify customer tokens minted by the auth
    /// platform (minimum 32 characters)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Payment processor secret API key
    pub payment_api_key: String,

    /// Payment processor API base URL
    #[serde(default = "default_payment_api_base")]
    pub payment_api_base: String,

    /// Shared secret for verifying webhook signatures. When unset,
    /// verification is skipped and the webhook route must not be reachable
    /// from an untrusted network.
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Accepted clock skew for webhook signatures, in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub payment_webhook_tolerance_secs: u64,

    /// Timeout for outbound calls to the processor and the email API
    #[serde(default = "default_external_timeout")]
    pub external_timeout_secs: u64,

    /// Secret for signing short-lived file URLs
    #[validate(length(min = 16))]
    pub download_signing_secret: String,

    /// How long minted download links stay redeemable, in days
    #[serde(default = "default_link_ttl_days")]
    pub download_link_ttl_days: i64,

    /// Lifetime of a signed file URL, in seconds
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: i64,

    /// Customer-facing base URL used in confirmation emails
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Transactional email API endpoint; unset disables outbound email
    #[serde(default)]
    pub email_api_url: Option<String>,

    /// Transactional email API key
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// From address on outbound email
    #[serde(default = "default_email_from")]
    pub email_from: String,

    /// Max entries in the catalog read cache (quote path only)
    #[serde(default = "default_cache_capacity")]
    pub product_cache_capacity: usize,

    /// TTL for catalog read cache entries, in seconds
    #[serde(default = "default_cache_ttl")]
    pub product_cache_ttl_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_currency() -> String {
    "eur".to_string()
}
fn default_payment_api_base() -> String {
    "https://api.stripe.com".to_string()
}
fn default_webhook_tolerance() -> u64 {
    300
}
fn default_external_timeout() -> u64 {
    10
}
fn default_link_ttl_days() -> i64 {
    7
}
fn default_signed_url_ttl() -> i64 {
    3600
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_email_from() -> String {
    "orders@localhost".to_string()
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_cache_ttl() -> u64 {
    60
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn external_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.external_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Load configuration from `config/default`, `config/<env>`, and
/// `APP__`-prefixed environment variables, in that order of precedence.
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

    // Secrets have no defaults on purpose: they must come from the
    // environment or a config file, never ship baked in.
    let config = Config::builder()
        .set_default("database_url", "sqlite://ebookstore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for required in ["jwt_secret", "payment_api_key", "download_signing_secret"] {
        if config.get_string(required).is_err() {
            error!(
                "{} is not configured; set APP__{} in the environment",
                required,
                required.to_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(
                required.to_string(),
            )));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    if app_config.is_production() && app_config.payment_webhook_secret.is_none() {
        // Signature verification is the only authenticity check the
        // handler has; without it the route must sit behind a trusted
        // network path, which production cannot guarantee.
        error!("payment_webhook_secret must be configured in production");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "payment_webhook_secret".to_string(),
        )));
    }

    Ok(app_config)
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("ebookstore_api={},tower_http=info", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).json().try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).try_init();
    }
}
