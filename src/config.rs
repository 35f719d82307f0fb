use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_ACCESS_SECRET: &str = "dev_access_token_secret_change_me_before_deploying_0001";
const DEV_DEFAULT_REFRESH_SECRET: &str = "dev_refresh_token_secret_change_me_before_deploying_0002";

/// Hosted-checkout gateway credentials and endpoints.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    #[serde(default)]
    pub store_id: String,

    #[serde(default)]
    pub store_password: String,

    /// Use the live endpoints instead of the sandbox
    #[serde(default)]
    pub is_live: bool,

    #[serde(default = "default_sandbox_base_url")]
    pub sandbox_base_url: String,

    #[serde(default = "default_live_base_url")]
    pub live_base_url: String,

    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Outbound request timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            store_id: String::new(),
            store_password: String::new(),
            is_live: false,
            sandbox_base_url: default_sandbox_base_url(),
            live_base_url: default_live_base_url(),
            currency: default_currency(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl PaymentGatewayConfig {
    pub fn base_url(&self) -> &str {
        if self.is_live {
            &self.live_base_url
        } else {
            &self.sandbox_base_url
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret used to sign access tokens
    #[validate(custom = "validate_token_secret")]
    pub access_token_secret: String,

    /// Access token lifetime in seconds
    #[validate(range(min = 60, max = 86400))]
    pub access_token_expiration: usize,

    /// Secret used to sign refresh tokens
    #[validate(custom = "validate_token_secret")]
    pub refresh_token_secret: String,

    /// Refresh token lifetime in seconds
    #[validate(range(min = 3600, max = 2592000))]
    pub refresh_token_expiration: usize,

    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[validate(custom = "validate_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default = "default_true_bool")]
    pub cors_allow_credentials: bool,

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

    /// Where the browser lands after gateway redirects
    #[validate(url)]
    pub frontend_url: String,

    /// Public base URL of this API, used to build gateway callback URLs
    #[validate(url)]
    pub backend_url: String,

    #[serde(default)]
    #[validate]
    pub payment: PaymentGatewayConfig,

    /// Directory for uploaded product images
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Shared key required in `x-admin-key` to register admins; open when unset
    #[serde(default)]
    pub admin_registration_key: Option<String>,
}

impl AppConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_url: String,
        access_token_secret: String,
        refresh_token_secret: String,
        host: String,
        port: u16,
        environment: String,
        frontend_url: String,
        backend_url: String,
    ) -> Self {
        Self {
            database_url,
            access_token_secret,
            access_token_expiration: 900,
            refresh_token_secret,
            refresh_token_expiration: 604_800,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            frontend_url,
            backend_url,
            payment: PaymentGatewayConfig::default(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            event_channel_capacity: default_event_channel_capacity(),
            admin_registration_key: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    /// Auth cookies carry `Secure` everywhere except local development
    pub fn secure_cookies(&self) -> bool {
        !self.is_development()
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or opt in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() {
            if self.access_token_secret.trim() == DEV_DEFAULT_ACCESS_SECRET {
                let mut err = ValidationError::new("access_token_secret_default_dev");
                err.message = Some(
                    "The development access token secret must not be used outside development"
                        .into(),
                );
                errors.add("access_token_secret", err);
            }
            if self.refresh_token_secret.trim() == DEV_DEFAULT_REFRESH_SECRET {
                let mut err = ValidationError::new("refresh_token_secret_default_dev");
                err.message = Some(
                    "The development refresh token secret must not be used outside development"
                        .into(),
                );
                errors.add("refresh_token_secret", err);
            }
        }

        if self.access_token_secret == self.refresh_token_secret {
            let mut err = ValidationError::new("token_secrets_identical");
            err.message = Some("Access and refresh tokens must use different secrets".into());
            errors.add("refresh_token_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
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
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}
fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    "BDT".to_string()
}

fn default_sandbox_base_url() -> String {
    "https://sandbox.sslcommerz.com".to_string()
}

fn default_live_base_url() -> String {
    "https://securepay.sslcommerz.com".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_auth_issuer() -> String {
    "storefront-api".to_string()
}

fn default_auth_audience() -> String {
    "storefront-clients".to_string()
}

fn validate_environment(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "development" | "test" | "staging" | "production" => Ok(()),
        _ => {
            let mut err = ValidationError::new("environment");
            err.message = Some("Must be one of: development, test, staging, production".into());
            Err(err)
        }
    }
}

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

fn validate_token_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 32 {
        let mut err = ValidationError::new("token_secret");
        err.message = Some("Token secrets must be at least 32 characters".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("token_secret");
            err.message = Some("Token secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("token_secret");
        err.message = Some("Token secret must have at least 10 unique characters".into());
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

    let default_directive = format!("storefront_api={},tower_http=debug", level);
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("access_token_secret", DEV_DEFAULT_ACCESS_SECRET)?
        .set_default("access_token_expiration", 900)?
        .set_default("refresh_token_secret", DEV_DEFAULT_REFRESH_SECRET)?
        .set_default("refresh_token_expiration", 604_800)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("frontend_url", "http://localhost:5173")?
        .set_default("backend_url", "http://localhost:8080")?
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
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a-production-access-secret-with-enough-entropy-91".into(),
            "a-production-refresh-secret-with-enough-entropy-37".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
            "https://shop.example.com".into(),
            "https://api.example.com".into(),
        )
    }

    #[test]
    fn base_config_passes_field_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.access_token_secret = "short".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("access_token_secret"));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let mut cfg = base_config();
        cfg.environment = "qa-lab".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secrets_are_rejected_in_production() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        cfg.access_token_secret = DEV_DEFAULT_ACCESS_SECRET.into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("access_token_secret"));
    }

    #[test]
    fn identical_secrets_are_rejected() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.refresh_token_secret = cfg.access_token_secret.clone();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn gateway_base_url_follows_live_flag() {
        let mut gateway = PaymentGatewayConfig::default();
        assert_eq!(gateway.base_url(), "https://sandbox.sslcommerz.com");
        gateway.is_live = true;
        assert_eq!(gateway.base_url(), "https://securepay.sslcommerz.com");
    }
}
