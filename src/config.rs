use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;

/// Flat shipping surcharge tiers added to the grand total at order
/// placement. Rates are whole currency units.
#[derive(Clone, Debug, Deserialize)]
pub struct ShippingConfig {
    #[serde(default = "default_domestic_rate")]
    pub domestic_rate: Decimal,

    #[serde(default = "default_international_rate")]
    pub international_rate: Decimal,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            domestic_rate: default_domestic_rate(),
            international_rate: default_international_rate(),
        }
    }
}

fn default_domestic_rate() -> Decimal {
    Decimal::from(80)
}

fn default_international_rate() -> Decimal {
    Decimal::from(150)
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "database_url must not be empty"))]
    pub database_url: String,

    /// Deployment environment: "development", "test", or "production"
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level filter (tracing env-filter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Run pending migrations on connection establishment
    #[serde(default)]
    pub auto_migrate: bool,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Shipping surcharge tiers
    #[serde(default)]
    pub shipping: ShippingConfig,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}

fn default_db_min_connections() -> u32 {
    DEFAULT_DB_MIN_CONNECTIONS
}

impl AppConfig {
    /// Construct a configuration directly. Used by tests and embedders that
    /// do not want file/env layering.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: environment.into(),
            log_level: default_log_level(),
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            shipping: ShippingConfig::default(),
        }
    }

    /// Load configuration from layered sources: `config/default`, then
    /// `config/<RUN_ENV>`, then `ANAQA__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let config: AppConfig = Config::builder()
            .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
            .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
            .add_source(Environment::with_prefix("ANAQA").separator("__"))
            .build()?
            .try_deserialize()?;

        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!(environment = %config.environment, "configuration loaded");
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
