//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

use crate::payments::providers::cashfree::CashfreeConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running on the in-memory store (`SKIP_EXTERNALS=true`)
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub gateway: CashfreeConfig,
    pub checkout: CheckoutConfig,
    pub webhook: WebhookConfig,
    pub monitor: PendingOrderMonitorConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Checkout settings shared by the order factory and the gateway session request
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub currency: String,
    /// Callback URL handed to the gateway for asynchronous notifications
    pub notify_url: String,
    pub return_url: Option<String>,
    pub gateway_order_id_attempts: u32,
}

/// Webhook reconciliation settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub require_signature: bool,
    /// Signed deliveries whose timestamp is further than this from now are refused
    pub timestamp_tolerance: Duration,
    pub notification_timeout: Duration,
}

/// Stale pending order monitor settings
#[derive(Debug, Clone)]
pub struct PendingOrderMonitorConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    /// Pending orders younger than this are left to the webhook
    pub check_after: Duration,
    /// Pending orders older than this are expired
    pub pending_ttl: Duration,
    pub batch_size: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env::var("SKIP_EXTERNALS")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            gateway: CashfreeConfig::from_env()
                .map_err(|e| ConfigError::MissingVariable(e.to_string()))?,
            checkout: CheckoutConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            monitor: PendingOrderMonitorConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.checkout.validate()?;
        self.monitor.validate()?;

        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CASHFREE_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CheckoutConfig {
            currency: env::var("CHECKOUT_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            notify_url: env::var("CASHFREE_WEBHOOK_URL")
                .map_err(|_| ConfigError::MissingVariable("CASHFREE_WEBHOOK_URL".to_string()))?,
            return_url: env::var("CHECKOUT_RETURN_URL").ok(),
            gateway_order_id_attempts: env::var("GATEWAY_ORDER_ID_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_ORDER_ID_ATTEMPTS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_CURRENCY must be a 3-letter ISO code".to_string(),
            ));
        }

        if !self.notify_url.starts_with("http://") && !self.notify_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "CASHFREE_WEBHOOK_URL must be a valid URL".to_string(),
            ));
        }

        if self.gateway_order_id_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_ORDER_ID_ATTEMPTS".to_string(),
            ));
        }

        Ok(())
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WebhookConfig {
            require_signature: env::var("WEBHOOK_REQUIRE_SIGNATURE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_REQUIRE_SIGNATURE".to_string()))?,
            timestamp_tolerance: Duration::from_secs(
                env::var("WEBHOOK_TIMESTAMP_TOLERANCE_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("WEBHOOK_TIMESTAMP_TOLERANCE_SECS".to_string())
                    })?,
            ),
            notification_timeout: Duration::from_secs(
                env::var("NOTIFICATION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("NOTIFICATION_TIMEOUT_SECS".to_string())
                    })?,
            ),
        })
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            require_signature: true,
            timestamp_tolerance: Duration::from_secs(300),
            notification_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PendingOrderMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
            check_after: Duration::from_secs(120),
            pending_ttl: Duration::from_secs(1800),
            batch_size: 100,
        }
    }
}

impl PendingOrderMonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| -> Result<Duration, ConfigError> {
            match env::var(name) {
                Ok(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidValue(name.to_string())),
                Err(_) => Ok(fallback),
            }
        };

        Ok(PendingOrderMonitorConfig {
            enabled: env::var("PENDING_MONITOR_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                != "false",
            poll_interval: secs("PENDING_MONITOR_POLL_SECS", defaults.poll_interval)?,
            check_after: secs("PENDING_MONITOR_CHECK_AFTER_SECS", defaults.check_after)?,
            pending_ttl: secs("PENDING_ORDER_TTL_SECS", defaults.pending_ttl)?,
            batch_size: env::var("PENDING_MONITOR_BATCH_SIZE")
                .unwrap_or_else(|_| defaults.batch_size.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PENDING_MONITOR_BATCH_SIZE".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PENDING_MONITOR_POLL_SECS cannot be 0".to_string(),
            ));
        }

        if self.pending_ttl <= self.check_after {
            return Err(ConfigError::ValidationFailed(
                "PENDING_ORDER_TTL_SECS must exceed PENDING_MONITOR_CHECK_AFTER_SECS".to_string(),
            ));
        }

        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue(
                "PENDING_MONITOR_BATCH_SIZE".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}
