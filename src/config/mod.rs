//! Configuration management
//!
//! This module handles loading and parsing configuration for Coursely.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Payment configuration
    #[serde(default)]
    pub payments: PaymentConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL (`:memory:` for an in-memory database)
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pooled connections for file databases
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/coursely.db".to_string()
}

fn default_max_connections() -> u32 {
    20
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_ttl() -> u64 {
    600
}

fn default_max_capacity() -> u64 {
    10_000
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    /// Failed logins allowed per username inside the lockout window
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: usize,
    /// Lockout window in minutes
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            max_login_attempts: default_max_login_attempts(),
            lockout_minutes: default_lockout_minutes(),
        }
    }
}

fn default_session_days() -> i64 {
    7
}

fn default_max_login_attempts() -> usize {
    5
}

fn default_lockout_minutes() -> i64 {
    15
}

/// Payment configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// ISO currency code used for new courses and checkouts
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Share of every sale kept by the platform, in percent
    #[serde(default = "default_platform_fee_percent")]
    pub platform_fee_percent: u32,
    /// Shared secret for webhook signatures. Empty disables the webhook.
    #[serde(default)]
    pub webhook_secret: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            platform_fee_percent: default_platform_fee_percent(),
            webhook_secret: String::new(),
        }
    }
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("currency", &self.currency)
            .field("platform_fee_percent", &self.platform_fee_percent)
            .field(
                "webhook_secret",
                &if self.webhook_secret.is_empty() { "" } else { "[REDACTED]" },
            )
            .finish()
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_platform_fee_percent() -> u32 {
    20
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file.
    ///
    /// A missing or empty file yields the default configuration. A file that
    /// exists but is invalid YAML returns an error with the location.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - COURSELY_SERVER_HOST / COURSELY_SERVER_PORT / COURSELY_SERVER_CORS_ORIGIN
    /// - COURSELY_DATABASE_URL / COURSELY_DATABASE_MAX_CONNECTIONS
    /// - COURSELY_CACHE_TTL_SECONDS
    /// - COURSELY_AUTH_SESSION_DAYS
    /// - COURSELY_PAYMENTS_CURRENCY / COURSELY_PAYMENTS_PLATFORM_FEE_PERCENT
    /// - COURSELY_PAYMENTS_WEBHOOK_SECRET
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the system cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be greater than zero".to_string(),
            ));
        }
        if self.payments.platform_fee_percent > 100 {
            return Err(ConfigError::ValidationError(format!(
                "payments.platform_fee_percent must be between 0 and 100, got {}",
                self.payments.platform_fee_percent
            )));
        }
        if self.auth.session_days <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.session_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("COURSELY_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("COURSELY_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("COURSELY_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(url) = std::env::var("COURSELY_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(max) = std::env::var("COURSELY_DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse::<u32>() {
                self.database.max_connections = max;
            }
        }

        if let Ok(ttl) = std::env::var("COURSELY_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = ttl;
            }
        }

        if let Ok(days) = std::env::var("COURSELY_AUTH_SESSION_DAYS") {
            if let Ok(days) = days.parse::<i64>() {
                self.auth.session_days = days;
            }
        }

        if let Ok(currency) = std::env::var("COURSELY_PAYMENTS_CURRENCY") {
            self.payments.currency = currency.to_lowercase();
        }
        if let Ok(fee) = std::env::var("COURSELY_PAYMENTS_PLATFORM_FEE_PERCENT") {
            if let Ok(fee) = fee.parse::<u32>() {
                self.payments.platform_fee_percent = fee;
            }
        }
        if let Ok(secret) = std::env::var("COURSELY_PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = secret;
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches COURSELY_* variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_VARS: &[&str] = &[
        "COURSELY_SERVER_HOST",
        "COURSELY_SERVER_PORT",
        "COURSELY_SERVER_CORS_ORIGIN",
        "COURSELY_DATABASE_URL",
        "COURSELY_DATABASE_MAX_CONNECTIONS",
        "COURSELY_CACHE_TTL_SECONDS",
        "COURSELY_AUTH_SESSION_DAYS",
        "COURSELY_PAYMENTS_CURRENCY",
        "COURSELY_PAYMENTS_PLATFORM_FEE_PERCENT",
        "COURSELY_PAYMENTS_WEBHOOK_SECRET",
    ];

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        let guard = super::CONFIG_ENV_MUTEX
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
        guard
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let config = Config::load(std::path::Path::new("nonexistent_config.yml")).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "data/coursely.db");
        assert_eq!(config.cache.ttl_seconds, 600);
        assert_eq!(config.auth.session_days, 7);
        assert_eq!(config.payments.platform_fee_percent, 20);
        assert_eq!(config.payments.currency, "usd");
        assert!(config.payments.webhook_secret.is_empty());
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "   \n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "payments:\n  platform_fee_percent: 30\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.payments.platform_fee_percent, 30);
        assert_eq!(config.payments.currency, "usd");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 9000
  cors_origin: "https://learn.example.com"
database:
  url: "/var/lib/coursely/app.db"
  max_connections: 5
cache:
  ttl_seconds: 120
auth:
  session_days: 30
payments:
  currency: eur
  platform_fee_percent: 15
  webhook_secret: "whsec_test"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_origin, "https://learn.example.com");
        assert_eq!(config.database.url, "/var/lib/coursely/app.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.cache.ttl_seconds, 120);
        assert_eq!(config.auth.session_days, 30);
        assert_eq!(config.payments.currency, "eur");
        assert_eq!(config.payments.platform_fee_percent, 15);
        assert_eq!(config.payments.webhook_secret, "whsec_test");
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_fee_percent_out_of_range_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "payments:\n  platform_fee_percent: 150\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("platform_fee_percent"));
    }

    #[test]
    fn test_webhook_secret_redacted_in_debug() {
        let config = PaymentConfig {
            webhook_secret: "super-secret".to_string(),
            ..PaymentConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_env_override_server_and_payments() {
        let _guard = lock_env();
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 8080\n").unwrap();

        std::env::set_var("COURSELY_SERVER_HOST", "10.0.0.1");
        std::env::set_var("COURSELY_SERVER_PORT", "4000");
        std::env::set_var("COURSELY_PAYMENTS_PLATFORM_FEE_PERCENT", "25");
        std::env::set_var("COURSELY_PAYMENTS_WEBHOOK_SECRET", "from-env");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.payments.platform_fee_percent, 25);
        assert_eq!(config.payments.webhook_secret, "from-env");

        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_env_override_invalid_number_ignored() {
        let _guard = lock_env();
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "cache:\n  ttl_seconds: 90\n").unwrap();

        std::env::set_var("COURSELY_SERVER_PORT", "not_a_number");
        std::env::set_var("COURSELY_CACHE_TTL_SECONDS", "soon");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.ttl_seconds, 90);

        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_env_override_invalid_fee_fails_validation() {
        let _guard = lock_env();
        let file = NamedTempFile::new().unwrap();

        std::env::set_var("COURSELY_PAYMENTS_PLATFORM_FEE_PERCENT", "101");
        let result = Config::load_with_env(file.path());
        std::env::remove_var("COURSELY_PAYMENTS_PLATFORM_FEE_PERCENT");

        assert!(result.is_err());
    }
}
