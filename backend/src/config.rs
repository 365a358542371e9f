//! Configuration management for the LIMS platform
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with LIMS__ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Log output configuration
    pub logging: LoggingConfig,

    /// Object storage for logos and signatures
    pub storage: StorageConfig,

    /// Zoho Books integration, absent when not configured
    #[serde(default)]
    pub zoho: Option<ZohoConfig>,

    /// Customer portal settings
    pub portal: PortalConfig,

    /// Billing defaults
    pub billing: BillingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens and verification codes
    pub secret: String,

    /// Access token expiration in seconds
    pub access_token_expiry: i64,

    /// Refresh token expiration in seconds
    pub refresh_token_expiry: i64,

    /// Portal token expiration in seconds
    pub portal_token_expiry: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Supabase project URL
    pub url: String,

    /// Service role key used for uploads
    pub service_key: String,

    /// Bucket holding lab assets
    pub bucket: String,

    /// Upload size limit in bytes
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZohoConfig {
    /// OAuth accounts server, e.g. https://accounts.zoho.in
    pub accounts_url: String,

    /// Books API base, e.g. https://www.zohoapis.in/books/v3
    pub api_base: String,

    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub organization_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    /// Public base URL used when printing verification links
    pub public_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Currency used when a lab has none configured
    pub default_currency: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LIMS_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("jwt.access_token_expiry", 3600)?
            .set_default("jwt.refresh_token_expiry", 604800)?
            .set_default("jwt.portal_token_expiry", 28800)?
            .set_default(
                "logging.filter",
                "lims_server=debug,lims_backend=debug,tower_http=debug,sqlx=warn",
            )?
            .set_default("logging.json", false)?
            .set_default("storage.url", "")?
            .set_default("storage.service_key", "")?
            .set_default("storage.bucket", "lab-assets")?
            .set_default("storage.max_upload_bytes", 2 * 1024 * 1024)?
            .set_default("portal.public_base_url", "http://localhost:3000")?
            .set_default("billing.default_currency", "INR")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LIMS__ prefix)
            .add_source(
                Environment::with_prefix("LIMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for unit and router tests; never touches the environment
    pub fn for_tests() -> Self {
        Self {
            environment: "test".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/lims_test".to_string(),
                max_connections: 1,
                min_connections: 0,
            },
            jwt: JwtConfig {
                secret: "test-secret".to_string(),
                access_token_expiry: 3600,
                refresh_token_expiry: 604800,
                portal_token_expiry: 3600,
            },
            logging: LoggingConfig {
                filter: "warn".to_string(),
                json: false,
            },
            storage: StorageConfig {
                url: "http://storage.local".to_string(),
                service_key: "key".to_string(),
                bucket: "lab-assets".to_string(),
                max_upload_bytes: 1024,
            },
            zoho: None,
            portal: PortalConfig {
                public_base_url: "https://lims.example.com".to_string(),
            },
            billing: BillingConfig {
                default_currency: "INR".to_string(),
            },
        }
    }
}
