//! Configuration management for OrgForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (Postgres warehouse and meta store)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Warehouse configuration
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Schema catalog location
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Key management configuration
    #[serde(default)]
    pub kms: KmsConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Fleet-wide sync job configuration
    #[serde(default)]
    pub sync_job: SyncJobConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (DDL calls are slow, keep this generous)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    /// Warehouse provider: postgres, memory
    #[serde(default = "default_warehouse_provider")]
    pub provider: String,

    /// Name of the shared metadata dataset
    #[serde(default = "default_meta_dataset")]
    pub meta_dataset: String,

    /// Suffix appended to the org slug to form the tenant dataset
    #[serde(default = "default_org_dataset_suffix")]
    pub org_dataset_suffix: String,

    /// Delay before the single retry of a transient DDL failure
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Directory holding meta.json and org.json; None uses the compiled-in catalog
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KmsConfig {
    /// KMS provider: aws, mock
    #[serde(default = "default_kms_provider")]
    pub provider: String,

    /// Key id or ARN used for API key encryption
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// System-level root key gating bootstrap and onboarding
    pub root_api_key: Option<String>,

    /// Header carrying the root key
    #[serde(default = "default_root_key_header")]
    pub root_key_header: String,

    /// Header carrying an organization API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncJobConfig {
    /// Organizations synced in parallel by `sync-all`
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 300 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/orgforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_warehouse_provider() -> String { "postgres".to_string() }
fn default_meta_dataset() -> String { "organizations".to_string() }
fn default_org_dataset_suffix() -> String { "_prod".to_string() }
fn default_retry_delay_ms() -> u64 { 500 }
fn default_kms_provider() -> String { "aws".to_string() }
fn default_root_key_header() -> String { "X-CA-Root-Key".to_string() }
fn default_api_key_header() -> String { "X-API-Key".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "orgforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }
fn default_sync_concurrency() -> usize { 4 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__WAREHOUSE__PROVIDER=memory
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Delay before retrying a transient DDL failure
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.warehouse.retry_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            provider: default_warehouse_provider(),
            meta_dataset: default_meta_dataset(),
            org_dataset_suffix: default_org_dataset_suffix(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            provider: default_kms_provider(),
            key_id: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            root_api_key: None,
            root_key_header: default_root_key_header(),
            api_key_header: default_api_key_header(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for SyncJobConfig {
    fn default() -> Self {
        Self {
            concurrency: default_sync_concurrency(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            warehouse: WarehouseConfig::default(),
            catalog: CatalogConfig::default(),
            kms: KmsConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            sync_job: SyncJobConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.warehouse.meta_dataset, "organizations");
        assert_eq!(config.warehouse.org_dataset_suffix, "_prod");
        assert!(config.auth.root_api_key.is_none());
    }

    #[test]
    fn test_retry_delay() {
        let mut config = AppConfig::default();
        config.warehouse.retry_delay_ms = 250;
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
    }
}
