//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, required by the postgres backend
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Which store implementation backs the ledger and call store
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// Storage selection
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Flat per-minute rate in cents
    #[serde(default = "default_rate_cents_per_minute")]
    pub rate_cents_per_minute: i64,

    /// Default page size when listing calls
    #[serde(default = "default_list_limit")]
    pub list_limit_default: i64,
}

fn default_rate_cents_per_minute() -> i64 {
    40
}

fn default_list_limit() -> i64 {
    50
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            rate_cents_per_minute: default_rate_cents_per_minute(),
            list_limit_default: default_list_limit(),
        }
    }
}

/// Event fan-out configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// Per-channel buffer; slower subscribers lose the oldest events
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Tenants provisioned at startup by the memory backend
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SeedConfig {
    #[serde(default)]
    pub tenants: Vec<SeedTenant>,
}

/// A single provisioned tenant
#[derive(Debug, Deserialize, Clone)]
pub struct SeedTenant {
    pub id: i32,
    pub name: String,
    pub bot_id: String,
    pub bot_name: Option<String>,
    #[serde(default)]
    pub balance_cents: i64,
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("storage.backend", "memory")?
            .set_default("billing.rate_cents_per_minute", 40)?
            .set_default("billing.list_limit_default", 50)?
            .set_default("events.channel_capacity", 256)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CALLBILL_ prefix
            .add_source(
                Environment::with_prefix("CALLBILL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;

        tracing::debug!(run_mode = %run_mode, "Configuration loaded");

        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.billing.rate_cents_per_minute < 0 {
            return Err(ConfigError::Message(
                "billing.rate_cents_per_minute must not be negative".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Message(
                "database.url is required when storage.backend = postgres".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Allowed CORS origins, trimmed and without empty entries
    pub fn cors_origins(&self) -> Vec<String> {
        self.server
            .cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }
}
