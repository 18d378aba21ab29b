//! Configuration types module

pub mod sandbox;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Sandbox configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,

    /// Execution timeouts
    #[serde(default)]
    pub execution: sandbox::ExecutionConfig,

    /// Background maintenance
    #[serde(default)]
    pub maintenance: sandbox::MaintenanceConfig,

    /// Admin endpoints
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from the config file and environment variables
    ///
    /// Precedence: defaults < config file (if present) < environment.
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Lifetime of the session cookie
    #[serde(with = "humantime_serde", default = "default_cookie_max_age")]
    pub session_cookie_max_age: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            port: default_port(),
            session_cookie_max_age: default_cookie_max_age(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cookie_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Admin endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Key expected in the `X-API-Key` header; admin routes are disabled when unset
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}
