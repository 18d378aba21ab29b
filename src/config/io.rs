//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use super::types::Config;
use crate::error::{Error, Result};
use crate::language::Language;

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Unparseable
/// numeric values are ignored and the previous value is kept.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();

    // Server overrides
    if let Ok(bind) = std::env::var("CODEFORGE_BIND") {
        config.server.bind = bind;
    }
    if let Ok(port) = std::env::var("CODEFORGE_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }

    // Sandbox overrides
    for language in Language::ALL {
        let key = format!("CODEFORGE_IMAGE_{}", language.to_string().to_uppercase());
        if let Ok(image) = std::env::var(&key) {
            config.sandbox.images.set(language, image);
        }
    }
    if let Ok(image) = std::env::var("CODEFORGE_FALLBACK_IMAGE") {
        config.sandbox.fallback_image = image;
    }
    if let Ok(limit) = std::env::var("CODEFORGE_MEMORY_LIMIT") {
        config.sandbox.memory_limit = if limit.is_empty() { None } else { Some(limit) };
    }
    if let Ok(cpus) = std::env::var("CODEFORGE_CPU_LIMIT") {
        if let Ok(v) = cpus.parse() {
            config.sandbox.cpu_limit = Some(v);
        }
    }

    // Execution overrides
    if let Ok(secs) = std::env::var("CODEFORGE_DEFAULT_TIMEOUT") {
        if let Ok(v) = secs.parse() {
            config.execution.default_timeout = Duration::from_secs(v);
        }
    }

    // Admin overrides
    if let Ok(key) = std::env::var("CODEFORGE_ADMIN_API_KEY") {
        if !key.is_empty() {
            config.admin.api_key = Some(SecretString::from(key));
        }
    }

    // Logging overrides
    if let Ok(format) = std::env::var("LOG_FORMAT") {
        config.log.format = format;
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
