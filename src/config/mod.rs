//! Configuration module
//!
//! - types/mod.rs: top-level Config, server, admin and log sections
//! - types/sandbox.rs: images, resource bounds, timeouts, maintenance
//! - io.rs: loading with file + environment layering
//! - validation.rs: configuration validation
//! - paths.rs: configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{AdminConfig, Config, LogConfig, ServerConfig};

pub use types::sandbox::{
    parse_memory_limit, ExecutionConfig, LanguageImages, MaintenanceConfig, SandboxConfig,
};

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
