//! # CodeForge
//!
//! Compiles and runs untrusted source code in per-session Docker sandboxes.
//!
//! ## Features
//!
//! - **Session Sandboxes:** one container per client session, reused across requests
//! - **Five Languages:** Python, C, C++, Java and Eiffel (with AutoProof verification)
//! - **Background Operations:** runs are polled by id and can be cancelled
//! - **Timeout Enforcement:** every command is killed inside the sandbox at its bound
//! - **Crash Recovery:** leftover sandboxes are swept at startup and shutdown

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod language;
pub mod maintenance;
pub mod operations;
pub mod sandbox;
pub mod service;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use service::CodeService;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
