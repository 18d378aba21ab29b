//! Sandbox configuration types
//!
//! Images, container resource bounds, execution timeouts and the
//! background maintenance schedule.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::language::Language;

/// Sandbox (container) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Per-language images
    #[serde(default)]
    pub images: LanguageImages,
    /// Legacy image used when a language has no dedicated image
    #[serde(default = "default_fallback_image")]
    pub fallback_image: String,
    /// Build context for the legacy image
    #[serde(default = "default_build_context")]
    pub fallback_build_context: PathBuf,
    /// Dockerfile name inside the build context
    #[serde(default = "default_dockerfile")]
    pub fallback_dockerfile: String,
    /// Non-root user commands run as
    #[serde(default = "default_user")]
    pub user: String,
    /// UID of the execution user (owner of uploaded files)
    #[serde(default = "default_id")]
    pub uid: u64,
    /// GID of the execution user
    #[serde(default = "default_id")]
    pub gid: u64,
    /// Working directory inside every sandbox
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Memory limit (e.g. "512m", "1g")
    #[serde(default = "default_memory")]
    pub memory_limit: Option<String>,
    /// CPU limit (number of CPUs)
    #[serde(default = "default_cpu")]
    pub cpu_limit: Option<f64>,
    /// Disable outbound networking
    #[serde(default = "default_true")]
    pub network_disabled: bool,
    /// Grace period before a stopping sandbox is killed
    #[serde(with = "humantime_serde", default = "default_stop_grace")]
    pub stop_grace: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            images: LanguageImages::default(),
            fallback_image: default_fallback_image(),
            fallback_build_context: default_build_context(),
            fallback_dockerfile: default_dockerfile(),
            user: default_user(),
            uid: default_id(),
            gid: default_id(),
            working_dir: default_working_dir(),
            memory_limit: default_memory(),
            cpu_limit: default_cpu(),
            network_disabled: true,
            stop_grace: default_stop_grace(),
        }
    }
}

impl SandboxConfig {
    /// Resolve the image a language runs in
    pub fn image_for(&self, language: Language) -> &str {
        let image = self.images.get(language);
        if image.is_empty() {
            &self.fallback_image
        } else {
            image
        }
    }

    /// Memory limit in bytes, if one is configured and parseable
    pub fn memory_limit_bytes(&self) -> Option<i64> {
        self.memory_limit.as_deref().and_then(parse_memory_limit)
    }

    /// CPU limit in nano-CPUs
    pub fn nano_cpus(&self) -> Option<i64> {
        self.cpu_limit
            .filter(|cpus| *cpus > 0.0)
            .map(|cpus| (cpus * 1_000_000_000.0) as i64)
    }
}

fn default_fallback_image() -> String {
    "code-executor:latest".to_string()
}

fn default_build_context() -> PathBuf {
    PathBuf::from("./docker")
}

fn default_dockerfile() -> String {
    "Dockerfile.execution".to_string()
}

fn default_user() -> String {
    "coderunner".to_string()
}

fn default_id() -> u64 {
    1000
}

fn default_working_dir() -> String {
    "/workspace".to_string()
}

fn default_memory() -> Option<String> {
    Some("512m".to_string())
}

fn default_cpu() -> Option<f64> {
    Some(1.0)
}

fn default_true() -> bool {
    true
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

/// Docker image per language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageImages {
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_c_image")]
    pub c: String,
    #[serde(default = "default_cpp_image")]
    pub cpp: String,
    #[serde(default = "default_java_image")]
    pub java: String,
    #[serde(default = "default_eiffel_image")]
    pub eiffel: String,
}

impl Default for LanguageImages {
    fn default() -> Self {
        LanguageImages {
            python: default_python_image(),
            c: default_c_image(),
            cpp: default_cpp_image(),
            java: default_java_image(),
            eiffel: default_eiffel_image(),
        }
    }
}

impl LanguageImages {
    /// Image configured for a language
    pub fn get(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python,
            Language::C => &self.c,
            Language::Cpp => &self.cpp,
            Language::Java => &self.java,
            Language::Eiffel => &self.eiffel,
        }
    }

    /// Replace the image for a language
    pub fn set(&mut self, language: Language, image: impl Into<String>) {
        let slot = match language {
            Language::Python => &mut self.python,
            Language::C => &mut self.c,
            Language::Cpp => &mut self.cpp,
            Language::Java => &mut self.java,
            Language::Eiffel => &mut self.eiffel,
        };
        *slot = image.into();
    }
}

fn default_python_image() -> String {
    "code-executor-python:latest".to_string()
}

fn default_c_image() -> String {
    "code-executor-c:latest".to_string()
}

fn default_cpp_image() -> String {
    "code-executor-cpp:latest".to_string()
}

fn default_java_image() -> String {
    "code-executor-java:latest".to_string()
}

fn default_eiffel_image() -> String {
    "code-executor-eiffel:latest".to_string()
}

/// Execution timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Timeout used when a request does not specify one
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub default_timeout: Duration,
    /// Smallest timeout a caller may request
    #[serde(with = "humantime_serde", default = "default_min_timeout")]
    pub min_timeout: Duration,
    /// Largest timeout a caller may request
    #[serde(with = "humantime_serde", default = "default_max_timeout")]
    pub max_timeout: Duration,
    /// Bound for compile steps
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub compile_timeout: Duration,
    /// Bound for Eiffel builds, which are much slower
    #[serde(with = "humantime_serde", default = "default_eiffel_timeout")]
    pub eiffel_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            default_timeout: default_timeout(),
            min_timeout: default_min_timeout(),
            max_timeout: default_max_timeout(),
            compile_timeout: default_timeout(),
            eiffel_timeout: default_eiffel_timeout(),
        }
    }
}

impl ExecutionConfig {
    /// Clamp a caller-supplied timeout into the allowed range
    pub fn clamp_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .clamp(self.min_timeout, self.max_timeout.max(self.min_timeout))
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_min_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_eiffel_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// How often the idle sweep runs
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    /// Sandboxes older than this are destroyed by the idle sweep
    #[serde(with = "humantime_serde", default = "default_idle_max_age")]
    pub idle_max_age: Duration,
    /// Finished operations nobody polled are dropped after this long
    #[serde(with = "humantime_serde", default = "default_idle_max_age")]
    pub operation_retention: Duration,
    /// Remove every session sandbox when the server shuts down
    #[serde(default = "default_true")]
    pub sweep_on_shutdown: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        MaintenanceConfig {
            sweep_interval: default_sweep_interval(),
            idle_max_age: default_idle_max_age(),
            operation_retention: default_idle_max_age(),
            sweep_on_shutdown: true,
        }
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_idle_max_age() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Parse a memory limit string (e.g., "512m", "1g") to bytes
pub fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.trim().to_lowercase();
    let (num_str, unit) = if limit.ends_with('g') || limit.ends_with("gb") {
        (limit.trim_end_matches(|c| c == 'g' || c == 'b'), "g")
    } else if limit.ends_with('m') || limit.ends_with("mb") {
        (limit.trim_end_matches(|c| c == 'm' || c == 'b'), "m")
    } else if limit.ends_with('k') || limit.ends_with("kb") {
        (limit.trim_end_matches(|c| c == 'k' || c == 'b'), "k")
    } else {
        (limit.as_str(), "b")
    };

    let num: i64 = num_str.parse().ok()?;

    Some(match unit {
        "g" => num * 1024 * 1024 * 1024,
        "m" => num * 1024 * 1024,
        "k" => num * 1024,
        _ => num,
    })
}
