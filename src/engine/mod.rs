//! Container runtime client
//!
//! A thin seam over the container engine's control API. Everything above
//! this module talks to [`ContainerEngine`] and never sees engine-specific
//! error types; the Docker implementation lives in [`docker`].

mod docker;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::DockerEngine;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Label attached to every session sandbox
pub const SESSION_LABEL: &str = "codeforge.session";

/// Everything needed to create and start one long-lived container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    pub user: String,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub network_disabled: bool,
    pub labels: HashMap<String, String>,
    /// Idle command keeping the container up
    pub cmd: Vec<String>,
}

/// Live state of a container as reported by the engine
#[derive(Debug, Clone, Serialize)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Entry of a container listing
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without the engine's leading slash
    pub name: String,
    pub image: String,
    pub status: String,
}

/// One command to execute inside a running container
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
}

impl ExecSpec {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecSpec {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Captured result of an exec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Container engine control API
///
/// Implementations map a missing container to [`crate::Error::NotFound`]
/// so callers can treat absence as a normal outcome.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Whether an image is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build an image from a directory containing a Dockerfile
    async fn build_image(&self, tag: &str, context_dir: &Path, dockerfile: &str) -> Result<()>;

    /// Create and start a container, returning its engine id
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Live state of a container, `None` if it does not exist
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>>;

    /// Stop a container, killing it after the grace period
    async fn stop(&self, name: &str, grace: Duration) -> Result<()>;

    /// Force-remove a container
    async fn remove(&self, name: &str) -> Result<()>;

    /// Every container (running or not) whose name starts with `prefix`
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerSummary>>;

    /// Run a command to completion and capture its output
    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput>;

    /// Extract a tar archive into a directory of the container
    async fn upload_archive(&self, name: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()>;
}
