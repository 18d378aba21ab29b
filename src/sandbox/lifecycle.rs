//! Sandbox lifecycle manager
//!
//! The only component that creates or destroys containers. A session owns
//! at most one sandbox: provisioning for a session is serialized by a
//! per-session lock, and any previous container is torn down (by registry
//! entry and by name) before a new one is started.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::registry::{SandboxHandle, SandboxRegistry};
use super::{sandbox_name, SANDBOX_NAME_PREFIX};
use crate::config::SandboxConfig;
use crate::engine::{ContainerEngine, ContainerSpec, SESSION_LABEL};
use crate::error::{Error, Result};
use crate::language::Language;

/// Status of a registered sandbox, for session info and admin listings
#[derive(Debug, Clone, Serialize)]
pub struct SandboxInfo {
    pub session_id: String,
    pub container_id: String,
    pub name: String,
    pub image: String,
    pub language: Language,
    pub status: String,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub age_seconds: i64,
}

/// Creates, validates and destroys session sandboxes
pub struct SandboxManager {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<SandboxRegistry>,
    config: SandboxConfig,
    provisioning: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    fallback_build: tokio::sync::Mutex<bool>,
}

impl SandboxManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<SandboxRegistry>,
        config: SandboxConfig,
    ) -> Self {
        SandboxManager {
            engine,
            registry,
            config,
            provisioning: Mutex::new(HashMap::new()),
            fallback_build: tokio::sync::Mutex::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    /// Return a running sandbox for the session, creating one if needed
    ///
    /// The registered sandbox is reused when the engine reports it running
    /// and it was started from the image `language` needs. Anything else
    /// (vanished, stopped, other language) leads to recreation.
    pub async fn ensure_sandbox(&self, session_id: &str, language: Language) -> Result<SandboxHandle> {
        let lock = self.provisioning_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.provision(session_id, language).await
        };
        drop(lock);

        if result.is_err() {
            self.prune_locks();
        }
        result
    }

    async fn provision(&self, session_id: &str, language: Language) -> Result<SandboxHandle> {
        let image = self.config.image_for(language).to_string();

        if let Some(handle) = self.registry.lookup(session_id).await {
            match self.engine.inspect(&handle.name).await {
                Ok(Some(state)) if state.running && handle.image == image => {
                    debug!("Reusing sandbox {} for session {}", handle.name, session_id);
                    return Ok(handle);
                }
                Ok(Some(state)) if state.running => {
                    info!(
                        "Session {} switched from {} to {}, recreating sandbox",
                        session_id, handle.language, language
                    );
                }
                Ok(Some(state)) => {
                    info!(
                        "Sandbox {} is {}, recreating",
                        handle.name, state.status
                    );
                }
                Ok(None) => {
                    info!("Sandbox {} vanished, recreating", handle.name);
                }
                Err(e) => {
                    warn!("Status check for {} failed, recreating: {}", handle.name, e);
                }
            }
        }

        self.ensure_image(&image).await?;

        // Clear both the registered container and any same-named leftover
        let name = sandbox_name(session_id);
        if let Some(old) = self.registry.remove(session_id).await {
            if old.name != name {
                self.stop_and_remove(&old.name).await;
            }
        }
        self.stop_and_remove(&name).await;

        let spec = self.container_spec(session_id, &name, &image);
        let container_id = self.engine.create_and_start(&spec).await.map_err(|e| match e {
            Error::Provision(msg) => Error::Provision(msg),
            other => Error::Provision(other.to_string()),
        })?;

        let handle = SandboxHandle {
            session_id: session_id.to_string(),
            container_id,
            name,
            image,
            language,
            created_at: Utc::now(),
        };
        self.registry.register(handle.clone()).await;

        info!(
            "Created sandbox {} ({}) for session {}",
            handle.name, handle.image, session_id
        );
        Ok(handle)
    }

    /// Stop and remove the session's sandbox
    ///
    /// The registry entry is dropped whatever the engine says. Returns false
    /// only when the engine failed to remove an existing container.
    pub async fn destroy_sandbox(&self, session_id: &str) -> bool {
        let removed = {
            let lock = self.provisioning_lock(session_id);
            let _guard = lock.lock().await;

            let name = match self.registry.remove(session_id).await {
                Some(handle) => handle.name,
                None => sandbox_name(session_id),
            };
            self.stop_and_remove(&name).await
        };
        self.prune_locks();

        if removed {
            info!("Destroyed sandbox for session {}", session_id);
        }
        removed
    }

    /// Destroy every registered sandbox older than `max_age`
    pub async fn sweep_idle(&self, max_age: Duration) -> usize {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(365));
        let expired: Vec<String> = self
            .registry
            .handles()
            .await
            .into_iter()
            .filter(|h| h.age() > max_age)
            .map(|h| h.session_id)
            .collect();

        let mut count = 0;
        for session_id in expired {
            if self.destroy_sandbox(&session_id).await {
                count += 1;
            }
        }

        if count > 0 {
            info!("Idle sweep removed {} sandbox(es)", count);
        }
        count
    }

    /// Remove every container following the sandbox naming convention
    ///
    /// Registry state is ignored and cleared afterwards, so containers left
    /// by a crashed process are reclaimed too.
    pub async fn sweep_all(&self) -> Result<usize> {
        let containers = self.engine.list_by_prefix(SANDBOX_NAME_PREFIX).await?;

        let mut count = 0;
        for container in &containers {
            if self.stop_and_remove(&container.name).await {
                count += 1;
            }
        }

        let forgotten = self.registry.clear().await;
        self.prune_locks();

        info!(
            "Swept {} sandbox container(s), cleared {} registry entr(ies)",
            count, forgotten
        );
        Ok(count)
    }

    /// Live status of the session's sandbox
    pub async fn sandbox_info(&self, session_id: &str) -> Option<SandboxInfo> {
        let handle = self.registry.lookup(session_id).await?;
        Some(self.describe(handle).await)
    }

    /// Live status of every registered sandbox
    pub async fn list_sandboxes(&self) -> Vec<SandboxInfo> {
        let mut infos = Vec::new();
        for handle in self.registry.handles().await {
            infos.push(self.describe(handle).await);
        }
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    async fn describe(&self, handle: SandboxHandle) -> SandboxInfo {
        let (status, running) = match self.engine.inspect(&handle.name).await {
            Ok(Some(state)) => (state.status, state.running),
            Ok(None) => ("missing".to_string(), false),
            Err(e) => {
                warn!("Status check for {} failed: {}", handle.name, e);
                ("unknown".to_string(), false)
            }
        };

        SandboxInfo {
            age_seconds: handle.age().num_seconds(),
            session_id: handle.session_id,
            container_id: handle.container_id,
            name: handle.name,
            image: handle.image,
            language: handle.language,
            status,
            running,
            created_at: handle.created_at,
        }
    }

    fn container_spec(&self, session_id: &str, name: &str, image: &str) -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert(SESSION_LABEL.to_string(), session_id.to_string());

        ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            working_dir: self.config.working_dir.clone(),
            user: self.config.user.clone(),
            memory_bytes: self.config.memory_limit_bytes(),
            nano_cpus: self.config.nano_cpus(),
            network_disabled: self.config.network_disabled,
            labels,
            cmd: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }

    /// Make sure the image exists, building the legacy fallback image once
    async fn ensure_image(&self, image: &str) -> Result<()> {
        let exists = self
            .engine
            .image_exists(image)
            .await
            .map_err(|e| Error::Provision(format!("Cannot inspect image {}: {}", image, e)))?;
        if exists {
            return Ok(());
        }

        if image != self.config.fallback_image {
            return Err(Error::ImageNotFound(format!(
                "{} is not available; build the language images first",
                image
            )));
        }

        let mut attempted = self.fallback_build.lock().await;
        if *attempted {
            // Another caller may have just built it
            if self.engine.image_exists(image).await.unwrap_or(false) {
                return Ok(());
            }
            return Err(Error::ImageNotFound(format!(
                "{} is not available and its build already failed",
                image
            )));
        }
        *attempted = true;

        let dockerfile = self.config.fallback_build_context.join(&self.config.fallback_dockerfile);
        if !dockerfile.exists() {
            return Err(Error::ImageNotFound(format!(
                "{} is not available and {} does not exist",
                image,
                dockerfile.display()
            )));
        }

        info!("Building fallback image {}", image);
        self.engine
            .build_image(
                image,
                &self.config.fallback_build_context,
                &self.config.fallback_dockerfile,
            )
            .await
            .map_err(|e| Error::Provision(format!("Failed to build {}: {}", image, e)))
    }

    /// Stop then force-remove a container; absence counts as success
    async fn stop_and_remove(&self, name: &str) -> bool {
        match self.engine.stop(name, self.config.stop_grace).await {
            Ok(()) => debug!("Stopped {}", name),
            Err(e) if e.is_not_found() => {
                debug!("{} already gone", name);
                return true;
            }
            Err(e) => warn!("Failed to stop {}: {}", name, e),
        }

        match self.engine.remove(name).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!("Failed to remove {}: {}", name, e);
                false
            }
        }
    }

    fn provisioning_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Forget locks nobody holds or waits on
    fn prune_locks(&self) {
        let mut locks = self
            .provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
