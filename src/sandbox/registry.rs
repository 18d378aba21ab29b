//! Sandbox registry
//!
//! A pure map from session id to the sandbox currently serving it. The
//! registry never talks to the engine; tearing down a replaced sandbox is
//! the lifecycle manager's job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::language::Language;

/// A live sandbox bound to one session
#[derive(Debug, Clone, Serialize)]
pub struct SandboxHandle {
    pub session_id: String,
    /// Engine-assigned container id
    pub container_id: String,
    /// Container name, derived from the session id
    pub name: String,
    pub image: String,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

impl SandboxHandle {
    /// Time since the sandbox was created
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Session id → sandbox handle
#[derive(Debug, Default)]
pub struct SandboxRegistry {
    sandboxes: RwLock<HashMap<String, SandboxHandle>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, session_id: &str) -> Option<SandboxHandle> {
        self.sandboxes.read().await.get(session_id).cloned()
    }

    /// Insert a handle, returning whatever it replaced
    pub async fn register(&self, handle: SandboxHandle) -> Option<SandboxHandle> {
        self.sandboxes
            .write()
            .await
            .insert(handle.session_id.clone(), handle)
    }

    pub async fn remove(&self, session_id: &str) -> Option<SandboxHandle> {
        self.sandboxes.write().await.remove(session_id)
    }

    /// Snapshot of the registered session ids
    pub async fn all_session_ids(&self) -> Vec<String> {
        self.sandboxes.read().await.keys().cloned().collect()
    }

    /// Snapshot of every handle
    pub async fn handles(&self) -> Vec<SandboxHandle> {
        self.sandboxes.read().await.values().cloned().collect()
    }

    /// Drop every entry, returning how many there were
    pub async fn clear(&self) -> usize {
        let mut sandboxes = self.sandboxes.write().await;
        let count = sandboxes.len();
        sandboxes.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.sandboxes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sandboxes.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(session: &str, container: &str) -> SandboxHandle {
        SandboxHandle {
            session_id: session.to_string(),
            container_id: container.to_string(),
            name: crate::sandbox::sandbox_name(session),
            image: "code-executor-python:latest".to_string(),
            language: Language::Python,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let registry = SandboxRegistry::new();
        assert!(registry.register(handle("s1", "c1")).await.is_none());

        let replaced = registry.register(handle("s1", "c2")).await;
        assert_eq!(replaced.unwrap().container_id, "c1");
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.lookup("s1").await.unwrap().container_id, "c2");
    }

    #[tokio::test]
    async fn test_absence_is_not_an_error() {
        let registry = SandboxRegistry::new();
        assert!(registry.lookup("missing").await.is_none());
        assert!(registry.remove("missing").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_and_clear() {
        let registry = SandboxRegistry::new();
        registry.register(handle("a", "1")).await;
        registry.register(handle("b", "2")).await;

        let mut ids = registry.all_session_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(registry.clear().await, 2);
        assert!(registry.is_empty().await);
    }
}
