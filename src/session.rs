//! Client sessions
//!
//! A session is the identity a client keeps across requests. It outlives
//! its sandbox: recreating a sandbox (language switch, staleness) keeps the
//! session id stable.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Timestamps of one session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a client-supplied id, creating a session when it is missing or unknown
    ///
    /// Known sessions have their activity timestamp refreshed.
    pub async fn get_or_create(&self, session_id: Option<&str>) -> String {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();

        if let Some(session) = session_id.and_then(|id| sessions.get_mut(id)) {
            session.last_used = now;
            return session.id.clone();
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                created_at: now,
                last_used: now,
            },
        );
        debug!("Created session {}", id);
        id
    }

    /// Refresh the activity timestamp; false if the session is unknown
    pub async fn touch(&self, session_id: &str) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(session) => {
                session.last_used = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.write().await.remove(session_id)
    }

    /// Remove sessions inactive for longer than `max_age`, returning their ids
    pub async fn remove_idle(&self, max_age: Duration) -> Vec<String> {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(365));
        // Before the representable range: nothing can be that old
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Vec::new();
        };

        let mut sessions = self.sessions.write().await;
        let idle: Vec<String> = sessions
            .values()
            .filter(|s| s.last_used < cutoff)
            .map(|s| s.id.clone())
            .collect();
        for id in &idle {
            sessions.remove(id);
        }
        idle
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create() {
        let store = SessionStore::new();

        let id = store.get_or_create(None).await;
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(store.get_or_create(Some(&id)).await, id);

        // Unknown ids are not adopted
        let other = store.get_or_create(Some("forged")).await;
        assert_ne!(other, "forged");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_touch_updates_activity() {
        let store = SessionStore::new();
        let id = store.get_or_create(None).await;
        let before = store.get(&id).await.unwrap().last_used;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.touch(&id).await);
        assert!(store.get(&id).await.unwrap().last_used > before);
        assert!(!store.touch("missing").await);
    }

    #[tokio::test]
    async fn test_remove_idle() {
        let store = SessionStore::new();
        let old = store.get_or_create(None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fresh = store.get_or_create(None).await;

        let removed = store.remove_idle(Duration::from_millis(25)).await;
        assert_eq!(removed, vec![old]);
        assert!(store.get(&fresh).await.is_some());
        assert!(store.remove(&fresh).await.is_some());
        assert!(store.is_empty().await);
    }
}
