//! Session registry: one independently locked conversation per session id
//!
//! The map lock is only held to look up or insert an entry. Query handling
//! holds the per-session `Mutex` instead, so two requests for the same session
//! run one after the other while different sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mordomo_core::Session;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Session used when a client does not name one
pub const DEFAULT_SESSION: &str = "default";

/// Sessions kept before the least recently active one is dropped
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Metadata shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
}

impl SessionInfo {
    fn new(id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            last_activity: now,
            message_count: 0,
        }
    }
}

struct Entry {
    info: SessionInfo,
    state: Arc<Mutex<Session>>,
}

impl Entry {
    fn new(id: &str, name: &str) -> Self {
        Self {
            info: SessionInfo::new(id, name),
            state: Arc::new(Mutex::new(Session::new())),
        }
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Entry>>,
    max_sessions: usize,
}

impl SessionManager {
    /// Manager holding only the default session
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    /// Manager that keeps at most `max_sessions` entries, the default one included
    pub fn with_capacity(max_sessions: usize) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(
            DEFAULT_SESSION.to_string(),
            Entry::new(DEFAULT_SESSION, "Default"),
        );
        Self {
            sessions: RwLock::new(sessions),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Drop least recently active sessions until one more fits. The default
    /// session is never dropped.
    fn make_room(&self, sessions: &mut HashMap<String, Entry>) {
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .values()
                .filter(|e| e.info.id != DEFAULT_SESSION)
                .min_by_key(|e| e.info.last_activity)
                .map(|e| e.info.id.clone());
            let Some(id) = oldest else {
                break;
            };
            sessions.remove(&id);
            debug!("Evicted idle session '{}'", id);
        }
    }

    /// Conversation state for `id`, created on first use
    pub async fn open(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(entry) = self.sessions.read().await.get(id) {
            return entry.state.clone();
        }
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(id) {
            return entry.state.clone();
        }
        self.make_room(&mut sessions);
        let entry = Entry::new(id, id);
        let state = entry.state.clone();
        sessions.insert(id.to_string(), entry);
        info!("Opened session '{}'", id);
        state
    }

    /// Conversation state for `id`, only if it already exists
    pub async fn find(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).map(|e| e.state.clone())
    }

    /// New session under a fresh uuid
    pub async fn create(&self, name: &str) -> SessionInfo {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = Entry::new(&id, name);
        let info = entry.info.clone();
        let mut sessions = self.sessions.write().await;
        self.make_room(&mut sessions);
        sessions.insert(id.clone(), entry);
        info!("Created session '{}' ({})", name, id);
        info
    }

    /// Most recently active first
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionInfo> = sessions.values().map(|e| e.info.clone()).collect();
        list.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        list
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(id).map(|e| e.info.clone())
    }

    pub async fn record_activity(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(id) {
            entry.info.last_activity = Utc::now();
            entry.info.message_count += 1;
            debug!(
                "Session '{}' activity (messages: {})",
                id, entry.info.message_count
            );
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_session_exists() {
        let mgr = SessionManager::new();
        let list = mgr.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, DEFAULT_SESSION);
        assert!(mgr.find(DEFAULT_SESSION).await.is_some());
    }

    #[tokio::test]
    async fn test_open_creates_on_demand_and_reuses() {
        let mgr = SessionManager::new();
        assert!(mgr.find("kiosk-7").await.is_none());

        let first = mgr.open("kiosk-7").await;
        first.lock().await.shared.push_user("olá");

        let again = mgr.open("kiosk-7").await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.lock().await.history().len(), 1);
        assert_eq!(mgr.count().await, 2);
    }

    #[tokio::test]
    async fn test_sessions_hold_separate_state() {
        let mgr = SessionManager::new();
        let a = mgr.open("a").await;
        let b = mgr.open("b").await;
        a.lock().await.shared.push_user("ver fatura");
        assert!(b.lock().await.history().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_record_activity() {
        let mgr = SessionManager::new();
        let info = mgr.create("Casa").await;
        assert_eq!(info.name, "Casa");
        assert_eq!(info.message_count, 0);

        mgr.record_activity(&info.id).await;
        mgr.record_activity(&info.id).await;
        mgr.record_activity("unknown").await;

        assert_eq!(mgr.get(&info.id).await.unwrap().message_count, 2);
        assert!(mgr.get("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_open_is_bounded_and_keeps_default() {
        let mgr = SessionManager::with_capacity(5);
        for i in 0..20 {
            mgr.open(&format!("client-{}", i)).await;
        }
        assert_eq!(mgr.count().await, 5);
        assert!(mgr.find(DEFAULT_SESSION).await.is_some());
        assert!(mgr.find("client-19").await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_spares_recently_active_session() {
        let mgr = SessionManager::with_capacity(3);
        mgr.open("kept").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        mgr.open("idle").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        mgr.record_activity("kept").await;

        let created = mgr.create("Nova").await;
        assert_eq!(mgr.count().await, 3);
        assert!(mgr.find("kept").await.is_some());
        assert!(mgr.find("idle").await.is_none());
        assert!(mgr.find(&created.id).await.is_some());
    }

    #[tokio::test]
    async fn test_list_sorted_by_activity() {
        let mgr = SessionManager::new();
        let _older = mgr.create("Older").await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let newer = mgr.create("Newer").await;

        assert_eq!(mgr.list().await[0].id, newer.id);
    }
}
