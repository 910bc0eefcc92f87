//! User Session Service
//!
//! Per-client session state: preferences, context, and a bounded processing
//! history. Sessions expire after an inactivity timeout and the store carries
//! a soft capacity cap: overflow proactively evicts the oldest 10% by
//! creation time instead of rejecting the new session.

use crate::config::SessionSettings;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRecord {
    pub processing_type: String,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub preferences: HashMap<String, Value>,
    pub context: HashMap<String, Value>,
    pub processing_history: VecDeque<ProcessingRecord>,
    pub is_authenticated: bool,
}

impl UserSession {
    fn new(session_id: &str, initial_context: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            created_at: now,
            last_activity: now,
            preferences: HashMap::new(),
            context: initial_context,
            processing_history: VecDeque::new(),
            is_authenticated: false,
        }
    }
}

pub struct SessionService {
    sessions: Arc<RwLock<HashMap<String, UserSession>>>,
    timeout: ChronoDuration,
    max_sessions: usize,
    history_limit: usize,
}

impl SessionService {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout: ChronoDuration::minutes(settings.timeout_minutes as i64),
            max_sessions: settings.max_sessions,
            history_limit: settings.history_limit,
        }
    }

    /// Create (or replace) the session for a client. Evicts the oldest 10%
    /// first when the store is at capacity.
    pub async fn create_session(&self, client_id: &str, initial_context: HashMap<String, Value>) {
        let mut sessions = self.sessions.write().await;

        if !sessions.contains_key(client_id) && sessions.len() >= self.max_sessions {
            let evict_count = (self.max_sessions / 10).max(1);
            let mut by_age: Vec<(String, DateTime<Utc>)> = sessions
                .iter()
                .map(|(id, s)| (id.clone(), s.created_at))
                .collect();
            by_age.sort_by_key(|(_, created)| *created);
            for (id, _) in by_age.into_iter().take(evict_count) {
                debug!(session_id = %id, "Evicting session for capacity");
                sessions.remove(&id);
            }
            info!(evicted = evict_count, "Session store at capacity, evicted oldest");
        }

        sessions.insert(
            client_id.to_string(),
            UserSession::new(client_id, initial_context),
        );
    }

    pub async fn get(&self, client_id: &str) -> Option<UserSession> {
        let sessions = self.sessions.read().await;
        sessions.get(client_id).cloned()
    }

    /// Touch the session; optionally merge activity data into its context
    pub async fn update_activity(&self, client_id: &str, activity: Option<HashMap<String, Value>>) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(client_id) {
            session.last_activity = Utc::now();
            if let Some(activity) = activity {
                session.context.extend(activity);
            }
        }
    }

    pub async fn set_preference(&self, client_id: &str, key: &str, value: Value) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(client_id) {
            session.preferences.insert(key.to_string(), value);
            session.last_activity = Utc::now();
        }
    }

    /// Append to the session's bounded processing history
    pub async fn record_processing(&self, client_id: &str, processing_type: &str, details: Value) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(client_id) {
            if session.processing_history.len() >= self.history_limit {
                session.processing_history.pop_front();
            }
            session.processing_history.push_back(ProcessingRecord {
                processing_type: processing_type.to_string(),
                details,
                recorded_at: Utc::now(),
            });
            session.last_activity = Utc::now();
        }
    }

    pub async fn remove_session(&self, client_id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(client_id).is_some() {
            debug!(session_id = %client_id, "Session removed");
        }
    }

    /// Sweep sessions idle past the configured timeout. Returns how many were
    /// removed.
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - self.timeout;
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.last_activity < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
            debug!(session_id = %id, "Session expired");
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired sessions cleaned up");
        }
        expired.len()
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(timeout_minutes: u64, max_sessions: usize) -> SessionService {
        SessionService::new(&SessionSettings {
            timeout_minutes,
            max_sessions,
            history_limit: 3,
            sweep_interval_seconds: 60,
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service(30, 100);
        let mut ctx = HashMap::new();
        ctx.insert("screen".to_string(), json!("home"));
        service.create_session("kiosk-1", ctx).await;

        let session = service.get("kiosk-1").await.unwrap();
        assert_eq!(session.session_id, "kiosk-1");
        assert_eq!(session.context.get("screen").unwrap(), &json!("home"));
        assert!(!session.is_authenticated);
    }

    #[tokio::test]
    async fn test_history_ring_buffer() {
        let service = service(30, 100);
        service.create_session("kiosk-1", HashMap::new()).await;

        for i in 0..5 {
            service
                .record_processing("kiosk-1", "chat", json!({"seq": i}))
                .await;
        }

        let session = service.get("kiosk-1").await.unwrap();
        // history_limit is 3 in the test fixture
        assert_eq!(session.processing_history.len(), 3);
        assert_eq!(session.processing_history[0].details["seq"], json!(2));
        assert_eq!(session.processing_history[2].details["seq"], json!(4));
    }

    #[tokio::test]
    async fn test_expiry_sweep() {
        // Zero-minute timeout: everything not touched "now" is expired
        let service = service(0, 100);
        service.create_session("stale", HashMap::new()).await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let removed = service.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert!(service.get("stale").await.is_none());
    }

    #[tokio::test]
    async fn test_active_session_retained() {
        let service = service(30, 100);
        service.create_session("active", HashMap::new()).await;
        service.update_activity("active", None).await;

        let removed = service.cleanup_expired().await;
        assert_eq!(removed, 0);
        assert!(service.get("active").await.is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_tenth() {
        let service = service(30, 10);
        for i in 0..10 {
            service.create_session(&format!("c{}", i), HashMap::new()).await;
            // Keep created_at strictly ordered
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert_eq!(service.session_count().await, 10);

        service.create_session("c10", HashMap::new()).await;

        // Oldest 10% (1 session) evicted, newcomer admitted
        assert_eq!(service.session_count().await, 10);
        assert!(service.get("c0").await.is_none());
        assert!(service.get("c10").await.is_some());
    }

    #[tokio::test]
    async fn test_update_activity_merges_context() {
        let service = service(30, 100);
        service.create_session("kiosk-1", HashMap::new()).await;

        let mut activity = HashMap::new();
        activity.insert("last_screen".to_string(), json!("settings"));
        service.update_activity("kiosk-1", Some(activity)).await;

        let session = service.get("kiosk-1").await.unwrap();
        assert_eq!(session.context.get("last_screen").unwrap(), &json!("settings"));
    }
}
