//! Tool Server Health Monitoring
//!
//! Fixed-interval liveness probing of started tool servers plus a TTL registry
//! for orchestrator-owned temp files. A probe first tries the cheap `ping`
//! RPC and falls back to `list_tools` for servers that do not implement ping.
//! Three consecutive probe failures mark the server failed in the supervisor.

use crate::adapters::tool_rpc::ToolRpcClient;
use crate::adapters::tool_supervisor::ToolServerSupervisor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consecutive probe failures before the supervisor is told the server failed
const PROBE_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct ServerHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

pub struct HealthMonitor {
    client: Arc<ToolRpcClient>,
    supervisor: Arc<ToolServerSupervisor>,
    health: RwLock<HashMap<String, ServerHealth>>,
    probe_interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<ToolRpcClient>,
        supervisor: Arc<ToolServerSupervisor>,
        probe_interval: Duration,
    ) -> Self {
        Self {
            client,
            supervisor,
            health: RwLock::new(HashMap::new()),
            probe_interval,
        }
    }

    /// Probe every server with a live handle once
    pub async fn probe_all(&self) {
        let names: Vec<String> = {
            let handles = self.supervisor.handles();
            let handles = handles.read().await;
            handles.keys().cloned().collect()
        };

        for name in names {
            let healthy = self.probe_one(&name).await;
            self.record(&name, healthy).await;
        }
    }

    async fn probe_one(&self, name: &str) -> bool {
        if self.client.ping(name).await.is_ok() {
            return true;
        }
        // Some servers answer discovery but not ping
        self.client.list_tools(name).await.is_ok()
    }

    async fn record(&self, name: &str, healthy: bool) {
        let failures = {
            let mut health = self.health.write().await;
            let entry = health.entry(name.to_string()).or_insert(ServerHealth {
                healthy: true,
                consecutive_failures: 0,
                last_check: Utc::now(),
            });
            entry.last_check = Utc::now();
            entry.healthy = healthy;
            if healthy {
                entry.consecutive_failures = 0;
            } else {
                entry.consecutive_failures += 1;
            }
            entry.consecutive_failures
        };

        if healthy {
            debug!(server = %name, "Health probe ok");
        } else {
            warn!(server = %name, failures, "Health probe failed");
            if failures >= PROBE_FAILURE_LIMIT {
                self.supervisor
                    .mark_failed(name, "failed consecutive health probes")
                    .await;
            }
        }
    }

    /// Snapshot of the per-server health map
    pub async fn health(&self) -> HashMap<String, ServerHealth> {
        self.health.read().await.clone()
    }

    pub async fn all_healthy(&self) -> bool {
        self.health.read().await.values().all(|h| h.healthy)
    }

    /// Background probe loop on the configured interval
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.probe_all().await;
            }
        })
    }
}

/// TTL registry of orchestrator-owned temporary files
pub struct ResourceManager {
    ttl: Duration,
    files: Mutex<HashMap<PathBuf, Instant>>,
}

impl ResourceManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Track a file for deletion once its TTL elapses
    pub async fn register(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "Temp resource registered");
        self.files.lock().await.insert(path, Instant::now());
    }

    pub async fn unregister(&self, path: impl AsRef<Path>) {
        self.files.lock().await.remove(path.as_ref());
    }

    pub async fn tracked_count(&self) -> usize {
        self.files.lock().await.len()
    }

    /// Delete expired files from disk and drop them from the registry.
    /// Returns how many entries were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut files = self.files.lock().await;
        let expired: Vec<PathBuf> = files
            .iter()
            .filter(|(_, registered)| registered.elapsed() > self.ttl)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &expired {
            if let Err(e) = tokio::fs::remove_file(path).await {
                // Already gone is fine; anything else is worth a log line
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "Failed to delete temp resource: {}", e);
                }
            }
            files.remove(path);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired temp resources cleaned up");
        }
        expired.len()
    }

    /// Background cleanup loop, independent of request volume
    pub fn spawn(self: Arc<Self>, sweep_interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.cleanup_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tool_rpc::ToolServerHandle;
    use crate::adapters::tool_supervisor::ServerStatus;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Attach a handle whose fake server answers ping iff `answers_ping`,
    /// and list_tools always
    async fn attach_fake(
        supervisor: &ToolServerSupervisor,
        name: &str,
        answers_ping: bool,
        answers_anything: bool,
    ) {
        let (client_io, server_io) = duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server_io);
        let (client_read, client_write) = tokio::io::split(client_io);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !answers_anything {
                    continue;
                }
                let request: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let id = request["id"].as_u64().unwrap_or(0);
                let reply = match request["method"].as_str() {
                    Some("ping") if answers_ping => {
                        json!({"jsonrpc": "2.0", "id": id, "result": {}})
                    }
                    Some("ping") => {
                        json!({"jsonrpc": "2.0", "id": id,
                               "error": {"code": -32601, "message": "method not found"}})
                    }
                    Some("list_tools") => {
                        json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}})
                    }
                    _ => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
                };
                let mut text = reply.to_string();
                text.push('\n');
                if server_write.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let handle =
            ToolServerHandle::attach(name, client_write, client_read, Duration::from_secs(1));
        supervisor.handles().write().await.insert(name.to_string(), handle);
    }

    fn monitor(supervisor: Arc<ToolServerSupervisor>) -> HealthMonitor {
        let client = Arc::new(ToolRpcClient::new(supervisor.handles()));
        HealthMonitor::new(client, supervisor, Duration::from_secs(15))
    }

    #[tokio::test]
    async fn test_ping_probe_marks_healthy() {
        let supervisor = Arc::new(ToolServerSupervisor::new());
        attach_fake(&supervisor, "llm_agent", true, true).await;

        let monitor = monitor(supervisor);
        monitor.probe_all().await;

        let health = monitor.health().await;
        assert!(health["llm_agent"].healthy);
        assert_eq!(health["llm_agent"].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_list_tools_fallback_when_ping_unsupported() {
        let supervisor = Arc::new(ToolServerSupervisor::new());
        attach_fake(&supervisor, "screen_detect", false, true).await;

        let monitor = monitor(supervisor);
        monitor.probe_all().await;

        assert!(monitor.health().await["screen_detect"].healthy);
    }

    // Paused clock: probe timeouts elapse instantly instead of waiting out
    // the real ping deadline
    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_mark_server_failed() {
        let supervisor = Arc::new(ToolServerSupervisor::new());
        // Server never answers, so every probe times out
        attach_fake(&supervisor, "mute", false, false).await;

        let monitor = monitor(supervisor.clone());
        for _ in 0..PROBE_FAILURE_LIMIT {
            monitor.probe_all().await;
        }

        let health = monitor.health().await;
        assert!(!health["mute"].healthy);
        assert_eq!(health["mute"].consecutive_failures, PROBE_FAILURE_LIMIT);
        assert!(matches!(
            supervisor.status().await.get("mute"),
            Some(ServerStatus::Failed { .. })
        ));
        assert!(!monitor.all_healthy().await);
    }

    #[tokio::test]
    async fn test_resource_cleanup_deletes_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        tokio::fs::write(&path, b"fake").await.unwrap();

        let manager = ResourceManager::new(Duration::from_millis(0));
        manager.register(&path).await;
        assert_eq!(manager.tracked_count().await, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let removed = manager.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert!(!path.exists());
        assert_eq!(manager.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_resource_cleanup_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        tokio::fs::write(&path, b"fake").await.unwrap();

        let manager = ResourceManager::new(Duration::from_secs(600));
        manager.register(&path).await;

        assert_eq!(manager.cleanup_expired().await, 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_already_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.png");
        tokio::fs::write(&path, b"fake").await.unwrap();

        let manager = ResourceManager::new(Duration::from_millis(0));
        manager.register(&path).await;
        tokio::fs::remove_file(&path).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.cleanup_expired().await, 1);
    }
}
