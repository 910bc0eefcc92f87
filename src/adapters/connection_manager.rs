//! Client Connection Manager
//!
//! Tracks every active client connection behind a transport trait so the
//! WebSocket sink can be swapped for a recording transport in tests. A failed
//! send always disconnects the offending client instead of leaving a half-dead
//! entry; broadcast is best-effort and never aborts on one bad client.

use crate::domain::error::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Write half of a client connection
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn send_text(&self, text: String) -> OrchestratorResult<()>;
}

/// Lightweight per-connection activity record
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub client_id: String,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub message_count: u64,
}

impl ClientSession {
    fn new(client_id: &str) -> Self {
        let now = Instant::now();
        Self {
            client_id: client_id.to_string(),
            connected_at: now,
            last_activity: now,
            message_count: 0,
        }
    }

    fn touch(&mut self) {
        // Instant is monotonic, so last_activity can never move backwards
        self.last_activity = Instant::now();
        self.message_count += 1;
    }
}

struct ClientConnection {
    transport: Arc<dyn ClientTransport>,
    is_active: bool,
    session: ClientSession,
}

pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<String, ClientConnection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection and greet it with the initial `connection`
    /// envelope. Returns false if the greeting could not be delivered.
    pub async fn accept(&self, client_id: &str, transport: Arc<dyn ClientTransport>) -> bool {
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                client_id.to_string(),
                ClientConnection {
                    transport: transport.clone(),
                    is_active: true,
                    session: ClientSession::new(client_id),
                },
            );
        }

        let greeting = json!({
            "type": "connection",
            "status": "connected",
            "client_id": client_id,
            "message": "connection established",
        });

        if self.send(client_id, &greeting).await {
            info!(client_id = %client_id, "Client connected");
            true
        } else {
            warn!(client_id = %client_id, "Client rejected: greeting failed");
            false
        }
    }

    /// Send one message to one client. A transport error disconnects the
    /// client and returns false.
    pub async fn send(&self, client_id: &str, message: &Value) -> bool {
        let transport = {
            let connections = self.connections.read().await;
            match connections.get(client_id) {
                Some(conn) if conn.is_active => conn.transport.clone(),
                _ => return false,
            }
        };

        let text = message.to_string();
        match transport.send_text(text).await {
            Ok(()) => {
                let mut connections = self.connections.write().await;
                if let Some(conn) = connections.get_mut(client_id) {
                    conn.session.touch();
                }
                true
            }
            Err(e) => {
                debug!(client_id = %client_id, "Send failed, disconnecting: {}", e);
                self.disconnect(client_id).await;
                false
            }
        }
    }

    /// Best-effort broadcast. Failed clients are disconnected; the broadcast
    /// itself never aborts. Returns the number of successful deliveries.
    pub async fn broadcast(&self, message: &Value, exclude: &[&str]) -> usize {
        let targets: Vec<(String, Arc<dyn ClientTransport>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(id, conn)| conn.is_active && !exclude.contains(&id.as_str()))
                .map(|(id, conn)| (id.clone(), conn.transport.clone()))
                .collect()
        };

        let text = message.to_string();
        let mut delivered = 0;
        let mut failed: Vec<String> = Vec::new();

        for (client_id, transport) in targets {
            match transport.send_text(text.clone()).await {
                Ok(()) => {
                    delivered += 1;
                    let mut connections = self.connections.write().await;
                    if let Some(conn) = connections.get_mut(&client_id) {
                        conn.session.touch();
                    }
                }
                Err(e) => {
                    debug!(client_id = %client_id, "Broadcast delivery failed: {}", e);
                    failed.push(client_id);
                }
            }
        }

        for client_id in failed {
            self.disconnect(&client_id).await;
        }

        delivered
    }

    /// Record inbound activity for the idle sweep
    pub async fn touch(&self, client_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.get_mut(client_id) {
            conn.session.touch();
        }
    }

    pub async fn disconnect(&self, client_id: &str) {
        let removed = {
            let mut connections = self.connections.write().await;
            if let Some(conn) = connections.get_mut(client_id) {
                conn.is_active = false;
            }
            connections.remove(client_id)
        };
        if removed.is_some() {
            info!(client_id = %client_id, "Client disconnected");
        }
    }

    /// Drop connections idle longer than the threshold. Returns how many were
    /// removed.
    pub async fn cleanup_idle(&self, threshold: Duration) -> usize {
        let idle: Vec<String> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, conn)| conn.session.last_activity.elapsed() > threshold)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for client_id in &idle {
            warn!(client_id = %client_id, "Dropping idle connection");
            self.disconnect(client_id).await;
        }

        idle.len()
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections
            .get(client_id)
            .map(|c| c.is_active)
            .unwrap_or(false)
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Snapshot of a client's activity record
    pub async fn session(&self, client_id: &str) -> Option<ClientSession> {
        let connections = self.connections.read().await;
        connections.get(client_id).map(|c| c.session.clone())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport errors are modeled as `Connection` failures
pub fn transport_error(detail: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Connection(detail.to_string())
}
