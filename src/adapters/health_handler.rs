use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::connection_manager::ConnectionManager;
use crate::adapters::health_monitor::{HealthMonitor, ServerHealth};
use crate::adapters::tool_supervisor::{ServerStatus, ToolServerSupervisor};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: usize,
    pub tool_servers: HashMap<String, ServerStatus>,
    pub probes: HashMap<String, ServerHealth>,
}

pub struct HealthHandler {
    supervisor: Arc<ToolServerSupervisor>,
    monitor: Arc<HealthMonitor>,
    connections: Arc<ConnectionManager>,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(
        supervisor: Arc<ToolServerSupervisor>,
        monitor: Arc<HealthMonitor>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            supervisor,
            monitor,
            connections,
            start_time: std::time::Instant::now(),
        }
    }

    /// Basic health check - returns 200 with the full status report
    pub async fn health(&self) -> impl IntoResponse {
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            connections: self.connections.connection_count().await,
            tool_servers: self.supervisor.status().await,
            probes: self.monitor.health().await,
        };

        (StatusCode::OK, Json(status))
    }

    /// Readiness check - not ready while any tool server is marked failed or
    /// a liveness probe is failing
    pub async fn ready(&self) -> impl IntoResponse {
        let any_failed = self
            .supervisor
            .status()
            .await
            .values()
            .any(|s| matches!(s, ServerStatus::Failed { .. }));

        if !any_failed && self.monitor.all_healthy().await {
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ready",
                    "message": "Orchestrator is ready to accept clients"
                })),
            )
        } else {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "message": "One or more tool servers are unavailable"
                })),
            )
        }
    }

    /// Liveness check - returns 200 if the process is responsive
    pub async fn live(&self) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "alive",
                "message": "Orchestrator is alive"
            })),
        )
    }
}
