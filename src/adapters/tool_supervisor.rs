//! Tool Server Supervisor
//!
//! Launches the configured tool servers as subprocesses with piped stdio and
//! owns their lifecycle. A spawn failure for one server never prevents the
//! others from starting; failures are recorded in the status map and surfaced
//! through health status.

use crate::adapters::tool_rpc::{HandleRegistry, ToolServerHandle};
use crate::config::ToolServerConfig;
use crate::domain::error::{OrchestratorError, OrchestratorResult};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Lifecycle state of one configured tool server
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServerStatus {
    Running,
    Stopped,
    Disabled,
    Failed { error: String },
}

pub struct ToolServerSupervisor {
    handles: HandleRegistry,
    children: RwLock<HashMap<String, Child>>,
    status: RwLock<HashMap<String, ServerStatus>>,
}

impl ToolServerSupervisor {
    pub fn new() -> Self {
        Self {
            handles: Arc::new(RwLock::new(HashMap::new())),
            children: RwLock::new(HashMap::new()),
            status: RwLock::new(HashMap::new()),
        }
    }

    /// Registry shared with `ToolRpcClient`
    pub fn handles(&self) -> HandleRegistry {
        self.handles.clone()
    }

    /// Start every enabled server. Failures are recorded, never propagated.
    pub async fn start_all(&self, configs: &[ToolServerConfig]) {
        for config in configs {
            if !config.enabled {
                info!("Tool server '{}' is disabled, skipping", config.name);
                let mut status = self.status.write().await;
                status.insert(config.name.clone(), ServerStatus::Disabled);
                continue;
            }

            match self.start(config).await {
                Ok(_) => {
                    info!("Started tool server '{}'", config.name);
                }
                Err(e) => {
                    error!("Failed to start tool server '{}': {}", config.name, e);
                    let mut status = self.status.write().await;
                    status.insert(
                        config.name.clone(),
                        ServerStatus::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    /// Spawn one tool server and wire its RPC channel
    pub async fn start(&self, config: &ToolServerConfig) -> OrchestratorResult<Arc<ToolServerHandle>> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| OrchestratorError::SpawnFailed {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrchestratorError::SpawnFailed {
                name: config.name.clone(),
                reason: "stdin not piped".to_string(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::SpawnFailed {
                name: config.name.clone(),
                reason: "stdout not piped".to_string(),
            })?;

        let handle = ToolServerHandle::attach(
            &config.name,
            stdin,
            stdout,
            Duration::from_secs(config.call_timeout_seconds),
        );

        {
            let mut handles = self.handles.write().await;
            handles.insert(config.name.clone(), handle.clone());
        }
        {
            let mut children = self.children.write().await;
            children.insert(config.name.clone(), child);
        }
        {
            let mut status = self.status.write().await;
            status.insert(config.name.clone(), ServerStatus::Running);
        }

        Ok(handle)
    }

    /// Stop one server: drop its RPC handle, then kill the child and reap it
    pub async fn stop(&self, name: &str) {
        {
            let mut handles = self.handles.write().await;
            handles.remove(name);
        }

        let child = {
            let mut children = self.children.write().await;
            children.remove(name)
        };

        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill tool server '{}': {}", name, e);
            }
            info!("Stopped tool server '{}'", name);
        }

        let mut status = self.status.write().await;
        status.insert(name.to_string(), ServerStatus::Stopped);
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let children = self.children.read().await;
            children.keys().cloned().collect()
        };
        for name in names {
            self.stop(&name).await;
        }
    }

    /// Whether a server has a live RPC handle
    pub async fn is_running(&self, name: &str) -> bool {
        let handles = self.handles.read().await;
        handles.contains_key(name)
    }

    /// Snapshot of every configured server's lifecycle state
    pub async fn status(&self) -> HashMap<String, ServerStatus> {
        let status = self.status.read().await;
        status.clone()
    }

    /// Mark a server unhealthy without tearing it down (used by the health
    /// monitor when probes fail repeatedly)
    pub async fn mark_failed(&self, name: &str, reason: &str) {
        let mut status = self.status.write().await;
        status.insert(
            name.to_string(),
            ServerStatus::Failed {
                error: reason.to_string(),
            },
        );
    }
}

impl Default for ToolServerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
