//! Tool Server RPC Client
//!
//! Line-delimited JSON-RPC 2.0 over a tool server's stdin/stdout. Each started
//! server gets a `ToolServerHandle` that owns the write half and a background
//! reader task correlating responses to in-flight requests by id. A per-call
//! timeout cancels only that call; the server process is untouched.

use crate::domain::error::{OrchestratorError, OrchestratorResult};
use crate::domain::tool::{ResourceDescriptor, ToolCallResult, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[allow(dead_code)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ListResourcesResult {
    resources: Vec<ResourceDescriptor>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<OrchestratorResult<Value>>>>>;

/// Connection to one running tool server
pub struct ToolServerHandle {
    name: String,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    request_id: AtomicU64,
    call_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl ToolServerHandle {
    /// Wire up a handle over any line-oriented byte channel. In production the
    /// halves come from the child process's stdin/stdout.
    pub fn attach<W, R>(name: &str, writer: W, reader: R, call_timeout: Duration) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = pending.clone();
        let server_name = name.to_string();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(response) => {
                                let sender = {
                                    let mut pending = reader_pending.lock().await;
                                    pending.remove(&response.id)
                                };
                                let Some(sender) = sender else {
                                    // Timed-out or unknown id; result is dropped
                                    debug!(
                                        server = %server_name,
                                        id = response.id,
                                        "Dropping response with no waiter"
                                    );
                                    continue;
                                };
                                let outcome = if let Some(err) = response.error {
                                    Err(OrchestratorError::ToolCall(format!(
                                        "[{}] {}",
                                        err.code, err.message
                                    )))
                                } else {
                                    Ok(response.result.unwrap_or(Value::Null))
                                };
                                let _ = sender.send(outcome);
                            }
                            Err(e) => {
                                warn!(server = %server_name, "Unparseable line from tool server: {}", e);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(server = %server_name, "Read error from tool server: {}", e);
                        break;
                    }
                }
            }

            // Channel closed: fail everything still in flight
            let mut pending = reader_pending.lock().await;
            for (_, sender) in pending.drain() {
                let _ = sender.send(Err(OrchestratorError::Connection(format!(
                    "tool server '{}' closed its output",
                    server_name
                ))));
            }
        });

        Arc::new(Self {
            name: name.to_string(),
            writer: Mutex::new(Box::new(writer)),
            pending,
            request_id: AtomicU64::new(0),
            call_timeout,
            reader_task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send one request and await its correlated response. A timeout removes
    /// the pending entry so a late response is dropped, not misdelivered.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> OrchestratorResult<Value> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                return Err(OrchestratorError::Connection(format!(
                    "write to tool server '{}' failed: {}",
                    self.name, e
                )));
            }
            if let Err(e) = writer.flush().await {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                return Err(OrchestratorError::Connection(format!(
                    "flush to tool server '{}' failed: {}",
                    self.name, e
                )));
            }
        }

        let timeout = timeout.unwrap_or(self.call_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OrchestratorError::Connection(format!(
                "tool server '{}' dropped the response channel",
                self.name
            ))),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(OrchestratorError::Timeout(timeout.as_secs()))
            }
        }
    }
}

impl Drop for ToolServerHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Registry of started tool servers, shared between the supervisor (which
/// inserts and removes handles) and the RPC client (which calls through them)
pub type HandleRegistry = Arc<RwLock<HashMap<String, Arc<ToolServerHandle>>>>;

/// Client for calling named tools on started tool servers
#[derive(Clone)]
pub struct ToolRpcClient {
    handles: HandleRegistry,
}

impl ToolRpcClient {
    pub fn new(handles: HandleRegistry) -> Self {
        Self { handles }
    }

    async fn handle(&self, server: &str) -> OrchestratorResult<Arc<ToolServerHandle>> {
        let handles = self.handles.read().await;
        handles
            .get(server)
            .cloned()
            .ok_or_else(|| OrchestratorError::ServerNotFound(server.to_string()))
    }

    /// Call a named tool. Non-JSON text output is wrapped as `{"raw_text": ...}`
    /// rather than failing.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> OrchestratorResult<ToolCallResult> {
        let handle = self.handle(server).await?;
        let params = json!({
            "name": tool,
            "arguments": params,
        });
        let result = handle
            .send_request("call_tool", Some(params), timeout)
            .await?;
        Ok(Self::parse_call_result(result))
    }

    /// List the tools a server exposes
    pub async fn list_tools(&self, server: &str) -> OrchestratorResult<Vec<ToolDescriptor>> {
        let handle = self.handle(server).await?;
        let result = handle.send_request("list_tools", None, None).await?;
        let list: ListToolsResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    /// List the resources a server exposes
    pub async fn list_resources(
        &self,
        server: &str,
    ) -> OrchestratorResult<Vec<ResourceDescriptor>> {
        let handle = self.handle(server).await?;
        let result = handle.send_request("list_resources", None, None).await?;
        let list: ListResourcesResult = serde_json::from_value(result)?;
        Ok(list.resources)
    }

    /// Cheap liveness probe; servers without a ping method still answer
    /// `list_tools`, which the health monitor uses as its fallback probe
    pub async fn ping(&self, server: &str) -> OrchestratorResult<()> {
        let handle = self.handle(server).await?;
        handle
            .send_request("ping", None, Some(Duration::from_secs(5)))
            .await
            .map(|_| ())
    }

    fn parse_call_result(result: Value) -> ToolCallResult {
        match result {
            Value::Object(ref map) if map.contains_key("success") => {
                let success = map
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let data = map.get("data").cloned();
                let error = map
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                ToolCallResult {
                    success,
                    data,
                    error,
                    from_fallback: false,
                }
            }
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => ToolCallResult::ok(parsed),
                Err(_) => ToolCallResult::ok(json!({ "raw_text": text })),
            },
            other => ToolCallResult::ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Minimal scripted tool server speaking line JSON-RPC over a duplex pipe
    fn spawn_fake_server(
        mut requests: tokio::io::ReadHalf<tokio::io::DuplexStream>,
        mut responses: tokio::io::WriteHalf<tokio::io::DuplexStream>,
        reply: impl Fn(&str, u64) -> Option<String> + Send + 'static,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(&mut requests).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["id"].as_u64().unwrap();
                let method = req["method"].as_str().unwrap();
                if let Some(mut out) = reply(method, id) {
                    out.push('\n');
                    if responses.write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    async fn setup(
        reply: impl Fn(&str, u64) -> Option<String> + Send + 'static,
    ) -> (ToolRpcClient, JoinHandle<()>) {
        let (ours, theirs) = duplex(4096);
        let (read_ours, write_ours) = tokio::io::split(ours);
        let (read_theirs, write_theirs) = tokio::io::split(theirs);

        let server = spawn_fake_server(read_theirs, write_theirs, reply);
        let handle = ToolServerHandle::attach("fake", write_ours, read_ours, Duration::from_secs(2));

        let handles: HandleRegistry = Arc::new(RwLock::new(HashMap::new()));
        handles.write().await.insert("fake".to_string(), handle);
        (ToolRpcClient::new(handles), server)
    }

    #[tokio::test]
    async fn test_call_tool_success() {
        let (client, _server) = setup(|method, id| {
            assert_eq!(method, "call_tool");
            Some(
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"success": true, "data": {"clicked": true}}
                })
                .to_string(),
            )
        })
        .await;

        let result = client
            .call_tool("fake", "click", json!({"x": 1}), None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["clicked"], json!(true));
    }

    #[tokio::test]
    async fn test_raw_text_wrapping() {
        let (client, _server) = setup(|_, id| {
            Some(
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": "plain text, not json"
                })
                .to_string(),
            )
        })
        .await;

        let result = client.call_tool("fake", "read", json!({}), None).await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.data.unwrap()["raw_text"],
            json!("plain text, not json")
        );
    }

    #[tokio::test]
    async fn test_rpc_error_is_tool_call_error() {
        let (client, _server) = setup(|_, id| {
            Some(
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "method not found", "data": null}
                })
                .to_string(),
            )
        })
        .await;

        let err = client
            .call_tool("fake", "missing", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ToolCall(_)));
    }

    #[tokio::test]
    async fn test_timeout_cancels_only_that_call() {
        // Server that never answers the first call but answers later ones
        let answered = std::sync::atomic::AtomicU64::new(0);
        let (client, _server) = setup(move |_, id| {
            let n = answered.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                None
            } else {
                Some(
                    json!({"jsonrpc": "2.0", "id": id, "result": {"success": true, "data": 1}})
                        .to_string(),
                )
            }
        })
        .await;

        let err = client
            .call_tool("fake", "slow", json!({}), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));

        // The channel and server are still usable afterwards
        let ok = client.call_tool("fake", "fast", json!({}), None).await.unwrap();
        assert!(ok.success);
    }

    #[tokio::test]
    async fn test_list_tools() {
        let (client, _server) = setup(|method, id| {
            assert_eq!(method, "list_tools");
            Some(
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"tools": [
                        {"name": "transcribe", "description": "Speech to text", "input_schema": {"type": "object"}}
                    ]}
                })
                .to_string(),
            )
        })
        .await;

        let tools = client.list_tools("fake").await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "transcribe");
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let handles: HandleRegistry = Arc::new(RwLock::new(HashMap::new()));
        let client = ToolRpcClient::new(handles);
        let err = client.call_tool("ghost", "x", json!({}), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ServerNotFound(_)));
    }
}
