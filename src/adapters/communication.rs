//! Communication Service
//!
//! Ties ConnectionManager, MessageRouter, and SessionService into one
//! WebSocket connection lifecycle: upgrade, greet, sequential receive loop,
//! teardown. Per-client ordering comes from the loop itself: a client's next
//! frame is not read until the previous one has been routed and answered.

use crate::adapters::connection_manager::{transport_error, ClientTransport, ConnectionManager};
use crate::adapters::message_router::MessageRouter;
use crate::adapters::session_service::SessionService;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub struct CommunicationService {
    connections: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    sessions: Arc<SessionService>,
}

impl CommunicationService {
    pub fn new(
        connections: Arc<ConnectionManager>,
        router: Arc<MessageRouter>,
        sessions: Arc<SessionService>,
    ) -> Self {
        Self {
            connections,
            router,
            sessions,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    /// Register the connection and its session. Returns false when the
    /// greeting could not be delivered; the caller drops the socket.
    pub async fn handle_connect(
        &self,
        client_id: &str,
        transport: Arc<dyn ClientTransport>,
    ) -> bool {
        if !self.connections.accept(client_id, transport).await {
            return false;
        }
        self.sessions
            .create_session(client_id, HashMap::new())
            .await;
        true
    }

    /// Route one inbound frame and send back whatever the router produced
    pub async fn handle_incoming(&self, client_id: &str, raw: &str) {
        self.connections.touch(client_id).await;
        self.sessions.update_activity(client_id, None).await;

        if let Some(reply) = self.router.route(client_id, raw).await {
            self.connections.send(client_id, &reply).await;
        }
    }

    /// Teardown for close or error. In-flight tool calls issued on this
    /// client's behalf complete on their own tasks; their results are simply
    /// dropped.
    pub async fn handle_disconnect(&self, client_id: &str) {
        self.connections.disconnect(client_id).await;
        self.sessions.remove_session(client_id).await;
    }
}

/// axum WebSocket sink behind the transport trait
struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl ClientTransport for WsTransport {
    async fn send_text(&self, text: String) -> crate::domain::error::OrchestratorResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(transport_error)
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub client_id: Option<String>,
}

/// GET /ws upgrade endpoint. Clients may carry their own id in the query
/// string; anonymous clients get a generated one.
pub async fn ws_upgrade(
    State(service): State<Arc<CommunicationService>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let client_id = query
        .client_id
        .unwrap_or_else(|| format!("client-{}", Uuid::new_v4()));
    ws.on_upgrade(move |socket| client_loop(service, socket, client_id))
}

/// One task per client: sequential receive loop, so a client's messages are
/// processed strictly in receipt order
async fn client_loop(service: Arc<CommunicationService>, socket: WebSocket, client_id: String) {
    let (sink, mut stream) = socket.split();
    let transport = Arc::new(WsTransport {
        sink: Mutex::new(sink),
    });

    if !service.handle_connect(&client_id, transport).await {
        return;
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                service.handle_incoming(&client_id, &text).await;
            }
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client sent close frame");
                break;
            }
            // axum answers protocol pings itself
            Ok(_) => {}
            Err(e) => {
                debug!(client_id = %client_id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    service.handle_disconnect(&client_id).await;
}
