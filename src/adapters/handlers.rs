//! Built-in Message Handlers
//!
//! One handler per inbound message type, each composing the tool client,
//! caches, optimizer, and session store. Handlers return the reply value; the
//! communication layer owns actually sending it.

use crate::adapters::cache_service::{CacheService, ScreenContext};
use crate::adapters::message_router::MessageHandler;
use crate::adapters::optimization::OptimizationService;
use crate::adapters::resilience::ResilientToolClient;
use crate::adapters::session_service::SessionService;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::domain::message::{ClientMessage, MessageEnvelope};

/// Tool server names the handlers call out to
pub const LLM_AGENT_SERVER: &str = "llm_agent";
pub const SPEECH_TO_TEXT_SERVER: &str = "speech_to_text";
pub const SCREEN_DETECT_SERVER: &str = "screen_detect";

/// Wire every built-in handler into the router
pub async fn register_default_handlers(
    router: &crate::adapters::message_router::MessageRouter,
    tools: Arc<ResilientToolClient>,
    cache: Arc<CacheService>,
    optimizer: Arc<OptimizationService>,
    sessions: Arc<SessionService>,
) {
    router
        .register_handler(
            "chat_message",
            Arc::new(ChatMessageHandler::new(
                tools.clone(),
                cache.clone(),
                optimizer.clone(),
                sessions.clone(),
            )),
        )
        .await;
    router
        .register_handler(
            "audio_data",
            Arc::new(AudioDataHandler::new(tools.clone(), sessions.clone())),
        )
        .await;
    router
        .register_handler(
            "text_reading",
            Arc::new(TextReadingHandler::new(tools, sessions.clone())),
        )
        .await;
    router
        .register_handler("ping", Arc::new(PingHandler::new(sessions.clone())))
        .await;
    router
        .register_handler("status", Arc::new(StatusHandler::new(sessions)))
        .await;
    router
        .register_handler(
            "performance",
            Arc::new(PerformanceHandler::new(optimizer, cache)),
        )
        .await;
}

/// Pull screen identity out of an optional client-supplied context object
fn screen_context_of(context: Option<&Value>) -> ScreenContext {
    let screen_name = context
        .and_then(|c| c.get("screen_name").or_else(|| c.get("screen")))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let element_ids = context
        .and_then(|c| c.get("elements"))
        .and_then(|v| v.as_array())
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| {
                    e.as_str()
                        .map(|s| s.to_string())
                        .or_else(|| e.get("id").and_then(|id| id.as_str()).map(|s| s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    ScreenContext {
        screen_name,
        element_ids,
    }
}

fn response_text(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v
            .get("response")
            .or_else(|| v.get("raw_text"))
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| v.to_string()),
        None => String::new(),
    }
}

/// `chat_message`: complexity analysis, model selection, response cache, and
/// finally the llm_agent tool on a miss
pub struct ChatMessageHandler {
    tools: Arc<ResilientToolClient>,
    cache: Arc<CacheService>,
    optimizer: Arc<OptimizationService>,
    sessions: Arc<SessionService>,
}

impl ChatMessageHandler {
    pub fn new(
        tools: Arc<ResilientToolClient>,
        cache: Arc<CacheService>,
        optimizer: Arc<OptimizationService>,
        sessions: Arc<SessionService>,
    ) -> Self {
        Self {
            tools,
            cache,
            optimizer,
            sessions,
        }
    }
}

#[async_trait]
impl MessageHandler for ChatMessageHandler {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        message: ClientMessage,
    ) -> anyhow::Result<Option<Value>> {
        let ClientMessage::ChatMessage(payload) = message else {
            anyhow::bail!("chat handler received non-chat message");
        };
        let started = Instant::now();

        let analysis = self.optimizer.analyze_complexity(&payload.message).await;
        let state = self.optimizer.state().await;
        let screen = screen_context_of(payload.context.as_ref());

        if state.cache_enabled {
            if let Some(hit) = self.cache.get_response(&payload.message, &screen).await {
                self.optimizer.record_cache_hit().await;
                self.optimizer
                    .record_response_time(started.elapsed().as_secs_f64() * 1000.0)
                    .await;
                self.sessions
                    .record_processing(
                        &envelope.client_id,
                        "chat",
                        json!({"cached": true, "similarity": hit.similarity}),
                    )
                    .await;
                debug!(client_id = %envelope.client_id, "Chat served from response cache");
                return Ok(Some(json!({
                    "type": "chat_response",
                    "response": response_text(Some(&hit.response)),
                    "original_message": payload.message,
                    "cached": true,
                    "timestamp": Utc::now().to_rfc3339(),
                })));
            }
            self.optimizer.record_cache_miss().await;
        }

        let model = analysis
            .recommended_model
            .clone()
            .or_else(|| state.current_model.clone());

        let result = self
            .tools
            .call_tool(
                LLM_AGENT_SERVER,
                "chat",
                json!({
                    "message": &payload.message,
                    "model": &model,
                    "context": &payload.context,
                    "processing_mode": payload.processing_mode,
                }),
            )
            .await?;

        let text = response_text(result.data.as_ref());
        if state.cache_enabled && !result.from_fallback {
            self.cache
                .cache_response(&payload.message, &screen, json!(text))
                .await;
        }

        self.optimizer
            .record_response_time(started.elapsed().as_secs_f64() * 1000.0)
            .await;
        self.sessions
            .record_processing(
                &envelope.client_id,
                "chat",
                json!({
                    "cached": false,
                    "complexity": analysis.complexity_score,
                    "model": &model,
                    "fallback": result.from_fallback,
                }),
            )
            .await;

        Ok(Some(json!({
            "type": "chat_response",
            "response": text,
            "original_message": payload.message,
            "cached": false,
            "model": model,
            "complexity": analysis.complexity_score,
            "fallback": result.from_fallback,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}

/// `audio_data`: base64 sanity check, then the speech_to_text tool
pub struct AudioDataHandler {
    tools: Arc<ResilientToolClient>,
    sessions: Arc<SessionService>,
}

impl AudioDataHandler {
    pub fn new(tools: Arc<ResilientToolClient>, sessions: Arc<SessionService>) -> Self {
        Self { tools, sessions }
    }
}

#[async_trait]
impl MessageHandler for AudioDataHandler {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        message: ClientMessage,
    ) -> anyhow::Result<Option<Value>> {
        let ClientMessage::AudioData(payload) = message else {
            anyhow::bail!("audio handler received non-audio message");
        };

        // Reject garbage before spending a tool call on it
        if base64::engine::general_purpose::STANDARD
            .decode(&payload.audio)
            .is_err()
        {
            return Ok(Some(json!({
                "type": "error",
                "error": "audio payload is not valid base64",
                "error_code": "VALIDATION_ERROR",
                "severity": "warning",
            })));
        }

        let result = self
            .tools
            .call_tool(
                SPEECH_TO_TEXT_SERVER,
                "transcribe",
                json!({
                    "audio": payload.audio,
                    "processing_mode": payload.processing_mode,
                }),
            )
            .await?;

        let text = match result.data.as_ref() {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v
                .get("text")
                .or_else(|| v.get("raw_text"))
                .and_then(|t| t.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| v.to_string()),
            None => String::new(),
        };
        let confidence = result
            .data
            .as_ref()
            .and_then(|v| v.get("confidence"))
            .and_then(|c| c.as_f64());

        self.sessions
            .record_processing(
                &envelope.client_id,
                "transcription",
                json!({"fallback": result.from_fallback}),
            )
            .await;

        Ok(Some(json!({
            "type": "transcription",
            "text": text,
            "confidence": confidence,
            "fallback": result.from_fallback,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}

/// `text_reading`: forward to the screen_detect tool, keyed by request_id
pub struct TextReadingHandler {
    tools: Arc<ResilientToolClient>,
    sessions: Arc<SessionService>,
}

impl TextReadingHandler {
    pub fn new(tools: Arc<ResilientToolClient>, sessions: Arc<SessionService>) -> Self {
        Self { tools, sessions }
    }
}

#[async_trait]
impl MessageHandler for TextReadingHandler {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        message: ClientMessage,
    ) -> anyhow::Result<Option<Value>> {
        let ClientMessage::TextReading(payload) = message else {
            anyhow::bail!("text-reading handler received wrong message");
        };

        let result = self
            .tools
            .call_tool(
                SCREEN_DETECT_SERVER,
                "read_text",
                json!({
                    "request_id": payload.request_id,
                    "text": payload.text,
                    "coordinates": payload.coordinates,
                    "element_id": payload.element_id,
                }),
            )
            .await?;

        self.sessions
            .record_processing(&envelope.client_id, "text_reading", json!({}))
            .await;

        Ok(Some(json!({
            "type": "text_reading",
            "request_id": payload.request_id,
            "success": result.success,
            "data": result.data,
            "fallback": result.from_fallback,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}

/// `ping` → `pong`
pub struct PingHandler {
    sessions: Arc<SessionService>,
}

impl PingHandler {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        _message: ClientMessage,
    ) -> anyhow::Result<Option<Value>> {
        self.sessions.update_activity(&envelope.client_id, None).await;
        Ok(Some(json!({
            "type": "pong",
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}

/// `status`: acknowledge and merge any reported details into the session
pub struct StatusHandler {
    sessions: Arc<SessionService>,
}

impl StatusHandler {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl MessageHandler for StatusHandler {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        message: ClientMessage,
    ) -> anyhow::Result<Option<Value>> {
        let ClientMessage::Status(payload) = message else {
            anyhow::bail!("status handler received wrong message");
        };

        if let Some(Value::Object(details)) = payload.details {
            let activity = details.into_iter().collect();
            self.sessions
                .update_activity(&envelope.client_id, Some(activity))
                .await;
        } else {
            self.sessions.update_activity(&envelope.client_id, None).await;
        }
        info!(client_id = %envelope.client_id, status = %payload.status, "Client status update");

        Ok(Some(json!({
            "type": "status",
            "status": "acknowledged",
            "received": payload.status,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}

/// `performance`: reply with the aggregated optimizer + cache snapshot
pub struct PerformanceHandler {
    optimizer: Arc<OptimizationService>,
    cache: Arc<CacheService>,
}

impl PerformanceHandler {
    pub fn new(optimizer: Arc<OptimizationService>, cache: Arc<CacheService>) -> Self {
        Self { optimizer, cache }
    }
}

#[async_trait]
impl MessageHandler for PerformanceHandler {
    async fn handle(
        &self,
        _envelope: &MessageEnvelope,
        _message: ClientMessage,
    ) -> anyhow::Result<Option<Value>> {
        let report = self.optimizer.performance_report().await;
        let cache_stats = self.cache.stats();
        Ok(Some(json!({
            "type": "performance",
            "metrics": {
                "optimizer": report,
                "cache": cache_stats,
            },
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}
