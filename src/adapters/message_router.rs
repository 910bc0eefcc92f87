//! Message Router
//!
//! Turns raw inbound strings into typed envelopes, validates them against the
//! message schema, and dispatches to the registered handler. Every outcome
//! increments exactly one routing counter, and handler panics or errors become
//! terminal error responses so a single bad message can never take the router
//! down with it.

use crate::domain::message::{ClientMessage, MessageEnvelope, KNOWN_MESSAGE_TYPES};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Samples retained for percentile reporting
const PROCESSING_SAMPLE_LIMIT: usize = 1000;

/// Handles one message type. Returning `Ok(None)` means no reply is sent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        message: ClientMessage,
    ) -> anyhow::Result<Option<Value>>;
}

/// Routing counters plus a bounded ring of processing-time samples
#[derive(Debug, Default, Clone)]
pub struct RouterMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub validation_errors: u64,
    pub unknown_message_types: u64,
    processing_times_ms: VecDeque<f64>,
}

impl RouterMetrics {
    fn record_time(&mut self, ms: f64) {
        if self.processing_times_ms.len() >= PROCESSING_SAMPLE_LIMIT {
            self.processing_times_ms.pop_front();
        }
        self.processing_times_ms.push_back(ms);
    }

    pub fn sample_count(&self) -> usize {
        self.processing_times_ms.len()
    }

    pub fn average_processing_ms(&self) -> f64 {
        if self.processing_times_ms.is_empty() {
            return 0.0;
        }
        self.processing_times_ms.iter().sum::<f64>() / self.processing_times_ms.len() as f64
    }

    pub fn percentile_processing_ms(&self, percentile: f64) -> f64 {
        if self.processing_times_ms.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.processing_times_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = (percentile / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }
}

pub struct MessageRouter {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    metrics: Mutex<RouterMetrics>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            metrics: Mutex::new(RouterMetrics::default()),
        }
    }

    pub async fn register_handler(&self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(message_type.to_string(), handler);
    }

    pub async fn metrics(&self) -> RouterMetrics {
        self.metrics.lock().await.clone()
    }

    /// Route one raw inbound payload. Always resolves to either the handler's
    /// reply or a structured error response; never panics, never propagates.
    pub async fn route(&self, client_id: &str, raw: &str) -> Option<Value> {
        let started = Instant::now();
        let outcome = self.route_inner(client_id, raw).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut metrics = self.metrics.lock().await;
        metrics.total += 1;
        metrics.record_time(elapsed_ms);
        match &outcome {
            RouteOutcome::Success(_) => metrics.successful += 1,
            RouteOutcome::HandlerError(_) => metrics.failed += 1,
            RouteOutcome::ValidationError(_) => metrics.validation_errors += 1,
            RouteOutcome::UnknownType(_) => metrics.unknown_message_types += 1,
        }

        outcome.into_response()
    }

    async fn route_inner(&self, client_id: &str, raw: &str) -> RouteOutcome {
        // Stage 1: raw parse
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(client_id = %client_id, "Unparseable message: {}", e);
                return RouteOutcome::ValidationError(error_response(
                    "VALIDATION_ERROR",
                    &format!("invalid JSON: {}", e),
                ));
            }
        };

        let Some(object) = value.as_object() else {
            return RouteOutcome::ValidationError(error_response(
                "VALIDATION_ERROR",
                "message must be a JSON object",
            ));
        };

        let Some(message_type) = object.get("type").and_then(|t| t.as_str()) else {
            return RouteOutcome::ValidationError(error_response(
                "VALIDATION_ERROR",
                "missing 'type' discriminator",
            ));
        };
        let message_type = message_type.to_string();

        // Stage 2: discriminator check, so an unknown type is counted apart
        // from a known type with a bad payload
        if !KNOWN_MESSAGE_TYPES.contains(&message_type.as_str()) {
            warn!(client_id = %client_id, message_type = %message_type, "Unknown message type");
            return RouteOutcome::UnknownType(error_response(
                "UNKNOWN_TYPE",
                &format!("unknown message type '{}'", message_type),
            ));
        }

        // Stage 3: schema validation via the tagged union (fails closed)
        let message: ClientMessage = match serde_json::from_value(value.clone()) {
            Ok(m) => m,
            Err(e) => {
                debug!(client_id = %client_id, message_type = %message_type, "Schema validation failed: {}", e);
                return RouteOutcome::ValidationError(error_response(
                    "VALIDATION_ERROR",
                    &format!("invalid '{}' payload: {}", message_type, e),
                ));
            }
        };

        let payload: HashMap<String, Value> = object
            .iter()
            .filter(|(k, _)| k.as_str() != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let envelope = MessageEnvelope::new(client_id, &message_type, payload, raw);

        // Stage 4: handler resolution
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&message_type).cloned()
        };
        let Some(handler) = handler else {
            return RouteOutcome::UnknownType(error_response(
                "NO_HANDLER",
                &format!("no handler registered for '{}'", message_type),
            ));
        };

        // Stage 5: invocation; handler errors become terminal responses
        match handler.handle(&envelope, message).await {
            Ok(reply) => RouteOutcome::Success(reply),
            Err(e) => {
                warn!(client_id = %client_id, message_type = %message_type, "Handler failed: {}", e);
                RouteOutcome::HandlerError(error_response(
                    "HANDLER_ERROR",
                    &format!("handler for '{}' failed: {}", message_type, e),
                ))
            }
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

enum RouteOutcome {
    Success(Option<Value>),
    HandlerError(Value),
    ValidationError(Value),
    UnknownType(Value),
}

impl RouteOutcome {
    fn into_response(self) -> Option<Value> {
        match self {
            RouteOutcome::Success(reply) => reply,
            RouteOutcome::HandlerError(v)
            | RouteOutcome::ValidationError(v)
            | RouteOutcome::UnknownType(v) => Some(v),
        }
    }
}

fn error_response(code: &str, message: &str) -> Value {
    json!({
        "type": "error",
        "error": message,
        "error_code": code,
        "severity": "warning",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle(
            &self,
            _envelope: &MessageEnvelope,
            message: ClientMessage,
        ) -> anyhow::Result<Option<Value>> {
            match message {
                ClientMessage::ChatMessage(p) => Ok(Some(json!({
                    "type": "chat_response",
                    "response": format!("echo: {}", p.message),
                }))),
                _ => Ok(None),
            }
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(
            &self,
            _envelope: &MessageEnvelope,
            _message: ClientMessage,
        ) -> anyhow::Result<Option<Value>> {
            anyhow::bail!("handler exploded")
        }
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let router = MessageRouter::new();
        router.register_handler("chat_message", Arc::new(EchoHandler)).await;

        let reply = router
            .route("kiosk-1", r#"{"type":"chat_message","message":"hi"}"#)
            .await
            .unwrap();
        assert_eq!(reply["type"], json!("chat_response"));
        assert_eq!(reply["response"], json!("echo: hi"));

        let metrics = router.metrics().await;
        assert_eq!(metrics.total, 1);
        assert_eq!(metrics.successful, 1);
        assert_eq!(metrics.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_counts_validation_error() {
        let router = MessageRouter::new();
        let reply = router.route("kiosk-1", "not json at all").await.unwrap();
        assert_eq!(reply["error_code"], json!("VALIDATION_ERROR"));

        let metrics = router.metrics().await;
        assert_eq!(metrics.validation_errors, 1);
        assert_eq!(metrics.successful, 0);
    }

    #[tokio::test]
    async fn test_unknown_type_never_reaches_handlers() {
        let router = MessageRouter::new();
        router.register_handler("chat_message", Arc::new(FailingHandler)).await;

        let reply = router
            .route("kiosk-1", r#"{"type":"teleport","destination":"moon"}"#)
            .await
            .unwrap();
        assert_eq!(reply["error_code"], json!("UNKNOWN_TYPE"));

        let metrics = router.metrics().await;
        assert_eq!(metrics.unknown_message_types, 1);
        // FailingHandler would have bumped `failed` had it been invoked
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn test_missing_required_field_counts_validation_error() {
        let router = MessageRouter::new();
        router.register_handler("chat_message", Arc::new(EchoHandler)).await;

        let reply = router
            .route("kiosk-1", r#"{"type":"chat_message","context":{}}"#)
            .await
            .unwrap();
        assert_eq!(reply["error_code"], json!("VALIDATION_ERROR"));

        let metrics = router.metrics().await;
        assert_eq!(metrics.validation_errors, 1);
        assert_eq!(metrics.successful, 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let router = MessageRouter::new();
        router.register_handler("ping", Arc::new(FailingHandler)).await;

        let reply = router.route("kiosk-1", r#"{"type":"ping"}"#).await.unwrap();
        assert_eq!(reply["error_code"], json!("HANDLER_ERROR"));

        let metrics = router.metrics().await;
        assert_eq!(metrics.failed, 1);

        // The router is still alive and routing
        router.register_handler("chat_message", Arc::new(EchoHandler)).await;
        let reply = router
            .route("kiosk-1", r#"{"type":"chat_message","message":"still here"}"#)
            .await
            .unwrap();
        assert_eq!(reply["type"], json!("chat_response"));
    }

    #[tokio::test]
    async fn test_missing_handler_for_known_type() {
        let router = MessageRouter::new();
        let reply = router.route("kiosk-1", r#"{"type":"pong"}"#).await.unwrap();
        assert_eq!(reply["error_code"], json!("NO_HANDLER"));

        let metrics = router.metrics().await;
        assert_eq!(metrics.unknown_message_types, 1);
    }

    #[tokio::test]
    async fn test_exactly_one_counter_per_message() {
        let router = MessageRouter::new();
        router.register_handler("chat_message", Arc::new(EchoHandler)).await;

        router.route("c", r#"{"type":"chat_message","message":"a"}"#).await;
        router.route("c", "garbage").await;
        router.route("c", r#"{"type":"nope"}"#).await;

        let m = router.metrics().await;
        assert_eq!(m.total, 3);
        assert_eq!(
            m.successful + m.failed + m.validation_errors + m.unknown_message_types,
            3
        );
    }

    #[test]
    fn test_percentile_reporting() {
        let mut metrics = RouterMetrics::default();
        for i in 1..=100 {
            metrics.record_time(i as f64);
        }
        assert!((metrics.average_processing_ms() - 50.5).abs() < 1e-9);
        assert_eq!(metrics.percentile_processing_ms(50.0), 51.0);
        assert_eq!(metrics.percentile_processing_ms(95.0), 95.0);
        assert_eq!(metrics.percentile_processing_ms(100.0), 100.0);
    }

    #[test]
    fn test_sample_ring_is_bounded() {
        let mut metrics = RouterMetrics::default();
        for i in 0..1500 {
            metrics.record_time(i as f64);
        }
        assert_eq!(metrics.sample_count(), PROCESSING_SAMPLE_LIMIT);
        // Oldest samples were discarded
        assert_eq!(metrics.processing_times_ms[0], 500.0);
    }
}
