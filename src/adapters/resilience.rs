//! Resilient Tool Calls
//!
//! Wraps every tool call in a per-server circuit breaker and exponential
//! backoff retry. When a server's breaker is open, calls fail fast without
//! touching the transport. Exhausted calls fall back to a per-server fallback
//! response when one is registered, so the kiosk degrades instead of erroring.

use crate::adapters::tool_rpc::ToolRpcClient;
use crate::config::ResilienceSettings;
use crate::domain::error::{OrchestratorError, OrchestratorResult};
use crate::domain::tool::ToolCallResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// State of a per-server circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls flow through
    Closed,
    /// Too many failures, calls fail fast until the reset timeout elapses
    Open,
    /// Reset timeout elapsed, next call probes the server
    HalfOpen,
}

/// Per-server breaker state machine.
///
/// CLOSED -> OPEN when failure_count reaches the threshold; OPEN -> HALF_OPEN
/// after reset_timeout since the last failure; HALF_OPEN -> CLOSED on the next
/// success (failure count zeroed) and HALF_OPEN -> OPEN on the next failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            failure_threshold,
            reset_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether a call may proceed. Performs the OPEN -> HALF_OPEN transition
    /// when the reset timeout has elapsed.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            debug!("Circuit closed after successful probe");
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());
        if self.state == CircuitState::HalfOpen || self.failure_count >= self.failure_threshold {
            self.state = CircuitState::Open;
        }
    }
}

/// Exponential backoff schedule: `delay(attempt) = min(base * 2^attempt, max)`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

impl From<&ResilienceSettings> for RetryPolicy {
    fn from(settings: &ResilienceSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Seam between the resilience wrapper and the transport, so tests can swap in
/// scripted callers
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Value,
    ) -> OrchestratorResult<ToolCallResult>;
}

#[async_trait]
impl ToolCaller for ToolRpcClient {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Value,
    ) -> OrchestratorResult<ToolCallResult> {
        ToolRpcClient::call_tool(self, server, tool, params, None).await
    }
}

/// Produces a degraded-mode response for a server when its calls cannot
/// succeed (e.g. "please type your message" for speech-to-text)
pub type FallbackFn = Arc<dyn Fn(&str, &OrchestratorError) -> Value + Send + Sync>;

pub struct ResilientToolClient {
    inner: Arc<dyn ToolCaller>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    retry: RetryPolicy,
    failure_threshold: u32,
    reset_timeout: Duration,
    fallbacks: RwLock<HashMap<String, FallbackFn>>,
}

impl ResilientToolClient {
    pub fn new(inner: Arc<dyn ToolCaller>, settings: &ResilienceSettings) -> Self {
        Self {
            inner,
            breakers: Mutex::new(HashMap::new()),
            retry: RetryPolicy::from(settings),
            failure_threshold: settings.failure_threshold,
            reset_timeout: Duration::from_secs(settings.reset_timeout_seconds),
            fallbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Register the degraded-mode response for one server
    pub async fn register_fallback(&self, server: &str, fallback: FallbackFn) {
        let mut fallbacks = self.fallbacks.write().await;
        fallbacks.insert(server.to_string(), fallback);
    }

    /// Current breaker state for a server (Closed when never seen)
    pub async fn breaker_state(&self, server: &str) -> CircuitState {
        let breakers = self.breakers.lock().await;
        breakers
            .get(server)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Call a tool under breaker + retry protection
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Value,
    ) -> OrchestratorResult<ToolCallResult> {
        // Breaker gate: fail fast while open
        {
            let mut breakers = self.breakers.lock().await;
            let breaker = breakers
                .entry(server.to_string())
                .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.reset_timeout));
            if !breaker.allow_request() {
                drop(breakers);
                warn!(server = %server, "Circuit open, failing fast");
                let err = OrchestratorError::CircuitOpen(server.to_string());
                return self.fallback_or(server, tool, err).await;
            }
        }

        let mut last_error = OrchestratorError::ToolCall("no attempts made".to_string());
        for attempt in 0..=self.retry.max_retries {
            match self.inner.call_tool(server, tool, params.clone()).await {
                Ok(result) if result.success => {
                    let mut breakers = self.breakers.lock().await;
                    if let Some(breaker) = breakers.get_mut(server) {
                        breaker.record_success();
                    }
                    return Ok(result);
                }
                Ok(result) => {
                    last_error = OrchestratorError::ToolCall(
                        result
                            .error
                            .unwrap_or_else(|| "tool reported failure".to_string()),
                    );
                }
                Err(e) => {
                    last_error = e;
                }
            }

            if attempt < self.retry.max_retries {
                let delay = self.retry.delay(attempt);
                debug!(
                    server = %server,
                    tool = %tool,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Tool call failed, retrying"
                );
                sleep(delay).await;
            }
        }

        // Retries exhausted: one breaker failure for the whole logical call
        {
            let mut breakers = self.breakers.lock().await;
            if let Some(breaker) = breakers.get_mut(server) {
                breaker.record_failure();
                if breaker.state() == CircuitState::Open {
                    warn!(
                        server = %server,
                        failures = breaker.failure_count(),
                        "Circuit opened"
                    );
                }
            }
        }

        self.fallback_or(server, tool, last_error).await
    }

    async fn fallback_or(
        &self,
        server: &str,
        tool: &str,
        err: OrchestratorError,
    ) -> OrchestratorResult<ToolCallResult> {
        let fallbacks = self.fallbacks.read().await;
        if let Some(fallback) = fallbacks.get(server) {
            info!(server = %server, "Serving fallback response: {}", err);
            Ok(ToolCallResult::fallback(fallback(tool, &err)))
        } else {
            Err(err)
        }
    }
}
