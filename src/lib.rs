//! # Iris - Kiosk Voice Command Orchestrator
//!
//! Iris is the orchestration and communication substrate for a kiosk device
//! that accepts voice/text commands and executes them through independent
//! capability providers (speech-to-text, screen detection, a local LLM agent).
//!
//! ## Features
//!
//! - **Tool Server Supervision**: launches subprocess tool servers and talks
//!   to them over line-delimited JSON-RPC with request/response correlation
//! - **Resilience**: per-server circuit breakers, exponential-backoff retry,
//!   and registered fallback responses
//! - **Real-time Clients**: WebSocket connections with schema-validated
//!   message routing and per-client session state
//! - **Optimization**: mtime-validated screen-context cache, similarity-matched
//!   response cache, and complexity-based model selection
//! - **Metrics**: Prometheus metrics for monitoring
//! - **Health Checks**: Kubernetes-ready health endpoints
//! - **Live Reload**: configuration file watching
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iris::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let settings = Settings::new()?;
//!
//!     // Server will start on configured host:port
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Iris follows Hexagonal Architecture:
//! - **Domain**: message schema, tool wire types, error taxonomy
//! - **Adapters**: tool servers, resilience, connections, caches, optimization
//! - **Config**: configuration management and validation

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;

use crate::adapters::communication::{self, CommunicationService};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::MetricsHandler;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `comms` - Communication service owning the WebSocket lifecycle
/// * `health_handler` - Health check handler
/// * `metrics_handler` - Metrics collection handler
/// * `settings` - Application settings (for the rate-limit layer)
///
/// # Returns
///
/// Configured Axum Router
pub fn create_app(
    comms: Arc<CommunicationService>,
    health_handler: Arc<HealthHandler>,
    metrics_handler: Arc<MetricsHandler>,
    settings: &crate::config::Settings,
) -> Router {
    // Public routes (never rate limited)
    let public_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }));

    // Protected routes (rate limit applied when enabled)
    let mut protected_router = Router::new()
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }))
        // WebSocket endpoint for kiosk clients
        .merge(
            Router::new()
                .route("/ws", get(communication::ws_upgrade))
                .with_state(comms),
        );

    if let Some(rate_limit) = &settings.rate_limit {
        if rate_limit.enabled {
            let limiter = crate::adapters::rate_limit::create_limiter(
                rate_limit.requests_per_second,
                rate_limit.burst_size,
            );

            protected_router = protected_router.layer(axum::middleware::from_fn_with_state(
                limiter,
                crate::adapters::rate_limit::rate_limit_middleware,
            ));
        }
    }

    // Public routes are checked first, then protected routes
    let router = public_router.merge(protected_router);

    router.layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
