//! HTTP surface tests: health endpoints, metrics, and the rate-limit layer.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use iris::adapters::communication::CommunicationService;
use iris::adapters::connection_manager::ConnectionManager;
use iris::adapters::health_handler::HealthHandler;
use iris::adapters::health_monitor::HealthMonitor;
use iris::adapters::message_router::MessageRouter;
use iris::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use iris::adapters::session_service::SessionService;
use iris::adapters::tool_rpc::ToolRpcClient;
use iris::adapters::tool_supervisor::ToolServerSupervisor;
use iris::config::{RateLimitConfig, Settings};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn build_app(settings: &Settings) -> axum::Router {
    let supervisor = Arc::new(ToolServerSupervisor::new());
    let rpc = Arc::new(ToolRpcClient::new(supervisor.handles()));
    let monitor = Arc::new(HealthMonitor::new(
        rpc,
        supervisor.clone(),
        Duration::from_secs(15),
    ));
    let connections = Arc::new(ConnectionManager::new());
    let sessions = Arc::new(SessionService::new(&settings.sessions));
    let comms = Arc::new(CommunicationService::new(
        connections.clone(),
        Arc::new(MessageRouter::new()),
        sessions,
    ));
    let health_handler = Arc::new(HealthHandler::new(supervisor, monitor, connections));
    let metrics_handler = Arc::new(MetricsHandler::new(Arc::new(
        MetricsCollector::new().unwrap(),
    )));

    iris::create_app(comms, health_handler, metrics_handler, settings)
}

fn default_settings() -> Settings {
    Settings::from_path("does-not-exist.toml").unwrap()
}

async fn get(app: axum::Router, uri: &str) -> axum::http::Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let settings = default_settings();

    let response = get(build_app(&settings), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(build_app(&settings), "/health/live").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(build_app(&settings), "/health/ready").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    let settings = default_settings();
    let response = get(build_app(&settings), "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let mut settings = default_settings();
    settings.rate_limit = Some(RateLimitConfig {
        enabled: true,
        requests_per_second: 1,
        burst_size: 1,
    });
    let app = build_app(&settings);

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_never_blocks_health() {
    let mut settings = default_settings();
    settings.rate_limit = Some(RateLimitConfig {
        enabled: true,
        requests_per_second: 1,
        burst_size: 1,
    });
    let app = build_app(&settings);

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
