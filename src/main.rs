use clap::Parser;
use iris::adapters::communication::CommunicationService;
use iris::adapters::connection_manager::ConnectionManager;
use iris::adapters::handlers::{
    self, LLM_AGENT_SERVER, SPEECH_TO_TEXT_SERVER,
};
use iris::adapters::health_handler::HealthHandler;
use iris::adapters::health_monitor::{HealthMonitor, ResourceManager};
use iris::adapters::message_router::MessageRouter;
use iris::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use iris::adapters::optimization::OptimizationService;
use iris::adapters::resilience::{CircuitState, ResilientToolClient};
use iris::adapters::session_service::SessionService;
use iris::adapters::cache_service::CacheService;
use iris::adapters::tool_rpc::ToolRpcClient;
use iris::adapters::tool_supervisor::ToolServerSupervisor;
use iris::cli::Cli;
use iris::config::{ConfigWatcher, Settings};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Iris orchestrator on {}:{}", host, port);

    // Config watcher: revalidate on change so a bad edit is caught early.
    // Tool-server topology changes take effect on restart.
    let config_path = cli.config.to_str().unwrap_or("iris.toml").to_string();
    let watched_path = config_path.clone();
    let _watcher = ConfigWatcher::new(vec![config_path], move || {
        match Settings::from_path(&watched_path) {
            Ok(_) => info!("Configuration change validated; restart to apply tool-server changes"),
            Err(e) => error!("Rejected configuration change: {}", e),
        }
    })?;

    // Launch tool servers
    let supervisor = Arc::new(ToolServerSupervisor::new());
    if cli.no_tool_servers {
        info!("Tool server launch disabled by flag");
    } else {
        supervisor.start_all(&settings.tool_servers).await;
    }

    // RPC client wrapped in breaker + retry, with per-service fallbacks
    let rpc = Arc::new(ToolRpcClient::new(supervisor.handles()));
    let tools = Arc::new(ResilientToolClient::new(rpc.clone(), &settings.resilience));
    tools
        .register_fallback(
            SPEECH_TO_TEXT_SERVER,
            Arc::new(|_, _| json!({"text": "please type your message"})),
        )
        .await;
    tools
        .register_fallback(
            LLM_AGENT_SERVER,
            Arc::new(|_, _| json!({"response": "I didn't catch that. Could you rephrase?"})),
        )
        .await;

    // Client-facing services
    let cache = Arc::new(CacheService::new(settings.cache.clone()));
    let optimizer = Arc::new(OptimizationService::new(settings.optimization.clone())?);
    let sessions = Arc::new(SessionService::new(&settings.sessions));
    let connections = Arc::new(ConnectionManager::new());
    let router = Arc::new(MessageRouter::new());
    handlers::register_default_handlers(
        &router,
        tools.clone(),
        cache.clone(),
        optimizer.clone(),
        sessions.clone(),
    )
    .await;
    let comms = Arc::new(CommunicationService::new(
        connections.clone(),
        router.clone(),
        sessions.clone(),
    ));

    // Background health probes and temp-resource cleanup
    let monitor = Arc::new(HealthMonitor::new(
        rpc,
        supervisor.clone(),
        Duration::from_secs(settings.health.probe_interval_seconds),
    ));
    monitor.clone().spawn();
    let resources = Arc::new(ResourceManager::new(Duration::from_secs(
        settings.health.resource_ttl_seconds,
    )));
    resources
        .clone()
        .spawn(Duration::from_secs(settings.health.resource_sweep_interval_seconds));

    // Idle connection sweep
    {
        let connections = connections.clone();
        let idle_timeout = Duration::from_secs(settings.connections.idle_timeout_seconds);
        let sweep = Duration::from_secs(settings.connections.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                connections.cleanup_idle(idle_timeout).await;
            }
        });
    }

    // Session expiry sweep
    {
        let sessions = sessions.clone();
        let sweep = Duration::from_secs(settings.sessions.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sessions.cleanup_expired().await;
            }
        });
    }

    // Prometheus sync: mirror the services' own counters into the registry
    let collector = Arc::new(MetricsCollector::new()?);
    {
        let collector = collector.clone();
        let router = router.clone();
        let cache = cache.clone();
        let connections = connections.clone();
        let sessions = sessions.clone();
        let tools = tools.clone();
        let server_names: Vec<String> = settings
            .enabled_tool_servers()
            .map(|s| s.name.clone())
            .collect();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                collector.sync_router(&router.metrics().await);
                collector.sync_cache(&cache.stats());
                collector
                    .connections_active
                    .set(connections.connection_count().await as f64);
                collector
                    .sessions_active
                    .set(sessions.session_count().await as f64);
                for name in &server_names {
                    let open = tools.breaker_state(name).await == CircuitState::Open;
                    collector.set_circuit_open(name, open);
                }
            }
        });
    }

    let health_handler = Arc::new(HealthHandler::new(
        supervisor.clone(),
        monitor,
        connections.clone(),
    ));
    let metrics_handler = Arc::new(MetricsHandler::new(collector));

    let app = iris::create_app(comms, health_handler, metrics_handler, &settings);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    supervisor.stop_all().await;
    Ok(())
}
