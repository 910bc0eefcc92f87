pub mod cache_service;
pub mod communication;
pub mod connection_manager;
pub mod handlers;
pub mod health_handler;
pub mod health_monitor;
pub mod message_router;
pub mod metrics_handler;
pub mod optimization;
pub mod rate_limit;
pub mod resilience;
pub mod session_service;
pub mod tool_rpc;
pub mod tool_supervisor;
