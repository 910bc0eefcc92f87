use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod validator;
pub mod watcher;

pub use watcher::ConfigWatcher;

use crate::cli::Cli;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    /// Tool servers the supervisor launches at startup
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
    #[serde(default)]
    pub resilience: ResilienceSettings,
    #[serde(default)]
    pub connections: ConnectionSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub optimization: OptimizationSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Definition of a subprocess tool server. Immutable after load; a
/// configuration reload replaces the whole set.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolServerConfig {
    /// Unique name for this tool server (e.g. "speech_to_text")
    pub name: String,
    /// Executable to launch
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_call_timeout() -> u64 {
    30
}

/// Circuit breaker and retry settings, shared by all tool servers
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResilienceSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay() -> u64 {
    250
}

fn default_max_delay() -> u64 {
    5_000
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_seconds: default_reset_timeout(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionSettings {
    /// Connections with no activity for this long are swept
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_connection_sweep")]
    pub sweep_interval_seconds: u64,
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_connection_sweep() -> u64 {
    60
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            sweep_interval_seconds: default_connection_sweep(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionSettings {
    #[serde(default = "default_session_timeout")]
    pub timeout_minutes: u64,
    /// Soft cap on concurrent sessions; overflow evicts the oldest 10%
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Ring-buffer capacity for per-session processing history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_session_sweep")]
    pub sweep_interval_seconds: u64,
}

fn default_session_timeout() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    1000
}

fn default_history_limit() -> usize {
    100
}

fn default_session_sweep() -> u64 {
    60
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout(),
            max_sessions: default_max_sessions(),
            history_limit: default_history_limit(),
            sweep_interval_seconds: default_session_sweep(),
        }
    }
}

/// Shared configuration for the screen-context and response caches
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_cache_size() -> usize {
    500
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_similarity_threshold() -> f64 {
    0.85
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_cache_size(),
            ttl_seconds: default_cache_ttl(),
            similarity_threshold: default_similarity_threshold(),
            enabled: true,
        }
    }
}

/// Model tiers for complexity-based selection. Each tier is optional; selection
/// falls back down the chain when the preferred tier is not configured.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ModelTiers {
    pub fast: Option<String>,
    pub balanced: Option<String>,
    pub accurate: Option<String>,
}

/// Named preset mapping to an explicit model, replacing any string sniffing on
/// model names
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PresetConfig {
    pub model: String,
    #[serde(default = "default_enabled")]
    pub cache_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OptimizationSettings {
    #[serde(default = "default_enabled")]
    pub auto_optimization: bool,
    #[serde(default = "default_preset")]
    pub default_preset: String,
    #[serde(default)]
    pub models: ModelTiers,
    #[serde(default)]
    pub presets: HashMap<String, PresetConfig>,
}

fn default_preset() -> String {
    "balanced".to_string()
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            auto_optimization: true,
            default_preset: default_preset(),
            models: ModelTiers::default(),
            presets: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthSettings {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
    /// TTL for orchestrator-owned temp resources
    #[serde(default = "default_resource_ttl")]
    pub resource_ttl_seconds: u64,
    #[serde(default = "default_resource_sweep")]
    pub resource_sweep_interval_seconds: u64,
}

fn default_probe_interval() -> u64 {
    15
}

fn default_resource_ttl() -> u64 {
    600
}

fn default_resource_sweep() -> u64 {
    120
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_seconds: default_probe_interval(),
            resource_ttl_seconds: default_resource_ttl(),
            resource_sweep_interval_seconds: default_resource_sweep(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_rps() -> u32 {
    50
}

fn default_burst() -> u32 {
    100
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_path("iris.toml")
    }

    /// Create settings from CLI arguments (config file plus CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::from_path(cli.config.to_str().unwrap_or("iris.toml"))?;
        settings.apply_cli_overrides(cli);
        Ok(settings)
    }

    pub fn from_path(path: &str) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        validator::ConfigValidator::validate(&settings).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })?;

        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
    }

    /// Tool servers that should actually be launched
    pub fn enabled_tool_servers(&self) -> impl Iterator<Item = &ToolServerConfig> {
        self.tool_servers.iter().filter(|s| s.enabled)
    }
}
