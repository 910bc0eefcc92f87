use iris::config::Settings;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_full_config() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    let iris_toml = r#"
[server]
host = "0.0.0.0"
port = 8765

[[tool_servers]]
name = "speech_to_text"
command = "stt-server"
args = ["--model", "base"]

[[tool_servers]]
name = "llm_agent"
command = "agent-server"

[[tool_servers]]
name = "mouse_control"
command = "mouse-server"
enabled = false

[resilience]
failure_threshold = 5
reset_timeout_seconds = 60
max_retries = 3
base_delay_ms = 100
max_delay_ms = 2000

[cache]
max_size = 200
ttl_seconds = 120
similarity_threshold = 0.9

[optimization]
default_preset = "speed"

[optimization.models]
fast = "tiny"
balanced = "medium"
accurate = "large"

[optimization.presets.speed]
model = "tiny"
cache_enabled = true

[rate_limit]
enabled = true
requests_per_second = 25
burst_size = 50
"#;
    let path = root.join("iris.toml");
    fs::write(&path, iris_toml)?;

    let settings = Settings::from_path(path.to_str().unwrap())?;

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 8765);
    assert_eq!(settings.tool_servers.len(), 3);
    assert_eq!(settings.enabled_tool_servers().count(), 2);
    assert_eq!(settings.resilience.failure_threshold, 5);
    assert!((settings.cache.similarity_threshold - 0.9).abs() < f64::EPSILON);
    assert_eq!(settings.optimization.default_preset, "speed");
    assert_eq!(
        settings.optimization.models.fast.as_deref(),
        Some("tiny")
    );
    let rate_limit = settings.rate_limit.expect("rate limit section");
    assert!(rate_limit.enabled);
    assert_eq!(rate_limit.requests_per_second, 25);

    Ok(())
}

#[test]
fn test_missing_file_falls_back_to_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("nope.toml");

    let settings = Settings::from_path(path.to_str().unwrap())?;

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 3000);
    assert!(settings.tool_servers.is_empty());
    assert_eq!(settings.sessions.max_sessions, 1000);
    assert_eq!(settings.connections.idle_timeout_seconds, 300);

    Ok(())
}

#[test]
fn test_duplicate_server_names_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    let iris_toml = r#"
[[tool_servers]]
name = "speech_to_text"
command = "stt-server"

[[tool_servers]]
name = "speech_to_text"
command = "other-server"
"#;
    let path = root.join("iris.toml");
    fs::write(&path, iris_toml)?;

    let result = Settings::from_path(path.to_str().unwrap());
    assert!(result.is_err());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("speech_to_text"));

    Ok(())
}

#[test]
fn test_invalid_similarity_threshold_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    let iris_toml = r#"
[cache]
similarity_threshold = 1.5
"#;
    let path = root.join("iris.toml");
    fs::write(&path, iris_toml)?;

    assert!(Settings::from_path(path.to_str().unwrap()).is_err());
    Ok(())
}
