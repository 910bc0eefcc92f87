use std::collections::HashMap;
use thiserror::Error;

use crate::config::{ResilienceSettings, ServerSettings, Settings, ToolServerConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_server(&settings.server) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_tool_servers(&settings.tool_servers) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_resilience(&settings.resilience) {
            errors.extend(e);
        }

        if settings.cache.similarity_threshold <= 0.0 || settings.cache.similarity_threshold > 1.0 {
            errors.push(ValidationError::InvalidValue {
                field: "cache.similarity_threshold".to_string(),
                reason: "must be in (0.0, 1.0]".to_string(),
            });
        }

        if settings.sessions.max_sessions == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "sessions.max_sessions".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        // Preset targets must name a real model string
        for (name, preset) in &settings.optimization.presets {
            if preset.model.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "optimization.presets.{}.model",
                    name
                )));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_tool_servers(servers: &[ToolServerConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_names = HashMap::new();

        for (idx, server) in servers.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&server.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Tool server name '{}' appears at indices {} and {}",
                    server.name, prev_idx, idx
                )));
            }

            if server.name.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "tool_servers[{}].name",
                    idx
                )));
            }

            if server.command.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "tool_servers[{}].command",
                    idx
                )));
            }

            if server.call_timeout_seconds == 0 {
                errors.push(ValidationError::InvalidValue {
                    field: format!("tool_servers[{}].call_timeout_seconds", idx),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_resilience(resilience: &ResilienceSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if resilience.failure_threshold == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "resilience.failure_threshold".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if resilience.max_delay_ms < resilience.base_delay_ms {
            errors.push(ValidationError::InvalidValue {
                field: "resilience.max_delay_ms".to_string(),
                reason: "must be greater than or equal to base_delay_ms".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
