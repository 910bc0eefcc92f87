//! Tool-server wire types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable operation exposed by a tool server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "input_schema", alias = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// A resource exposed by a tool server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
}

/// Result of a tool call, normalized from the server's wire response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when this result was produced by a registered fallback instead of
    /// the tool server itself
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_fallback: bool,
}

impl ToolCallResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            from_fallback: false,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            from_fallback: false,
        }
    }

    pub fn fallback(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            from_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_flag_serialization() {
        let ok = ToolCallResult::ok(json!({"x": 1}));
        let v = serde_json::to_value(&ok).unwrap();
        assert!(v.get("from_fallback").is_none());

        let fb = ToolCallResult::fallback(json!("please type your message"));
        let v = serde_json::to_value(&fb).unwrap();
        assert_eq!(v["from_fallback"], json!(true));
    }

    #[test]
    fn test_input_schema_alias() {
        let raw = json!({"name": "transcribe", "description": null, "inputSchema": {"type": "object"}});
        let tool: ToolDescriptor = serde_json::from_value(raw).unwrap();
        assert!(tool.input_schema.is_some());
    }
}
