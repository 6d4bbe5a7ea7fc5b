//! JSON-RPC 2.0 envelopes for the `/mcp` endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const UNAUTHORIZED: i32 = -32001;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Wrap a tool's JSON value in the MCP content envelope.
pub fn tool_content(value: &Value, is_error: bool) -> Value {
    let mut wrapped = json!({
        "content": [{
            "type": "text",
            "text": value.to_string(),
        }]
    });
    if is_error {
        wrapped["isError"] = json!(true);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_defaults() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"tools/list"}"#).unwrap();
        assert_eq!(request.method, "tools/list");
        assert_eq!(request.id, Value::Null);
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn success_omits_error_field() {
        let response = RpcResponse::success(json!(1), json!({"ok": true}));
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains("\"result\""));
        assert!(!text.contains("\"error\""));
    }

    #[test]
    fn failure_carries_code() {
        let response = RpcResponse::failure(json!(1), METHOD_NOT_FOUND, "no such method");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["error"]["code"], json!(-32601));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn tool_content_wraps_text_and_flags_errors() {
        let ok = tool_content(&json!({"n": 1}), false);
        assert_eq!(ok["content"][0]["type"], json!("text"));
        assert!(ok.get("isError").is_none());

        let err = tool_content(&json!({"error": "boom"}), true);
        assert_eq!(err["isError"], json!(true));
    }
}
