//! JSON-RPC wire envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
            id: Value::from(id),
        }
    }
}

/// A JSON-RPC response, carrying exactly one of `result` / `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self { jsonrpc: jsonrpc_version(), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            result: None,
            error: Some(RpcError { code, message: message.into() }),
            id,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params.
pub const INVALID_PARAMS: i64 = -32602;
/// Handler-level failure.
pub const HANDLER_ERROR: i64 = -32000;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let req = RpcRequest::new("receive_message", json!({"from": "alice"}), 7);
        let text = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&text).unwrap();

        assert_eq!(back.method, "receive_message");
        assert_eq!(back.params["from"], "alice");
        assert_eq!(back.id, json!(7));
    }

    #[test]
    fn test_response_has_result_xor_error() {
        let ok = RpcResponse::result(json!(1), json!("fine"));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(text.contains("result"));
        assert!(!text.contains("error"));

        let err = RpcResponse::error(json!(1), METHOD_NOT_FOUND, "no such method");
        let text = serde_json::to_string(&err).unwrap();
        assert!(text.contains("error"));
        assert!(!text.contains("result"));
    }

    #[test]
    fn test_request_defaults_tolerate_missing_fields() {
        let back: RpcRequest = serde_json::from_str(r#"{"method": "status"}"#).unwrap();
        assert_eq!(back.jsonrpc, "2.0");
        assert!(back.params.is_null());
    }
}
