//! JSON-RPC 2.0 message shapes and the stable error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version reported by `initialize`.
pub const WIRE_PROTOCOL_VERSION: &str = "1";

/// Stable error codes.
pub mod codes {
    /// Malformed JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Not a valid JSON-RPC message.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Parameters did not match the method's schema.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal failure.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Invalid state (e.g. a concurrent prompt).
    pub const INVALID_STATE: i64 = -32000;
    /// No LLM is configured.
    pub const LLM_NOT_SET: i64 = -32001;
    /// The LLM lacks a required capability.
    pub const LLM_NOT_SUPPORTED: i64 = -32002;
    /// The chat provider failed.
    pub const CHAT_PROVIDER_ERROR: i64 = -32003;
}

/// Any inbound JSON-RPC message, loosely shaped; the server dispatches on
/// which fields are present.
#[derive(Debug, Deserialize)]
pub(crate) struct Incoming {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl Incoming {
    /// A response carries `result` or `error` and no `method`.
    pub(crate) fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// `initialize` parameters.
#[derive(Debug, Deserialize)]
pub(crate) struct InitializeParams {
    #[allow(dead_code)]
    pub protocol_version: String,
    #[serde(default)]
    pub client: Option<ClientInfo>,
    #[serde(default)]
    pub external_tools: Vec<ExternalToolDecl>,
}

/// Client identity from `initialize`.
#[derive(Debug, Deserialize)]
pub(crate) struct ClientInfo {
    pub name: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub version: Option<String>,
}

/// An external tool offered by the client.
#[derive(Debug, Deserialize)]
pub(crate) struct ExternalToolDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

/// `prompt` parameters.
#[derive(Debug, Deserialize)]
pub(crate) struct PromptParams {
    pub user_input: amadeus_core::MessageContent,
}

/// The payload a client sends back for an approval request.
#[derive(Debug, Deserialize)]
pub(crate) struct ApprovalResponsePayload {
    pub request_id: String,
    pub response: amadeus_approval::ApprovalKind,
}

/// The payload a client sends back for an external tool request.
#[derive(Debug, Deserialize)]
pub(crate) struct ExternalToolResponsePayload {
    pub tool_call_id: String,
    pub return_value: amadeus_core::ToolReturnValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_classification() {
        let request: Incoming = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "id": 1, "method": "prompt", "params": {"user_input": "hi"}}"#,
        )
        .unwrap();
        assert!(!request.is_response());
        assert_eq!(request.method.as_deref(), Some("prompt"));

        let response: Incoming =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": "r-1", "result": {}}"#).unwrap();
        assert!(response.is_response());
    }

    #[test]
    fn test_prompt_params_accept_parts() {
        let params: PromptParams = serde_json::from_value(serde_json::json!({
            "user_input": [{"type": "text", "text": "look"}]
        }))
        .unwrap();
        assert!(matches!(
            params.user_input,
            amadeus_core::MessageContent::Parts(_)
        ));
    }
}
