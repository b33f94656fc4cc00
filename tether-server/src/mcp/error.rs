//! MCP error types
//!
//! [`McpError`] covers protocol-level failures that become JSON-RPC error
//! responses. [`ToolError`] covers failures of a single tool or resource
//! call; the server turns those into `isError` results.

use std::io;

use tether_protocol::JsonRpcError;

use crate::channel::ChannelError;

/// MCP server errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// IO error (stdin/stdout)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Two tools registered under one name
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// Two resources registered under one uri
    #[error("Duplicate resource uri: {0}")]
    DuplicateResource(String),

    /// A resource reader failed
    #[error("Failed to read resource {uri}: {message}")]
    Resource { uri: String, message: String },

    /// The server no longer answers requests
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::MethodNotFound(method) => {
                JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, format!("Method not found: {}", method))
            }
            McpError::InvalidParams(msg) => JsonRpcError::new(JsonRpcError::INVALID_PARAMS, msg),
            McpError::Resource { uri, message } => JsonRpcError::with_data(
                JsonRpcError::INTERNAL_ERROR,
                message,
                serde_json::json!({ "uri": uri }),
            ),
            other => JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, other.to_string()),
        }
    }
}

/// Failure of a single tool or resource call
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name
    #[error("Tool \"{0}\" not found")]
    NotFound(String),

    /// Arguments do not match the tool's input shape
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// The peer round-trip failed
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The peer replied with something the tool cannot use
    #[error("Unexpected reply from peer: expected {expected}, got {got}")]
    UnexpectedPayload { expected: &'static str, got: String },

    /// Any other handler failure
    #[error("{0}")]
    Handler(String),
}

impl ToolError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Build an `UnexpectedPayload` describing the offending value
    pub fn unexpected(expected: &'static str, got: &serde_json::Value) -> Self {
        let got = match got {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "a boolean",
            serde_json::Value::Number(_) => "a number",
            serde_json::Value::String(_) => "a string",
            serde_json::Value::Array(_) => "an array",
            serde_json::Value::Object(_) => "an object",
        };
        Self::UnexpectedPayload {
            expected,
            got: got.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_method_not_found_maps_to_code() {
        let err: JsonRpcError = McpError::MethodNotFound("foo/bar".into()).into();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
        assert!(err.message.contains("foo/bar"));
    }

    #[test]
    fn test_invalid_params_maps_to_code() {
        let err: JsonRpcError = McpError::InvalidParams("Missing 'name' parameter".into()).into();
        assert_eq!(err.code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(err.message, "Missing 'name' parameter");
    }

    #[test]
    fn test_resource_error_carries_uri() {
        let err: JsonRpcError = McpError::Resource {
            uri: "console://logs".into(),
            message: "peer gone".into(),
        }
        .into();
        assert_eq!(err.code, JsonRpcError::INTERNAL_ERROR);
        assert_eq!(err.data.unwrap()["uri"], "console://logs");
    }

    #[test]
    fn test_shutting_down_is_internal() {
        let err: JsonRpcError = McpError::ShuttingDown.into();
        assert_eq!(err.code, JsonRpcError::INTERNAL_ERROR);
        assert_eq!(err.message, "Server is shutting down");
    }

    #[test]
    fn test_tool_not_found_message() {
        assert_eq!(
            ToolError::NotFound("nope".into()).to_string(),
            "Tool \"nope\" not found"
        );
    }

    #[test]
    fn test_channel_errors_are_transparent() {
        let err = ToolError::from(ChannelError::NoConnection);
        assert_eq!(err.to_string(), ChannelError::NoConnection.to_string());

        let err = ToolError::from(ChannelError::Timeout(Duration::from_secs(30)));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_unexpected_payload_describes_value() {
        let err = ToolError::unexpected("an array", &serde_json::json!({"a": 1}));
        assert_eq!(
            err.to_string(),
            "Unexpected reply from peer: expected an array, got an object"
        );
    }
}
