/// JSON-RPC 2.0 protocol types
/// Shared by the client transport, the codec and the dispatch engine
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version carried in every message
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a method call carrying an id
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Requests without an id expect no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the result value or the carried error
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

impl JsonRpcError {
    /// Create a parse error (-32700)
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        }
    }

    /// Create a parse error with custom message (-32700)
    pub fn parse_error_with_message(message: &str) -> Self {
        Self {
            code: -32700,
            message: format!("Parse error: {}", message),
            data: None,
        }
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "Invalid Request".to_string(),
            data: None,
        }
    }

    /// Create an invalid request error with custom message (-32600)
    pub fn invalid_request_with_message(message: &str) -> Self {
        Self {
            code: -32600,
            message: format!("Invalid Request: {}", message),
            data: None,
        }
    }

    /// Create a method not found error (-32601)
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("the method {} does not exist/is not available", method),
            data: None,
        }
    }

    /// Subscriptions requested on a transport that cannot deliver them (-32001)
    pub fn notifications_unsupported() -> Self {
        Self {
            code: -32001,
            message: "notifications not supported".to_string(),
            data: None,
        }
    }

    /// Create an invalid params error (-32602)
    pub fn invalid_params(message: &str) -> Self {
        Self {
            code: -32602,
            message: format!("Invalid params: {}", message),
            data: None,
        }
    }

    /// Create an internal error (-32603)
    pub fn internal_error(message: &str) -> Self {
        Self {
            code: -32603,
            message: format!("Internal error: {}", message),
            data: None,
        }
    }
}

/// Validate JSON-RPC 2.0 request format
pub fn validate_request(value: &Value) -> Result<JsonRpcRequest, JsonRpcError> {
    let request: JsonRpcRequest =
        serde_json::from_value(value.clone()).map_err(|_| JsonRpcError::invalid_request())?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcError::invalid_request());
    }

    Ok(request)
}
