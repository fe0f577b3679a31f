/// Test fixtures and sample data for integration tests

/// Origins used by the CORS tests
pub mod origins {
    pub const ALLOWED: &str = "http://a.com";
    pub const ALSO_ALLOWED: &str = "http://b.com";
    pub const REJECTED: &str = "http://c.com";

    pub fn allow_list() -> String {
        format!("{}, {}", ALLOWED, ALSO_ALLOWED)
    }
}

/// Sample JSON-RPC requests for testing
pub mod json_rpc {
    use serde_json::{json, Value};

    pub fn modules_request() -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "rpc_modules",
            "id": 1
        })
    }

    pub fn echo_request(id: u64, payload: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "test_echo",
            "params": [payload],
            "id": id
        })
    }

    pub fn subscribe_request() -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscribe",
            "params": ["newHeads"],
            "id": 3
        })
    }

    pub fn unknown_method_request() -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "foo_bar",
            "id": 4
        })
    }

    /// A syntactically valid request whose serialized size is exactly `len` bytes
    pub fn request_of_size(len: usize) -> Vec<u8> {
        let skeleton = r#"{"jsonrpc":"2.0","id":1,"method":"test_echo","params":[""]}"#;
        assert!(len >= skeleton.len());
        let padding = "x".repeat(len - skeleton.len());
        let body = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"test_echo","params":["{}"]}}"#,
            padding
        );
        assert_eq!(body.len(), len);
        body.into_bytes()
    }
}
