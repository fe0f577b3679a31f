/// HTTP client transport for JSON-RPC
/// One POST per call; the response body is buffered until it is received
use crate::server::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::validation::{ValidationError, Validator};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument};
use url::Url;

/// Client transport errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] ValidationError),

    #[error("failed to encode message: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request failed: {status}")]
    Remote { status: String },

    #[error("failed to decode response: {reason}")]
    Decoding { reason: String },

    #[error("rpc error: {0}")]
    Rpc(#[from] JsonRpcError),
}

/// JSON-RPC client over HTTP.
///
/// [`send`](Self::send) and [`recv`](Self::recv) form a two-step call: the
/// response of the last successful `send` is held until `recv` takes it.
/// Both take `&mut self`, so one instance cannot have overlapping calls.
/// [`call`](Self::call) does both in one step without touching the buffer.
#[derive(Debug)]
pub struct HttpClient {
    endpoint: Url,
    http: reqwest::Client,
    pending: Option<Vec<u8>>,
    next_id: AtomicU64,
}

impl HttpClient {
    /// Create a client for `endpoint` with a default connection pool
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Create a client reusing an existing `reqwest::Client`
    pub fn with_client(endpoint: &str, http: reqwest::Client) -> Result<Self, ClientError> {
        let endpoint = Validator::validate_endpoint(endpoint)?;
        Ok(Self {
            endpoint,
            http,
            pending: None,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Serialize `msg` and post it. On success the response body is kept
    /// for the next [`recv`](Self::recv).
    #[instrument(skip(self, msg), fields(endpoint = %self.endpoint))]
    pub async fn send<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), ClientError> {
        self.pending = None;
        let body = serde_json::to_vec(msg).map_err(ClientError::Encoding)?;
        let response = self.post(body).await?;
        debug!(bytes = response.len(), "Response buffered");
        self.pending = Some(response);
        Ok(())
    }

    /// Decode the response buffered by the last successful `send`.
    ///
    /// The buffer is consumed: a second `recv` without a new `send` fails.
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ClientError> {
        let body = self.pending.take().ok_or_else(|| ClientError::Decoding {
            reason: "no response pending, send must succeed before recv".to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decoding {
            reason: e.to_string(),
        })
    }

    /// Send `msg` and decode the response in one step
    #[instrument(skip(self, msg), fields(endpoint = %self.endpoint))]
    pub async fn call<T, R>(&self, msg: &T) -> Result<R, ClientError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(msg).map_err(ClientError::Encoding)?;
        let response = self.post(body).await?;
        serde_json::from_slice(&response).map_err(|e| ClientError::Decoding {
            reason: e.to_string(),
        })
    }

    /// Nothing to release; the connection pool outlives the transport.
    pub fn close(&self) {}

    /// Query the remote server for its modules and their versions
    pub async fn supported_modules(&mut self) -> Result<HashMap<String, String>, ClientError> {
        let request = JsonRpcRequest::new(self.next_request_id(), "rpc_modules", None);
        self.send(&request).await?;
        let response: JsonRpcResponse = self.recv()?;
        let result = response.into_result()?;
        serde_json::from_value(result).map_err(|e| ClientError::Decoding {
            reason: e.to_string(),
        })
    }

    /// Ids for requests built by the client itself
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(&self, body: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(%status, "Non-OK status, body discarded");
            return Err(ClientError::Remote {
                status: status.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Message {
        id: u64,
        method: String,
        params: Vec<String>,
    }

    fn message(id: u64) -> Message {
        Message {
            id,
            method: "test_echo".to_string(),
            params: vec![format!("payload-{}", id)],
        }
    }

    /// Server that answers every POST with the request body
    async fn echo_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .respond_with(|request: &Request| {
                ResponseTemplate::new(200).set_body_bytes(request.body.clone())
            })
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        let err = HttpClient::new("ftp://example.org").unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint(_)));
        assert!(HttpClient::new("").is_err());
    }

    #[test]
    fn test_recv_without_send_fails() {
        let mut client = HttpClient::new("http://127.0.0.1:8545").unwrap();
        let err = client.recv::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ClientError::Decoding { .. }));
    }

    #[tokio::test]
    async fn test_send_recv_round_trip() {
        let server = echo_server().await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        let sent = message(1);
        assert_ok!(client.send(&sent).await);
        let received: Message = assert_ok!(client.recv());

        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_recv_consumes_buffer() {
        let server = echo_server().await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        client.send(&message(1)).await.unwrap();
        let _: Message = client.recv().unwrap();

        assert_err!(client.recv::<Message>());
    }

    #[tokio::test]
    async fn test_sequential_calls_do_not_leak() {
        let server = echo_server().await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        client.send(&message(1)).await.unwrap();
        let first: Message = client.recv().unwrap();
        client.send(&message(2)).await.unwrap();
        let second: Message = client.recv().unwrap();

        assert_eq!(first, message(1));
        assert_eq!(second, message(2));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("{\"stale\":true}"))
            .mount(&server)
            .await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        let err = client.send(&message(1)).await.unwrap_err();

        match err {
            ClientError::Remote { status } => assert_eq!(status, "500 Internal Server Error"),
            other => panic!("expected remote error, got {:?}", other),
        }
        assert!(client.recv::<serde_json::Value>().is_err());
    }

    #[tokio::test]
    async fn test_failed_send_clears_previous_response() {
        let server = echo_server().await;
        let mut client = HttpClient::new(&server.uri()).unwrap();
        client.send(&message(1)).await.unwrap();

        // a value that cannot be serialized as JSON
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], "key is not a string");
        let err = client.send(&bad).await.unwrap_err();

        assert!(matches!(err, ClientError::Encoding(_)));
        assert!(matches!(
            client.recv::<Message>(),
            Err(ClientError::Decoding { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = HttpClient::new(&format!("http://{}", addr)).unwrap();
        let err = client.send(&message(1)).await.unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert!(client.recv::<Message>().is_err());
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // declares 100 bytes, sends 10, then hangs up
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"id\":1,\"r",
                )
                .await
                .unwrap();
            socket.shutdown().await.ok();
        });

        let mut client = HttpClient::new(&format!("http://{}", addr)).unwrap();
        let err = client.send(&message(1)).await.unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert!(matches!(
            client.recv::<serde_json::Value>(),
            Err(ClientError::Decoding { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_response_body_is_decoding_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        client.send(&message(1)).await.unwrap();
        let err = client.recv::<Message>().unwrap_err();

        assert!(matches!(err, ClientError::Decoding { .. }));
    }

    #[tokio::test]
    async fn test_call_returns_response_directly() {
        let server = echo_server().await;
        let client = HttpClient::new(&server.uri()).unwrap();

        let received: Message = client.call(&message(7)).await.unwrap();

        assert_eq!(received, message(7));
    }

    #[tokio::test]
    async fn test_close_has_no_effect() {
        let server = echo_server().await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        client.close();
        client.send(&message(3)).await.unwrap();
        client.close();
        let received: Message = client.recv().unwrap();

        assert_eq!(received, message(3));
    }

    #[tokio::test]
    async fn test_supported_modules() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"rpc": "1.0", "web3": "1.0"}
            })))
            .mount(&server)
            .await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        let modules = client.supported_modules().await.unwrap();

        assert_eq!(modules.len(), 2);
        assert_eq!(modules["web3"], "1.0");
    }

    #[tokio::test]
    async fn test_supported_modules_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32601, "message": "the method rpc_modules does not exist/is not available"}
            })))
            .mount(&server)
            .await;
        let mut client = HttpClient::new(&server.uri()).unwrap();

        let err = client.supported_modules().await.unwrap_err();

        match err {
            ClientError::Rpc(error) => assert_eq!(error.code, -32601),
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[test]
    fn test_request_ids_increase() {
        let client = HttpClient::new("http://localhost:8545").unwrap();
        let first = client.next_request_id();
        let second = client.next_request_id();
        assert_eq!(second, first + 1);
    }
}
