/// Message codec: one JSON-RPC request in, one response out
use crate::server::jsonrpc::{validate_request, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::stream::DuplexStream;
use async_trait::async_trait;
use mockall::automock;
use serde_json::Value;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// A message that could not be turned into a request.
///
/// Carries the id when one could be recovered so the error response
/// can still be correlated by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidMessage {
    pub id: Option<Value>,
    pub error: JsonRpcError,
}

impl InvalidMessage {
    fn new(error: JsonRpcError) -> Self {
        Self { id: None, error }
    }
}

/// Server side of a codec, as seen by the dispatch engine
#[automock]
#[async_trait]
pub trait ServerCodec: Send {
    /// Read and decode the next request
    async fn read_request(&mut self) -> Result<JsonRpcRequest, InvalidMessage>;

    /// Encode a response onto the stream
    async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()>;

    /// Release codec resources. Idempotent.
    fn close(&mut self);
}

/// Decode a single JSON-RPC request from raw bytes
pub fn decode_request(bytes: &[u8]) -> Result<JsonRpcRequest, InvalidMessage> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(InvalidMessage::new(JsonRpcError::parse_error_with_message(
            "empty request body",
        )));
    }

    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| InvalidMessage::new(JsonRpcError::parse_error_with_message(&e.to_string())))?;

    if value.is_array() {
        return Err(InvalidMessage::new(
            JsonRpcError::invalid_request_with_message("batch requests are not supported"),
        ));
    }

    validate_request(&value).map_err(|error| InvalidMessage {
        id: value.get("id").filter(|id| !id.is_null()).cloned(),
        error,
    })
}

/// JSON codec over a [`DuplexStream`].
///
/// The request is read until EOF, so the stream must end after one message.
pub struct JsonCodec<S: DuplexStream> {
    stream: S,
    read_buf: Vec<u8>,
    closed: bool,
}

impl<S: DuplexStream> JsonCodec<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl<S: DuplexStream> ServerCodec for JsonCodec<S> {
    async fn read_request(&mut self) -> Result<JsonRpcRequest, InvalidMessage> {
        if self.closed {
            return Err(InvalidMessage::new(JsonRpcError::internal_error(
                "codec is closed",
            )));
        }

        self.read_buf.clear();
        self.stream
            .read_to_end(&mut self.read_buf)
            .await
            .map_err(|e| {
                InvalidMessage::new(JsonRpcError::parse_error_with_message(&format!(
                    "failed to read request: {}",
                    e
                )))
            })?;

        debug!(bytes = self.read_buf.len(), "Read request body");
        decode_request(&self.read_buf)
    }

    async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "codec is closed"));
        }

        let mut encoded = serde_json::to_vec(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        encoded.push(b'\n');

        self.stream.write_all(&encoded).await?;
        self.stream.flush().await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.read_buf = Vec::new();
        if let Err(e) = self.stream.close() {
            debug!(error = %e, "Stream close failed");
        }
        debug!("Codec closed");
    }
}

impl<S: DuplexStream> Drop for JsonCodec<S> {
    fn drop(&mut self) {
        self.close();
    }
}
