/// Server side of the transport: JSON-RPC types, dispatch engine and the
/// HTTP handler that feeds it
pub mod dispatch;
pub mod http;
pub mod jsonrpc;

// Re-export for convenience
pub use dispatch::{InvocationMode, RpcService, Server};
pub use http::{new_http_handler, HttpServer, MAX_HTTP_REQUEST_CONTENT_LENGTH};
