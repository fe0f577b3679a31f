/// Common utilities for integration tests
use rpc_http_transport::{new_http_handler, Server};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Engine with a small `test` module and a subscription method
pub fn test_engine() -> Server {
    let mut engine = Server::new();
    engine
        .register_method("test", "echo", |params| async move {
            Ok(params.unwrap_or(Value::Null))
        })
        .register_method("eth", "subscribe", |_| async move { Ok(json!("0x1")) });
    engine
}

/// Serve `test_engine` behind the HTTP handler on an ephemeral port
pub async fn spawn_handler(cors_allow_origins: &str, max_request_content_length: u64) -> SocketAddr {
    let router = new_http_handler(
        cors_allow_origins,
        Arc::new(test_engine()),
        max_request_content_length,
    )
    .expect("valid handler configuration");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local address");

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    addr
}

pub fn endpoint(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}
