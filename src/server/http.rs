/// HTTP transport for the JSON-RPC dispatch engine
/// Size gate, origin policy and stream adaptation for single-request dispatch
use crate::codec::JsonCodec;
use crate::server::dispatch::{InvocationMode, RpcService};
use crate::stream::ReadWriteNopCloser;
use crate::validation::Validator;
use crate::Config;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use futures::TryStreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tower::limit::ConcurrencyLimitLayer;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

/// Default cap on inbound request bodies (128 KiB)
pub const MAX_HTTP_REQUEST_CONTENT_LENGTH: u64 = 128 * 1024;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors raised while building the HTTP handler
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid CORS origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
}

/// Origins admitted by the CORS gate, in configuration order.
///
/// Entries are compared case-insensitively. An entry may hold one `*`
/// standing for any run of characters, e.g. `http://*.example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedOrigins(Vec<String>);

impl AllowedOrigins {
    /// Split a comma-separated list, trimming and lowercasing each entry.
    /// Empty entries are kept.
    pub fn parse(cors_allow_origins: &str) -> Self {
        Self(
            cors_allow_origins
                .split(',')
                .map(|domain| domain.trim().to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// `*` anywhere in the list admits every origin
    pub fn allows_any(&self) -> bool {
        self.0.iter().any(|origin| origin == "*")
    }

    pub fn permits(&self, origin: &str) -> bool {
        if self.allows_any() {
            return true;
        }
        let origin = origin.to_ascii_lowercase();
        self.0
            .iter()
            .any(|allowed| origin_matches(allowed, &origin))
    }

    /// CORS response headers for this allow-list: `POST` and `GET` only
    pub fn cors_layer(&self) -> Result<CorsLayer, ServerError> {
        let allow_origin = if self.allows_any() {
            AllowOrigin::any()
        } else {
            for origin in &self.0 {
                Validator::validate_origin(origin).map_err(|e| ServerError::InvalidOrigin {
                    origin: origin.clone(),
                    reason: e.to_string(),
                })?;
                HeaderValue::from_str(origin).map_err(|e| ServerError::InvalidOrigin {
                    origin: origin.clone(),
                    reason: e.to_string(),
                })?;
            }
            let origins = self.clone();
            AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
                origin
                    .to_str()
                    .map(|origin| origins.permits(origin))
                    .unwrap_or(false)
            })
        };

        Ok(CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::POST, Method::GET])
            .allow_headers([
                header::ACCEPT,
                header::CONTENT_TYPE,
                header::ORIGIN,
                HeaderName::from_static("x-requested-with"),
            ]))
    }
}

/// Match `origin` against an entry with at most one `*` wildcard.
/// Both sides are expected in lowercase.
fn origin_matches(pattern: &str, origin: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == origin,
        Some((prefix, suffix)) => {
            origin.len() >= prefix.len() + suffix.len()
                && origin.starts_with(prefix)
                && origin.ends_with(suffix)
        }
    }
}

#[derive(Clone)]
struct HandlerState {
    service: Arc<dyn RpcService>,
    max_request_content_length: u64,
}

/// Build the HTTP entry point for `service`.
///
/// Every request passes the CORS layer, then the method and origin gate,
/// then the size gate, and is finally dispatched as a single method call. Bind
/// address, TLS and timeouts are up to the caller.
pub fn new_http_handler(
    cors_allow_origins: &str,
    service: Arc<dyn RpcService>,
    max_request_content_length: u64,
) -> Result<Router, ServerError> {
    let origins = Arc::new(AllowedOrigins::parse(cors_allow_origins));
    let cors = origins.cors_layer()?;

    let state = HandlerState {
        service,
        max_request_content_length,
    };

    Ok(Router::new()
        .fallback(handle_json_http)
        .with_state(state)
        .layer(middleware::from_fn_with_state(origins, cors_gate))
        .layer(cors))
}

/// Reject methods other than `POST`/`GET` (and `OPTIONS` for preflight) and
/// requests whose origin is not allow-listed
async fn cors_gate(
    State(origins): State<Arc<AllowedOrigins>>,
    request: Request,
    next: Next,
) -> Response {
    if ![Method::POST, Method::GET, Method::OPTIONS].contains(request.method()) {
        debug!(method = %request.method(), "Method not allowed");
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "POST, GET, OPTIONS")],
            "method not allowed",
        )
            .into_response();
    }

    let admitted = match request.headers().get(header::ORIGIN) {
        None => true,
        Some(value) => match value.to_str() {
            Ok("") => true,
            Ok(origin) => origins.permits(origin),
            Err(_) => false,
        },
    };

    if !admitted {
        debug!(origin = ?request.headers().get(header::ORIGIN), "Origin not allowed");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    next.run(request).await
}

fn declared_content_length(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Serve exactly one JSON-RPC request from the body into the response
#[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
async fn handle_json_http(State(state): State<HandlerState>, request: Request) -> Response {
    let limit = state.max_request_content_length;
    if let Some(observed) = declared_content_length(&request) {
        if let Err(e) = Validator::validate_content_length(observed, limit) {
            debug!(observed, limit, "Request body too large");
            return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response();
        }
    }

    // Read one byte past the limit so an undeclared overflow is seen, not cut off.
    let body = request.into_body().into_data_stream().map_err(io::Error::other);
    let mut received = Vec::new();
    if let Err(e) = StreamReader::new(body)
        .take(limit.saturating_add(1))
        .read_to_end(&mut received)
        .await
    {
        debug!(error = %e, "Failed to read request body");
        return (
            StatusCode::BAD_REQUEST,
            format!("failed to read request body: {}", e),
        )
            .into_response();
    }
    let observed = received.len() as u64;
    if let Err(e) = Validator::validate_content_length(observed, limit) {
        debug!(observed, limit, "Undeclared request body too large");
        return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response();
    }

    let mut response = Response::new(Body::empty());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_CONTENT_TYPE),
    );

    let mut written = Vec::new();
    {
        // Dropping the codec closes it, on unwind as well.
        let reader = io::Cursor::new(received);
        let mut codec = JsonCodec::new(ReadWriteNopCloser::new(reader, &mut written));
        state
            .service
            .serve_single_request(&mut codec, InvocationMode::MethodInvocation)
            .await;
    }

    *response.body_mut() = Body::from(written);
    response
}

/// HTTP server with graceful shutdown
///
/// Adds the serving concerns the handler leaves to its caller: listen
/// address, timeouts, concurrency and rate limits, security headers.
pub struct HttpServer {
    router: Router,
    host: String,
    port: u16,
}

impl HttpServer {
    /// Create new HTTP server with rate limiting and CORS
    pub fn new(config: &Config, service: Arc<dyn RpcService>) -> anyhow::Result<Self> {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .key_extractor(SmartIpKeyExtractor)
                // one token replenished every 1/rps seconds
                .per_millisecond((1000 / u64::from(config.rate_limit_rps.max(1))).max(1))
                .burst_size(config.rate_limit_burst)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("Failed to build rate limiter config"))?,
        );

        let router = new_http_handler(
            &config.cors_allow_origins,
            service,
            config.max_request_content_length,
        )?
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(ConcurrencyLimitLayer::new(config.http_max_concurrency))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.http_timeout_seconds,
        )))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http());

        Ok(Self {
            router,
            host: config.server_host.clone(),
            port: config.server_port,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Bind the configured address and serve until a shutdown signal
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = self.address();
        info!("Starting HTTP server on {}", addr);

        let listener = tokio::time::timeout(Duration::from_secs(5), TcpListener::bind(&addr))
            .await
            .map_err(|_| anyhow::anyhow!("Timeout waiting to bind to {}", addr))?
            .map_err(|e| anyhow::anyhow!("Failed to bind to address {}: {}", addr, e))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until a shutdown signal
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(address = ?listener.local_addr().ok(), "Server listening");

        // Peer addresses feed the rate limiter's key extractor.
        axum::serve(
            listener,
            self.router
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        info!("Server shutdown completed");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
