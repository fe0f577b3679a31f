/// JSON-RPC over HTTP transport
/// Client transport, single-request server handler and the stream adapter
/// joining the two halves of an HTTP exchange
use crate::server::http::MAX_HTTP_REQUEST_CONTENT_LENGTH;

pub mod client;
pub mod codec;
pub mod server;
pub mod stream;
pub mod validation;

// Re-export key types for public API
pub use client::{ClientError, HttpClient};
pub use codec::{JsonCodec, ServerCodec};
pub use server::{new_http_handler, HttpServer, InvocationMode, RpcService, Server};
pub use stream::{DuplexStream, ReadWriteNopCloser};

/// Upper bound accepted for `MAX_REQUEST_CONTENT_LENGTH` (16 MiB)
const MAX_CONFIGURABLE_CONTENT_LENGTH: u64 = 16 * 1024 * 1024;

/// Server configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub log_level: String,
    pub cors_allow_origins: String,
    pub max_request_content_length: u64,
    // HTTP and rate limiting config
    pub http_timeout_seconds: u64,
    pub http_max_concurrency: usize,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8545,
            log_level: "info".to_string(),
            cors_allow_origins: "*".to_string(),
            max_request_content_length: MAX_HTTP_REQUEST_CONTENT_LENGTH,
            http_timeout_seconds: 15,
            http_max_concurrency: 100,
            rate_limit_rps: 50,
            rate_limit_burst: 100,
        }
    }
}

impl Config {
    /// Create a new Config instance (for testing)
    pub fn new(server_host: String, server_port: u16, cors_allow_origins: String) -> Self {
        Self {
            server_host,
            server_port,
            cors_allow_origins,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let server_host = std::env::var("SERVER_HOST").unwrap_or(defaults.server_host);
        let server_port = match std::env::var("SERVER_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid SERVER_PORT value: {}", port))?,
            Err(_) => defaults.server_port,
        };

        let log_level = std::env::var("RUST_LOG").unwrap_or(defaults.log_level);
        let cors_allow_origins =
            std::env::var("CORS_ALLOW_ORIGINS").unwrap_or(defaults.cors_allow_origins);

        let max_request_content_length = match std::env::var("MAX_REQUEST_CONTENT_LENGTH") {
            Ok(limit) => limit.parse::<u64>().map_err(|_| {
                anyhow::anyhow!("Invalid MAX_REQUEST_CONTENT_LENGTH value: {}", limit)
            })?,
            Err(_) => defaults.max_request_content_length,
        };

        let http_timeout_seconds = std::env::var("HTTP_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.http_timeout_seconds);

        let http_max_concurrency = std::env::var("HTTP_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.http_max_concurrency);

        let rate_limit_rps = std::env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.rate_limit_rps);

        let rate_limit_burst = std::env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.rate_limit_burst);

        Ok(Self {
            server_host,
            server_port,
            log_level,
            cors_allow_origins,
            max_request_content_length,
            http_timeout_seconds,
            http_max_concurrency,
            rate_limit_rps,
            rate_limit_burst,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_host.trim().is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server_port == 0 {
            return Err(anyhow::anyhow!("Server port must be greater than 0"));
        }

        // CORS origins basic validation (non-empty)
        if self.cors_allow_origins.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "CORS_ALLOW_ORIGINS cannot be empty (use * or CSV list)"
            ));
        }

        if self.max_request_content_length == 0
            || self.max_request_content_length > MAX_CONFIGURABLE_CONTENT_LENGTH
        {
            return Err(anyhow::anyhow!(
                "MAX_REQUEST_CONTENT_LENGTH must be between 1 and {}",
                MAX_CONFIGURABLE_CONTENT_LENGTH
            ));
        }

        // HTTP configs
        if self.http_timeout_seconds == 0 || self.http_timeout_seconds > 300 {
            return Err(anyhow::anyhow!(
                "HTTP timeout must be between 1 and 300 seconds"
            ));
        }
        if self.http_max_concurrency == 0 || self.http_max_concurrency > 10_000 {
            return Err(anyhow::anyhow!(
                "HTTP max concurrency must be between 1 and 10000"
            ));
        }
        if self.rate_limit_rps == 0 || self.rate_limit_rps > 10_000 {
            return Err(anyhow::anyhow!(
                "RATE_LIMIT_RPS must be between 1 and 10000"
            ));
        }
        if self.rate_limit_burst == 0 || self.rate_limit_burst > 10_000 {
            return Err(anyhow::anyhow!(
                "RATE_LIMIT_BURST must be between 1 and 10000"
            ));
        }

        Ok(())
    }
}
