/// Command line entry point
/// `serve` runs the HTTP transport, `modules` queries a remote one
use clap::{Parser, Subcommand};
use rpc_http_transport::{Config, HttpClient, HttpServer, Server};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Reported by `web3_clientVersion`
const CLIENT_VERSION: &str = concat!("rpc-http-transport/v", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "rpc-http-transport")]
#[command(about = "JSON-RPC over HTTP transport", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC over HTTP using configuration from the environment
    Serve,
    /// Print the modules exposed by a remote endpoint
    Modules {
        #[arg(short, long, env = "RPC_ENDPOINT", default_value = "http://127.0.0.1:8545")]
        endpoint: String,
    },
}

/// Initialize logging subsystem
pub fn initialize_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

/// Load and validate configuration
pub fn load_config() -> anyhow::Result<Config> {
    let config = Config::from_env()?;
    config.validate()?;

    info!(
        host = %config.server_host,
        port = %config.server_port,
        cors = %config.cors_allow_origins,
        max_request_content_length = config.max_request_content_length,
        "Configuration loaded"
    );

    Ok(config)
}

/// Dispatch engine exposed by the `serve` command
pub fn build_engine() -> Server {
    let mut engine = Server::new();
    engine.register_method("web3", "clientVersion", |_| async move {
        Ok(json!(CLIENT_VERSION))
    });
    engine
}

async fn serve() -> anyhow::Result<()> {
    let config = load_config()?;
    let server = HttpServer::new(&config, Arc::new(build_engine()))?;

    info!("Starting HTTP server...");
    match server.start().await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Server error: {}", e);
            Err(e)
        }
    }
}

async fn print_modules(endpoint: &str) -> anyhow::Result<()> {
    let mut client = HttpClient::new(endpoint)?;
    let modules = client.supported_modules().await?;
    client.close();

    let mut names: Vec<_> = modules.into_iter().collect();
    names.sort();
    for (module, version) in names {
        println!("{}\t{}", module, version);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialize_logging();

    match cli.command {
        Commands::Serve => serve().await,
        Commands::Modules { endpoint } => print_modules(&endpoint).await,
    }
}
