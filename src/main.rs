use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;

mod cli;
mod client;
mod config;
mod db;
mod handlers;
mod metrics;
mod models;
mod repository;
mod ws;


use crate::config::{ClientConfig, FileConfig, PairchatConfig, ServerConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::MessageRepository;
use crate::ws::ConnectionRegistry;

#[derive(Parser)]
#[command(name = "pairchat")]
#[command(about = "Two-party real-time chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.pairchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Server(ServerArgs),

    /// Connect to a relay server and chat with a peer
    Chat(ChatArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Relay server URL
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Identity to authenticate as
    #[arg(long)]
    user: i64,

    /// Peer identity to chat with
    #[arg(long)]
    peer: i64,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub repository: Arc<MessageRepository>,
    pub metrics: Arc<ServerMetrics>,
    pub server_config: Arc<ServerConfig>,
    pub db: Arc<Database>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PairchatConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Server(args) => run_server(args, config).await,
        Commands::Chat(args) => run_chat(args, config).await,
    }
}

fn init_tracing(default_directive: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

async fn run_server(args: ServerArgs, config: PairchatConfig) -> Result<()> {
    let default_directive = if args.debug {
        "pairchat=debug,tower_http=debug,info"
    } else {
        "pairchat=info,tower_http=info,warn"
    };
    init_tracing(default_directive);

    info!("Starting Pairchat relay server");

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Failed to load configuration")?;

    let mut server_config = ServerConfig::from_file(&file_config.server);
    if let Some(host) = args.host {
        server_config.host = host;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }
    let server_config = Arc::new(server_config);

    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);

    let repository = Arc::new(MessageRepository::new(db.pool.clone()));

    // The registry is owned here and passed by reference; its lifetime is the
    // server's lifetime.
    let registry = Arc::new(ConnectionRegistry::new());
    let metrics = Arc::new(ServerMetrics::new());

    let app_state = AppState {
        registry,
        repository,
        metrics,
        server_config: server_config.clone(),
        db,
    };

    let app = build_router(app_state);

    let addr = format!("{}:{}", server_config.host, server_config.port)
        .parse::<SocketAddr>()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Pairchat listening on http://{}", actual_addr);
    info!("  GET /ws                               - WebSocket relay endpoint");
    info!("  GET /api/messages/{{user_id}}/{{other_id}} - Conversation history");
    info!("  GET /api/health                       - Health and metrics");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, stopping...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route(
            "/api/messages/{user_id}/{other_id}",
            get(handlers::get_conversation),
        )
        .route("/api/health", get(handlers::health_handler))
        .route("/api/health/ready", get(handlers::health_ready_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_chat(args: ChatArgs, config: PairchatConfig) -> Result<()> {
    init_tracing("pairchat=warn");

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Failed to load configuration")?;
    let client_config = ClientConfig::from_file(&file_config.client);

    cli::chat_command(args.server, args.user, args.peer, &client_config).await
}
