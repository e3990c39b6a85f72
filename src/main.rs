//! Lingo Gateway Service
//! Streaming gateway between LLM agent runs and web clients
//!
//! Features:
//! - Redis Streams message queue with consumer groups and SSE fan-out
//! - Per-run chunk buffer for replay after reconnects
//! - Background task orchestration with human-in-the-loop suspension
//! - Postgres-backed task/message/translation state
//! - Graceful shutdown with SIGTERM handling

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lingo_gateway::agent::AgentClient;
use lingo_gateway::api::{app_router, AppState};
use lingo_gateway::config::Config;
use lingo_gateway::fetch::AttachmentFetcher;
use lingo_gateway::mq::{MqConfig, RunBuffer, Rsmq};
use lingo_gateway::orchestrator::Orchestrator;
use lingo_gateway::store::Store;

/// Lingo Gateway Service - agent run streaming for web clients
#[derive(Parser, Debug)]
#[command(name = "lingo-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streaming gateway between LLM agent runs and web clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Resolves on SIGTERM/SIGINT; running streams finish their teardown.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Lingo Gateway Service"
    );

    let config = Config::load()?;
    config.validate()?;

    info!(
        agent_api = %config.agent_api_url,
        bind = %config.bind_addr(),
        mq_maxlen = config.redis_stream_mq_maxlen,
        mq_ttl_seconds = config.redis_stream_mq_ttl_seconds,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let redis_url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("REDIS_URL not configured"))?;
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL not configured"))?;

    let rsmq = Rsmq::connect(redis_url, MqConfig::from_config(&config)).await?;
    let buffer = RunBuffer::new(&rsmq);
    let store = Store::connect(database_url).await?;
    let agent = Arc::new(AgentClient::new(
        &config.agent_api_url,
        config.agent_timeout_secs,
    )?);
    let fetcher = Arc::new(AttachmentFetcher::new(
        config.attachment_fetch_timeout_secs,
    )?);

    let orchestrator = Orchestrator::new(
        store.clone(),
        agent.clone(),
        rsmq.clone(),
        buffer.clone(),
        fetcher.clone(),
    );

    let state = AppState {
        rsmq,
        buffer,
        store,
        agent,
        orchestrator,
    };

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;

    info!(addr = %config.bind_addr(), "Lingo Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Lingo Gateway Service stopped");
    Ok(())
}
