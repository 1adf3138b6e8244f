use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use greenloop::config::AppConfig;
use greenloop::server::{create_router, AppState};
use greenloop::shutdown::{graceful_shutdown, wait_for_shutdown};
use greenloop::state::WorkflowState;

#[derive(Parser)]
#[command(name = "greenloop", about = "Multi-agent TDD workflow orchestrator")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Execute one task to completion and print the final state as JSON
    Run {
        /// Natural-language description of the coding task
        #[arg(long)]
        task: String,
        /// Run id to use; generated when omitted
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Run { task, run_id } => run_once(config, task, run_id).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting greenloop server"
    );

    let state = Arc::new(AppState::new(config.clone()).await?);
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}

async fn run_once(
    config: AppConfig,
    task: String,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState::new(config).await?;
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let workflow_state = WorkflowState::new(&run_id, task.trim());
    state.store.set(&run_id, &workflow_state).await?;

    tracing::info!(run_id = %run_id, "Starting one-shot run");

    let cancel = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let final_state = state.controller.run(&run_id, cancel).await?;

    println!("{}", serde_json::to_string_pretty(&final_state)?);

    if final_state.status == greenloop::state::RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
