use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use fastworkflow_core::config::{FastworkflowConfig, SHUTDOWN_GRACE_SECS};
use fastworkflow_registry::WorkflowRegistry;
use fastworkflow_runtime::Engine;

mod app;
mod auth;
mod http;
mod stream;

/// Serve a fastWorkflow workflow directory over HTTP.
#[derive(Parser)]
#[command(name = "fastworkflow-gateway", version)]
struct Args {
    /// Workflow directory containing the _commands/ tree.
    #[arg(long)]
    workflow_dir: PathBuf,

    /// Config file path (defaults to ./fastworkflow.toml when present).
    #[arg(long)]
    config: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Decode JWTs without signature verification (trusted networks only).
    #[arg(long)]
    unsigned_jwt: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fastworkflow_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    if !args.workflow_dir.is_dir() {
        error!(path = %args.workflow_dir.display(), "workflow directory does not exist");
        std::process::exit(2);
    }

    if let Err(e) = run(args).await {
        error!(error = %e, "fatal runtime error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = FastworkflowConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if args.unsigned_jwt {
        config.gateway.expect_signed_jwt = false;
    }

    let jwt = auth::JwtManager::new(
        std::path::Path::new(&config.gateway.jwt_keys_dir),
        config.gateway.expect_signed_jwt,
    )?;

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // Applications embedding the gateway register their response generators,
    // extraction hooks, and context classes here before the first request.
    let registry = Arc::new(WorkflowRegistry::new());
    let engine = Arc::new(Engine::new(config, &args.workflow_dir, registry)?);

    let state = Arc::new(app::AppState::new(engine.clone(), jwt));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("fastWorkflow gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: flush workflow state within the grace window.
    let _ = tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), engine.shutdown()).await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // If the signal handler cannot be installed, never resolve; the
        // server then runs until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
