//! ccr-reviewer - Code compliance review service
//!
//! Ingests standard sets from repositories, classifies them against a
//! controlled vocabulary and reviews target repositories for compliance.
//! Serves a REST API plus an SSE event stream.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ccr_common::config::{load_toml_config, resolve_config_path};
use ccr_common::events::EventBus;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use ccr_reviewer::config::ReviewerConfig;
use ccr_reviewer::db;
use ccr_reviewer::services::{
    AnthropicClient, ComplianceProcessor, GitFetcher, LlmClient, LlmGateway, RepositoryFetcher,
    StandardSetProcessor, Workspace,
};
use ccr_reviewer::utils::RetryPolicy;
use ccr_reviewer::AppState;

const MODULE_NAME: &str = "ccr-reviewer";

/// Message recorded on reviews a previous process left running
const STALE_REVIEW_MESSAGE: &str = "Review interrupted by service restart";

/// Backoff before the second LLM attempt after a transport failure
const LLM_RETRY_BACKOFF: Duration = Duration::from_secs(2);

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line arguments for ccr-reviewer
#[derive(Parser, Debug)]
#[command(name = "ccr-reviewer")]
#[command(about = "Code compliance review service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CCR_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "CCR_DATABASE")]
    database: Option<PathBuf>,

    /// Address to bind to
    #[arg(short, long, env = "CCR_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), MODULE_NAME);
    let mut config: ReviewerConfig = load_toml_config(config_path.as_deref())
        .context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.base.port = port;
    }
    if let Some(database) = args.database {
        config.base.database_path = database;
    }
    if let Some(bind) = args.bind {
        config.base.bind_address = bind;
    }

    ccr_common::logging::init_logging(&config.base.logging).context("Failed to initialize logging")?;

    info!("Starting ccr-reviewer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }

    let api_key = config.llm.resolve_api_key().context("LLM configuration")?;

    // Database
    info!("Database: {}", config.base.database_path.display());
    let db_pool = ccr_common::db::init_database(&config.base.database_path)
        .await
        .context("Failed to open database")?;

    let interrupted = db::standard_sets::sweep_interrupted_ingests(&db_pool).await?;
    let orphaned = db::standards::sweep_orphaned_staged_rows(&db_pool).await?;
    let stale = db::code_reviews::sweep_stale_reviews(&db_pool, STALE_REVIEW_MESSAGE).await?;
    if interrupted + orphaned + stale > 0 {
        warn!(
            interrupted_ingests = interrupted,
            orphaned_standards = orphaned,
            stale_reviews = stale,
            "Recovered state left by a previous process"
        );
    }

    std::fs::create_dir_all(&config.base.workspace_root).with_context(|| {
        format!(
            "Failed to create workspace root {}",
            config.base.workspace_root.display()
        )
    })?;
    let stale_workspaces = Workspace::sweep_stale(&config.base.workspace_root)
        .context("Failed to clear stale workspaces")?;
    if stale_workspaces > 0 {
        warn!(count = stale_workspaces, "Removed workspaces left by a previous process");
    }
    info!("Workspace root: {}", config.base.workspace_root.display());
    if let Some(reports_dir) = &config.base.reports_dir {
        info!("Reports directory: {}", reports_dir.display());
    }

    // Pipeline collaborators
    let llm_client: Arc<dyn LlmClient> = Arc::new(
        AnthropicClient::new(&config.llm, api_key).context("Failed to build LLM client")?,
    );
    let gateway = Arc::new(LlmGateway::new(llm_client, config.llm.malformed_retries));
    let fetcher: Arc<dyn RepositoryFetcher> =
        Arc::new(GitFetcher::new(&config.fetch, config.base.workspace_root.clone()));
    let retry_policy = RetryPolicy::new(config.llm.unavailable_attempts, LLM_RETRY_BACKOFF);
    info!(model = %config.llm.model, api_base = %config.llm.api_base, "LLM client initialized");

    let event_bus = EventBus::new(100);

    let standard_set_processor = Arc::new(
        StandardSetProcessor::new(
            db_pool.clone(),
            event_bus.clone(),
            fetcher.clone(),
            gateway.clone(),
            retry_policy,
        )
        .with_only_files(config.standards.only_files.clone()),
    );
    let compliance_processor = Arc::new(
        ComplianceProcessor::new(db_pool.clone(), event_bus.clone(), fetcher, gateway, retry_policy)
            .with_reports_dir(config.base.reports_dir.clone())
            .with_max_file_bytes(config.fetch.max_file_bytes),
    );

    let state = AppState::new(db_pool.clone(), event_bus, standard_set_processor, compliance_processor);
    let app = ccr_reviewer::build_router(state.clone());

    let ip = config
        .base
        .bind_address
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid bind address '{}'", config.base.bind_address))?;
    let addr = SocketAddr::new(ip, config.base.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let cancelled = shutdown_state.cancel_all().await;
            if cancelled > 0 {
                info!(cancelled, "Cancelled running reviews");
            }
        })
        .await
        .context("Server error")?;

    // Give cancelled reviews a moment to record their terminal status
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
    while !state.cancellation_tokens.read().await.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            warn!("Reviews still running at shutdown; they will be failed on next start");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    db_pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C (or SIGTERM on unix)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
