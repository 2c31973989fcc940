//! thesis-worker - thesis generation service
//!
//! Accepts thesis jobs over HTTP, runs them through the generation pipeline
//! and streams progress over SSE.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use thesis_common::config::{self, TomlConfig};
use thesis_common::events::EventBus;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use thesis_worker::config::{resolve_api_key, ApiKeyKind, WorkerConfig};
use thesis_worker::services::{
    GeminiClient, HttpDocumentFetcher, HttpDocumentIndex, LlmRelevanceScorer, OpenAlexClient,
    PipelineController, Scheduler, ZeroGptClient,
};
use thesis_worker::types::ServiceRegistry;
use thesis_worker::AppState;

const DEFAULT_PORT: u16 = 5730;
const DEFAULT_INDEX_URL: &str = "http://127.0.0.1:5731";
const DEFAULT_STORE_ID: &str = "thesis-references";
const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "thesis-worker", version, about = "Thesis generation worker")]
struct Args {
    /// HTTP port for the job surface
    #[arg(long, env = "THESIS_WORKER_PORT")]
    port: Option<u16>,

    /// Folder holding the SQLite database
    #[arg(long, env = "THESIS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let toml_config = config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_tracing(&toml_config)?;

    info!("Starting thesis-worker");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Config file: {}", config_path.display());

    let worker_config = WorkerConfig::from_toml(&toml_config)?;

    // Root folder: CLI/env (clap) → TOML → OS default
    let root_folder =
        config::resolve_root_folder(args.root_folder.as_deref(), "THESIS_ROOT_FOLDER", &toml_config);
    let db_path = config::ensure_root_folder(&root_folder)?;
    info!("Database: {}", db_path.display());

    let db_pool = thesis_worker::db::init_database_pool(&db_path).await?;
    let interrupted = thesis_worker::db::jobs::cleanup_interrupted_jobs(&db_pool).await?;
    if interrupted > 0 {
        warn!(interrupted, "Marked jobs from a previous run as failed");
    }

    let services = build_services(&db_pool, &toml_config, &worker_config).await?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let controller = Arc::new(PipelineController::new(
        db_pool.clone(),
        event_bus.clone(),
        services,
        worker_config.clone(),
    ));
    let scheduler = Scheduler::start(
        db_pool.clone(),
        event_bus.clone(),
        controller,
        worker_config.max_concurrent_jobs,
    );

    let state = AppState::new(db_pool, event_bus, Arc::clone(&scheduler));
    let app = thesis_worker::build_router(state);

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    info!("thesis-worker stopped");
    Ok(())
}

/// `RUST_LOG` wins; otherwise `[logging] level` applies to this crate and tower-http
fn init_tracing(toml_config: &TomlConfig) -> Result<()> {
    let level = &toml_config.logging.level;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("thesis_worker={level},tower_http={level}")))
        .context("Invalid log filter")?;

    let (writer, ansi) = match &toml_config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .init();
    Ok(())
}

async fn build_services(
    db: &sqlx::SqlitePool,
    toml_config: &TomlConfig,
    worker_config: &WorkerConfig,
) -> Result<ServiceRegistry> {
    let generation_key = resolve_api_key(db, toml_config, ApiKeyKind::Generation)
        .await?
        .context("A generation API key is required (settings table, THESIS_GENERATION_API_KEY or TOML)")?;
    let detector_key = resolve_api_key(db, toml_config, ApiKeyKind::Detector).await?;
    if detector_key.is_none() {
        warn!("Detector disabled, style convergence will pass text through unscored");
    }

    let store_id = toml_config
        .index_store_id
        .clone()
        .unwrap_or_else(|| DEFAULT_STORE_ID.to_string());
    let service_timeout = worker_config.service_timeout();

    let generator = Arc::new(GeminiClient::new(
        generation_key.clone(),
        toml_config.generation_model.clone(),
        Some(store_id.clone()),
        service_timeout,
    )?);
    let search = Arc::new(OpenAlexClient::new(
        toml_config.search_base_url.clone(),
        toml_config.contact_email.clone(),
        service_timeout,
    )?);
    let fetcher = Arc::new(HttpDocumentFetcher::new(
        worker_config.fetch_timeout(),
        worker_config.max_document_bytes,
    )?);
    let index = Arc::new(HttpDocumentIndex::new(
        toml_config
            .index_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string()),
        Some(generation_key),
        service_timeout,
    )?);
    let detector = Arc::new(ZeroGptClient::new(detector_key, service_timeout)?);
    let scorer = Arc::new(LlmRelevanceScorer::new(
        generator.clone(),
        worker_config.default_relevance_score,
    ));

    info!(store_id = %store_id, "External services configured");

    Ok(ServiceRegistry {
        search,
        scorer,
        fetcher,
        index,
        generator,
        detector,
        index_store_id: store_id,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
