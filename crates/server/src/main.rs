use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediaflow_core::{
    load_config, validate_config, Broker, BrokerEventPublisher, EventPublisher, FfmpegTool,
    FsStorage, MediaTool, SqliteBroker, SqliteTaskStore, SqliteVideoStore, StorageGateway,
    TaskQueue, TaskStore, TranscodeOrchestrator, TranscodeTaskHandler, VideoStore,
};

use mediaflow_server::api::create_router;
use mediaflow_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("MEDIAFLOW_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("MEDIAFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).context("Failed to serialize config")?;
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        config_hash = &config_hash[..16],
        database = ?config.database.path,
        service = %config.queue.service,
        "Configuration loaded successfully"
    );

    // Stores and broker share one SQLite file
    let task_store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::new(&config.database.path).context("Failed to create task store")?,
    );
    let broker: Arc<dyn Broker> = Arc::new(
        SqliteBroker::new(&config.database.path, config.queue.partitions)
            .context("Failed to create broker")?,
    );
    let videos: Arc<dyn VideoStore> = Arc::new(
        SqliteVideoStore::new(&config.database.path).context("Failed to create video store")?,
    );
    info!("Stores initialized");

    let storage: Arc<dyn StorageGateway> = Arc::new(FsStorage::new(config.storage.clone()));
    info!(root = ?config.storage.root, "Using {} storage", storage.name());

    let tool: Arc<dyn MediaTool> = Arc::new(FfmpegTool::new(config.media.clone()));
    if let Err(e) = tool.validate().await {
        warn!("Media tool validation failed, transcodes will fail until fixed: {}", e);
    }

    let events: Arc<dyn EventPublisher> = Arc::new(BrokerEventPublisher::new(
        Arc::clone(&broker),
        config.transcode.events_topic.clone(),
        config.transcode.moderation_topic.clone(),
    ));

    let orchestrator = Arc::new(TranscodeOrchestrator::new(
        config.transcode.clone(),
        Arc::clone(&videos),
        storage,
        tool,
        events,
    ));
    info!(
        max_concurrent_runs = config.transcode.max_concurrent_runs,
        "Transcode orchestrator initialized"
    );

    // Queue consumers
    let queue = TaskQueue::new(config.queue.clone(), broker, task_store);
    queue
        .register_handler(
            config.transcode.task_type.clone(),
            Arc::new(TranscodeTaskHandler::new(Arc::clone(&orchestrator))),
        )
        .await;
    queue.start().await;
    info!("Task queue started");

    let state = Arc::new(AppState::new(
        config.clone(),
        queue.clone(),
        videos,
        Arc::clone(&orchestrator),
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Cancel runs first so consumers are not held up by long encodes.
    // Interrupted runs release their claims and leave their records
    // uncommitted for the next start.
    info!("Server shutting down...");
    orchestrator.shutdown();
    queue.stop().await;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
