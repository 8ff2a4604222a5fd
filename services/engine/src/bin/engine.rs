//! services/engine/src/bin/engine.rs

use async_openai::{config::OpenAIConfig, Client};
use engine_lib::{
    adapters::{
        FileArcStore, FileEntryStore, LocalMetadataAdapter, OpenAiChapterAdapter,
        OpenAiMetadataAdapter,
    },
    config::{Config, MetadataMode},
    error::EngineError,
    queue::{store::QueueStore, OfflineRequestQueue, QueueOptions, QueueServices},
};
use std::sync::Arc;
use storyloom_core::ports::MetadataExtractionService;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting story engine...");

    // --- 2. Initialize Service Adapters ---
    let openai_config = match &config.openai_api_key {
        Some(key) => OpenAIConfig::new().with_api_key(key),
        None => {
            warn!("OPENAI_API_KEY is not set; chapter generation requests will fail until one is provided");
            OpenAIConfig::new()
        }
    };
    let openai_client = Client::with_config(openai_config);

    if config.metadata_mode == MetadataMode::Remote
        && config.effective_metadata_mode() == MetadataMode::Local
    {
        warn!("METADATA_MODE=remote needs OPENAI_API_KEY; using the on-device extractor instead");
    }
    let metadata_adapter: Arc<dyn MetadataExtractionService> = match config.effective_metadata_mode()
    {
        MetadataMode::Local => Arc::new(LocalMetadataAdapter::new()),
        MetadataMode::Remote => Arc::new(OpenAiMetadataAdapter::new(
            openai_client.clone(),
            config.metadata_model.clone(),
        )),
    };
    let chapter_adapter = Arc::new(OpenAiChapterAdapter::new(
        openai_client.clone(),
        config.chapter_model.clone(),
    ));
    let arc_store = Arc::new(FileArcStore::new(config.arcs_path.clone()));
    let entry_store = Arc::new(FileEntryStore::new(config.entries_path.clone()));

    // --- 3. Open the Offline Queue ---
    // Reachability probing is owned by the host platform; the engine only
    // consumes the boolean signal. This standalone runner assumes connected.
    let (connectivity_tx, connectivity_rx) = tokio::sync::watch::channel(true);

    let services = QueueServices {
        entries: entry_store,
        metadata: metadata_adapter,
        chapters: chapter_adapter,
        arcs: arc_store,
    };
    let queue = OfflineRequestQueue::open(
        QueueStore::new(config.queue_path.clone()),
        services,
        config.user_id.clone(),
        connectivity_rx,
        QueueOptions {
            request_timeout: config.request_timeout,
            ..QueueOptions::default()
        },
    )
    .await;

    // --- 4. Drain and Watch ---
    let shutdown = CancellationToken::new();
    let watcher = queue.start_connectivity_watcher(shutdown.clone());

    info!(
        pending = queue.pending_request_count().await,
        "draining offline queue"
    );
    queue.process_all_pending().await;

    info!("Story engine running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    shutdown.cancel();
    drop(connectivity_tx);
    let _ = watcher.await;
    info!("Story engine stopped.");
    Ok(())
}
