use anyhow::{Context, Result};
use gamedata_publish::config::Config;
use gamedata_publish::pipeline::Publisher;
use gamedata_publish::registry::VersionRegistry;
use gamedata_publish::scheduler;
use gamedata_publish::server::{build_router, AppState};
use gamedata_publish::storage::{BlobStore, FsBlobStore, MemoryBlobStore};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gamedata_publish=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!("Starting game data publish service");

    // Load configuration from environment
    let config = Config::from_env()?;

    let blobs: Arc<dyn BlobStore> = match &config.blob_store_dir {
        Some(dir) => {
            info!("Storing artifacts in {}", dir.display());
            Arc::new(FsBlobStore::new(dir))
        }
        None => {
            warn!("BLOB_STORE_DIR not set, artifacts are kept in memory only");
            Arc::new(MemoryBlobStore::new())
        }
    };
    let registry = Arc::new(VersionRegistry::new(blobs, config.retire_grace));
    registry
        .restore()
        .await
        .context("Failed to restore versions from the blob store")?;
    let publisher = Arc::new(Publisher::from_config(&config, registry.clone())?);

    if config.api_key.is_none() {
        warn!("API_KEY not set, publish and administration routes are disabled");
    }

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = scheduler::start_scheduler(registry, &config.gc_schedule).await?;

    let state = Arc::new(AppState {
        publisher,
        api_key: config.api_key.clone(),
    });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
