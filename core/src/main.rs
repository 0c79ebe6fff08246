/// Threadline Conversation Store - Main entry point
use std::env;
use std::sync::Arc;
use threadline_core::api::{start_api, AppState};
use threadline_core::auth::LocalAuth;
use threadline_core::events::EventBus;
use threadline_core::store::DocTree;
use threadline_core::{Config, Synchronizer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    std::fs::create_dir_all(&config.data_dir)?;
    let tree = DocTree::open(&config.data_dir, config.flush_writes)
        .map_err(|e| anyhow::anyhow!("Storage error: {}", e))?;

    let events = EventBus::default();
    let sync = Synchronizer::new(tree, config.log_append_retries, events.clone());

    info!("Starting Threadline conversation store");
    info!("   Data dir: {:?}", config.data_dir);
    info!("   API: http://{}", config.api_addr);

    let auth = Arc::new(LocalAuth::new(sync.directory().clone()));
    let state = AppState {
        sync,
        auth,
        events,
        started_at: chrono::Utc::now().to_rfc3339(),
    };

    tokio::select! {
        result = start_api(state, config.api_addr) => {
            result.map_err(|e| anyhow::anyhow!("API error: {}", e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    Ok(())
}
