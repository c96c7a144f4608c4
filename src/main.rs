use chrono::Utc;
use quote_pipeline::api::AppState;
use quote_pipeline::hub::TokenValidator;
use quote_pipeline::{create_router, AppConfig, Hub, Pipeline, SessionManager, StaticTokenValidator, TickStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Session -> pipeline channel depth; a full channel backpressures the FIX reader
const TICK_CHANNEL_CAPACITY: usize = 10_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reads .env (if present) and QP_* variables
    let config = AppConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quote_pipeline=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Tick store: warm the caches from today's segments, prune expired days once
    let store = Arc::new(TickStore::open(config.store.clone())?);
    let today = Utc::now().date_naive();
    match store.warm_up(today) {
        Ok(count) => tracing::info!("🔥 Warmed caches with {} stored ticks", count),
        Err(e) => tracing::warn!("⚠️  Cache warm-up failed: {}", e),
    }
    match store.cleanup_older_than(store.retention_days(), today) {
        Ok(0) => {}
        Ok(removed) => tracing::info!("🧹 Removed {} expired day directories", removed),
        Err(e) => tracing::warn!("⚠️  Retention cleanup failed: {}", e),
    }

    let store_cancel = CancellationToken::new();
    let persister = store.start_persister(store_cancel.clone());

    // Distribution hub
    let validator = StaticTokenValidator::new(config.hub.auth_tokens.iter().cloned());
    if validator.is_empty() {
        tracing::warn!("⚠️  No QP_AUTH_TOKENS configured, every websocket connection will be refused");
    }
    let validator: Arc<dyn TokenValidator> = Arc::new(validator);
    let hub = Arc::new(Hub::new(config.hub.clone(), validator)?);

    // FIX session feeding the pipeline
    let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let session = Arc::new(SessionManager::new(config.fix.clone(), tick_tx));

    let pipeline = Pipeline::new(Arc::clone(&store), Arc::clone(&hub));
    let pipeline_stats = pipeline.stats();
    let pipeline_cancel = CancellationToken::new();
    let pipeline_handle = pipeline.start(tick_rx, pipeline_cancel.clone());

    let session_cancel = CancellationToken::new();
    let session_handle = Arc::clone(&session).start(session_cancel.clone());

    tracing::info!(
        "📡 FIX session targeting {} as {} -> {}",
        config.fix.endpoint(),
        config.fix.sender_comp_id,
        config.fix.target_comp_id
    );

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        hub: Arc::clone(&hub),
        session,
        pipeline: pipeline_stats,
        started_at: Utc::now(),
    });
    let app = create_router(state);

    let addr = config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Quote pipeline running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws?token=<token>", addr);
    tracing::info!(r#"   {{"action":"subscribe","symbols":["EURUSD"]}}"#);

    let shutdown_hub = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("🛑 Shutdown requested");
            // Websocket connections would otherwise hold the server open
            shutdown_hub.close_all();
        })
        .await?;

    // Upstream first so every received tick reaches the store before the final flush
    session_cancel.cancel();
    if let Err(e) = session_handle.await {
        tracing::error!("❌ Session supervisor panicked: {}", e);
    }

    pipeline_cancel.cancel();
    if let Err(e) = pipeline_handle.await {
        tracing::error!("❌ Pipeline task panicked: {}", e);
    }

    store_cancel.cancel();
    if let Err(e) = persister.await {
        tracing::error!("❌ Persister task panicked: {}", e);
    }

    let stats = store.stats();
    tracing::info!(
        "👋 Stopped: {} ticks received, {} persisted, {} dropped",
        stats.received,
        stats.persisted,
        stats.dropped_ticks
    );
    Ok(())
}
