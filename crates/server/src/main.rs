//! Sitevoice server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sitevoice_config::{load_settings, Settings};
use sitevoice_index::{
    ChunkerConfig, CrawlOrchestrator, IncrementalIndexer, IndexerConfig,
};
use sitevoice_retrieval::{
    EngineConfig, HttpEmbeddingConfig, HttpEmbeddingProvider, HybridSearchEngine, IndexKind,
    RetrievalCache, VectorStore, VectorStoreConfig,
};
use sitevoice_server::{
    create_router, init_metrics, AppState, HttpCrawlerConfig, HttpCrawlerDriver,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("SITEVOICE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing is not initialized yet, use eprintln for early logging
            eprintln!(
                "Loaded configuration (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&settings);
    tracing::info!("Starting sitevoice server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    let metrics_handle = if settings.observability.metrics_enabled {
        init_metrics()
    } else {
        None
    };

    let mut state = AppState::new(settings.clone());
    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
        tracing::info!("Prometheus metrics available at /metrics");
    }

    // The retrieval stack comes up degraded when the store is offline;
    // health checks report it and search answers 503 until it returns.
    match init_retrieval(&settings).await {
        Ok((store, engine, orchestrator)) => {
            tracing::info!("Retrieval store initialized");
            state = state
                .with_store(store)
                .with_engine(engine)
                .with_orchestrator(orchestrator);
        },
        Err(e) => {
            tracing::error!(error = %e, "Retrieval store unavailable, starting degraded");
        },
    }

    // Voice session expiry sweeper.
    let _sweeper_shutdown = state.voice.start_sweeper();

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize the store, search engine and crawl orchestrator
async fn init_retrieval(
    settings: &Settings,
) -> Result<
    (
        Arc<VectorStore>,
        Arc<HybridSearchEngine>,
        Arc<CrawlOrchestrator>,
    ),
    sitevoice_core::Error,
> {
    let store = Arc::new(
        VectorStore::connect(VectorStoreConfig {
            database_url: settings.database.url.clone(),
            max_connections: settings.database.max_connections,
            min_connections: settings.database.min_connections,
            acquire_timeout_secs: settings.database.acquire_timeout_secs,
            dimensions: settings.embedding.dimensions,
            ..Default::default()
        })
        .await
        .map_err(sitevoice_core::Error::from)?,
    );
    store
        .ensure_schema()
        .await
        .map_err(sitevoice_core::Error::from)?;
    // The default ANN index; rebuilt on demand via reindex.
    if let Err(e) = store.reindex(IndexKind::Hnsw).await {
        tracing::warn!(error = %e, "ANN index creation deferred");
    }

    let embedder = Arc::new(HttpEmbeddingProvider::new(HttpEmbeddingConfig {
        endpoint: settings.embedding.endpoint.clone(),
        model: settings.embedding.model.clone(),
        dimensions: settings.embedding.dimensions,
        batch_size: settings.embedding.batch_size,
        timeout: Duration::from_millis(settings.embedding.timeout_ms),
    })?);

    let engine = Arc::new(HybridSearchEngine::new(
        store.clone(),
        embedder.clone(),
        Arc::new(RetrievalCache::new()),
        EngineConfig {
            rrf_k: settings.search.rrf_k,
            vector_weight: settings.search.vector_weight,
            cache_ttl: Duration::from_secs(settings.search.cache_ttl_secs),
            cache_swr: Duration::from_secs(settings.search.cache_swr_secs),
            strategy_timeout: Duration::from_millis(settings.search.strategy_timeout_ms),
            use_index: Some(IndexKind::Hnsw),
            fan_out_factor: 2,
        },
    ));

    let driver = Arc::new(HttpCrawlerDriver::new(HttpCrawlerConfig {
        endpoint: settings.crawler.driver_endpoint.clone(),
        timeout: Duration::from_secs(30),
    })?);

    let indexer = Arc::new(IncrementalIndexer::new(
        store.clone(),
        embedder,
        driver,
        IndexerConfig {
            parallelism: settings.crawler.parallelism,
            retry_attempts: settings.crawler.retry_attempts,
            chunker: ChunkerConfig::clamped(
                settings.crawler.chunk_tokens,
                settings.crawler.chunk_overlap,
            ),
            embed_batch: settings.crawler.embed_batch,
        },
    ));
    let orchestrator = CrawlOrchestrator::start(indexer, 2);

    Ok((store, engine, orchestrator))
}

/// Initialize tracing with env-filter and optional JSON output
fn init_tracing(settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("sitevoice={},tower_http=debug", settings.observability.log_level).into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
