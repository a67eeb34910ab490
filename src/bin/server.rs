//! Relay server binary: wires the stores, orchestrator and gateway
//! together and serves the WebSocket surface.

use std::sync::Arc;
use tracing::{info, warn};
use translive::config::RelayConfig;
use translive::gateway::{self, AppState};
use translive::oracle::{StartTimeOracle, shared_http_client};
use translive::orchestrator::SessionOrchestrator;
use translive::rooms::RoomRegistry;
use translive::store::{
    CacheBackend, DurableStore, KeywordStore, MemoryCache, MemoryDurable, MongoStore, RedisCache,
    TranscriptStore,
};
use translive::translate::llm::ChatClient;
use translive::translate::TranslationPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("translive=info")),
        )
        .init();

    let config = RelayConfig::from_env();
    if config.server.secret_key.is_none() {
        warn!("SECRET_KEY is not set; admin verification will always fail");
    }

    let http = shared_http_client();

    let cache: Arc<dyn CacheBackend> = match &config.cache.redis_url {
        Some(url) => {
            info!("using Redis cache at {url}");
            Arc::new(RedisCache::connect(url).await?)
        }
        None => {
            warn!("REDIS_URL is not set; using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let durable: Arc<dyn DurableStore> = match &config.store.host {
        Some(host) => {
            info!("using MongoDB at {host}:{}", config.store.port);
            Arc::new(MongoStore::connect(host, config.store.port, &config.store.db).await?)
        }
        None => {
            warn!("MONGODB_HOST is not set; using in-process store");
            Arc::new(MemoryDurable::new())
        }
    };

    let transcripts = Arc::new(TranscriptStore::new(
        Arc::clone(&cache),
        Arc::clone(&durable),
    ));
    let keywords = KeywordStore::new(
        Arc::clone(&cache),
        config.translate.seed_keywords.clone(),
    );
    let pipeline = Arc::new(TranslationPipeline::new(
        ChatClient::from_config(http.clone(), &config.translate),
        config.translate.languages.clone(),
        keywords,
    ));
    let oracle = Arc::new(StartTimeOracle::new(http.clone(), config.oracle.clone()));
    let rooms = Arc::new(RoomRegistry::new());

    let orchestrator = SessionOrchestrator::new(
        config.clone(),
        http,
        Arc::clone(&transcripts),
        pipeline,
        oracle,
        Arc::clone(&rooms),
    );

    let state = Arc::new(AppState {
        orchestrator: Arc::clone(&orchestrator),
        rooms,
        transcripts,
        durable,
        admin_secret: config.server.secret_key.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!("listening on {}", config.server.bind_addr);

    axum::serve(listener, gateway::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            orchestrator.shutdown();
        })
        .await?;

    Ok(())
}
