mod config;
mod error;
mod server;

use anyhow::Context;
use axum::serve;
use crate::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use verso_api::{DocumentParser, ListingSource};
use verso_infra::cache::{CacheService, RedisCache, SharedCache};
use verso_infra::{LocalListingSource, MarkdownParser};
use verso_service::content::{
    CachedContentQueryService, ContentQueryService, ContentRepository, TreeMaterializer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，RUST_LOG 未设置时默认 info
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Starting Verso...");

    // 加载配置
    let config = Config::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    // 慢速缓存层（可选）
    let slow: Option<Arc<dyn SharedCache>> = match &config.redis {
        Some(redis_config) => {
            let client = redis::Client::open(redis_config.url.as_str())
                .with_context(|| format!("Invalid Redis url {}", redis_config.url))?;
            info!("Shared cache enabled at {}", redis_config.url);
            Some(Arc::new(RedisCache::with_namespace(
                Arc::new(client),
                redis_config.namespace.clone(),
            )))
        }
        None => {
            info!("No Redis configured, using in-process cache only");
            None
        }
    };
    let cache = Arc::new(CacheService::new(config.cache.clone(), slow));

    // 数据源与解析器
    let source: Arc<dyn ListingSource> = Arc::new(
        LocalListingSource::new(config.source.base_path.clone())
            .with_provider_id(config.source.provider_id.clone()),
    );
    let parser: Arc<dyn DocumentParser> = Arc::new(MarkdownParser::new());

    let materializer = Arc::new(
        TreeMaterializer::new(source.clone(), parser, config.content.clone())
            .context("Invalid content options")?,
    );
    let repository = Arc::new(ContentRepository::new(materializer, source, cache.clone()));

    // 预热快照，失败时等到首次请求再加载
    match repository.snapshot().await {
        Ok(snapshot) => info!(
            "Initial snapshot loaded: {} directories, {} items",
            snapshot.directories().len(),
            snapshot.items().len()
        ),
        Err(e) => warn!("Initial snapshot load failed: {}", e),
    }

    let queries: Arc<dyn ContentQueryService> = Arc::new(
        CachedContentQueryService::new(repository.clone(), cache.clone())
            .with_ttl(config.cache.default_ttl()),
    );

    let app = server::create_router(server::AppState {
        repository: repository.clone(),
        queries,
        cache,
    });

    // 启动HTTP服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Server listening on {}", addr);

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    repository.shutdown();
    info!("Verso stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
