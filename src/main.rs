use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use steamrec_api::{
    config::Config,
    db::{create_pool, create_redis_client, init_schema, Cache, SqliteStore},
    routes::{create_router, AppState},
    services::providers::SteamClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    if !config.has_api_key() {
        warn!("STEAM_API_KEY is not set; library sync will fail");
    }

    let pool = create_pool(&config.database_url).await?;
    init_schema(&pool).await?;
    info!(database_url = %config.database_url, "Database ready");

    let (cache, cache_handle) = match &config.redis_url {
        Some(redis_url) => {
            let client = create_redis_client(redis_url)?;
            let (cache, handle) = Cache::new(client).await;
            info!("Redis accelerator enabled");
            (Some(cache), Some(handle))
        }
        None => (None, None),
    };

    let steam = Arc::new(SteamClient::new(&config)?);
    let state = AppState::build(
        &config,
        Arc::new(SqliteStore::new(pool)),
        steam.clone(),
        steam.clone(),
        steam,
        cache,
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = cache_handle {
        handle.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
