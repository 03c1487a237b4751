use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use audit_tracker::{
    auth::jwt::JwtService, config::AppConfig, db, extract::PdfiumExtractor, routes, s3,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        store_timeout_secs = config.store_timeout.as_secs(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(
        &config.database_url,
        config.database_max_pool_size,
        Some(config.store_timeout),
    )?;
    let migration_pool = pool.clone();
    tokio::task::spawn_blocking(move || db::run_migrations(&migration_pool))
        .await
        .context("migration task panicked")??;

    let storage = s3::connect_storage(&config).await?;
    let jwt = JwtService::from_config(&config)?;
    let address = format!("{}:{}", config.server_host, config.server_port);

    let state = AppState::new(pool, config, storage, Arc::new(PdfiumExtractor), jwt);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(%address, "audit tracker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("received shutdown signal");
            }
        })
        .await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
