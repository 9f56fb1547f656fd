mod config;
mod error;
mod rate_limit;
mod routes;
mod scheduler;

use std::sync::Arc;

use config::AppConfig;
use galleria_core::storage::R2ObjectStore;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("galleria_api=info".parse().expect("valid directive"))
                .add_directive("galleria_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting galleria-api with config: {:?}", config);

    if let Some(r2) = config.r2.clone() {
        if let Err(error) = R2ObjectStore::new(r2).bucket_is_reachable().await {
            tracing::warn!(error = %error, "R2 bucket is not reachable; syncs will degrade until it is");
        }
    }

    let state = AppState::from_config(config)?;
    scheduler::spawn(
        Arc::clone(&state.synchronizer),
        state.config.sync_interval,
    );

    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("galleria-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
