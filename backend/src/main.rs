mod auth;
mod comments;
mod config;
mod feed;
mod handlers;
mod moderation_service;
mod notifications;
mod realtime;
mod request_context;
mod routes;
mod state;
mod storage;
mod store;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting Newsdesk backend server");
    tracing::info!("Hosted store: {}", config.store_url);

    let bind_addr = config.bind_addr.clone();
    let port = config.port.clone();
    let app_state = state::AppState::new(config)?;

    // Build router
    let app = routes::create_router(app_state);

    // Start server
    let addr = format!("{bind_addr}:{port}");
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
