use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod config;
mod embedding;
mod error;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mecho_server=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("MECHO_CONFIG").ok();
    let config: config::MechoConfig = relay_core::config::load_config(
        config_path.as_deref(),
        "mecho-server.toml",
        "MECHO",
    )
    .unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        config::MechoConfig::default()
    });

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState::new(&config));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("mecho-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
