use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabletop_rs::config::TabletopConfig;
use tabletop_rs::error::SyncError;
use tabletop_rs::{server, store, AppState};

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabletop_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TabletopConfig::from_file(Path::new(&path))?,
        None => TabletopConfig::default(),
    };
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| SyncError::Config(format!("bind_addr {}: {}", config.bind_addr, e)))?;
    let sweep_every = config.sweep_interval();

    let state = AppState::new(config);

    // Start expiry sweeper
    let sweep_store = Arc::clone(&state.store);
    tokio::spawn(async move {
        store::sweeper::start_expiry_sweeper(sweep_store, sweep_every).await;
    });

    let app = server::router(state.clone());

    tracing::info!("Tabletop server running on http://{}", addr);
    tracing::info!(
        "   Grid {}x{}, canvas {}x{}",
        state.config.grid_size,
        state.config.grid_size,
        state.config.canvas_width,
        state.config.canvas_height
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
