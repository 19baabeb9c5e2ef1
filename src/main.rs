use std::sync::Arc;

use dotenv::dotenv;
use log::{error, info, warn};

mod api;
mod config;
mod error;
mod files;
mod id;
mod library;
mod logger;
mod store;
mod sweep;

use api::{create_router, AppState};
use config::Config;
use library::Library;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    let config = Config::from_env();
    logger::init(config.log_level)?;

    let library = Library::open(config.library_paths()).await?;

    // Report only; orphans are removed on request through the API
    match library.sweep(false).await {
        Ok(report) if !report.is_clean() => warn!(
            "Library is inconsistent: {} orphaned audio, {} orphaned covers, {} dangling",
            report.orphaned_audio.len(),
            report.orphaned_covers.len(),
            report.dangling.len()
        ),
        Ok(_) => {}
        Err(e) => error!("Startup sweep failed: {}", e),
    }

    let state = AppState {
        library: Arc::new(library),
    };
    let app = create_router(state, &config.client_path, config.max_upload_bytes);

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    info!("Jukebox server active!");
    info!("Game: http://{}", bind_address);
    info!("Upload: http://{}/upload", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
