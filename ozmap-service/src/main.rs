//! ozmap Service - HTTP microservice for OziExplorer raster maps.
//!
//! A REST API for finding the maps that cover a coordinate, converting
//! coordinates to map pixels and rendering map viewports as PNG.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OZMAP_MAPS_DIR` | Directory scanned for .map files | current directory |
//! | `OZMAP_CACHE_FACTOR` | Tile cache size as a multiple of one viewport | 3 |
//! | `OZMAP_DECODER` | Tile decoder: "portable" or "streaming" | portable |
//! | `OZMAP_INDEX_FILE` | JSON file persisting the parsed library | None |
//! | `OZMAP_PORT` | HTTP server port | 8080 |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `GET /maps?lat=X&lon=Y` - Maps covering a coordinate
//! - `GET /maps/{id}` - Map description
//! - `GET /maps/{id}/locate?lat=X&lon=Y&zoom=Z` - Pixel of a coordinate
//! - `GET /maps/{id}/render?lat=X&lon=Y&zoom=Z&width=W&height=H` - PNG viewport
//! - `GET /health` - Health check
//! - `GET /stats` - Library and cache statistics
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use ozmap::MapLibraryBuilder;
use ozmap_service::{router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ozmap_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load port from environment (service-specific config)
    let port: u16 = std::env::var("OZMAP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // The library handles OZMAP_MAPS_DIR, OZMAP_CACHE_FACTOR, OZMAP_DECODER
    // and OZMAP_INDEX_FILE
    let builder = match MapLibraryBuilder::from_env() {
        Ok(builder) => builder,
        Err(_) => {
            tracing::warn!("OZMAP_MAPS_DIR not set, using current directory");
            MapLibraryBuilder::new(".")
        }
    };
    let options = builder.options();
    let library = tokio::task::spawn_blocking(move || builder.build()).await??;

    tracing::info!(
        maps_dir = %library.root().display(),
        maps = library.len(),
        bad_maps = library.bad_maps().len(),
        decoder = %options.decoder,
        cache_factor = options.cache_factor,
        port = port,
        "Starting ozmap service"
    );

    let app = router(Arc::new(AppState::new(library)));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
