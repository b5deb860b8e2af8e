//! ozmap Service Library
//!
//! HTTP handlers, shared state and router for the map service.
//! This library is used by both the ozmap-service binary and integration tests.

pub mod handlers;

use std::sync::{Arc, Mutex, PoisonError};

use axum::{routing::get, Router};
use ozmap::{MapId, MapLibrary, MapSession};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Maximum number of maps kept activated at once.
pub const MAX_SESSIONS: usize = 8;

/// Viewport size used to size the tile cache of a session.
pub const SESSION_VIEWPORT_PIXELS: u64 = 1024 * 768;

/// An activated map shared between requests.
pub type SharedSession = Arc<Mutex<MapSession>>;

/// Application state shared across handlers.
pub struct AppState {
    /// Every map of the maps directory.
    pub library: MapLibrary,
    /// Activated maps, least recently used first.
    sessions: Mutex<Vec<(MapId, SharedSession)>>,
}

impl AppState {
    pub fn new(library: MapLibrary) -> Self {
        Self {
            library,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// The session of a map, activating it on first use.
    ///
    /// Beyond [`MAX_SESSIONS`] the least recently used session is dropped.
    /// Activation maps the image file, so call this from a blocking context.
    pub fn session(&self, id: MapId) -> ozmap::Result<SharedSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = sessions.iter().position(|(sid, _)| *sid == id) {
            let entry = sessions.remove(pos);
            let session = Arc::clone(&entry.1);
            sessions.push(entry);
            return Ok(session);
        }

        let session = Arc::new(Mutex::new(self.library.activate(id, SESSION_VIEWPORT_PIXELS)?));
        if sessions.len() >= MAX_SESSIONS {
            let (evicted, _) = sessions.remove(0);
            tracing::debug!(id = evicted, "Deactivated least recently used map");
        }
        sessions.push((id, Arc::clone(&session)));
        tracing::info!(id = id, sessions = sessions.len(), "Activated map");
        Ok(session)
    }

    /// Snapshot of the active sessions, least recently used first.
    pub fn sessions(&self) -> Vec<(MapId, SharedSession)> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// OpenAPI documentation for the map service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ozmap Service",
        version = "0.1.0",
        description = "REST API for looking up, locating on and rendering OziExplorer raster maps.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        handlers::get_maps,
        handlers::get_map,
        handlers::locate,
        handlers::render,
        handlers::health_check,
        handlers::get_stats,
    ),
    components(
        schemas(
            handlers::PointQuery,
            handlers::LocateQuery,
            handlers::RenderQuery,
            handlers::BoundsBody,
            handlers::PointBody,
            handlers::MapSummary,
            handlers::MapsResponse,
            handlers::MapDetail,
            handlers::LocateResponse,
            handlers::ErrorResponse,
            handlers::HealthResponse,
            handlers::SessionStats,
            handlers::StatsResponse,
        )
    ),
    tags(
        (name = "maps", description = "Map lookup, coordinate conversion and rendering"),
        (name = "system", description = "System and health endpoints")
    )
)]
pub struct ApiDoc;

/// Build the application router with docs, tracing and CORS.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/maps", get(handlers::get_maps))
        .route("/maps/:id", get(handlers::get_map))
        .route("/maps/:id/locate", get(handlers::locate))
        .route("/maps/:id/render", get(handlers::render))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use handlers::{
    ErrorResponse, HealthResponse, LocateResponse, MapDetail, MapSummary, MapsResponse,
    StatsResponse,
};
