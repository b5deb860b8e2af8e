//! HTTP request handlers for the map service.

use std::io::Cursor;
use std::sync::{Arc, PoisonError};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use image::ImageFormat;
use ozmap::{Bounds, MapDefinition, MapError, MapId, MapPoint};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::AppState;

/// Default rendered viewport size.
pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Largest viewport a single render may request.
pub const MAX_RENDER_PIXELS: u64 = 4096 * 4096;

/// A geodetic point.
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct PointQuery {
    /// Latitude in decimal degrees (-90 to 90).
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180).
    pub lon: f64,
}

/// A geodetic point and the zoom to convert it at.
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct LocateQuery {
    pub lat: f64,
    pub lon: f64,
    /// Zoom factor; snapped to the nearest supported zoom. Default 1.
    pub zoom: Option<f64>,
}

/// Viewport to render.
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct RenderQuery {
    /// Latitude of the viewport centre.
    pub lat: f64,
    /// Longitude of the viewport centre.
    pub lon: f64,
    /// Zoom factor. Default 1.
    pub zoom: Option<f64>,
    /// Viewport width in pixels. Default 800.
    pub width: Option<u32>,
    /// Viewport height in pixels. Default 480.
    pub height: Option<u32>,
}

/// Bounding box in decimal degrees.
#[derive(Debug, Serialize, ToSchema)]
pub struct BoundsBody {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl From<Bounds> for BoundsBody {
    fn from(b: Bounds) -> Self {
        Self {
            min_lat: b.min_lat,
            min_lon: b.min_lon,
            max_lat: b.max_lat,
            max_lon: b.max_lon,
        }
    }
}

/// A pixel bound to a geodetic point.
#[derive(Debug, Serialize, ToSchema)]
pub struct PointBody {
    pub x: f64,
    pub y: f64,
    pub lat: f64,
    pub lon: f64,
}

impl From<&MapPoint> for PointBody {
    fn from(p: &MapPoint) -> Self {
        Self {
            x: p.x,
            y: p.y,
            lat: p.lat,
            lon: p.lon,
        }
    }
}

/// A map covering a point.
#[derive(Debug, Serialize, ToSchema)]
pub struct MapSummary {
    #[schema(value_type = u32)]
    pub id: MapId,
    pub title: String,
    /// Metres per pixel at the map's scale.
    pub mpp: f64,
    pub bounds: BoundsBody,
}

impl From<&MapDefinition> for MapSummary {
    fn from(map: &MapDefinition) -> Self {
        Self {
            id: map.id,
            title: map.title.clone(),
            mpp: map.absolute_mpp(),
            bounds: map.bounds().into(),
        }
    }
}

/// Maps covering a point, most detailed first.
#[derive(Debug, Serialize, ToSchema)]
pub struct MapsResponse {
    pub lat: f64,
    pub lon: f64,
    pub maps: Vec<MapSummary>,
}

/// Everything known about one map.
#[derive(Debug, Serialize, ToSchema)]
pub struct MapDetail {
    #[schema(value_type = u32)]
    pub id: MapId,
    pub title: String,
    /// Path of the `.map` file.
    pub path: String,
    /// Image path as written in the `.map` file.
    pub image: String,
    pub datum: String,
    pub ellipsoid: String,
    pub projection: String,
    pub width: u32,
    pub height: u32,
    pub mpp: f64,
    pub bounds: BoundsBody,
    pub calibration_points: Vec<PointBody>,
    pub corners: Vec<PointBody>,
    /// Why the map cannot be used, if it cannot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

impl From<&MapDefinition> for MapDetail {
    fn from(map: &MapDefinition) -> Self {
        Self {
            id: map.id,
            title: map.title.clone(),
            path: map.path.display().to_string(),
            image: map.image_path.clone(),
            datum: map.datum.clone(),
            ellipsoid: map.ellipsoid.name().to_string(),
            projection: map.projection.name(),
            width: map.width,
            height: map.height,
            mpp: map.absolute_mpp(),
            bounds: map.bounds().into(),
            calibration_points: map.calibration_points.iter().map(PointBody::from).collect(),
            corners: map.corner_markers.iter().map(PointBody::from).collect(),
            load_error: map.load_error.clone(),
        }
    }
}

/// A point located on a map.
#[derive(Debug, Serialize, ToSchema)]
pub struct LocateResponse {
    #[schema(value_type = u32)]
    pub id: MapId,
    pub lat: f64,
    pub lon: f64,
    /// Zoom actually used.
    pub zoom: f64,
    /// Pixel at that zoom; may lie outside the image.
    pub x: i64,
    pub y: i64,
    /// Whether the map shows the point.
    pub covered: bool,
}

/// Error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Statistics of one active session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStats {
    #[schema(value_type = u32)]
    pub id: MapId,
    pub title: String,
    pub zoom: f64,
    /// Number of tiles in cache.
    pub cached_tiles: u64,
    /// Cache capacity in tiles.
    pub cache_capacity: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Cache hit rate (0.0 to 1.0).
    pub hit_rate: f64,
}

/// Library and cache statistics response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Number of usable maps.
    pub maps: usize,
    /// Number of maps that failed to load.
    pub bad_maps: usize,
    /// Active sessions, least recently used first.
    pub sessions: Vec<SessionStats>,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(id: MapId) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("Not found: map {}", id),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<MapError> for ApiError {
    fn from(e: MapError) -> Self {
        let status = match &e {
            MapError::OutOfBounds { .. } => StatusCode::BAD_REQUEST,
            MapError::NotFound { .. } => StatusCode::NOT_FOUND,
            MapError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            MapError::Format { .. }
            | MapError::Cipher { .. }
            | MapError::MapFile { .. }
            | MapError::Projection { .. }
            | MapError::Calibration { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MapError::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

fn check_coordinates(lat: f64, lon: f64) -> Result<(), ApiError> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Coordinates out of bounds: lat={}, lon={}",
            lat, lon
        )))
    }
}

/// Maps covering a point.
///
/// Ordered from the most to the least detailed map.
#[utoipa::path(
    get,
    path = "/maps",
    params(PointQuery),
    responses(
        (status = 200, description = "Maps covering the point", body = MapsResponse),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse)
    ),
    tag = "maps"
)]
pub async fn get_maps(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PointQuery>,
) -> Result<Json<MapsResponse>, ApiError> {
    check_coordinates(query.lat, query.lon)?;

    let maps: Vec<MapSummary> = state
        .library
        .maps_at(query.lat, query.lon)
        .iter()
        .map(|map| MapSummary::from(map.as_ref()))
        .collect();
    tracing::debug!(lat = query.lat, lon = query.lon, found = maps.len(), "Map query");

    Ok(Json(MapsResponse {
        lat: query.lat,
        lon: query.lon,
        maps,
    }))
}

/// Describe one map, including maps that failed to load.
#[utoipa::path(
    get,
    path = "/maps/{id}",
    params(("id" = u32, Path, description = "Map id")),
    responses(
        (status = 200, description = "Map description", body = MapDetail),
        (status = 404, description = "Unknown map", body = ErrorResponse)
    ),
    tag = "maps"
)]
pub async fn get_map(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MapId>,
) -> Result<Json<MapDetail>, ApiError> {
    let map = state.library.get(id).ok_or(ApiError::not_found(id))?;
    Ok(Json(MapDetail::from(map.as_ref())))
}

/// Pixel of a geodetic point on a map.
#[utoipa::path(
    get,
    path = "/maps/{id}/locate",
    params(("id" = u32, Path, description = "Map id"), LocateQuery),
    responses(
        (status = 200, description = "Pixel at the requested zoom", body = LocateResponse),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse),
        (status = 404, description = "Unknown map", body = ErrorResponse),
        (status = 422, description = "Map cannot be used", body = ErrorResponse)
    ),
    tag = "maps"
)]
pub async fn locate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MapId>,
    Query(query): Query<LocateQuery>,
) -> Result<Json<LocateResponse>, ApiError> {
    check_coordinates(query.lat, query.lon)?;
    let zoom = query.zoom.unwrap_or(1.0);

    let response = tokio::task::spawn_blocking(move || -> Result<LocateResponse, ApiError> {
        let shared = state.session(id)?;
        let session = shared.lock().unwrap_or_else(PoisonError::into_inner);
        let zoom = session.set_zoom(zoom)?;
        let (x, y) = session.project(query.lat, query.lon);
        Ok(LocateResponse {
            id,
            lat: query.lat,
            lon: query.lon,
            zoom,
            x,
            y,
            covered: session.covers_lat_lon(query.lat, query.lon),
        })
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    Ok(Json(response))
}

/// Render a viewport centred on a point as PNG.
///
/// Pixels the map does not cover are transparent. The `x-map-covers` header
/// tells whether the map covers the whole viewport; `x-map-zoom` carries the
/// zoom actually used.
#[utoipa::path(
    get,
    path = "/maps/{id}/render",
    params(("id" = u32, Path, description = "Map id"), RenderQuery),
    responses(
        (status = 200, description = "Rendered viewport as PNG"),
        (status = 400, description = "Invalid coordinates or viewport", body = ErrorResponse),
        (status = 404, description = "Unknown map", body = ErrorResponse),
        (status = 422, description = "Map cannot be used", body = ErrorResponse),
        (status = 503, description = "Out of memory", body = ErrorResponse)
    ),
    tag = "maps"
)]
pub async fn render(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MapId>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, ApiError> {
    check_coordinates(query.lat, query.lon)?;
    let width = query.width.unwrap_or(DEFAULT_WIDTH);
    let height = query.height.unwrap_or(DEFAULT_HEIGHT);
    if width == 0 || height == 0 || width as u64 * height as u64 > MAX_RENDER_PIXELS {
        return Err(ApiError::bad_request(format!(
            "Invalid viewport size: {}x{}",
            width, height
        )));
    }
    let (lat, lon) = (query.lat, query.lon);
    let zoom = query.zoom.unwrap_or(1.0);

    let (png, covers, zoom) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let shared = state.session(id)?;
        let session = shared.lock().unwrap_or_else(PoisonError::into_inner);
        let zoom = session.set_zoom(zoom)?;
        let viewport = session.render(lat, lon, width, height)?;

        let mut png = Vec::new();
        viewport
            .image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        Ok((png, viewport.covers, zoom))
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    tracing::info!(
        id = id,
        lat = lat,
        lon = lon,
        zoom = zoom,
        bytes = png.len(),
        "Rendered viewport"
    );

    let headers = [
        (header::CONTENT_TYPE, "image/png".to_string()),
        (HeaderName::from_static("x-map-covers"), covers.to_string()),
        (HeaderName::from_static("x-map-zoom"), zoom.to_string()),
    ];
    Ok((StatusCode::OK, headers, png).into_response())
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get library and cache statistics.
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Library and session statistics", body = StatsResponse)),
    tag = "system"
)]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let sessions = state
        .sessions()
        .into_iter()
        .map(|(id, shared)| {
            let session = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let stats = session.cache_stats();
            SessionStats {
                id,
                title: session.map().title.clone(),
                zoom: session.zoom(),
                cached_tiles: stats.entry_count,
                cache_capacity: stats.capacity,
                cache_hits: stats.hit_count,
                cache_misses: stats.miss_count,
                hit_rate: stats.hit_rate(),
            }
        })
        .collect();

    Json(StatsResponse {
        maps: state.library.len(),
        bad_maps: state.library.bad_maps().len(),
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_query_deserialize() {
        let json = r#"{"lat": 46.5, "lon": 7.9}"#;
        let query: PointQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.lat, 46.5);
        assert_eq!(query.lon, 7.9);
    }

    #[test]
    fn test_render_query_defaults() {
        let json = r#"{"lat": 46.5, "lon": 7.9}"#;
        let query: RenderQuery = serde_json::from_str(json).unwrap();
        assert!(query.zoom.is_none());
        assert!(query.width.is_none());
        assert!(query.height.is_none());
    }

    #[test]
    fn test_check_coordinates() {
        assert!(check_coordinates(46.5, 7.9).is_ok());
        assert!(check_coordinates(-90.0, 180.0).is_ok());
        assert!(check_coordinates(91.0, 0.0).is_err());
        assert!(check_coordinates(0.0, -180.5).is_err());
        assert!(check_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_error_status() {
        let err = ApiError::from(MapError::NotFound { what: "map 1".into() });
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(MapError::OutOfBounds { lat: 95.0, lon: 0.0 });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(MapError::Format { reason: "bad magic".into() });
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err = ApiError::from(MapError::ResourceExhausted);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_health_response_serialize() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
    }
}
