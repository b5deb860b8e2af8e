//! Integration tests for the HTTP API.

use axum::http::StatusCode;
use axum_test::TestServer;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ozmap::{MapLibrary, SessionOptions};
use ozmap_service::{router, AppState};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SIZE: u32 = 1000;
const TILE: u32 = 64;

/// Write a plain single-level OZF2 image where every pixel has palette index 1.
fn create_test_image(path: &Path) {
    let tiles = SIZE.div_ceil(TILE);
    let mut buf = vec![0u8; 256];
    buf[0..2].copy_from_slice(&0x7778u16.to_le_bytes());
    buf[18..22].copy_from_slice(&(SIZE as i32).to_le_bytes());
    buf[22..26].copy_from_slice(&(SIZE as i32).to_le_bytes());
    buf[26..28].copy_from_slice(&1u16.to_le_bytes());
    buf[28..30].copy_from_slice(&8u16.to_le_bytes());

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&vec![1u8; (TILE * TILE) as usize]).unwrap();
    let mut tile = encoder.finish().unwrap();
    tile[1] = 0xDA;

    let mut offsets = Vec::new();
    for _ in 0..tiles * tiles {
        offsets.push(buf.len() as u32);
        buf.extend_from_slice(&tile);
    }
    offsets.push(buf.len() as u32);

    let level_offset = buf.len() as u32;
    buf.extend_from_slice(&(SIZE as i32).to_le_bytes());
    buf.extend_from_slice(&(SIZE as i32).to_le_bytes());
    buf.extend_from_slice(&(tiles as u16).to_le_bytes());
    buf.extend_from_slice(&(tiles as u16).to_le_bytes());
    let mut palette = vec![0u8; 1024];
    palette[4..8].copy_from_slice(&[10, 20, 30, 0]);
    buf.extend_from_slice(&palette);
    for offset in offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }

    let table_offset = buf.len() as u32;
    buf.extend_from_slice(&level_offset.to_le_bytes());
    buf.extend_from_slice(&table_offset.to_le_bytes());
    std::fs::write(path, buf).unwrap();
}

/// Write `test.map` covering 10..11 N, 20..21 E at 5 m/px, with its image.
fn create_test_map(dir: &Path) {
    create_test_image(&dir.join("test.ozf2"));
    let text = "OziExplorer Map Data File Version 2.2\r\n\
        test\r\n\
        C:\\Maps\\test.ozf2\r\n\
        1 ,Map Code,\r\n\
        WGS 84,WGS 84,   0.0000,   0.0000,WGS 84\r\n\
        Reserved 1\r\n\
        Reserved 2\r\n\
        Magnetic Variation,,,E\r\n\
        Map Projection,Latitude/Longitude,PolyCal,No,AutoCalOnly,No,BSBUseWPX,No\r\n\
        Point01,xy,    0,    0,in, deg,  11, 0.0000,N,  20, 0.0000,E, grid,   ,           ,           ,N\r\n\
        Point02,xy, 1000,    0,in, deg,  11, 0.0000,N,  21, 0.0000,E, grid,   ,           ,           ,N\r\n\
        Point03,xy,    0, 1000,in, deg,  10, 0.0000,N,  20, 0.0000,E, grid,   ,           ,           ,N\r\n\
        Point04,xy, 1000, 1000,in, deg,  10, 0.0000,N,  21, 0.0000,E, grid,   ,           ,           ,N\r\n\
        Projection Setup,,,,,,,,,,\r\n\
        MM1B,5\r\n\
        IWH,Map Image Width/Height,1000,1000\r\n";
    std::fs::write(dir.join("test.map"), text).unwrap();
}

/// A maps directory with one usable and one broken map.
fn create_maps_dir() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    create_test_map(temp_dir.path());
    std::fs::write(temp_dir.path().join("broken.map"), "not a map\r\n").unwrap();
    temp_dir
}

fn create_test_server(temp_dir: &TempDir) -> TestServer {
    let library = MapLibrary::scan(temp_dir.path(), SessionOptions::default()).unwrap();
    let state = Arc::new(AppState::new(library));
    TestServer::new(router(state)).unwrap()
}

async fn map_id(server: &TestServer) -> u64 {
    let json: Value = server.get("/maps?lat=10.5&lon=20.5").await.json();
    json["maps"][0]["id"].as_u64().unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);

    let response = server.get("/health").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_maps_endpoint() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);

    let response = server.get("/maps?lat=10.5&lon=20.5").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["lat"], 10.5);
    assert_eq!(json["lon"], 20.5);
    let maps = json["maps"].as_array().unwrap();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0]["title"], "test");
    assert_eq!(maps[0]["mpp"], 5.0);
    assert!(maps[0]["bounds"]["max_lat"].as_f64().unwrap() > 10.9);

    // No map there
    let response = server.get("/maps?lat=40.5&lon=20.5").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert!(json["maps"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_maps_endpoint_invalid_params() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);

    let response = server.get("/maps?lat=95.0&lon=20.5").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("out of bounds"));

    // Missing parameters
    let response = server.get("/maps?lat=10.5").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let response = server.get("/maps").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_map_endpoint() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);
    let id = map_id(&server).await;

    let response = server.get(&format!("/maps/{}", id)).await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["id"], id);
    assert_eq!(json["title"], "test");
    assert_eq!(json["projection"], "Latitude/Longitude");
    assert_eq!(json["ellipsoid"], "WGS 84");
    assert_eq!(json["width"], 1000);
    assert_eq!(json["calibration_points"].as_array().unwrap().len(), 4);
    assert_eq!(json["corners"].as_array().unwrap().len(), 4);
    assert!(json.get("load_error").is_none());
}

#[tokio::test]
async fn test_map_endpoint_not_found() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);

    let response = server.get("/maps/12345").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = server.get("/maps/12345/render?lat=10.5&lon=20.5").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_lists_bad_maps() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);

    let response = server.get("/stats").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["maps"], 1);
    assert_eq!(json["bad_maps"], 1);
    assert!(json["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_locate_endpoint() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);
    let id = map_id(&server).await;

    let response = server.get(&format!("/maps/{}/locate?lat=10.5&lon=20.5", id)).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["x"], 500);
    assert_eq!(json["y"], 500);
    assert_eq!(json["zoom"], 1.0);
    assert_eq!(json["covered"], true);

    let response = server
        .get(&format!("/maps/{}/locate?lat=10.5&lon=20.5&zoom=2", id))
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["x"], 1000);
    assert_eq!(json["y"], 1000);
    assert_eq!(json["zoom"], 2.0);

    // Off the map, but still projected
    let response = server.get(&format!("/maps/{}/locate?lat=12.0&lon=20.5", id)).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["covered"], false);
    assert!(json["y"].as_i64().unwrap() < 0);
}

#[tokio::test]
async fn test_render_endpoint() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);
    let id = map_id(&server).await;

    let response = server
        .get(&format!("/maps/{}/render?lat=10.5&lon=20.5&width=200&height=100", id))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "image/png");
    assert_eq!(response.header("x-map-covers"), "true");
    let bytes = response.as_bytes();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

    // Viewport hanging over the north edge
    let response = server
        .get(&format!("/maps/{}/render?lat=11.0&lon=20.5&width=200&height=100", id))
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("x-map-covers"), "false");

    // The session is kept and shows up in the stats
    let json: Value = server.get("/stats").await.json();
    let sessions = json["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], id);
    assert_eq!(sessions[0]["title"], "test");
    assert!(sessions[0]["cached_tiles"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_render_endpoint_invalid_viewport() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);
    let id = map_id(&server).await;

    let response = server
        .get(&format!("/maps/{}/render?lat=10.5&lon=20.5&width=0", id))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .get(&format!("/maps/{}/render?lat=10.5&lon=20.5&width=100000&height=100000", id))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bad_map_cannot_be_rendered() {
    let temp_dir = create_maps_dir();
    let library = MapLibrary::scan(temp_dir.path(), SessionOptions::default()).unwrap();
    let bad_id = library.bad_maps()[0].id;
    let server = TestServer::new(router(Arc::new(AppState::new(library)))).unwrap();

    let response = server.get(&format!("/maps/{}", bad_id)).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert!(json["load_error"].is_string());

    let response = server
        .get(&format!("/maps/{}/render?lat=10.5&lon=20.5", bad_id))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_openapi_document() {
    let temp_dir = create_maps_dir();
    let server = create_test_server(&temp_dir);

    let response = server.get("/api-docs/openapi.json").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert!(json["paths"]["/maps"].is_object());
    assert!(json["paths"]["/maps/{id}/render"].is_object());
}
