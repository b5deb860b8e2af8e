use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use super::{open_map, LibraryArgs};

/// What to convert.
pub enum Target {
    Geo { lat: f64, lon: f64 },
    Pixel { x: f64, y: f64 },
}

#[derive(Serialize)]
struct LocateResponse {
    lat: f64,
    lon: f64,
    x: i64,
    y: i64,
    zoom: f64,
    covered: bool,
}

pub fn run(args: &LibraryArgs, map: PathBuf, target: Target, zoom: f64, json: bool) -> Result<()> {
    let map = open_map(&map)?;
    // A single pixel is enough to bind the calibration
    let session = map
        .activate(1, &args.options())
        .context("Failed to open map image")?;
    let zoom = session.set_zoom(zoom).context("Failed to set zoom")?;

    let response = match target {
        Target::Geo { lat, lon } => {
            let (x, y) = session.project(lat, lon);
            LocateResponse {
                lat,
                lon,
                x,
                y,
                zoom,
                covered: session.covers_lat_lon(lat, lon),
            }
        }
        Target::Pixel { x, y } => {
            let (lat, lon) = session.geo_from_pixel(x, y);
            LocateResponse {
                lat,
                lon,
                x: x.round() as i64,
                y: y.round() as i64,
                zoom,
                covered: session.covers_lat_lon(lat, lon),
            }
        }
    };
    session.deactivate();

    if json {
        println!("{}", serde_json::to_string(&response)?);
    } else {
        println!(
            "lat: {:.6} lon: {:.6} x: {} y: {} (zoom {}){}",
            response.lat,
            response.lon,
            response.x,
            response.y,
            response.zoom,
            if response.covered { "" } else { " outside map" }
        );
    }

    Ok(())
}
