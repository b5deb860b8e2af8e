use anyhow::{bail, Result};
use ozmap::MapId;
use serde::Serialize;

use super::LibraryArgs;

#[derive(Serialize)]
struct MapMatch {
    id: MapId,
    title: String,
    path: String,
    mpp: f64,
    x: i64,
    y: i64,
}

#[derive(Serialize)]
struct QueryResponse {
    lat: f64,
    lon: f64,
    maps: Vec<MapMatch>,
}

pub fn run(args: &LibraryArgs, lat: f64, lon: f64, json: bool) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        bail!("Coordinates out of range: lat={}, lon={}", lat, lon);
    }
    let library = args.load()?;

    let maps: Vec<MapMatch> = library
        .maps_at(lat, lon)
        .iter()
        .filter_map(|map| {
            let (x, y) = map.pixel_from_geo(lat, lon)?;
            Some(MapMatch {
                id: map.id,
                title: map.title.clone(),
                path: map.path.display().to_string(),
                mpp: map.absolute_mpp(),
                x: x.round() as i64,
                y: y.round() as i64,
            })
        })
        .collect();

    if json {
        let response = QueryResponse { lat, lon, maps };
        println!("{}", serde_json::to_string(&response)?);
    } else if maps.is_empty() {
        println!("no map");
    } else {
        for m in &maps {
            println!("{:.2}\t{}\t{},{}\t{}", m.mpp, m.title, m.x, m.y, m.path);
        }
    }

    Ok(())
}
