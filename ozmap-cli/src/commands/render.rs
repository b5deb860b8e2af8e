use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use super::{open_map, LibraryArgs};

#[allow(clippy::too_many_arguments)]
pub fn run(
    args: &LibraryArgs,
    map: PathBuf,
    lat: f64,
    lon: f64,
    zoom: f64,
    width: u32,
    height: u32,
    output: PathBuf,
) -> Result<()> {
    if width == 0 || height == 0 {
        bail!("Viewport must not be empty: {}x{}", width, height);
    }

    let map = open_map(&map)?;
    let session = map
        .activate(width as u64 * height as u64, &args.options())
        .context("Failed to open map image")?;
    let zoom = session.set_zoom(zoom).context("Failed to set zoom")?;

    let viewport = session
        .render(lat, lon, width, height)
        .context("Failed to render viewport")?;
    viewport
        .image
        .save(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let stats = session.cache_stats();
    session.deactivate();

    println!("Wrote {} ({}x{})", output.display(), width, height);
    println!("Map: {}", map.title);
    println!("Zoom: {}", zoom);
    println!("Tiles: {}", viewport.tiles);
    println!("Cache: {}/{} tiles", stats.entry_count, stats.capacity);
    if !viewport.covers {
        println!("Note: the map does not cover the whole viewport");
    }

    Ok(())
}
