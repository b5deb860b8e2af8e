use anyhow::{bail, Context, Result};
use ozmap::container::EncryptionDepth;
use ozmap::{RasterContainer, ResolutionSelector, Variant};
use std::path::{Path, PathBuf};

use super::format_size;

pub fn run(path: PathBuf) -> Result<()> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }

    let is_map = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("map"));
    if is_map {
        map_info(&path)
    } else {
        image_info(&path)
    }
}

fn map_info(path: &Path) -> Result<()> {
    let map = ozmap::load_map(path);
    println!("Map: {}", path.display());
    println!("Id: {}", map.id);
    println!();
    for line in map.info() {
        println!("{}", line);
    }
    Ok(())
}

fn image_info(path: &Path) -> Result<()> {
    let container = RasterContainer::open(path).context("Failed to open image")?;
    let levels = container.levels();
    let base_height = levels.first().map_or(container.height(), |l| l.height);
    let selector = ResolutionSelector::new(levels, base_height);

    println!("Image: {}", path.display());
    match container.variant() {
        Variant::Plain => println!("Format: OZF2"),
        Variant::Encrypted { key } => println!("Format: OZFX3 (key {:#04x})", key),
    }
    println!("Size: {}x{} pixels", container.width(), container.height());
    println!("File size: {}", format_size(container.file_size() as u64));
    println!();

    println!(
        "{:<6} {:>12} {:>10} {:>8} {:>12}",
        "LEVEL", "SIZE", "TILES", "SCALE", "ENCRYPTION"
    );
    println!("{}", "-".repeat(52));
    for (i, (level, scale)) in levels.iter().zip(selector.scales()).enumerate() {
        let encryption = match level.encryption_depth {
            EncryptionDepth::None => "none".to_string(),
            EncryptionDepth::Prefix(n) => format!("{} bytes", n),
            EncryptionDepth::Whole => "whole".to_string(),
        };
        println!(
            "{:<6} {:>12} {:>10} {:>8.3} {:>12}",
            i,
            format!("{}x{}", level.width, level.height),
            format!("{}x{}", level.tiles_x, level.tiles_y),
            scale,
            encryption
        );
    }

    Ok(())
}
