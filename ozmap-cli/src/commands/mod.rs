pub mod info;
pub mod list;
pub mod locate;
pub mod query;
pub mod render;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ozmap::{DecoderKind, MapDefinition, MapLibrary, MapLibraryBuilder, SessionOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Global options shared by the library-backed commands.
pub struct LibraryArgs {
    pub maps_dir: Option<PathBuf>,
    pub cache_factor: f64,
    pub decoder: DecoderKind,
    pub index_file: Option<PathBuf>,
}

impl LibraryArgs {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            decoder: self.decoder,
            cache_factor: self.cache_factor,
        }
    }

    /// Scan the maps directory (or reuse the saved index).
    pub fn load(&self) -> Result<MapLibrary> {
        let mut builder = match &self.maps_dir {
            Some(dir) => MapLibraryBuilder::new(dir),
            None => MapLibraryBuilder::from_env().context(
                "OZMAP_MAPS_DIR environment variable not set. Use --maps-dir or set OZMAP_MAPS_DIR",
            )?,
        };
        builder = builder.cache_factor(self.cache_factor).decoder(self.decoder);
        if let Some(index_file) = &self.index_file {
            builder = builder.index_file(index_file);
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        pb.set_message("Loading maps...");
        pb.enable_steady_tick(Duration::from_millis(100));
        let library = builder.build();
        pb.finish_and_clear();

        library.context("Failed to load map library")
    }
}

/// Load one `.map` file, failing if it is unusable.
pub fn open_map(path: &Path) -> Result<Arc<MapDefinition>> {
    if !path.exists() {
        bail!("Map file not found: {}", path.display());
    }
    let map = ozmap::load_map(path);
    if let Some(err) = &map.load_error {
        bail!("Failed to load {}: {}", path.display(), err);
    }
    Ok(Arc::new(map))
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
