//! Error types for the ozmap library.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading, decoding or querying maps.
#[derive(Error, Debug)]
pub enum MapError {
    /// IO error when opening or reading files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The raster container is malformed (bad magic, impossible header, truncated tables).
    #[error("Invalid image container: {reason}")]
    Format { reason: String },

    /// The key block of an encrypted container could not be recognised.
    #[error("Unsupported OZFX3 key block discriminant {discriminant:#04x}")]
    Cipher { discriminant: u8 },

    /// A single tile could not be decoded. The rest of the map stays usable.
    #[error("Tile {col},{row} of level {level} could not be decoded: {reason}")]
    TileDecode {
        level: usize,
        col: u32,
        row: u32,
        reason: String,
    },

    /// The calibration system is singular or underdetermined.
    #[error("Calibration failed: {reason}")]
    Calibration { reason: String },

    /// Memory could not be allocated for a tile or a rendered region.
    #[error("Out of memory while decoding or rendering")]
    ResourceExhausted,

    /// The `.map` calibration file could not be parsed.
    #[error("Bad map file {path} (line {line}): {reason}")]
    MapFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The map uses a projection or datum that is not implemented.
    #[error("Unsupported projection or datum: {name}")]
    Projection { name: String },

    /// Coordinates fall outside the addressable range.
    #[error("Coordinates out of bounds: lat={lat}, lon={lon}")]
    OutOfBounds { lat: f64, lon: f64 },

    /// A referenced file or map does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A persisted library index could not be read or written.
    #[error("Index file error: {0}")]
    Index(#[from] serde_json::Error),
}

impl MapError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        MapError::Format {
            reason: reason.into(),
        }
    }

    pub(crate) fn calibration(reason: impl Into<String>) -> Self {
        MapError::Calibration {
            reason: reason.into(),
        }
    }

    /// Returns true if the error prevents the map from being used at all.
    ///
    /// Tile decode failures and calibration failures leave the map usable.
    pub fn is_fatal_for_map(&self) -> bool {
        !matches!(
            self,
            MapError::TileDecode { .. } | MapError::Calibration { .. } | MapError::OutOfBounds { .. }
        )
    }
}

/// Result type alias using [`MapError`].
pub type Result<T> = std::result::Result<T, MapError>;
