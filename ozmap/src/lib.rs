//! # ozmap - OziExplorer raster map library
//!
//! Decoding, calibration and lookup of tiled OziExplorer raster maps
//! (`.ozf2` / `.ozfx3` images with their `.map` calibration files).
//!
//! ## Features
//!
//! - **Zero-copy**: image files are memory-mapped, tiles are decoded on demand
//! - **Both variants**: plain OZF2 and encrypted OZFX3 containers
//! - **Calibrated**: least-squares affine binding between pixels and lat/lon,
//!   for lat/lon, cylindrical, conic and azimuthal map projections
//! - **Datum aware**: calibration on local datums is shifted to WGS 84
//! - **Indexed**: "which maps cover this point" over a whole directory of maps
//! - **Bounded memory**: per-session LRU tile cache sized from the viewport
//!
//! ## Quick Start
//!
//! ```ignore
//! use ozmap::MapLibraryBuilder;
//!
//! let library = MapLibraryBuilder::new("/data/maps").build()?;
//!
//! // Most detailed map at a point
//! let map = &library.maps_at(46.55, 7.98)[0];
//! let session = library.activate(map.id, 800 * 480)?;
//! session.set_zoom(0.5)?;
//!
//! let viewport = session.render(46.55, 7.98, 800, 480)?;
//! viewport.image.save("view.png")?;
//! ```
//!
//! ## Container Format
//!
//! An image file holds a pyramid of levels. Each level is a grid of 64×64
//! tiles of palette indices, zlib-compressed, with a 256-entry palette per
//! level. Encrypted files cipher their headers, tables and (partially) tile
//! payloads with a single-byte key derived from the file itself; see
//! [`cipher`] and [`container`].

pub mod cache;
pub mod calibration;
pub mod cipher;
pub mod container;
pub mod datum;
pub mod decoder;
pub mod error;
pub mod index;
pub mod library;
pub mod loader;
pub mod map;
pub mod projection;
pub mod pyramid;
pub mod session;
pub mod source;

// Re-export main types at crate root for convenience
pub use cache::{CacheStats, Tile, TileCache};
pub use calibration::AffineBinding;
pub use container::{Level, RasterContainer, Variant};
pub use datum::Datum;
pub use decoder::{DecodeOutcome, DecoderKind, TileDecoder, TileImage};
pub use error::{MapError, Result};
pub use index::SpatialIndex;
pub use library::{MapLibrary, MapLibraryBuilder};
pub use loader::{load_map, parse_map};
pub use map::{Bounds, MapDefinition, MapId, MapPoint};
pub use projection::{ConicParameters, Ellipsoid, Projection, ProjectionKind, Projector};
pub use pyramid::{ResolutionSelector, Selection, TileGrid, TileWindow, ZoomTable};
pub use session::{MapSession, SessionOptions, Viewport};
pub use source::{ActiveMap, MapSource, SyntheticMap};
