//! Zoom selection and tile-grid geometry.
//!
//! A container stores a handful of pre-rendered pyramid levels. Displays ask
//! for arbitrary zooms; [`ResolutionSelector`] picks the level to read from and
//! the residual factor to resample its tiles by. [`ZoomTable`] snaps requests to
//! the supported zoom ladder, and [`TileGrid`] maps scaled pixels to tiles.

use std::ops::Range;

use crate::container::{Level, TILE_HEIGHT, TILE_WIDTH};

/// Zooms a session can be set to.
pub const ZOOM_LEVELS: [f64; 15] = [
    0.03, 0.06, 0.1, 0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0, 2.5, 3.0, 4.0, 5.0,
];

/// Native scale of a level relative to the base height, rounded to 3 decimals.
pub fn native_scale(level_height: u32, base_height: u32) -> f64 {
    if base_height == 0 {
        return 0.0;
    }
    (level_height as f64 / base_height as f64 * 1000.0).round() / 1000.0
}

/// The pyramid level chosen for a requested scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    /// Index of the pyramid level.
    pub level: usize,
    /// Native scale of that level.
    pub native_scale: f64,
    /// Residual factor: requested scale / native scale.
    pub factor: f64,
}

/// Chooses the pyramid level for a continuous scale.
#[derive(Debug, Clone)]
pub struct ResolutionSelector {
    scales: Vec<f64>,
}

impl ResolutionSelector {
    /// Build a selector from level heights and the height of the full image.
    pub fn from_heights(heights: &[u32], base_height: u32) -> Self {
        Self {
            scales: heights
                .iter()
                .map(|&h| native_scale(h, base_height))
                .collect(),
        }
    }

    /// Build a selector for the levels of a container.
    pub fn new(levels: &[Level], base_height: u32) -> Self {
        let heights: Vec<u32> = levels.iter().map(|l| l.height).collect();
        Self::from_heights(&heights, base_height)
    }

    /// Native scale of every level, in file order.
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Pick the level for `scale`.
    ///
    /// Below 1.0 only levels at least as detailed as requested are candidates,
    /// so tiles are never upsampled from an over-shrunk level. At or above 1.0
    /// the nearest level wins. Ties keep the earlier level.
    pub fn select(&self, scale: f64) -> Selection {
        let mut best = Selection {
            level: 0,
            native_scale: 1.0,
            factor: scale,
        };
        let mut delta = f64::MAX;

        for (level, &native) in self.scales.iter().enumerate() {
            if scale < 1.0 && scale > native {
                continue;
            }
            let d = (native - scale).abs();
            if d < delta {
                delta = d;
                best.level = level;
                best.native_scale = native;
            }
        }

        if best.native_scale > 0.0 {
            best.factor = scale / best.native_scale;
        }
        best
    }
}

/// One rung of the zoom ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomEntry {
    pub zoom: f64,
    pub selection: Selection,
}

/// The supported zoom ladder with the level selected for each rung.
///
/// The rung index doubles as the tile-cache zoom token.
#[derive(Debug, Clone)]
pub struct ZoomTable {
    entries: Vec<ZoomEntry>,
    current: usize,
}

impl ZoomTable {
    /// Build the table and set the zoom to 1.0.
    pub fn new(selector: &ResolutionSelector) -> Self {
        let entries: Vec<ZoomEntry> = ZOOM_LEVELS
            .iter()
            .map(|&zoom| ZoomEntry {
                zoom,
                selection: selector.select(zoom),
            })
            .collect();

        for (i, entry) in entries.iter().enumerate() {
            tracing::debug!(
                "scale[{}]: {}, selected source scale: {} ({}), factor: {}",
                i,
                entry.zoom,
                entry.selection.native_scale,
                entry.selection.level,
                entry.selection.factor
            );
        }

        let mut table = Self {
            entries,
            current: 0,
        };
        table.set_zoom(1.0);
        table
    }

    /// Snap to the rung nearest `zoom` and return it.
    pub fn set_zoom(&mut self, zoom: f64) -> f64 {
        let mut delta = f64::MAX;
        for (i, entry) in self.entries.iter().enumerate() {
            let d = (entry.zoom - zoom).abs();
            if d < delta {
                self.current = i;
                delta = d;
            }
        }
        self.zoom()
    }

    /// Current zoom.
    pub fn zoom(&self) -> f64 {
        self.entries[self.current].zoom
    }

    /// Zoom of the next rung up, if any.
    pub fn next(&self) -> Option<f64> {
        self.entries.get(self.current + 1).map(|e| e.zoom)
    }

    /// Zoom of the next rung down, if any.
    pub fn prev(&self) -> Option<f64> {
        self.current
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|e| e.zoom)
    }

    /// Current rung.
    pub fn current(&self) -> &ZoomEntry {
        &self.entries[self.current]
    }

    /// Cache token of the current rung.
    pub fn token(&self) -> u8 {
        self.current as u8
    }

    /// All rungs.
    pub fn entries(&self) -> &[ZoomEntry] {
        &self.entries
    }
}

/// Range of tiles intersecting a viewport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileWindow {
    pub cols: Range<u32>,
    pub rows: Range<u32>,
    /// True if the viewport extends past the tile grid.
    pub clamped: bool,
}

impl TileWindow {
    /// Number of tiles in the window.
    pub fn len(&self) -> usize {
        self.cols.len() * self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate (col, row) pairs row by row.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.rows
            .clone()
            .flat_map(move |row| self.cols.clone().map(move |col| (col, row)))
    }
}

/// Geometry of one pyramid level resampled by a residual factor.
///
/// Positions are in scaled map pixels: pixel (0, 0) is the top-left corner of
/// the map at the current zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    pub level_width: u32,
    pub level_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub factor: f64,
}

impl TileGrid {
    pub fn new(level: &Level, factor: f64) -> Self {
        Self {
            level_width: level.width,
            level_height: level.height,
            tiles_x: level.tiles_x,
            tiles_y: level.tiles_y,
            factor,
        }
    }

    fn step_x(&self) -> f64 {
        TILE_WIDTH as f64 * self.factor
    }

    fn step_y(&self) -> f64 {
        TILE_HEIGHT as f64 * self.factor
    }

    /// Size of a full tile after resampling (never zero).
    pub fn tile_size(&self) -> (u32, u32) {
        (
            (self.step_x() as u32).max(1),
            (self.step_y() as u32).max(1),
        )
    }

    /// Size of the level after resampling.
    pub fn scaled_size(&self) -> (u32, u32) {
        (
            (self.level_width as f64 * self.factor) as u32,
            (self.level_height as f64 * self.factor) as u32,
        )
    }

    /// Tile column and row containing a scaled pixel.
    pub fn tile_of_pixel(&self, x: i64, y: i64) -> (i64, i64) {
        (
            (x.unsigned_abs() as f64 / self.step_x()) as i64,
            (y.unsigned_abs() as f64 / self.step_y()) as i64,
        )
    }

    /// Offset of a scaled pixel inside its tile.
    pub fn offset_in_tile(&self, x: i64, y: i64) -> (i64, i64) {
        let (col, row) = self.tile_of_pixel(x, y);
        (
            (x as f64 - col as f64 * self.step_x()).round() as i64,
            (y as f64 - row as f64 * self.step_y()).round() as i64,
        )
    }

    /// Visible size of a tile after resampling; the last column and row may be short.
    ///
    /// Returns `None` outside the grid.
    pub fn tile_extent(&self, col: u32, row: u32) -> Option<(u32, u32)> {
        if col >= self.tiles_x || row >= self.tiles_y {
            return None;
        }

        let edge = |size: u32, tile: u32, last: bool| -> u32 {
            match size % tile {
                r if last && r != 0 => r,
                _ => tile,
            }
        };
        let dx = edge(self.level_width, TILE_WIDTH, col == self.tiles_x - 1);
        let dy = edge(self.level_height, TILE_HEIGHT, row == self.tiles_y - 1);

        Some((
            (dx as f64 * self.factor) as u32,
            (dy as f64 * self.factor) as u32,
        ))
    }

    /// Tiles intersecting the viewport with top-left (`x`, `y`) and the given size.
    pub fn window(&self, x: i64, y: i64, width: u32, height: u32) -> TileWindow {
        let (tw, th) = self.tile_size();
        let span = |start: i64, len: u32, step: u32, count: u32| -> (Range<u32>, bool) {
            let first = start.div_euclid(step as i64);
            let last = (start + len as i64 + step as i64 - 1).div_euclid(step as i64);
            let lo = first.clamp(0, count as i64);
            let hi = last.clamp(lo, count as i64);
            (lo as u32..hi as u32, lo != first || hi != last)
        };

        let (cols, cx) = span(x, width, tw, self.tiles_x);
        let (rows, cy) = span(y, height, th, self.tiles_y);
        TileWindow {
            cols,
            rows,
            clamped: cx || cy,
        }
    }
}
