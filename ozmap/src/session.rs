//! Active map sessions.
//!
//! A [`MapSession`] owns everything a map needs while it is on screen: the
//! memory-mapped image, the zoom table, the tile cache sized for the viewport,
//! the decoder strategy and the calibration binding at the current zoom. It is
//! created by [`MapDefinition::activate`] and released by
//! [`MapSession::deactivate`] (or by dropping it).

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use image::{imageops, Rgba, RgbaImage};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cache::{capacity_for_viewport, CacheStats, Tile, TileCache};
use crate::calibration::{covers_viewport, AffineBinding};
use crate::container::RasterContainer;
use crate::decoder::{resample, DecodeOutcome, DecoderKind, TileDecoder};
use crate::error::{MapError, Result};
use crate::map::MapDefinition;
use crate::pyramid::{ResolutionSelector, TileGrid, TileWindow, ZoomTable};

/// Default multiplier on the number of tiles one viewport needs.
pub const DEFAULT_CACHE_FACTOR: f64 = 3.0;

/// Settings applied when a map is activated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Tile decoder strategy.
    pub decoder: DecoderKind,
    /// Cache capacity as a multiple of the tiles covering one viewport.
    pub cache_factor: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            decoder: DecoderKind::default(),
            cache_factor: DEFAULT_CACHE_FACTOR,
        }
    }
}

/// A rendered viewport.
#[derive(Debug, Clone)]
pub struct Viewport {
    /// Viewport pixels; transparent where the map has no data.
    pub image: RgbaImage,
    /// True if the map covers the whole viewport.
    pub covers: bool,
    /// Number of tiles drawn.
    pub tiles: usize,
}

/// Zoom-dependent state, replaced as a whole on every zoom change.
///
/// Operations that need more than one field work on a single snapshot, so a
/// concurrent zoom change cannot mix the geometry of two zooms.
#[derive(Debug, Clone)]
struct View {
    table: ZoomTable,
    grid: TileGrid,
    level: usize,
    cache: Arc<TileCache>,
    binding: Arc<AffineBinding>,
}

/// Runtime state of an activated map.
pub struct MapSession {
    map: Arc<MapDefinition>,
    container: RasterContainer,
    decoder: Arc<dyn TileDecoder>,
    viewport_pixels: u64,
    cache_factor: f64,
    view: RwLock<View>,
}

impl std::fmt::Debug for MapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSession")
            .field("map", &self.map.title)
            .field("container", &self.container)
            .field("decoder", &self.decoder.name())
            .field("zoom", &self.zoom())
            .finish()
    }
}

impl MapSession {
    /// Open the map's image and set the zoom to 1.0.
    ///
    /// # Errors
    ///
    /// * [`MapError::Format`] if the map failed to load
    /// * [`MapError::NotFound`] if the image file is missing
    /// * any container error from [`RasterContainer::open`]
    /// * [`MapError::Calibration`] if the binding cannot be fitted
    pub fn open(map: Arc<MapDefinition>, viewport_pixels: u64, options: &SessionOptions) -> Result<Self> {
        if let Some(err) = &map.load_error {
            return Err(MapError::format(format!("map {} is unusable: {}", map.title, err)));
        }

        let image_path = map.resolve_image_path()?;
        let container = RasterContainer::open(&image_path)?;
        let base_height = container.level(0).map_or(container.height(), |l| l.height);
        let table = ZoomTable::new(&ResolutionSelector::new(container.levels(), base_height));

        let view = build_view(&map, &container, table, viewport_pixels, options.cache_factor)?;

        debug!(
            title = %map.title,
            image = %image_path.display(),
            decoder = %options.decoder,
            cache_capacity = view.cache.capacity(),
            "Activated map"
        );

        Ok(Self {
            map,
            container,
            decoder: options.decoder.build(),
            viewport_pixels,
            cache_factor: options.cache_factor,
            view: RwLock::new(view),
        })
    }

    fn view(&self) -> RwLockReadGuard<'_, View> {
        self.view.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> View {
        self.view().clone()
    }

    /// The definition this session renders.
    pub fn map(&self) -> &Arc<MapDefinition> {
        &self.map
    }

    /// The open image container.
    pub fn container(&self) -> &RasterContainer {
        &self.container
    }

    /// Name of the decoder strategy.
    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }

    /// Binding at the current zoom.
    pub fn binding(&self) -> Arc<AffineBinding> {
        Arc::clone(&self.view().binding)
    }

    /// Tile geometry at the current zoom.
    pub fn grid(&self) -> TileGrid {
        self.view().grid
    }

    /// Current zoom.
    pub fn zoom(&self) -> f64 {
        self.view().table.zoom()
    }

    /// Next supported zoom up, if any.
    pub fn next_zoom(&self) -> Option<f64> {
        self.view().table.next()
    }

    /// Next supported zoom down, if any.
    pub fn prev_zoom(&self) -> Option<f64> {
        self.view().table.prev()
    }

    /// Change the zoom, snapping to the nearest supported one.
    ///
    /// Re-fits the binding at the new scale and replaces the tile cache with
    /// one sized for the new tile size. Returns the zoom actually set.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Calibration`] if the binding cannot be fitted; the
    /// session keeps its previous zoom and binding.
    pub fn set_zoom(&self, zoom: f64) -> Result<f64> {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);

        let mut table = view.table.clone();
        let actual = table.set_zoom(zoom);
        if table.token() == view.table.token() {
            return Ok(actual);
        }

        let next = build_view(&self.map, &self.container, table, self.viewport_pixels, self.cache_factor)?;

        view.cache.destroy();
        *view = next;

        debug!(
            zoom = actual,
            level = view.level,
            factor = view.grid.factor,
            cache_capacity = view.cache.capacity(),
            "Zoom changed"
        );
        Ok(actual)
    }

    /// Size of the map at the current zoom.
    pub fn scaled_size(&self) -> (f64, f64) {
        let zoom = self.zoom();
        (self.map.width as f64 * zoom, self.map.height as f64 * zoom)
    }

    /// Pixel of a geodetic point at the current zoom, rounded, possibly off the map.
    pub fn project(&self, lat: f64, lon: f64) -> (i64, i64) {
        project(&self.map, &self.binding(), lat, lon)
    }

    /// Pixel of a geodetic point at the current zoom.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::OutOfBounds`] if the point is off the image.
    pub fn pixel_from_geo(&self, lat: f64, lon: f64) -> Result<(i64, i64)> {
        let (x, y) = self.project(lat, lon);
        let (width, height) = self.scaled_size();
        if x < 0 || y < 0 || x as f64 >= width || y as f64 >= height {
            return Err(MapError::OutOfBounds { lat, lon });
        }
        Ok((x, y))
    }

    /// Geodetic point of a pixel at the current zoom.
    pub fn geo_from_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.binding().geo_from_pixel(&self.map.projector(), x, y)
    }

    /// True if the point lies on the map.
    pub fn covers_lat_lon(&self, lat: f64, lon: f64) -> bool {
        self.map.covers_lat_lon(lat, lon)
    }

    /// Tile cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.view().cache.stats()
    }

    /// Fetch a tile at the current zoom, decoding it on a cache miss.
    ///
    /// Returns `Ok(None)` for tiles that cannot be decoded; the caller leaves
    /// a gap.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ResourceExhausted`] after clearing the cache if
    /// memory runs out.
    pub fn tile(&self, col: u32, row: u32) -> Result<Option<Tile>> {
        self.tile_in(&self.snapshot(), col, row)
    }

    fn tile_in(&self, view: &View, col: u32, row: u32) -> Result<Option<Tile>> {
        let (token, cache) = (view.table.token(), &view.cache);

        if let Some(tile) = cache.get(Tile::key(col, row, token)) {
            return Ok(Some(tile));
        }

        match self.decoder.decode(&self.container, view.level, col, row) {
            DecodeOutcome::Decoded(image) => {
                let (width, height) = view.grid.tile_size();
                let image = if image.dimensions() == (width, height) {
                    image
                } else {
                    resample(&image, width, height)
                };
                let tile = Tile::new(col, row, token, image);
                cache.put(tile.clone());
                Ok(Some(tile))
            }
            DecodeOutcome::Missing(e) => {
                warn!(map = %self.map.title, error = %e, "Skipping tile");
                Ok(None)
            }
            DecodeOutcome::ResourceExhausted => {
                cache.clear();
                Err(MapError::ResourceExhausted)
            }
        }
    }

    /// Composite the tiles of a region of the scaled map.
    ///
    /// (`x`, `y`) is the top-left corner in scaled map pixels. Returns `None`
    /// when the region does not touch the map.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ResourceExhausted`] after clearing the cache if
    /// memory runs out.
    pub fn draw_region(&self, x: i64, y: i64, width: u32, height: u32) -> Result<Option<RgbaImage>> {
        let view = self.snapshot();
        let window = view.grid.window(x, y, width, height);
        if window.is_empty() {
            return Ok(None);
        }
        self.compose(&view, &window, x, y, width, height).map(|(image, _)| Some(image))
    }

    /// Tiles needed for a viewport of `width` × `height` centred on a point.
    pub fn viewport_window(&self, lat: f64, lon: f64, width: u32, height: u32) -> TileWindow {
        let view = self.snapshot();
        let (cx, cy) = project(&self.map, &view.binding, lat, lon);
        view.grid
            .window(cx - width as i64 / 2, cy - height as i64 / 2, width, height)
    }

    /// Render a viewport centred on a point.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ResourceExhausted`] after clearing the cache if
    /// memory runs out.
    pub fn render(&self, lat: f64, lon: f64, width: u32, height: u32) -> Result<Viewport> {
        let view = self.snapshot();
        let (cx, cy) = project(&self.map, &view.binding, lat, lon);
        let (x, y) = (cx - width as i64 / 2, cy - height as i64 / 2);
        let window = view.grid.window(x, y, width, height);

        let (image, tiles) = self.compose(&view, &window, x, y, width, height)?;

        let zoom = view.table.zoom();
        let polygon: Vec<(f64, f64)> = self
            .map
            .corner_polygon()
            .into_iter()
            .map(|(px, py)| (px * zoom, py * zoom))
            .collect();
        let covers = !window.clamped
            && covers_viewport(
                &polygon,
                x as f64,
                y as f64,
                (x + width as i64) as f64,
                (y + height as i64) as f64,
            );

        Ok(Viewport { image, covers, tiles })
    }

    /// Decode the missing tiles of a window on the rayon pool.
    ///
    /// Returns the number of tiles decoded.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ResourceExhausted`] after clearing the cache if
    /// memory runs out.
    pub fn prefetch(&self, window: &TileWindow) -> Result<usize> {
        let view = self.snapshot();
        let token = view.table.token();
        let missing: Vec<(u32, u32)> = window
            .iter()
            .filter(|&(col, row)| !view.cache.contains(Tile::key(col, row, token)))
            .collect();

        let decoded = missing
            .par_iter()
            .map(|&(col, row)| self.tile_in(&view, col, row).map(|tile| tile.is_some()))
            .collect::<Result<Vec<bool>>>()?;
        Ok(decoded.into_iter().filter(|&d| d).count())
    }

    /// Release the cache and the image.
    pub fn deactivate(self) {
        self.view().cache.destroy();
        debug!(title = %self.map.title, "Deactivated map");
    }

    fn compose(
        &self,
        view: &View,
        window: &TileWindow,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    ) -> Result<(RgbaImage, usize)> {
        let mut canvas = blank(width, height).inspect_err(|_| view.cache.clear())?;
        let grid = view.grid;
        let (tw, th) = grid.tile_size();

        let mut drawn = 0;
        for (col, row) in window.iter() {
            let Some(tile) = self.tile_in(view, col, row)? else {
                continue;
            };
            let Some((ex, ey)) = grid.tile_extent(col, row) else {
                continue;
            };
            let (px, py) = (col as i64 * tw as i64 - x, row as i64 * th as i64 - y);
            let (iw, ih) = tile.image.dimensions();
            if ex < iw || ey < ih {
                let visible = imageops::crop_imm(&*tile.image, 0, 0, ex.min(iw), ey.min(ih)).to_image();
                imageops::replace(&mut canvas, &visible, px, py);
            } else {
                imageops::replace(&mut canvas, &*tile.image, px, py);
            }
            drawn += 1;
        }
        Ok((canvas, drawn))
    }
}

fn build_view(
    map: &MapDefinition,
    container: &RasterContainer,
    table: ZoomTable,
    viewport_pixels: u64,
    cache_factor: f64,
) -> Result<View> {
    let binding = AffineBinding::fit(&map.calibration_points, &map.projector(), table.zoom())?;
    let selection = table.current().selection;
    let level = container
        .level(selection.level)
        .ok_or_else(|| MapError::format(format!("missing pyramid level {}", selection.level)))?;
    let grid = TileGrid::new(level, selection.factor);
    let (tw, th) = grid.tile_size();
    let cache = Arc::new(TileCache::new(capacity_for_viewport(viewport_pixels, tw, th, cache_factor)));

    Ok(View {
        table,
        grid,
        level: selection.level,
        cache,
        binding: Arc::new(binding),
    })
}

/// Rounded pixel of a geodetic point under `binding`.
fn project(map: &MapDefinition, binding: &AffineBinding, lat: f64, lon: f64) -> (i64, i64) {
    let (x, y) = binding.pixel_from_geo(&map.projector(), lat, lon);
    (x.round() as i64, y.round() as i64)
}

/// Transparent canvas, allocated fallibly.
fn blank(width: u32, height: u32) -> Result<RgbaImage> {
    let len = width as usize * height as usize * 4;
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| MapError::ResourceExhausted)?;
    pixels.resize(len, 0);
    RgbaImage::from_raw(width, height, pixels).ok_or(MapError::ResourceExhausted)
}

/// Colour of transparent canvas pixels.
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
