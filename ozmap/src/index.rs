//! Whole-degree spatial index over a map library.
//!
//! The index is a 181×361 grid of cells, one per integer latitude/longitude.
//! A map is registered in every cell its bounding box touches (floor of the
//! minimums to ceil of the maximums), so lookups only need to look at a few
//! cells and then run the exact polygon test on the candidates.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use tracing::debug;

use crate::error::{MapError, Result};
use crate::map::{Bounds, MapDefinition, MapId};

/// Number of latitude cells (-90..=90).
pub const LAT_CELLS: usize = 181;

/// Number of longitude cells (-180..=180).
pub const LON_CELLS: usize = 361;

/// Maps coarser than this (metres per pixel) are never offered as covering maps.
pub const MAX_COVERING_MPP: f64 = 200.0;

/// Spatial index of calibrated maps.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cells: Vec<HashSet<MapId>>,
    maps: HashMap<MapId, Arc<MapDefinition>>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Cell ranges touched by a bounding box, or `None` if any is off the grid.
fn cell_ranges(bounds: &Bounds) -> Option<(RangeInclusive<i32>, RangeInclusive<i32>)> {
    let lat = bounds.min_lat.floor() as i32..=bounds.max_lat.ceil() as i32;
    let lon = bounds.min_lon.floor() as i32..=bounds.max_lon.ceil() as i32;
    let on_grid = |r: &RangeInclusive<i32>, half: i32| *r.start() >= -half && *r.end() <= half;
    (on_grid(&lat, 90) && on_grid(&lon, 180)).then_some((lat, lon))
}

fn cell_index(lat: i32, lon: i32) -> Option<usize> {
    let row = usize::try_from(lat + 90).ok().filter(|&r| r < LAT_CELLS)?;
    let col = usize::try_from(lon + 180).ok().filter(|&c| c < LON_CELLS)?;
    Some(row * LON_CELLS + col)
}

/// Order by absolute MPP, then title.
fn by_resolution(a: &Arc<MapDefinition>, b: &Arc<MapDefinition>) -> std::cmp::Ordering {
    a.absolute_mpp()
        .total_cmp(&b.absolute_mpp())
        .then_with(|| a.title.cmp(&b.title))
}

impl SpatialIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            cells: vec![HashSet::new(); LAT_CELLS * LON_CELLS],
            maps: HashMap::new(),
        }
    }

    /// Register a map in every cell of its bounding box.
    ///
    /// Returns `false` if a map with the same id is already indexed.
    ///
    /// # Errors
    ///
    /// * [`MapError::Calibration`] if the map is not usable
    /// * [`MapError::OutOfBounds`] if its bounding box leaves the grid; the
    ///   index is left unchanged
    pub fn insert(&mut self, map: Arc<MapDefinition>) -> Result<bool> {
        if self.maps.contains_key(&map.id) {
            return Ok(false);
        }
        if !map.is_usable() {
            return Err(MapError::calibration(format!("map {} is not usable", map.title)));
        }

        let bounds = map.bounds();
        let (lats, lons) = cell_ranges(&bounds).ok_or(MapError::OutOfBounds {
            lat: bounds.max_lat,
            lon: bounds.max_lon,
        })?;

        for lat in lats {
            for lon in lons.clone() {
                if let Some(i) = cell_index(lat, lon) {
                    self.cells[i].insert(map.id);
                }
            }
        }
        debug!(id = map.id, title = %map.title, bounds = %bounds, "Indexed map");
        self.maps.insert(map.id, map);
        Ok(true)
    }

    /// Unregister a map.
    pub fn remove(&mut self, id: MapId) -> Option<Arc<MapDefinition>> {
        let map = self.maps.remove(&id)?;
        if let Some((lats, lons)) = cell_ranges(&map.bounds()) {
            for lat in lats {
                for lon in lons.clone() {
                    if let Some(i) = cell_index(lat, lon) {
                        self.cells[i].remove(&id);
                    }
                }
            }
        }
        Some(map)
    }

    /// Look up an indexed map.
    pub fn get(&self, id: MapId) -> Option<&Arc<MapDefinition>> {
        self.maps.get(&id)
    }

    /// Every indexed map, in no particular order.
    pub fn maps(&self) -> impl Iterator<Item = &Arc<MapDefinition>> {
        self.maps.values()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Ids registered in one cell.
    pub fn cell(&self, lat: i32, lon: i32) -> impl Iterator<Item = MapId> + '_ {
        cell_index(lat, lon)
            .map(|i| &self.cells[i])
            .into_iter()
            .flatten()
            .copied()
    }

    /// Union of the candidates of every cell in the given ranges.
    fn candidates(&self, lats: RangeInclusive<i32>, lons: RangeInclusive<i32>) -> HashSet<MapId> {
        let lats = (*lats.start()).max(-90)..=(*lats.end()).min(90);
        let lons = (*lons.start()).max(-180)..=(*lons.end()).min(180);
        let mut ids = HashSet::new();
        for lat in lats {
            for lon in lons.clone() {
                ids.extend(self.cell(lat, lon));
            }
        }
        ids
    }

    /// Maps whose polygon contains the point, most detailed first.
    pub fn query_point(&self, lat: f64, lon: f64) -> Vec<Arc<MapDefinition>> {
        let ids = self.candidates(
            lat.floor() as i32..=lat.ceil() as i32,
            lon.floor() as i32..=lon.ceil() as i32,
        );

        let mut found: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.maps.get(&id))
            .filter(|map| map.covers_lat_lon(lat, lon))
            .cloned()
            .collect();
        found.sort_by(by_resolution);
        found
    }

    /// Maps that can stand in for or complement `reference` over `area`,
    /// coarsest first.
    ///
    /// # Arguments
    ///
    /// * `reference` - The map currently shown; never part of the result
    /// * `area` - Area that must be covered
    /// * `covering` - The reference map already covers the whole area
    /// * `best_fit` - Also offer maps more detailed than the reference
    pub fn query_coverage(
        &self,
        reference: &MapDefinition,
        area: &Bounds,
        covering: bool,
        best_fit: bool,
    ) -> Vec<Arc<MapDefinition>> {
        let ids = self.candidates(
            area.min_lat.floor() as i32..=area.max_lat.ceil() as i32,
            area.min_lon.floor() as i32..=area.max_lon.ceil() as i32,
        );

        let mut found: Vec<_> = ids
            .into_iter()
            .filter(|&id| id != reference.id)
            .filter_map(|id| self.maps.get(&id))
            .filter(|map| {
                if map.absolute_mpp() > MAX_COVERING_MPP {
                    return false;
                }
                // The reference's scaled mpp, against the candidate's stored one
                let ratio = map.covering_ratio(reference.mpp);
                // Less detailed, and not needed or far too coarse
                if (covering || ratio < 0.2) && ratio < 0.99 {
                    return false;
                }
                // More detailed, but not wanted or far too fine
                if (!best_fit && covering) || ratio > 5.0 {
                    return false;
                }
                map.contains_area(area)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| by_resolution(b, a));
        found
    }

    /// Drop every map and cell entry.
    pub fn clear(&mut self) {
        self.maps.clear();
        for cell in &mut self.cells {
            cell.clear();
        }
    }
}
