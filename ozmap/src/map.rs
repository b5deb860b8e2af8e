//! Calibrated map definitions.
//!
//! A [`MapDefinition`] is the immutable, serialisable description of one map:
//! where its image lives, how its pixels relate to the ground and which area it
//! covers. Runtime state (open container, tile cache, scaled binding) lives in
//! a [`MapSession`](crate::MapSession), created by [`MapDefinition::activate`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{self, AffineBinding};
use crate::error::{MapError, Result};
use crate::projection::{Ellipsoid, Projection, ProjectionKind, Projector};
use crate::session::{MapSession, SessionOptions};

/// Stable map identifier derived from the map file path.
pub type MapId = u32;

/// 31-based string hash (over UTF-16 code units) used for map ids.
pub fn string_hash(s: &str) -> u32 {
    s.encode_utf16()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Map id of a map file path.
pub fn map_id(path: &Path) -> MapId {
    string_hash(&path.to_string_lossy())
}

/// A pixel ↔ geodetic correspondence (calibration point or corner marker).
///
/// Pixel coordinates are at the native image scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
    pub lat: f64,
    pub lon: f64,
}

/// A geographic bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lon: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lon: f64,
}

impl Bounds {
    /// Create a new bounding box.
    ///
    /// # Arguments
    ///
    /// * `min_lat` - Southern boundary latitude
    /// * `min_lon` - Western boundary longitude
    /// * `max_lat` - Northern boundary latitude
    /// * `max_lon` - Eastern boundary longitude
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Bounding box of a set of points. Empty input gives an inverted box.
    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a MapPoint>) -> Self {
        let mut b = Self::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in points {
            b.min_lat = b.min_lat.min(p.lat);
            b.max_lat = b.max_lat.max(p.lat);
            b.min_lon = b.min_lon.min(p.lon);
            b.max_lon = b.max_lon.max(p.lon);
        }
        b
    }

    /// Open-interval overlap test.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_lon < other.max_lon
            && other.min_lon < self.max_lon
            && self.min_lat < other.max_lat
            && other.min_lat < self.max_lat
    }

    /// Closed-interval containment of a point.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    /// Corners as (lat, lon), clockwise from the north-west.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.max_lat, self.min_lon),
            (self.max_lat, self.max_lon),
            (self.min_lat, self.max_lon),
            (self.min_lat, self.min_lon),
        ]
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{},{},{}]",
            self.max_lat, self.min_lon, self.min_lat, self.max_lon
        )
    }
}

/// One calibrated map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapDefinition {
    pub id: MapId,
    /// Path of the `.map` file.
    pub path: PathBuf,
    pub title: String,
    /// Image path as written in the `.map` file.
    pub image_path: String,
    pub datum: String,
    pub ellipsoid: Ellipsoid,
    pub projection: ProjectionKind,
    /// Declared image size in pixels.
    pub width: u32,
    pub height: u32,
    /// Metres per pixel at native resolution.
    pub mpp: f64,
    /// Pixel scale factor (inverse of the `MSF` entry).
    pub scale_factor: f64,
    pub calibration_points: Vec<MapPoint>,
    pub corner_markers: Vec<MapPoint>,
    /// Why the map cannot be used, if it cannot.
    #[serde(default)]
    pub load_error: Option<String>,
    /// Binding at native scale; re-fitted after deserialisation.
    #[serde(skip)]
    binding: Option<AffineBinding>,
}

impl MapDefinition {
    /// Create an empty definition for a map file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            id: map_id(&path),
            path,
            title: String::new(),
            image_path: String::new(),
            datum: "WGS 84".to_string(),
            ellipsoid: Ellipsoid::Wgs84,
            projection: ProjectionKind::LatLon,
            width: 0,
            height: 0,
            mpp: 0.0,
            scale_factor: 1.0,
            calibration_points: Vec::new(),
            corner_markers: Vec::new(),
            load_error: None,
            binding: None,
        }
    }

    /// The projection bound to this map's ellipsoid.
    pub fn projector(&self) -> Projector {
        Projector::new(self.projection, self.ellipsoid)
    }

    /// Fit the native-scale binding from the calibration points.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Calibration`] if the points cannot be fitted. The
    /// previous binding is kept.
    pub fn initialize(&mut self) -> Result<()> {
        let binding = AffineBinding::fit(&self.calibration_points, &self.projector(), 1.0)?;
        self.binding = Some(binding);
        Ok(())
    }

    /// Native-scale binding, if fitted.
    pub fn binding(&self) -> Option<&AffineBinding> {
        self.binding.as_ref()
    }

    /// True if the map loaded cleanly and is calibrated.
    pub fn is_usable(&self) -> bool {
        self.load_error.is_none() && self.binding.is_some() && !self.corner_markers.is_empty()
    }

    /// Bounding box of the corner markers.
    pub fn bounds(&self) -> Bounds {
        Bounds::of_points(&self.corner_markers)
    }

    /// Metres per pixel of the image as stored.
    pub fn absolute_mpp(&self) -> f64 {
        self.mpp / self.scale_factor
    }

    /// Resolution of `ref_mpp` relative to this map.
    pub fn covering_ratio(&self, ref_mpp: f64) -> f64 {
        ref_mpp / self.absolute_mpp()
    }

    /// Corner polygon in native pixels.
    pub fn corner_polygon(&self) -> Vec<(f64, f64)> {
        self.corner_markers.iter().map(|m| (m.x, m.y)).collect()
    }

    /// Native pixel of a geodetic point, or `None` without a binding.
    pub fn pixel_from_geo(&self, lat: f64, lon: f64) -> Option<(f64, f64)> {
        self.binding
            .as_ref()
            .map(|b| b.pixel_from_geo(&self.projector(), lat, lon))
    }

    /// Geodetic point of a native pixel, or `None` without a binding.
    pub fn geo_from_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.binding
            .as_ref()
            .map(|b| b.geo_from_pixel(&self.projector(), x, y))
    }

    /// True if the point lies on the image and inside the corner polygon.
    pub fn covers_lat_lon(&self, lat: f64, lon: f64) -> bool {
        let Some((x, y)) = self.pixel_from_geo(lat, lon) else {
            return false;
        };
        let (x, y) = (x.round(), y.round());
        if x < 0.0 || x >= self.width as f64 || y < 0.0 || y >= self.height as f64 {
            return false;
        }
        calibration::point_in_polygon(&self.corner_polygon(), x, y)
    }

    /// True if the map's corner polygon and `area` share any region.
    ///
    /// This is overlap, not containment: an area that only partly lies on
    /// the map, or that encloses the whole map, counts. Overlap of the
    /// bounding boxes alone does not; a map whose corner polygon misses the
    /// area is rejected even when its bounding box intersects it.
    pub fn contains_area(&self, area: &Bounds) -> bool {
        if self.corner_markers.is_empty() || !self.bounds().intersects(area) {
            return false;
        }

        let polygon: Vec<(f64, f64)> = self.corner_markers.iter().map(|m| (m.lon, m.lat)).collect();

        if area
            .corners()
            .iter()
            .any(|&(lat, lon)| calibration::point_in_polygon(&polygon, lon, lat))
        {
            return true;
        }
        if self.corner_markers.iter().any(|m| area.contains(m.lat, m.lon)) {
            return true;
        }

        let rect: Vec<(f64, f64)> = area.corners().iter().map(|&(lat, lon)| (lon, lat)).collect();
        let crosses = edges(&polygon).any(|(p1, p2)| edges(&rect).any(|(q1, q2)| segments_intersect(p1, p2, q1, q2)));
        crosses
    }

    /// Locate the image file.
    ///
    /// Tries the path as written, then the bare file name next to the `.map` file.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::NotFound`] if neither exists.
    pub fn resolve_image_path(&self) -> Result<PathBuf> {
        let direct = PathBuf::from(&self.image_path);
        if !self.image_path.is_empty() && direct.is_file() {
            return Ok(direct);
        }

        let normalized = self.image_path.replace('\\', "/");
        if let (Some(name), Some(dir)) = (Path::new(&normalized).file_name(), self.path.parent()) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(MapError::NotFound {
            what: format!("image file {}", self.image_path),
        })
    }

    /// Activate the map: open its image and create a rendering session.
    ///
    /// # Arguments
    ///
    /// * `viewport_pixels` - Pixel count of the display area, used to size the tile cache
    /// * `options` - Decoder and cache settings
    ///
    /// # Errors
    ///
    /// Returns an error if the map is unusable, the image is missing or the
    /// container cannot be decoded.
    pub fn activate(self: &Arc<Self>, viewport_pixels: u64, options: &SessionOptions) -> Result<MapSession> {
        MapSession::open(Arc::clone(self), viewport_pixels, options)
    }

    /// Human-readable summary.
    pub fn info(&self) -> Vec<String> {
        let mut info = vec![
            format!("title: {}", self.title),
            format!("projection: {}", self.projection.name()),
            format!("ellipsoid: {}", self.ellipsoid.name()),
            format!("datum: {}", self.datum),
            format!("mpp: {}", self.mpp),
            format!("image width: {}", self.width),
            format!("image height: {}", self.height),
            format!("image file: {}", self.image_path),
            format!("scale factor: {}", 1.0 / self.scale_factor),
            "calibration points:".to_string(),
        ];

        for (i, p) in self.calibration_points.iter().enumerate() {
            info.push(point_line(i, p));
        }

        if let Some((lat, lon)) = self.geo_from_pixel(self.width as f64 / 2.0, self.height as f64 / 2.0) {
            info.push(format!("map center (calibration) test: {} {}", lat, lon));
        }

        info.push("corners:".to_string());
        for (i, p) in self.corner_markers.iter().enumerate() {
            info.push(point_line(i, p));
        }

        if let Some(err) = &self.load_error {
            info.push(format!("load error: {}", err));
        }
        info
    }
}

fn point_line(i: usize, p: &MapPoint) -> String {
    format!(
        "\t{:02}: x: {} y: {} lat: {:.6} lon: {:.6}",
        i + 1,
        p.x,
        p.y,
        p.lat,
        p.lon
    )
}

fn edges(polygon: &[(f64, f64)]) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
    (0..polygon.len()).map(move |i| (polygon[i], polygon[(i + 1) % polygon.len()]))
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), q1: (f64, f64), q2: (f64, f64)) -> bool {
    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A north-up lat/lon map covering [`lat0`, `lat0 + 1`] × [`lon0`, `lon0 + 1`].
    pub fn square_map(name: &str, lat0: f64, lon0: f64, mpp: f64) -> MapDefinition {
        let mut map = MapDefinition::new(format!("/maps/{}.map", name));
        map.title = name.to_string();
        map.image_path = format!("{}.ozf2", name);
        map.width = 1000;
        map.height = 1000;
        map.mpp = mpp;
        map.calibration_points = vec![
            MapPoint { x: 0.0, y: 0.0, lat: lat0 + 1.0, lon: lon0 },
            MapPoint { x: 1000.0, y: 0.0, lat: lat0 + 1.0, lon: lon0 + 1.0 },
            MapPoint { x: 0.0, y: 1000.0, lat: lat0, lon: lon0 },
            MapPoint { x: 1000.0, y: 1000.0, lat: lat0, lon: lon0 + 1.0 },
        ];
        map.corner_markers = vec![
            MapPoint { x: 0.0, y: 0.0, lat: lat0 + 1.0, lon: lon0 },
            MapPoint { x: 0.0, y: 999.0, lat: lat0 + 0.001, lon: lon0 },
            MapPoint { x: 999.0, y: 999.0, lat: lat0 + 0.001, lon: lon0 + 0.999 },
            MapPoint { x: 999.0, y: 0.0, lat: lat0 + 1.0, lon: lon0 + 0.999 },
        ];
        map.initialize().unwrap();
        map
    }

    /// A lat/lon map whose polygon is a triangle (north-west half of the square).
    pub fn triangle_map(name: &str, lat0: f64, lon0: f64, mpp: f64) -> MapDefinition {
        let mut map = square_map(name, lat0, lon0, mpp);
        map.corner_markers = vec![
            MapPoint { x: 0.0, y: 0.0, lat: lat0 + 1.0, lon: lon0 },
            MapPoint { x: 0.0, y: 999.0, lat: lat0 + 0.001, lon: lon0 },
            MapPoint { x: 999.0, y: 0.0, lat: lat0 + 1.0, lon: lon0 + 0.999 },
        ];
        map
    }
}
