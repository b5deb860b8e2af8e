//! One call-site contract for calibrated maps and the "no map" placeholder.

use std::sync::Arc;

use crate::error::Result;
use crate::map::MapDefinition;
use crate::session::{MapSession, SessionOptions};

/// Pixels per degree of the synthetic map at zoom 1.
pub const SYNTHETIC_PIXELS_PER_DEGREE: f64 = 50_000.0;

const MIN_SYNTHETIC_ZOOM: f64 = 0.001;
const MAX_SYNTHETIC_ZOOM: f64 = 10.0;
const SYNTHETIC_ZOOM_STEP: f64 = 0.1;

/// Placeholder shown where no map is available.
///
/// A plain equirectangular grid anchored at the whole degree containing the
/// point it was created for. It never covers anything, so a real map always
/// wins over it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticMap {
    /// Whole degrees south of the north pole.
    origin_lat: i32,
    /// Whole degrees east of the antimeridian.
    origin_lon: i32,
    zoom: f64,
}

impl SyntheticMap {
    /// Placeholder around a point, at zoom 1.
    pub fn around(lat: f64, lon: f64) -> Self {
        Self {
            origin_lat: (90.0 - lat).floor() as i32,
            origin_lon: (180.0 + lon).floor() as i32,
            zoom: 1.0,
        }
    }

    /// Same anchor, different zoom.
    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.set_zoom(zoom);
        self
    }

    fn pixels_per_degree(&self) -> f64 {
        SYNTHETIC_PIXELS_PER_DEGREE * self.zoom
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Set the zoom, floored to 1e-3 and clamped to [0.001, 10].
    pub fn set_zoom(&mut self, zoom: f64) -> f64 {
        self.zoom = ((zoom * 1000.0).floor() / 1000.0).clamp(MIN_SYNTHETIC_ZOOM, MAX_SYNTHETIC_ZOOM);
        self.zoom
    }

    pub fn next_zoom(&self) -> Option<f64> {
        (self.zoom < MAX_SYNTHETIC_ZOOM).then(|| (self.zoom + SYNTHETIC_ZOOM_STEP).min(MAX_SYNTHETIC_ZOOM))
    }

    pub fn prev_zoom(&self) -> Option<f64> {
        (self.zoom > MIN_SYNTHETIC_ZOOM).then(|| (self.zoom - SYNTHETIC_ZOOM_STEP).max(MIN_SYNTHETIC_ZOOM))
    }

    pub fn pixel_from_geo(&self, lat: f64, lon: f64) -> (i64, i64) {
        let ppd = self.pixels_per_degree();
        (
            ((180.0 + lon - self.origin_lon as f64) * ppd) as i64,
            ((90.0 - lat - self.origin_lat as f64) * ppd) as i64,
        )
    }

    pub fn geo_from_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let ppd = self.pixels_per_degree();
        (
            90.0 - (y / ppd + self.origin_lat as f64),
            x / ppd + self.origin_lon as f64 - 180.0,
        )
    }

    pub fn covers_lat_lon(&self, _lat: f64, _lon: f64) -> bool {
        false
    }
}

/// A map that can be shown: a calibrated map or the placeholder.
#[derive(Debug, Clone)]
pub enum MapSource {
    Calibrated(Arc<MapDefinition>),
    Synthetic(SyntheticMap),
}

impl MapSource {
    pub fn title(&self) -> &str {
        match self {
            MapSource::Calibrated(map) => &map.title,
            MapSource::Synthetic(_) => "-no map-",
        }
    }

    pub fn covers_lat_lon(&self, lat: f64, lon: f64) -> bool {
        match self {
            MapSource::Calibrated(map) => map.covers_lat_lon(lat, lon),
            MapSource::Synthetic(map) => map.covers_lat_lon(lat, lon),
        }
    }

    /// Activate the source.
    ///
    /// # Errors
    ///
    /// Calibrated maps fail like [`MapDefinition::activate`]; the placeholder
    /// never fails.
    pub fn activate(&self, viewport_pixels: u64, options: &SessionOptions) -> Result<ActiveMap> {
        match self {
            MapSource::Calibrated(map) => map.activate(viewport_pixels, options).map(ActiveMap::Calibrated),
            MapSource::Synthetic(map) => Ok(ActiveMap::Synthetic(*map)),
        }
    }
}

/// An activated [`MapSource`].
#[derive(Debug)]
pub enum ActiveMap {
    Calibrated(MapSession),
    Synthetic(SyntheticMap),
}

impl ActiveMap {
    /// The session, for calibrated maps.
    pub fn session(&self) -> Option<&MapSession> {
        match self {
            ActiveMap::Calibrated(session) => Some(session),
            ActiveMap::Synthetic(_) => None,
        }
    }

    /// Pixel of a geodetic point at the current zoom.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::OutOfBounds`](crate::MapError::OutOfBounds) if the
    /// point is off a calibrated map.
    pub fn pixel_from_geo(&self, lat: f64, lon: f64) -> Result<(i64, i64)> {
        match self {
            ActiveMap::Calibrated(session) => session.pixel_from_geo(lat, lon),
            ActiveMap::Synthetic(map) => Ok(map.pixel_from_geo(lat, lon)),
        }
    }

    pub fn geo_from_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            ActiveMap::Calibrated(session) => session.geo_from_pixel(x, y),
            ActiveMap::Synthetic(map) => map.geo_from_pixel(x, y),
        }
    }

    /// Change the zoom; returns the zoom actually set.
    ///
    /// # Errors
    ///
    /// See [`MapSession::set_zoom`].
    pub fn set_zoom(&mut self, zoom: f64) -> Result<f64> {
        match self {
            ActiveMap::Calibrated(session) => session.set_zoom(zoom),
            ActiveMap::Synthetic(map) => Ok(map.set_zoom(zoom)),
        }
    }

    pub fn zoom(&self) -> f64 {
        match self {
            ActiveMap::Calibrated(session) => session.zoom(),
            ActiveMap::Synthetic(map) => map.zoom(),
        }
    }

    pub fn next_zoom(&self) -> Option<f64> {
        match self {
            ActiveMap::Calibrated(session) => session.next_zoom(),
            ActiveMap::Synthetic(map) => map.next_zoom(),
        }
    }

    pub fn prev_zoom(&self) -> Option<f64> {
        match self {
            ActiveMap::Calibrated(session) => session.prev_zoom(),
            ActiveMap::Synthetic(map) => map.prev_zoom(),
        }
    }

    pub fn covers_lat_lon(&self, lat: f64, lon: f64) -> bool {
        match self {
            ActiveMap::Calibrated(session) => session.covers_lat_lon(lat, lon),
            ActiveMap::Synthetic(map) => map.covers_lat_lon(lat, lon),
        }
    }

    pub fn deactivate(self) {
        if let ActiveMap::Calibrated(session) = self {
            session.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_map;
    use crate::session::fixtures::map_dir;

    #[test]
    fn test_synthetic_conversion() {
        let map = SyntheticMap::around(10.5, 20.5);
        assert_eq!(map.pixel_from_geo(10.5, 20.5), (25_000, 25_000));

        let (lat, lon) = map.geo_from_pixel(25_000.0, 25_000.0);
        assert!((lat - 10.5).abs() < 1e-9);
        assert!((lon - 20.5).abs() < 1e-9);

        let zoomed = map.with_zoom(2.0);
        assert_eq!(zoomed.pixel_from_geo(10.5, 20.5), (50_000, 50_000));
    }

    #[test]
    fn test_synthetic_southern_hemisphere() {
        let map = SyntheticMap::around(-33.9, 151.2);
        let (x, y) = map.pixel_from_geo(-33.9, 151.2);
        let (lat, lon) = map.geo_from_pixel(x as f64, y as f64);
        assert!((lat + 33.9).abs() < 1e-4);
        assert!((lon - 151.2).abs() < 1e-4);
    }

    #[test]
    fn test_synthetic_zoom() {
        let mut map = SyntheticMap::around(0.0, 0.0);
        assert_eq!(map.set_zoom(1.23456), 1.234);
        assert_eq!(map.set_zoom(50.0), 10.0);
        assert_eq!(map.next_zoom(), None);
        assert_eq!(map.set_zoom(0.0), 0.001);
        assert_eq!(map.prev_zoom(), None);
        assert!(map.next_zoom().unwrap() > 0.1);
    }

    #[test]
    fn test_synthetic_covers_nothing() {
        let source = MapSource::Synthetic(SyntheticMap::around(10.5, 20.5));
        assert!(!source.covers_lat_lon(10.5, 20.5));
        assert_eq!(source.title(), "-no map-");

        let mut active = source.activate(1000, &SessionOptions::default()).unwrap();
        assert!(active.session().is_none());
        assert!(active.pixel_from_geo(80.0, -170.0).is_ok());
        assert_eq!(active.set_zoom(0.5).unwrap(), 0.5);
        assert_eq!(active.zoom(), 0.5);
        active.deactivate();
    }

    #[test]
    fn test_calibrated_source() {
        let (_dir, path) = map_dir();
        let source = MapSource::Calibrated(Arc::new(load_map(&path)));
        assert!(source.covers_lat_lon(10.5, 20.5));
        assert_eq!(source.title(), "test");

        let mut active = source.activate(800 * 480, &SessionOptions::default()).unwrap();
        assert!(active.session().is_some());
        assert_eq!(active.pixel_from_geo(10.5, 20.5).unwrap(), (500, 500));
        assert!(active.pixel_from_geo(12.0, 20.5).is_err());
        assert_eq!(active.set_zoom(2.0).unwrap(), 2.0);
        assert_eq!(active.next_zoom(), Some(2.5));
        assert_eq!(active.prev_zoom(), Some(1.75));
        assert!(active.covers_lat_lon(10.5, 20.5));
        active.deactivate();
    }
}
