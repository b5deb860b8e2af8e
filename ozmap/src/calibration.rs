//! Least-squares affine calibration between pixel and projected coordinates.
//!
//! An [`AffineBinding`] holds four linear maps, each a 3-coefficient system:
//!
//! - pixel x from (northing, easting, 1)
//! - pixel y from (northing, easting, 1)
//! - northing from (x, y, 1)
//! - easting from (x, y, 1)
//!
//! Each system is fitted over all calibration points through its normal
//! equations, on coordinates centred at their mean, and solved by Gaussian elimination with partial pivoting. Three
//! non-collinear points give an exact solution, more give a least-squares fit.

use crate::error::{MapError, Result};
use crate::map::MapPoint;
use crate::projection::Projection;

/// Pivots below this magnitude mean the system is singular.
pub const PIVOT_EPSILON: f64 = 1e-14;

/// Coefficients `[c0, c1, c2]` of `c0 * u + c1 * v + c2`.
pub type Coefficients = [f64; 3];

fn eval(k: &Coefficients, u: f64, v: f64) -> f64 {
    k[0] * u + k[1] * v + k[2]
}

/// Fitted pixel ↔ projected transform of one map at one scale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AffineBinding {
    pub kx: Coefficients,
    pub ky: Coefficients,
    pub k_northing: Coefficients,
    pub k_easting: Coefficients,
}

impl AffineBinding {
    /// Fit a binding for calibration points used at `scale`.
    ///
    /// Point pixel coordinates are stored unscaled and multiplied by `scale`
    /// before fitting.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Calibration`] with fewer than three points or when
    /// any of the four systems is singular.
    pub fn fit<P: Projection + ?Sized>(points: &[MapPoint], projection: &P, scale: f64) -> Result<Self> {
        if points.len() < 3 {
            return Err(MapError::calibration(format!(
                "{} calibration points, at least 3 required",
                points.len()
            )));
        }

        let mut xs = Vec::with_capacity(points.len());
        let mut ys = Vec::with_capacity(points.len());
        let mut ns = Vec::with_capacity(points.len());
        let mut es = Vec::with_capacity(points.len());
        for p in points {
            let (n, e) = projection.forward(p.lat, p.lon);
            xs.push(p.x * scale);
            ys.push(p.y * scale);
            ns.push(n);
            es.push(e);
        }

        let solve = |u: &[f64], v: &[f64], target: &[f64], what: &str| -> Result<Coefficients> {
            fit_plane(u, v, target)
                .ok_or_else(|| MapError::calibration(format!("singular system for {}", what)))
        };

        Ok(Self {
            kx: solve(&ns, &es, &xs, "pixel x")?,
            ky: solve(&ns, &es, &ys, "pixel y")?,
            k_northing: solve(&xs, &ys, &ns, "northing")?,
            k_easting: solve(&xs, &ys, &es, "easting")?,
        })
    }

    /// Pixel coordinates of a projected point.
    pub fn pixel_from_projected(&self, northing: f64, easting: f64) -> (f64, f64) {
        (
            eval(&self.kx, northing, easting),
            eval(&self.ky, northing, easting),
        )
    }

    /// Projected coordinates of a pixel.
    pub fn projected_from_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            eval(&self.k_northing, x, y),
            eval(&self.k_easting, x, y),
        )
    }

    /// Pixel coordinates of a geodetic point.
    pub fn pixel_from_geo<P: Projection + ?Sized>(&self, projection: &P, lat: f64, lon: f64) -> (f64, f64) {
        let (n, e) = projection.forward(lat, lon);
        self.pixel_from_projected(n, e)
    }

    /// Geodetic coordinates of a pixel.
    pub fn geo_from_pixel<P: Projection + ?Sized>(&self, projection: &P, x: f64, y: f64) -> (f64, f64) {
        let (n, e) = self.projected_from_pixel(x, y);
        projection.inverse(n, e)
    }
}

/// Least-squares `target ≈ c0 * u + c1 * v + c2`.
///
/// Inputs are centred on their means before solving, so that small maps far
/// from the projection origin keep their precision.
fn fit_plane(u: &[f64], v: &[f64], target: &[f64]) -> Option<Coefficients> {
    let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
    let (mu, mv) = (mean(u), mean(v));
    let cu: Vec<f64> = u.iter().map(|u| u - mu).collect();
    let cv: Vec<f64> = v.iter().map(|v| v - mv).collect();

    let (a, b) = normal_equations(&cu, &cv, target);
    let [c0, c1, c2] = gauss(a, b)?;
    Some([c0, c1, c2 - c0 * mu - c1 * mv])
}

/// Normal equations `AᵗA`, `AᵗB` for `target ≈ c0 * u + c1 * v + c2`.
pub fn normal_equations(u: &[f64], v: &[f64], target: &[f64]) -> ([[f64; 3]; 3], [f64; 3]) {
    let mut a = [[0.0; 3]; 3];
    let mut b = [0.0; 3];

    for ((&u, &v), &t) in u.iter().zip(v).zip(target) {
        a[0][0] += u * u;
        a[0][1] += u * v;
        a[0][2] += u;
        a[1][1] += v * v;
        a[1][2] += v;
        b[0] += t * u;
        b[1] += t * v;
        b[2] += t;
    }

    a[1][0] = a[0][1];
    a[2][0] = a[0][2];
    a[2][1] = a[1][2];
    a[2][2] = u.len() as f64;
    (a, b)
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` if a pivot falls below [`PIVOT_EPSILON`].
pub fn gauss<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    if N == 0 {
        return Some([0.0; N]);
    }

    for i in 0..N - 1 {
        let mut pivot = 0.0;
        let mut ip = i;
        for (j, row) in a.iter().enumerate().skip(i) {
            let v = row[i].abs();
            if v > pivot {
                pivot = v;
                ip = j;
            }
        }

        if pivot < PIVOT_EPSILON {
            return None;
        }

        if ip != i {
            a.swap(i, ip);
            b.swap(i, ip);
        }

        for k in i + 1..N {
            let q = -a[k][i] / a[i][i];
            a[k][i] = 0.0;
            for j in i + 1..N {
                a[k][j] += q * a[i][j];
            }
            b[k] += q * b[i];
        }
    }

    if a[N - 1][N - 1].abs() < PIVOT_EPSILON {
        return None;
    }

    let mut x = [0.0; N];
    for k in (0..N).rev() {
        let q: f64 = (k + 1..N).map(|j| a[k][j] * x[j]).sum();
        x[k] = (b[k] - q) / a[k][k];
    }
    Some(x)
}

/// Ray-casting point-in-polygon test.
///
/// An edge is crossed when one end lies strictly above `y` and the other at or
/// below it, and the crossing lies strictly left of `x`. Points on the left and
/// top edges of an axis-aligned box are therefore outside, points on the right
/// and bottom edges inside.
pub fn point_in_polygon(polygon: &[(f64, f64)], x: f64, y: f64) -> bool {
    if polygon.is_empty() {
        return false;
    }

    let mut odd = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if ((yi < y && yj >= y) || (yj < y && yi >= y))
            && xi + (y - yi) / (yj - yi) * (xj - xi) < x
        {
            odd = !odd;
        }
        j = i;
    }
    odd
}

/// True if all four corners of the rectangle lie inside the polygon.
pub fn covers_viewport(polygon: &[(f64, f64)], left: f64, top: f64, right: f64, bottom: f64) -> bool {
    [(left, top), (right, top), (left, bottom), (right, bottom)]
        .iter()
        .all(|&(x, y)| point_in_polygon(polygon, x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{Ellipsoid, ProjectionKind, Projector};
    use proptest::prelude::*;

    fn latlon() -> Projector {
        Projector::new(ProjectionKind::LatLon, Ellipsoid::Wgs84)
    }

    fn point(x: f64, y: f64, lat: f64, lon: f64) -> MapPoint {
        MapPoint { x, y, lat, lon }
    }

    /// Points placed by an exact affine map with shear.
    fn skewed_points() -> Vec<MapPoint> {
        let to_pixel = |lat: f64, lon: f64| {
            let x = (lon - 30.0) * 4000.0 + (lat - 50.0) * 350.0;
            let y = (50.5 - lat) * 6000.0 + (lon - 30.0) * 120.0;
            (x, y)
        };
        [(50.0, 30.0), (50.5, 30.05), (50.45, 31.0), (49.98, 30.9)]
            .iter()
            .map(|&(lat, lon)| {
                let (x, y) = to_pixel(lat, lon);
                point(x, y, lat, lon)
            })
            .collect()
    }

    #[test]
    fn test_gauss_simple() {
        let a = [[2.0, 1.0, -1.0], [-3.0, -1.0, 2.0], [-2.0, 1.0, 2.0]];
        let b = [8.0, -11.0, -3.0];
        let x = gauss(a, b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
        assert!((x[2] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gauss_needs_pivoting() {
        let a = [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let x = gauss(a, [5.0, 7.0, 9.0]).unwrap();
        assert_eq!(x, [7.0, 5.0, 9.0]);
    }

    #[test]
    fn test_gauss_singular() {
        let a = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [1.0, 1.0, 1.0]];
        assert!(gauss(a, [1.0, 2.0, 3.0]).is_none());
        assert!(gauss([[0.0; 3]; 3], [0.0; 3]).is_none());
    }

    #[test]
    fn test_exact_three_point_fit() {
        let points = vec![
            point(0.0, 0.0, 51.0, 10.0),
            point(1000.0, 0.0, 51.0, 11.0),
            point(0.0, 800.0, 50.0, 10.0),
        ];
        let proj = latlon();
        let binding = AffineBinding::fit(&points, &proj, 1.0).unwrap();

        for p in &points {
            let (x, y) = binding.pixel_from_geo(&proj, p.lat, p.lon);
            assert!((x - p.x).abs() < 1e-6 && (y - p.y).abs() < 1e-6);
            let (lat, lon) = binding.geo_from_pixel(&proj, x, y);
            assert!((lat - p.lat).abs() < 1e-6 && (lon - p.lon).abs() < 1e-6);
        }
    }

    #[test]
    fn test_exact_three_point_fit_utm() {
        let proj = Projector::new(ProjectionKind::Utm { zone: 33, south: false }, Ellipsoid::Wgs84);
        let points = vec![
            point(10.0, 20.0, 47.9, 14.6),
            point(3900.0, 80.0, 47.92, 15.3),
            point(150.0, 5200.0, 47.3, 14.65),
        ];
        let binding = AffineBinding::fit(&points, &proj, 1.0).unwrap();

        for p in &points {
            let (x, y) = binding.pixel_from_geo(&proj, p.lat, p.lon);
            let (lat, lon) = binding.geo_from_pixel(&proj, x, y);
            assert!((lat - p.lat).abs() < 1e-6, "lat {} vs {}", lat, p.lat);
            assert!((lon - p.lon).abs() < 1e-6, "lon {} vs {}", lon, p.lon);
        }
    }

    #[test]
    fn test_skewed_quadrilateral_round_trip() {
        let points = skewed_points();
        let proj = latlon();
        let binding = AffineBinding::fit(&points, &proj, 1.0).unwrap();

        for p in &points {
            let (x, y) = binding.pixel_from_geo(&proj, p.lat, p.lon);
            let (lat, lon) = binding.geo_from_pixel(&proj, x, y);
            assert!((lat - p.lat).abs() < 1e-6);
            assert!((lon - p.lon).abs() < 1e-6);
        }
    }

    #[test]
    fn test_scale_applies_to_pixels() {
        let points = skewed_points();
        let proj = latlon();
        let full = AffineBinding::fit(&points, &proj, 1.0).unwrap();
        let half = AffineBinding::fit(&points, &proj, 0.5).unwrap();

        let (x1, y1) = full.pixel_from_geo(&proj, 50.2, 30.4);
        let (x2, y2) = half.pixel_from_geo(&proj, 50.2, 30.4);
        assert!((x1 * 0.5 - x2).abs() < 1e-6);
        assert!((y1 * 0.5 - y2).abs() < 1e-6);
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![point(0.0, 0.0, 1.0, 1.0), point(1.0, 1.0, 2.0, 2.0)];
        assert!(matches!(
            AffineBinding::fit(&points, &latlon(), 1.0),
            Err(MapError::Calibration { .. })
        ));
    }

    #[test]
    fn test_collinear_points_are_singular() {
        let points = vec![
            point(0.0, 0.0, 1.0, 1.0),
            point(10.0, 10.0, 2.0, 2.0),
            point(20.0, 20.0, 3.0, 3.0),
        ];
        assert!(matches!(
            AffineBinding::fit(&points, &latlon(), 1.0),
            Err(MapError::Calibration { .. })
        ));
    }

    #[test]
    fn test_point_in_polygon_boundaries() {
        let square = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];

        assert!(point_in_polygon(&square, 5.0, 5.0));
        assert!(!point_in_polygon(&square, 15.0, 5.0));
        assert!(!point_in_polygon(&square, -1.0, 5.0));

        // Left and top edges are outside, right and bottom edges inside.
        assert!(!point_in_polygon(&square, 0.0, 5.0));
        assert!(point_in_polygon(&square, 10.0, 5.0));
        assert!(!point_in_polygon(&square, 5.0, 0.0));
        assert!(point_in_polygon(&square, 5.0, 10.0));

        assert!(!point_in_polygon(&[], 0.0, 0.0));
    }

    #[test]
    fn test_point_in_concave_polygon() {
        // "U" shape opening upwards
        let u = [
            (0.0, 0.0),
            (3.0, 0.0),
            (3.0, 6.0),
            (6.0, 6.0),
            (6.0, 0.0),
            (9.0, 0.0),
            (9.0, 9.0),
            (0.0, 9.0),
        ];
        assert!(point_in_polygon(&u, 1.5, 3.0));
        assert!(!point_in_polygon(&u, 4.5, 3.0));
        assert!(point_in_polygon(&u, 4.5, 7.5));
    }

    #[test]
    fn test_covers_viewport() {
        let square = [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)];
        assert!(covers_viewport(&square, 10.0, 10.0, 90.0, 90.0));
        assert!(!covers_viewport(&square, 50.0, 10.0, 150.0, 90.0));
    }

    fn sse(k: &Coefficients, u: &[f64], v: &[f64], t: &[f64]) -> f64 {
        u.iter()
            .zip(v)
            .zip(t)
            .map(|((&u, &v), &t)| (eval(k, u, v) - t).powi(2))
            .sum()
    }

    proptest! {
        #[test]
        fn prop_fit_recovers_affine_map(
            origin in (-60.0f64..60.0, -170.0f64..170.0),
            deg_per_px in (1e-5f64..1e-3, 1e-5f64..1e-3),
            shear in (-0.2f64..0.2, -0.2f64..0.2),
            pixels in proptest::collection::vec((0.0f64..5000.0, 0.0f64..5000.0), 4..=8),
        ) {
            // Three well spread points guarantee a non-degenerate system
            let (x0, y0) = pixels[0];
            let (x1, y1) = pixels[1];
            let (x2, y2) = pixels[2];
            prop_assume!(((x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0)).abs() > 1e6);

            let geo = |x: f64, y: f64| {
                let lat = origin.0 - deg_per_px.0 * (y + shear.0 * x);
                let lon = origin.1 + deg_per_px.1 * (x + shear.1 * y);
                (lat, lon)
            };
            let points: Vec<MapPoint> = pixels
                .iter()
                .map(|&(x, y)| {
                    let (lat, lon) = geo(x, y);
                    point(x, y, lat, lon)
                })
                .collect();

            let proj = latlon();
            let binding = AffineBinding::fit(&points, &proj, 1.0).unwrap();
            for p in &points {
                let (x, y) = binding.pixel_from_geo(&proj, p.lat, p.lon);
                prop_assert!((x - p.x).abs() < 1e-6 && (y - p.y).abs() < 1e-6, "pixel ({}, {}) vs ({}, {})", x, y, p.x, p.y);
                let (lat, lon) = binding.geo_from_pixel(&proj, x, y);
                prop_assert!((lat - p.lat).abs() < 1e-9 && (lon - p.lon).abs() < 1e-9);
            }

            // Any pixel, not just the calibration points
            let (lat, lon) = binding.geo_from_pixel(&proj, 2500.0, 1250.0);
            let (elat, elon) = geo(2500.0, 1250.0);
            prop_assert!((lat - elat).abs() < 1e-9 && (lon - elon).abs() < 1e-9);
        }

        #[test]
        fn prop_least_squares_is_optimal(
            coords in proptest::collection::vec((0.0f64..1000.0, 0.0f64..1000.0, -5.0f64..5.0), 4..10),
            delta in (-0.01f64..0.01, -0.01f64..0.01, -1.0f64..1.0),
        ) {
            let u: Vec<f64> = coords.iter().map(|c| c.0).collect();
            let v: Vec<f64> = coords.iter().map(|c| c.1).collect();
            let t: Vec<f64> = coords.iter().map(|c| 0.3 * c.0 - 0.7 * c.1 + 12.0 + c.2).collect();

            let (a, b) = normal_equations(&u, &v, &t);
            if let Some(k) = gauss(a, b) {
                let best = sse(&k, &u, &v, &t);
                let other = [k[0] + delta.0, k[1] + delta.1, k[2] + delta.2];
                prop_assert!(sse(&other, &u, &v, &t) >= best - 1e-6 * (1.0 + best));
            }
        }
    }
}
