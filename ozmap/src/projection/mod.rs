//! Map projections and reference ellipsoids.
//!
//! Calibration works in a projected (northing, easting) plane. This module
//! provides the projections found in OziExplorer `.map` files: geographic
//! coordinates, cylindrical (Mercator, Transverse Mercator, UTM and the
//! national grids built on them), conic (Lambert conformal, Albers,
//! equidistant), Lambert azimuthal equal-area, the Swiss oblique Mercator and
//! sinusoidal, all on the ellipsoid of the map's datum.

mod azimuthal;
mod conic;
mod swiss;

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use serde::{Deserialize, Serialize};

use crate::datum::Datum;
use crate::error::{MapError, Result};

use azimuthal::Laea;
use conic::{Albers, EquidistantConic, Lcc};
use swiss::SwissObliqueMercator;

/// Forward and inverse transforms between geodetic and projected coordinates.
pub trait Projection {
    /// Project (`lat`, `lon`) in degrees to (northing, easting).
    fn forward(&self, lat: f64, lon: f64) -> (f64, f64);

    /// Unproject (northing, easting) to (`lat`, `lon`) in degrees.
    fn inverse(&self, northing: f64, easting: f64) -> (f64, f64);
}

/// Reference ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ellipsoid {
    #[default]
    Wgs84,
    Wgs72,
    Grs80,
    Krassovsky,
    International1924,
    Clarke1866,
    Clarke1880,
    Clarke1880Ign,
    Bessel1841,
    Airy1830,
    AiryModified,
    AustralianNational,
}

impl Ellipsoid {
    /// Semi-major axis (metres) and inverse flattening.
    pub fn parameters(&self) -> (f64, f64) {
        match self {
            Ellipsoid::Wgs84 => (6_378_137.0, 298.257_223_563),
            Ellipsoid::Wgs72 => (6_378_135.0, 298.26),
            Ellipsoid::Grs80 => (6_378_137.0, 298.257_222_101),
            Ellipsoid::Krassovsky => (6_378_245.0, 298.3),
            Ellipsoid::International1924 => (6_378_388.0, 297.0),
            Ellipsoid::Clarke1866 => (6_378_206.4, 294.978_698_2),
            Ellipsoid::Clarke1880 => (6_378_249.145, 293.465),
            Ellipsoid::Clarke1880Ign => (6_378_249.2, 293.466_021_293_627),
            Ellipsoid::Bessel1841 => (6_377_397.155, 299.152_812_8),
            Ellipsoid::Airy1830 => (6_377_563.396, 299.324_964_6),
            Ellipsoid::AiryModified => (6_377_340.189, 299.324_964_6),
            Ellipsoid::AustralianNational => (6_378_160.0, 298.25),
        }
    }

    /// Semi-major axis in metres.
    pub fn a(&self) -> f64 {
        self.parameters().0
    }

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        let f = 1.0 / self.parameters().1;
        f * (2.0 - f)
    }

    /// First eccentricity.
    pub fn e(&self) -> f64 {
        self.e2().sqrt()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ellipsoid::Wgs84 => "WGS 84",
            Ellipsoid::Wgs72 => "WGS 72",
            Ellipsoid::Grs80 => "GRS 80",
            Ellipsoid::Krassovsky => "Krassovsky 1940",
            Ellipsoid::International1924 => "International 1924",
            Ellipsoid::Clarke1866 => "Clarke 1866",
            Ellipsoid::Clarke1880 => "Clarke 1880",
            Ellipsoid::Clarke1880Ign => "Clarke 1880 IGN",
            Ellipsoid::Bessel1841 => "Bessel 1841",
            Ellipsoid::Airy1830 => "Airy 1830",
            Ellipsoid::AiryModified => "Airy Modified 1849",
            Ellipsoid::AustralianNational => "Australian National",
        }
    }

    /// Ellipsoid of an OziExplorer datum name.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Projection`] if the datum is not known.
    pub fn for_datum(datum: &str) -> Result<Self> {
        Datum::find(datum).map(|d| d.ellipsoid)
    }
}

/// Parameters of the conic projections.
///
/// `scale` only applies to the Lambert conformal conic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConicParameters {
    pub origin_latitude: f64,
    pub central_meridian: f64,
    pub standard_parallel_1: f64,
    pub standard_parallel_2: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl ConicParameters {
    pub fn new(lat0: f64, lon0: f64, lat1: f64, lat2: f64, x0: f64, y0: f64) -> Self {
        Self {
            origin_latitude: lat0,
            central_meridian: lon0,
            standard_parallel_1: lat1,
            standard_parallel_2: lat2,
            scale: 1.0,
            false_easting: x0,
            false_northing: y0,
        }
    }
}

/// Projection parameters, as stored in map definitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectionKind {
    /// Geographic coordinates: northing is latitude, easting is longitude.
    LatLon,
    Mercator {
        central_meridian: f64,
        scale: f64,
        false_easting: f64,
        false_northing: f64,
    },
    TransverseMercator {
        origin_latitude: f64,
        central_meridian: f64,
        scale: f64,
        false_easting: f64,
        false_northing: f64,
    },
    /// UTM; zone 0 means "not yet known".
    Utm { zone: u8, south: bool },
    LambertConformalConic(ConicParameters),
    AlbersEqualArea(ConicParameters),
    EquidistantConic(ConicParameters),
    LambertAzimuthalEqualArea {
        origin_latitude: f64,
        central_meridian: f64,
        false_easting: f64,
        false_northing: f64,
    },
    SwissObliqueMercator {
        origin_latitude: f64,
        central_meridian: f64,
        scale: f64,
        false_easting: f64,
        false_northing: f64,
    },
    Sinusoidal {
        central_meridian: f64,
        false_easting: f64,
        false_northing: f64,
    },
}

/// Optional overrides from a `Projection Setup` line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectionSetup {
    pub origin_latitude: Option<f64>,
    pub central_meridian: Option<f64>,
    pub scale: Option<f64>,
    pub false_easting: Option<f64>,
    pub false_northing: Option<f64>,
    pub standard_parallel_1: Option<f64>,
    pub standard_parallel_2: Option<f64>,
}

impl ProjectionKind {
    fn transverse_mercator(lat0: f64, lon0: f64, k: f64, x0: f64, y0: f64) -> Self {
        ProjectionKind::TransverseMercator {
            origin_latitude: lat0,
            central_meridian: lon0,
            scale: k,
            false_easting: x0,
            false_northing: y0,
        }
    }

    fn lambert(lat0: f64, lon0: f64, lat1: f64, lat2: f64, x0: f64, y0: f64) -> Self {
        ProjectionKind::LambertConformalConic(ConicParameters::new(lat0, lon0, lat1, lat2, x0, y0))
    }

    /// Projection for an OziExplorer projection name.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Projection`] for projections that are not implemented.
    pub fn from_ozi_name(name: &str) -> Result<Self> {
        let kind = match name.trim() {
            "Latitude/Longitude" => ProjectionKind::LatLon,
            "Mercator" => ProjectionKind::Mercator {
                central_meridian: 0.0,
                scale: 1.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            "Transverse Mercator" => Self::transverse_mercator(0.0, 0.0, 1.0, 0.0, 0.0),
            "(UTM) Universal Transverse Mercator" => ProjectionKind::Utm {
                zone: 0,
                south: false,
            },
            "(BNG) British National Grid" => {
                Self::transverse_mercator(49.0, -2.0, 0.999_601, 400_000.0, -100_000.0)
            }
            "(IG) Irish Grid" => Self::transverse_mercator(53.5, -8.0, 1.000_035, 200_000.0, 250_000.0),
            "(SG) Swedish Grid" => {
                Self::transverse_mercator(0.0, 15.808_277_777_777_78, 1.0, 1_500_000.0, 0.0)
            }
            "(ITA1) Italy Grid Zone 1" => {
                Self::transverse_mercator(0.0, -3.452_333_333_333_33, 0.9996, 1_500_000.0, 0.0)
            }
            "(ITA2) Italy Grid Zone 2" => {
                Self::transverse_mercator(0.0, 2.547_666_666_666_66, 0.9996, 2_520_000.0, 0.0)
            }
            "Lambert Conformal Conic" => Self::lambert(0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            "(I) France Zone I" => {
                Self::lambert(49.5, 2.337_229, 48.598_523, 50.395_912, 600_000.0, 200_000.0)
            }
            "(II) France Zone II" => {
                Self::lambert(46.8, 2.337_229, 45.898_919, 47.696_014, 600_000.0, 2_200_000.0)
            }
            "(III) France Zone III" => {
                Self::lambert(44.1, 2.337_229, 43.199_291, 44.996_094, 600_000.0, 200_000.0)
            }
            "(IV) France Zone IV" => {
                Self::lambert(42.165, 2.337_229, 41.560_388, 42.767_663, 234.358, 4_185_861.369)
            }
            "(MT0) Montana State Plane Zone 2500" => {
                Self::lambert(44.25, -109.5, 45.0, 49.0, 600_000.0, 0.0)
            }
            "(VICGRID) Victoria Australia" => {
                Self::lambert(-37.0, 145.0, -36.0, -38.0, 2_500_000.0, 4_500_000.0)
            }
            "(VG94) VICGRID94 Victoria Australia" => {
                Self::lambert(-37.0, 145.0, -36.0, -38.0, 2_500_000.0, 2_500_000.0)
            }
            "Albers Equal Area" => {
                ProjectionKind::AlbersEqualArea(ConicParameters::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0))
            }
            "(EQC) Equidistant Conic" => {
                ProjectionKind::EquidistantConic(ConicParameters::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0))
            }
            "(A)Lambert Azimuthual Equal Area" => ProjectionKind::LambertAzimuthalEqualArea {
                origin_latitude: 0.0,
                central_meridian: 0.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            "(SUI) Swiss Grid" => ProjectionKind::SwissObliqueMercator {
                origin_latitude: 46.952_405_555_555_56,
                central_meridian: 7.439_583_333_333_333,
                scale: 1.0,
                false_easting: 600_000.0,
                false_northing: 200_000.0,
            },
            "Sinusoidal" => ProjectionKind::Sinusoidal {
                central_meridian: 0.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            other => {
                return Err(MapError::Projection {
                    name: other.to_string(),
                })
            }
        };
        Ok(kind)
    }

    /// Apply the parameters of a `Projection Setup` line.
    pub fn apply_setup(&mut self, setup: &ProjectionSetup) {
        match self {
            ProjectionKind::LatLon | ProjectionKind::Utm { .. } => {}
            ProjectionKind::Mercator {
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => {
                set(central_meridian, setup.central_meridian);
                set(scale, setup.scale);
                set(false_easting, setup.false_easting);
                set(false_northing, setup.false_northing);
            }
            ProjectionKind::TransverseMercator {
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            }
            | ProjectionKind::SwissObliqueMercator {
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => {
                set(origin_latitude, setup.origin_latitude);
                set(central_meridian, setup.central_meridian);
                set(scale, setup.scale);
                set(false_easting, setup.false_easting);
                set(false_northing, setup.false_northing);
            }
            ProjectionKind::LambertConformalConic(p)
            | ProjectionKind::AlbersEqualArea(p)
            | ProjectionKind::EquidistantConic(p) => {
                set(&mut p.origin_latitude, setup.origin_latitude);
                set(&mut p.central_meridian, setup.central_meridian);
                set(&mut p.scale, setup.scale);
                set(&mut p.false_easting, setup.false_easting);
                set(&mut p.false_northing, setup.false_northing);
                set(&mut p.standard_parallel_1, setup.standard_parallel_1);
                set(&mut p.standard_parallel_2, setup.standard_parallel_2);
            }
            ProjectionKind::LambertAzimuthalEqualArea {
                origin_latitude,
                central_meridian,
                false_easting,
                false_northing,
            } => {
                set(origin_latitude, setup.origin_latitude);
                set(central_meridian, setup.central_meridian);
                set(false_easting, setup.false_easting);
                set(false_northing, setup.false_northing);
            }
            ProjectionKind::Sinusoidal {
                central_meridian,
                false_easting,
                false_northing,
            } => {
                set(central_meridian, setup.central_meridian);
                set(false_easting, setup.false_easting);
                set(false_northing, setup.false_northing);
            }
        }
    }

    /// Check that the parameters define a usable projection.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Projection`] for a cone that degenerates to a plane
    /// (standard parallels symmetric about the equator) or touches a pole.
    pub fn validate(&self) -> Result<()> {
        match self {
            ProjectionKind::LambertConformalConic(p)
            | ProjectionKind::AlbersEqualArea(p)
            | ProjectionKind::EquidistantConic(p)
                if (p.standard_parallel_1 + p.standard_parallel_2).abs() < 1e-10
                    || p.standard_parallel_1.abs() >= 90.0
                    || p.standard_parallel_2.abs() >= 90.0 =>
            {
                Err(MapError::Projection {
                    name: format!(
                        "{} with standard parallels {} and {}",
                        self.name(),
                        p.standard_parallel_1,
                        p.standard_parallel_2
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> String {
        match self {
            ProjectionKind::LatLon => "Latitude/Longitude".to_string(),
            ProjectionKind::Mercator { .. } => "Mercator".to_string(),
            ProjectionKind::TransverseMercator { .. } => "Transverse Mercator".to_string(),
            ProjectionKind::Utm { zone, south } => {
                format!("UTM zone {}{}", zone, if *south { "S" } else { "N" })
            }
            ProjectionKind::LambertConformalConic(_) => "Lambert Conformal Conic".to_string(),
            ProjectionKind::AlbersEqualArea(_) => "Albers Equal Area".to_string(),
            ProjectionKind::EquidistantConic(_) => "Equidistant Conic".to_string(),
            ProjectionKind::LambertAzimuthalEqualArea { .. } => {
                "Lambert Azimuthal Equal Area".to_string()
            }
            ProjectionKind::SwissObliqueMercator { .. } => "Swiss Oblique Mercator".to_string(),
            ProjectionKind::Sinusoidal { .. } => "Sinusoidal".to_string(),
        }
    }
}

fn set(field: &mut f64, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        *field = v;
    }
}

/// UTM zone whose central meridian is nearest to `lon`.
pub fn utm_zone_for(lon: f64) -> u8 {
    let lon = (lon + 180.0).rem_euclid(360.0);
    ((lon / 6.0).floor() as u8 % 60) + 1
}

/// A projection bound to an ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projector {
    pub kind: ProjectionKind,
    pub ellipsoid: Ellipsoid,
}

impl Projector {
    pub fn new(kind: ProjectionKind, ellipsoid: Ellipsoid) -> Self {
        Self { kind, ellipsoid }
    }

    /// Transverse Mercator parameters of a UTM zone.
    fn utm_parameters(zone: u8, south: bool) -> Tm {
        Tm {
            lat0: 0.0,
            lon0: (zone.max(1) as f64 - 1.0) * 6.0 - 180.0 + 3.0,
            k0: 0.9996,
            x0: 500_000.0,
            y0: if south { 10_000_000.0 } else { 0.0 },
        }
    }
}

impl Projection for Projector {
    fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let ell = &self.ellipsoid;
        match self.kind {
            ProjectionKind::LatLon => (lat, lon),
            ProjectionKind::Mercator {
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => mercator_forward(
                ell,
                central_meridian,
                scale,
                false_easting,
                false_northing,
                lat,
                lon,
            ),
            ProjectionKind::TransverseMercator {
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => Tm {
                lat0: origin_latitude,
                lon0: central_meridian,
                k0: scale,
                x0: false_easting,
                y0: false_northing,
            }
            .forward(ell, lat, lon),
            ProjectionKind::Utm { zone, south } => {
                let zone = if zone == 0 { utm_zone_for(lon) } else { zone };
                Self::utm_parameters(zone, south).forward(ell, lat, lon)
            }
            ProjectionKind::LambertConformalConic(p) => Lcc::new(ell, p).forward(lat, lon),
            ProjectionKind::AlbersEqualArea(p) => Albers::new(ell, p).forward(lat, lon),
            ProjectionKind::EquidistantConic(p) => EquidistantConic::new(ell, p).forward(lat, lon),
            ProjectionKind::LambertAzimuthalEqualArea {
                origin_latitude,
                central_meridian,
                false_easting,
                false_northing,
            } => Laea::new(ell, origin_latitude, central_meridian, false_easting, false_northing)
                .forward(lat, lon),
            ProjectionKind::SwissObliqueMercator {
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => SwissObliqueMercator::new(
                ell,
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            )
            .forward(lat, lon),
            ProjectionKind::Sinusoidal {
                central_meridian,
                false_easting,
                false_northing,
            } => {
                let (a, e2) = (ell.a(), ell.e2());
                let phi = lat.to_radians();
                let (sin, cos) = phi.sin_cos();
                let x = a * (lon - central_meridian).to_radians() * cos / (1.0 - e2 * sin * sin).sqrt();
                (meridian_arc(a, e2, phi) + false_northing, x + false_easting)
            }
        }
    }

    fn inverse(&self, northing: f64, easting: f64) -> (f64, f64) {
        let ell = &self.ellipsoid;
        match self.kind {
            ProjectionKind::LatLon => (northing, easting),
            ProjectionKind::Mercator {
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => mercator_inverse(
                ell,
                central_meridian,
                scale,
                false_easting,
                false_northing,
                northing,
                easting,
            ),
            ProjectionKind::TransverseMercator {
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => Tm {
                lat0: origin_latitude,
                lon0: central_meridian,
                k0: scale,
                x0: false_easting,
                y0: false_northing,
            }
            .inverse(ell, northing, easting),
            ProjectionKind::Utm { zone, south } => {
                Self::utm_parameters(zone, south).inverse(ell, northing, easting)
            }
            ProjectionKind::LambertConformalConic(p) => Lcc::new(ell, p).inverse(northing, easting),
            ProjectionKind::AlbersEqualArea(p) => Albers::new(ell, p).inverse(northing, easting),
            ProjectionKind::EquidistantConic(p) => {
                EquidistantConic::new(ell, p).inverse(northing, easting)
            }
            ProjectionKind::LambertAzimuthalEqualArea {
                origin_latitude,
                central_meridian,
                false_easting,
                false_northing,
            } => Laea::new(ell, origin_latitude, central_meridian, false_easting, false_northing)
                .inverse(northing, easting),
            ProjectionKind::SwissObliqueMercator {
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            } => SwissObliqueMercator::new(
                ell,
                origin_latitude,
                central_meridian,
                scale,
                false_easting,
                false_northing,
            )
            .inverse(northing, easting),
            ProjectionKind::Sinusoidal {
                central_meridian,
                false_easting,
                false_northing,
            } => {
                let (a, e2) = (ell.a(), ell.e2());
                let phi = footpoint_latitude(a, e2, northing - false_northing);
                let (sin, cos) = phi.sin_cos();
                let lambda = (easting - false_easting) * (1.0 - e2 * sin * sin).sqrt() / (a * cos);
                (phi.to_degrees(), central_meridian + lambda.to_degrees())
            }
        }
    }
}

fn mercator_forward(
    ell: &Ellipsoid,
    lon0: f64,
    k0: f64,
    x0: f64,
    y0: f64,
    lat: f64,
    lon: f64,
) -> (f64, f64) {
    let a = ell.a();
    let phi = lat.clamp(-89.999_999, 89.999_999).to_radians();
    let y = -a * k0 * tsfn(ell.e(), phi).ln();
    let x = a * k0 * (lon - lon0).to_radians();
    (y + y0, x + x0)
}

fn mercator_inverse(
    ell: &Ellipsoid,
    lon0: f64,
    k0: f64,
    x0: f64,
    y0: f64,
    northing: f64,
    easting: f64,
) -> (f64, f64) {
    let a = ell.a();
    let t = (-(northing - y0) / (a * k0)).exp();
    let phi = phi_from_t(ell.e(), t);
    let lon = (easting - x0) / (a * k0);
    (phi.to_degrees(), lon.to_degrees() + lon0)
}

/// Conformal latitude function `t` (Snyder 15-9).
fn tsfn(e: f64, phi: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

/// Latitude of a conformal `t` value, by fixed-point iteration.
fn phi_from_t(e: f64, t: f64) -> f64 {
    let mut phi = FRAC_PI_2 - 2.0 * t.atan();
    for _ in 0..15 {
        let es = e * phi.sin();
        let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(e / 2.0)).atan();
        let done = (next - phi).abs() < 1e-12;
        phi = next;
        if done {
            break;
        }
    }
    phi
}

/// Radius of the parallel over the semi-major axis (Snyder 14-15).
fn msfn(e2: f64, phi: f64) -> f64 {
    let sin = phi.sin();
    phi.cos() / (1.0 - e2 * sin * sin).sqrt()
}

/// Authalic `q` (Snyder 3-12).
fn qsfn(e: f64, phi: f64) -> f64 {
    let sin = phi.sin();
    let es = e * sin;
    (1.0 - e * e) * (sin / (1.0 - es * es) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Latitude of an authalic `q` value, by Newton iteration (Snyder 3-16).
fn phi_from_q(e: f64, q: f64) -> f64 {
    let qp = qsfn(e, FRAC_PI_2);
    if q.abs() >= qp - 1e-12 {
        return FRAC_PI_2.copysign(q);
    }
    let e2 = e * e;
    let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
    for _ in 0..25 {
        let (sin, cos) = phi.sin_cos();
        let w = 1.0 - e2 * sin * sin;
        let delta = w * w / (2.0 * cos)
            * (q / (1.0 - e2) - sin / w + ((1.0 - e * sin) / (1.0 + e * sin)).ln() / (2.0 * e));
        phi += delta;
        if delta.abs() < 1e-14 {
            break;
        }
    }
    phi
}

/// Transverse Mercator parameters (series expansion on the ellipsoid).
struct Tm {
    lat0: f64,
    lon0: f64,
    k0: f64,
    x0: f64,
    y0: f64,
}

/// Meridian arc length from the equator to `phi` (radians).
fn meridian_arc(a: f64, e2: f64, phi: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    a * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Latitude (radians) at meridian arc length `m` from the equator.
fn footpoint_latitude(a: f64, e2: f64, m: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    mu + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin()
}

impl Tm {
    fn forward(&self, ell: &Ellipsoid, lat: f64, lon: f64) -> (f64, f64) {
        let a = ell.a();
        let e2 = ell.e2();
        let ep2 = e2 / (1.0 - e2);

        let phi = lat.to_radians();
        let (sin, cos) = phi.sin_cos();
        let tan = phi.tan();

        let n = a / (1.0 - e2 * sin * sin).sqrt();
        let t = tan * tan;
        let c = ep2 * cos * cos;
        let aa = (lon - self.lon0).to_radians() * cos;
        let m = meridian_arc(a, e2, phi);
        let m0 = meridian_arc(a, e2, self.lat0.to_radians());

        let x = self.k0
            * n
            * (aa
                + (1.0 - t + c) * aa.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * aa.powi(5) / 120.0);
        let y = self.k0
            * (m - m0
                + n * tan
                    * (aa * aa / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * aa.powi(4) / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * aa.powi(6) / 720.0));

        (y + self.y0, x + self.x0)
    }

    fn inverse(&self, ell: &Ellipsoid, northing: f64, easting: f64) -> (f64, f64) {
        let a = ell.a();
        let e2 = ell.e2();
        let ep2 = e2 / (1.0 - e2);

        let m0 = meridian_arc(a, e2, self.lat0.to_radians());
        let phi1 = footpoint_latitude(a, e2, m0 + (northing - self.y0) / self.k0);

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = a / w.sqrt();
        let r1 = a * (1.0 - e2) / w.powf(1.5);
        let d = (easting - self.x0) / (n1 * self.k0);

        let phi = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos1;

        (phi.to_degrees(), self.lon0 + lambda.to_degrees())
    }
}
