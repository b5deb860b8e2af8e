//! Geodetic datums and their shift to WGS 84.
//!
//! `.map` files give calibration points and corner markers on the map's own
//! datum, while every lookup works in WGS 84. Points are moved with the
//! standard Molodensky transform, using the datum's origin shift and the
//! difference between its ellipsoid and WGS 84.

use crate::error::{MapError, Result};
use crate::projection::Ellipsoid;

/// A geodetic datum: a reference ellipsoid and its origin relative to WGS 84.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datum {
    pub name: &'static str,
    pub ellipsoid: Ellipsoid,
    /// Origin shift (dx, dy, dz) to WGS 84, in metres.
    pub shift: [f64; 3],
}

const fn datum(name: &'static str, ellipsoid: Ellipsoid, dx: f64, dy: f64, dz: f64) -> Datum {
    Datum {
        name,
        ellipsoid,
        shift: [dx, dy, dz],
    }
}

/// Known datums, matched by lower-case substrings of the OziExplorer name.
///
/// More specific names come before the generic ones they contain.
const DATUMS: &[(&[&str], Datum)] = &[
    (&["wgs 84", "wgs84", "wgs 1984"], datum("WGS 84", Ellipsoid::Wgs84, 0.0, 0.0, 0.0)),
    (&["wgs 72", "wgs72"], datum("WGS 72", Ellipsoid::Wgs72, 0.0, 0.0, 4.5)),
    (
        &["nad83", "nad 83", "grs 80", "grs80", "etrs", "gda94", "nzgd2000", "sirgas"],
        datum("NAD83", Ellipsoid::Grs80, 0.0, 0.0, 0.0),
    ),
    (&["nad27 alaska", "nad 27 alaska"], datum("NAD27 Alaska", Ellipsoid::Clarke1866, -5.0, 135.0, 172.0)),
    (&["nad27 canada", "nad 27 canada"], datum("NAD27 Canada", Ellipsoid::Clarke1866, -10.0, 158.0, 187.0)),
    (&["nad27", "nad 27"], datum("NAD27 CONUS", Ellipsoid::Clarke1866, -8.0, 160.0, 176.0)),
    (
        &["pulkovo 1942 (2)", "s42", "s-42"],
        datum("Pulkovo 1942 (2)", Ellipsoid::Krassovsky, 28.0, -121.0, -77.0),
    ),
    (
        &["pulkovo", "krassovsky", "krasovsky"],
        datum("Pulkovo 1942 (1)", Ellipsoid::Krassovsky, 28.0, -130.0, -95.0),
    ),
    (&["european 1979", "ed79"], datum("European 1979", Ellipsoid::International1924, -86.0, -98.0, -119.0)),
    (&["european", "ed50"], datum("European 1950", Ellipsoid::International1924, -87.0, -98.0, -121.0)),
    (
        &["geodetic datum '49", "nzgd49"],
        datum("Geodetic Datum '49", Ellipsoid::International1924, 84.0, -22.0, 209.0),
    ),
    (&["hayford", "international"], datum("International 1924", Ellipsoid::International1924, 0.0, 0.0, 0.0)),
    (&["ntf", "france"], datum("NTF France", Ellipsoid::Clarke1880Ign, -168.0, -60.0, 320.0)),
    (&["ch-1903", "ch1903"], datum("CH-1903", Ellipsoid::Bessel1841, 674.374, 15.056, 405.346)),
    (
        &["potsdam", "rauenberg", "dhdn"],
        datum("Potsdam Rauenberg DHDN", Ellipsoid::Bessel1841, 582.0, 105.0, 414.0),
    ),
    (&["hermannskogel"], datum("Hermannskogel", Ellipsoid::Bessel1841, 682.0, -203.0, 480.0)),
    (&["s-jtsk"], datum("S-JTSK", Ellipsoid::Bessel1841, 589.0, 76.0, 480.0)),
    (&["tokyo"], datum("Tokyo", Ellipsoid::Bessel1841, -148.0, 507.0, 685.0)),
    (&["bessel"], datum("Bessel 1841", Ellipsoid::Bessel1841, 0.0, 0.0, 0.0)),
    (&["ord srvy grt britn", "osgb"], datum("Ord Srvy Grt Britn", Ellipsoid::Airy1830, 375.0, -111.0, 431.0)),
    (&["ireland"], datum("Ireland 1965", Ellipsoid::AiryModified, 506.0, -122.0, 611.0)),
    (&["arc 1950"], datum("Arc 1950", Ellipsoid::Clarke1880, -143.0, -90.0, -294.0)),
    (&["arc 1960"], datum("Arc 1960", Ellipsoid::Clarke1880, -160.0, -6.0, -302.0)),
    (&["clarke 1880"], datum("Clarke 1880", Ellipsoid::Clarke1880, 0.0, 0.0, 0.0)),
    (
        &["australian geodetic 1984", "agd84"],
        datum("Australian Geodetic 1984", Ellipsoid::AustralianNational, -134.0, -48.0, 149.0),
    ),
    (
        &["australian geodetic 1966", "agd66"],
        datum("Australian Geodetic 1966", Ellipsoid::AustralianNational, -133.0, -48.0, 148.0),
    ),
];

impl Datum {
    /// Datum of an OziExplorer datum name.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Projection`] if the datum is not known.
    pub fn find(name: &str) -> Result<&'static Datum> {
        let lower = name.to_ascii_lowercase();
        DATUMS
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
            .map(|(_, datum)| datum)
            .ok_or_else(|| MapError::Projection {
                name: format!("datum {}", name),
            })
    }

    /// True if coordinates on this datum need no shift.
    pub fn is_geocentric(&self) -> bool {
        self.shift == [0.0; 3]
    }

    /// Move a point on this datum to WGS 84.
    pub fn to_wgs84(&self, lat: f64, lon: f64) -> (f64, f64) {
        if self.is_geocentric() {
            return (lat, lon);
        }
        molodensky(self.ellipsoid, Ellipsoid::Wgs84, self.shift, lat, lon)
    }

    /// Move a WGS 84 point onto this datum.
    pub fn from_wgs84(&self, lat: f64, lon: f64) -> (f64, f64) {
        if self.is_geocentric() {
            return (lat, lon);
        }
        let [dx, dy, dz] = self.shift;
        molodensky(Ellipsoid::Wgs84, self.ellipsoid, [-dx, -dy, -dz], lat, lon)
    }
}

/// Standard Molodensky transform of a point at zero height.
fn molodensky(from: Ellipsoid, to: Ellipsoid, shift: [f64; 3], lat: f64, lon: f64) -> (f64, f64) {
    let (a, rf) = from.parameters();
    let f = 1.0 / rf;
    let da = to.a() - a;
    let df = 1.0 / to.parameters().1 - f;
    let b = a * (1.0 - f);
    let e2 = from.e2();
    let [dx, dy, dz] = shift;

    let phi = lat.to_radians();
    let lam = lon.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (sin_lam, cos_lam) = lam.sin_cos();

    let w = 1.0 - e2 * sin_phi * sin_phi;
    let rn = a / w.sqrt();
    let rm = a * (1.0 - e2) / w.powf(1.5);

    let dphi = (-dx * sin_phi * cos_lam - dy * sin_phi * sin_lam
        + dz * cos_phi
        + da * rn * e2 * sin_phi * cos_phi / a
        + df * (rm * a / b + rn * b / a) * sin_phi * cos_phi)
        / rm;
    let dlam = (-dx * sin_lam + dy * cos_lam) / (rn * cos_phi);

    (lat + dphi.to_degrees(), lon + dlam.to_degrees())
}
