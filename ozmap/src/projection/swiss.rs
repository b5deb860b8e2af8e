//! Swiss oblique Mercator: a conformal sphere, rotated onto the origin.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use super::Ellipsoid;

pub(super) struct SwissObliqueMercator {
    a: f64,
    e: f64,
    e2: f64,
    lon0: f64,
    x0: f64,
    y0: f64,
    /// Ratio of sphere to ellipsoid longitudes.
    c: f64,
    /// Sine and cosine of the origin latitude on the sphere.
    sin_p0: f64,
    cos_p0: f64,
    k: f64,
    /// Sphere radius over `a`, scale included.
    kr: f64,
}

fn ln_tan(phi: f64) -> f64 {
    (FRAC_PI_4 + phi / 2.0).tan().ln()
}

impl SwissObliqueMercator {
    pub(super) fn new(ell: &Ellipsoid, lat0: f64, lon0: f64, scale: f64, x0: f64, y0: f64) -> Self {
        let (a, e, e2) = (ell.a(), ell.e(), ell.e2());
        let phi0 = lat0.to_radians();

        let cos2 = phi0.cos().powi(2);
        let c = (1.0 + e2 * cos2 * cos2 / (1.0 - e2)).sqrt();
        let sin_p0 = phi0.sin() / c;
        let phip0 = sin_p0.asin();
        let sp = e * phi0.sin();
        let k = ln_tan(phip0) - c * (ln_tan(phi0) - e / 2.0 * ((1.0 + sp) / (1.0 - sp)).ln());

        Self {
            a,
            e,
            e2,
            lon0,
            x0,
            y0,
            c,
            sin_p0,
            cos_p0: phip0.cos(),
            k,
            kr: scale * (1.0 - e2).sqrt() / (1.0 - sp * sp),
        }
    }

    pub(super) fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let sp = self.e * phi.sin();
        let phip = 2.0
            * (self.c * (ln_tan(phi) - self.e / 2.0 * ((1.0 + sp) / (1.0 - sp)).ln()) + self.k)
                .exp()
                .atan()
            - FRAC_PI_2;
        let lamp = self.c * (lon - self.lon0).to_radians();

        let cp = phip.cos();
        let phipp = (self.cos_p0 * phip.sin() - self.sin_p0 * cp * lamp.cos())
            .clamp(-1.0, 1.0)
            .asin();
        let lampp = (cp * lamp.sin() / phipp.cos()).clamp(-1.0, 1.0).asin();

        let x = self.a * self.kr * lampp;
        let y = self.a * self.kr * ln_tan(phipp);
        (y + self.y0, x + self.x0)
    }

    pub(super) fn inverse(&self, northing: f64, easting: f64) -> (f64, f64) {
        let y = (northing - self.y0) / (self.a * self.kr);
        let x = (easting - self.x0) / (self.a * self.kr);

        let phipp = 2.0 * (y.exp().atan() - FRAC_PI_4);
        let cp = phipp.cos();
        let mut phip = (self.cos_p0 * phipp.sin() + self.sin_p0 * cp * x.cos())
            .clamp(-1.0, 1.0)
            .asin();
        let lamp = (cp * x.sin() / phip.cos()).clamp(-1.0, 1.0).asin();

        let con = (self.k - ln_tan(phip)) / self.c;
        for _ in 0..10 {
            let esp = self.e * phip.sin();
            let delta = (con + ln_tan(phip) - self.e / 2.0 * ((1.0 + esp) / (1.0 - esp)).ln())
                * (1.0 - esp * esp)
                * phip.cos()
                / (1.0 - self.e2);
            phip -= delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }

        (phip.to_degrees(), self.lon0 + (lamp / self.c).to_degrees())
    }
}
