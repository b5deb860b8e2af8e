//! Conic projections: Lambert conformal, Albers equal-area and equidistant.
//!
//! All three place parallels on concentric circles around the cone apex and
//! differ only in how the radius grows with latitude.

use super::{
    footpoint_latitude, meridian_arc, msfn, phi_from_q, phi_from_t, qsfn, tsfn, ConicParameters,
    Ellipsoid,
};

/// The part shared by every cone: apex position and cone constant.
struct Cone {
    n: f64,
    rho0: f64,
    lon0: f64,
    x0: f64,
    y0: f64,
}

impl Cone {
    /// Polar coordinates around the apex to (northing, easting).
    fn plane_point(&self, rho: f64, lon: f64) -> (f64, f64) {
        let theta = self.n * (lon - self.lon0).to_radians();
        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();
        (y + self.y0, x + self.x0)
    }

    /// (northing, easting) to a signed radius and a longitude.
    fn polar_point(&self, northing: f64, easting: f64) -> (f64, f64) {
        let x = easting - self.x0;
        let y = self.rho0 - (northing - self.y0);
        let s = self.n.signum();
        let rho = s * x.hypot(y);
        let theta = (s * x).atan2(s * y);
        (rho, self.lon0 + (theta / self.n).to_degrees())
    }
}

fn cone_constant(phi1: f64, phi2: f64, secant: impl FnOnce() -> f64) -> f64 {
    if (phi1 - phi2).abs() < 1e-10 {
        phi1.sin()
    } else {
        secant()
    }
}

pub(super) struct Lcc {
    cone: Cone,
    e: f64,
    af: f64,
}

impl Lcc {
    pub(super) fn new(ell: &Ellipsoid, p: ConicParameters) -> Self {
        let (a, e, e2) = (ell.a(), ell.e(), ell.e2());
        let phi0 = p.origin_latitude.to_radians();
        let phi1 = p.standard_parallel_1.to_radians();
        let phi2 = p.standard_parallel_2.to_radians();

        let (m1, t1) = (msfn(e2, phi1), tsfn(e, phi1));
        let n = cone_constant(phi1, phi2, || {
            let (m2, t2) = (msfn(e2, phi2), tsfn(e, phi2));
            (m1.ln() - m2.ln()) / (t1.ln() - t2.ln())
        });
        let af = a * p.scale * m1 / (n * t1.powf(n));

        Self {
            cone: Cone {
                n,
                rho0: af * tsfn(e, phi0).powf(n),
                lon0: p.central_meridian,
                x0: p.false_easting,
                y0: p.false_northing,
            },
            e,
            af,
        }
    }

    pub(super) fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let rho = self.af * tsfn(self.e, lat.to_radians()).powf(self.cone.n);
        self.cone.plane_point(rho, lon)
    }

    pub(super) fn inverse(&self, northing: f64, easting: f64) -> (f64, f64) {
        let (rho, lon) = self.cone.polar_point(northing, easting);
        let t = (rho / self.af).powf(1.0 / self.cone.n);
        (phi_from_t(self.e, t).to_degrees(), lon)
    }
}

pub(super) struct Albers {
    cone: Cone,
    a: f64,
    e: f64,
    c: f64,
}

impl Albers {
    pub(super) fn new(ell: &Ellipsoid, p: ConicParameters) -> Self {
        let (a, e, e2) = (ell.a(), ell.e(), ell.e2());
        let phi0 = p.origin_latitude.to_radians();
        let phi1 = p.standard_parallel_1.to_radians();
        let phi2 = p.standard_parallel_2.to_radians();

        let (m1, q1) = (msfn(e2, phi1), qsfn(e, phi1));
        let n = cone_constant(phi1, phi2, || {
            let (m2, q2) = (msfn(e2, phi2), qsfn(e, phi2));
            (m1 * m1 - m2 * m2) / (q2 - q1)
        });
        let c = m1 * m1 + n * q1;

        let mut albers = Self {
            cone: Cone {
                n,
                rho0: 0.0,
                lon0: p.central_meridian,
                x0: p.false_easting,
                y0: p.false_northing,
            },
            a,
            e,
            c,
        };
        albers.cone.rho0 = albers.radius(phi0);
        albers
    }

    fn radius(&self, phi: f64) -> f64 {
        let n = self.cone.n;
        self.a * (self.c - n * qsfn(self.e, phi)).max(0.0).sqrt() / n
    }

    pub(super) fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        self.cone.plane_point(self.radius(lat.to_radians()), lon)
    }

    pub(super) fn inverse(&self, northing: f64, easting: f64) -> (f64, f64) {
        let (rho, lon) = self.cone.polar_point(northing, easting);
        let n = self.cone.n;
        let q = (self.c - (rho * n / self.a).powi(2)) / n;
        (phi_from_q(self.e, q).to_degrees(), lon)
    }
}

pub(super) struct EquidistantConic {
    cone: Cone,
    a: f64,
    e2: f64,
    /// Apex distance from the equator along the cone, `a * G`.
    ag: f64,
}

impl EquidistantConic {
    pub(super) fn new(ell: &Ellipsoid, p: ConicParameters) -> Self {
        let (a, e2) = (ell.a(), ell.e2());
        let phi0 = p.origin_latitude.to_radians();
        let phi1 = p.standard_parallel_1.to_radians();
        let phi2 = p.standard_parallel_2.to_radians();

        let (m1, arc1) = (msfn(e2, phi1), meridian_arc(a, e2, phi1));
        let n = cone_constant(phi1, phi2, || {
            let (m2, arc2) = (msfn(e2, phi2), meridian_arc(a, e2, phi2));
            a * (m1 - m2) / (arc2 - arc1)
        });
        let ag = a * m1 / n + arc1;

        Self {
            cone: Cone {
                n,
                rho0: ag - meridian_arc(a, e2, phi0),
                lon0: p.central_meridian,
                x0: p.false_easting,
                y0: p.false_northing,
            },
            a,
            e2,
            ag,
        }
    }

    pub(super) fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let rho = self.ag - meridian_arc(self.a, self.e2, lat.to_radians());
        self.cone.plane_point(rho, lon)
    }

    pub(super) fn inverse(&self, northing: f64, easting: f64) -> (f64, f64) {
        let (rho, lon) = self.cone.polar_point(northing, easting);
        let phi = footpoint_latitude(self.a, self.e2, self.ag - rho);
        (phi.to_degrees(), lon)
    }
}
