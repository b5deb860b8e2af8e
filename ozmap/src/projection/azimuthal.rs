//! Lambert azimuthal equal-area on the ellipsoid.

use std::f64::consts::FRAC_PI_2;

use super::{msfn, phi_from_q, qsfn, Ellipsoid};

enum Aspect {
    North,
    South,
    Oblique {
        sin_b1: f64,
        cos_b1: f64,
        /// Authalic sphere radius.
        rq: f64,
        d: f64,
    },
}

pub(super) struct Laea {
    a: f64,
    e: f64,
    qp: f64,
    lat0: f64,
    lon0: f64,
    x0: f64,
    y0: f64,
    aspect: Aspect,
}

impl Laea {
    pub(super) fn new(ell: &Ellipsoid, lat0: f64, lon0: f64, x0: f64, y0: f64) -> Self {
        let (a, e, e2) = (ell.a(), ell.e(), ell.e2());
        let qp = qsfn(e, FRAC_PI_2);
        let phi0 = lat0.to_radians();

        let aspect = if (phi0.abs() - FRAC_PI_2).abs() < 1e-10 {
            if phi0 > 0.0 {
                Aspect::North
            } else {
                Aspect::South
            }
        } else {
            let b1 = (qsfn(e, phi0) / qp).clamp(-1.0, 1.0).asin();
            let rq = a * (qp / 2.0).sqrt();
            Aspect::Oblique {
                sin_b1: b1.sin(),
                cos_b1: b1.cos(),
                rq,
                d: a * msfn(e2, phi0) / (rq * b1.cos()),
            }
        };

        Self {
            a,
            e,
            qp,
            lat0,
            lon0,
            x0,
            y0,
            aspect,
        }
    }

    pub(super) fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let q = qsfn(self.e, lat.to_radians());
        let (sin_l, cos_l) = (lon - self.lon0).to_radians().sin_cos();

        let (x, y) = match self.aspect {
            Aspect::North => {
                let rho = self.a * (self.qp - q).max(0.0).sqrt();
                (rho * sin_l, -rho * cos_l)
            }
            Aspect::South => {
                let rho = self.a * (self.qp + q).max(0.0).sqrt();
                (rho * sin_l, rho * cos_l)
            }
            Aspect::Oblique {
                sin_b1,
                cos_b1,
                rq,
                d,
            } => {
                let (sin_b, cos_b) = (q / self.qp).clamp(-1.0, 1.0).asin().sin_cos();
                let b = rq * (2.0 / (1.0 + sin_b1 * sin_b + cos_b1 * cos_b * cos_l)).sqrt();
                (
                    b * d * cos_b * sin_l,
                    (b / d) * (cos_b1 * sin_b - sin_b1 * cos_b * cos_l),
                )
            }
        };
        (y + self.y0, x + self.x0)
    }

    pub(super) fn inverse(&self, northing: f64, easting: f64) -> (f64, f64) {
        let x = easting - self.x0;
        let y = northing - self.y0;

        let (q, dlon) = match self.aspect {
            Aspect::North => {
                let rho = x.hypot(y) / self.a;
                (self.qp - rho * rho, x.atan2(-y))
            }
            Aspect::South => {
                let rho = x.hypot(y) / self.a;
                (rho * rho - self.qp, x.atan2(y))
            }
            Aspect::Oblique {
                sin_b1,
                cos_b1,
                rq,
                d,
            } => {
                let rho = (x / d).hypot(d * y);
                if rho < 1e-9 {
                    return (self.lat0, self.lon0);
                }
                let ce = 2.0 * (rho / (2.0 * rq)).min(1.0).asin();
                let (sin_ce, cos_ce) = ce.sin_cos();
                let q = self.qp * (cos_ce * sin_b1 + d * y * sin_ce * cos_b1 / rho);
                let dlon = (x * sin_ce).atan2(d * cos_b1 * rho * cos_ce - d * d * y * sin_b1 * sin_ce);
                (q, dlon)
            }
        };
        (
            phi_from_q(self.e, q).to_degrees(),
            self.lon0 + dlon.to_degrees(),
        )
    }
}
