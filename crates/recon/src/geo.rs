//! Coordinates, geodesic distance on the WGS-84 ellipsoid, and WKT point
//! extraction.

use std::sync::OnceLock;

use rayon::prelude::*;
use regex::Regex;

use crate::model::{Record, RecordSet, Value};

/// WGS-84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// IUGG mean Earth radius (m), used for the sphere projection and the
/// haversine fallback.
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// `None` unless both values are finite and inside the valid degree range.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if lat.is_finite() && lon.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0 {
            Some(Self { lat, lon })
        } else {
            None
        }
    }

    /// Read a point from two columns. Null, unparseable, or out-of-range values
    /// give `None`; they are a per-row condition, not an error.
    pub fn from_record(record: &Record, lat_column: &str, lon_column: &str) -> Option<Self> {
        let (lat, lon) = (record.get(lat_column), record.get(lon_column));
        if lat.is_null() || lon.is_null() {
            return None;
        }
        let point = match (lat.as_f64(), lon.as_f64()) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            _ => None,
        };
        if point.is_none() {
            log::debug!("unusable coordinates ({lat}, {lon})");
        }
        point
    }

    /// Cartesian position on a sphere of [`MEAN_EARTH_RADIUS_M`].
    pub fn to_ecef(self) -> [f64; 3] {
        let (phi, lambda) = (self.lat.to_radians(), self.lon.to_radians());
        [
            MEAN_EARTH_RADIUS_M * phi.cos() * lambda.cos(),
            MEAN_EARTH_RADIUS_M * phi.cos() * lambda.sin(),
            MEAN_EARTH_RADIUS_M * phi.sin(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Distance
// ---------------------------------------------------------------------------

/// Geodesic distance in meters on the WGS-84 ellipsoid (Vincenty inverse).
/// Falls back to the spherical great-circle distance for the near-antipodal
/// pairs where the iteration does not converge.
pub fn geodesic_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    vincenty_inverse(a, b).unwrap_or_else(|| haversine_m(a, b))
}

pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (phi1, phi2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_phi = phi2 - phi1;
    let d_lambda = (b.lon - a.lon).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

fn vincenty_inverse(p1: GeoPoint, p2: GeoPoint) -> Option<f64> {
    let b = WGS84_A * (1.0 - WGS84_F);
    let l = (p2.lon - p1.lon).to_radians();
    let u1 = ((1.0 - WGS84_F) * p1.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * p2.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // Coincident points.
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial lines have cos_sq_alpha == 0.
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if lambda.abs() > std::f64::consts::PI * 1.5 {
            return None;
        }
        if (lambda - previous).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - b.powi(2)) / b.powi(2);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b * big_a * (sigma - delta_sigma));
        }
    }

    None
}

/// Straight-line distance between two points on the projection sphere whose
/// great-circle separation is `arc_m`. Never exceeds `arc_m`.
pub fn chord_for_arc(arc_m: f64) -> f64 {
    let half_angle = (arc_m / (2.0 * MEAN_EARTH_RADIUS_M)).min(std::f64::consts::FRAC_PI_2);
    2.0 * MEAN_EARTH_RADIUS_M * half_angle.sin()
}

// ---------------------------------------------------------------------------
// WKT
// ---------------------------------------------------------------------------

fn wkt_point_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*POINT\s*\(\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s+([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*\)\s*$")
            .expect("WKT point pattern is valid")
    })
}

/// Parse `POINT (lon lat)`. Anything else, including out-of-range
/// coordinates, gives `None`.
pub fn parse_wkt_point(text: &str) -> Option<GeoPoint> {
    let caps = wkt_point_pattern().captures(text)?;
    let lon: f64 = caps[1].parse().ok()?;
    let lat: f64 = caps[2].parse().ok()?;
    GeoPoint::new(lat, lon)
}

/// Fill `lat_column` / `lon_column` from a WKT point column. Rows with a null
/// or malformed geometry get null coordinates.
pub fn derive_coordinates(set: &mut RecordSet, wkt_column: &str, lat_column: &str, lon_column: &str) {
    set.rows.par_iter_mut().for_each(|row| {
        let point = match row.get(wkt_column) {
            Value::Null => None,
            value => {
                let parsed = parse_wkt_point(&value.to_text());
                if parsed.is_none() {
                    log::debug!("malformed WKT point '{value}'");
                }
                parsed
            }
        };
        row.set(lat_column, Value::number(point.map(|p| p.lat)));
        row.set(lon_column, Value::number(point.map(|p| p.lon)));
    });
    set.add_column(lat_column);
    set.add_column(lon_column);
}
