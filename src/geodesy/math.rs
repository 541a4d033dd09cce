use serde::Serialize;
use std::f64::consts::PI;

use super::{EQUATORIAL_RADIUS_KM, POLAR_RADIUS_KM};
use crate::models::Coordinate;

pub fn deg_to_rad(deg: f64) -> f64 {
    deg * PI / 180.0
}

/// Radians to whole degrees, rounding half away from zero.
pub fn rad_to_deg_rounded(rad: f64) -> i64 {
    (rad * 180.0 / PI).round() as i64
}

/// Geocentric radius of the WGS84 ellipsoid at the given latitude, in kilometers.
///
/// R = sqrt(((a²·cosφ)² + (b²·sinφ)²) / ((a·cosφ)² + (b·sinφ)²))
pub fn geocentric_radius_km(lat_rad: f64) -> f64 {
    let (sin, cos) = lat_rad.sin_cos();
    let a = EQUATORIAL_RADIUS_KM;
    let b = POLAR_RADIUS_KM;
    let aac = a * a * cos;
    let bbs = b * b * sin;
    ((aac * aac + bbs * bbs) / ((a * cos).powi(2) + (b * sin).powi(2))).sqrt()
}

/// Precomputed trigonometry for one reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceFrame {
    origin: Coordinate,
    lat_rad: f64,
    lon_rad: f64,
    sin_lat: f64,
    cos_lat: f64,
    radius_km: f64,
}

impl ReferenceFrame {
    pub fn new(origin: Coordinate) -> Self {
        let lat_rad = deg_to_rad(origin.latitude());
        let lon_rad = deg_to_rad(origin.longitude());
        let (sin_lat, cos_lat) = lat_rad.sin_cos();
        Self {
            origin,
            lat_rad,
            lon_rad,
            sin_lat,
            cos_lat,
            radius_km: geocentric_radius_km(lat_rad),
        }
    }

    pub fn origin(&self) -> Coordinate {
        self.origin
    }

    pub fn sin_lat(&self) -> f64 {
        self.sin_lat
    }

    pub fn cos_lat(&self) -> f64 {
        self.cos_lat
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// North and east angular deltas to `target`, east already scaled by cos(lat₀).
    fn deltas(&self, target: &Coordinate) -> (f64, f64) {
        let dlat = deg_to_rad(target.latitude()) - self.lat_rad;
        let mut dlon = deg_to_rad(target.longitude()) - self.lon_rad;
        // take the short way around the antimeridian
        if dlon > PI {
            dlon -= 2.0 * PI;
        } else if dlon < -PI {
            dlon += 2.0 * PI;
        }
        (dlat, self.cos_lat * dlon)
    }

    fn radius_m(&self) -> f64 {
        self.radius_km * 1000.0
    }
}

/// Position on the local tangent plane, in whole meters.
/// Positive x is east of the reference, positive y is north.
/// This is flipped relative to the legacy watch build, which used reference
/// minus target. Watch code ported from that build must negate both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanarOffset {
    pub x: i64,
    pub y: i64,
}

/// Distance and bearing from the reference point.
///
/// The bearing is `atan2(north, east)` on the tangent plane, so 0 points east
/// and π/2 points north. It is not a compass bearing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Polar {
    pub distance_m: i64,
    pub bearing_rad: f64,
}

impl Polar {
    /// Bearing in whole degrees, 0..=359.
    pub fn heading_degrees(&self) -> u16 {
        rad_to_deg_rounded(self.bearing_rad).rem_euclid(360) as u16
    }
}

pub fn planar_offset(frame: &ReferenceFrame, target: &Coordinate) -> PlanarOffset {
    let (dlat, east) = frame.deltas(target);
    PlanarOffset {
        x: (frame.radius_m() * east).round() as i64,
        y: (frame.radius_m() * dlat).round() as i64,
    }
}

pub fn polar(frame: &ReferenceFrame, target: &Coordinate) -> Polar {
    let (dlat, east) = frame.deltas(target);
    Polar {
        distance_m: (frame.radius_m() * dlat.hypot(east)).round() as i64,
        bearing_rad: dlat.atan2(east),
    }
}

pub fn distance(frame: &ReferenceFrame, target: &Coordinate) -> i64 {
    let (dlat, east) = frame.deltas(target);
    (frame.radius_m() * dlat.hypot(east)).round() as i64
}
