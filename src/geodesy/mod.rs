//! Relative geometry between a reference point and target coordinates.
//!
//! `math` holds the pure conversions; `calculator` keeps the current reference
//! frame and swaps it atomically when the reference point moves.

mod calculator;
mod math;

pub use calculator::DistanceCalculator;
pub use math::*;

/// Mean Earth radius in kilometers, used until a reference point is set.
pub const MEAN_EARTH_RADIUS_KM: f64 = 6371.009;

/// WGS84 equatorial radius in kilometers.
pub const EQUATORIAL_RADIUS_KM: f64 = 6378.1370;

/// WGS84 polar radius in kilometers.
pub const POLAR_RADIUS_KM: f64 = 6356.7523;
