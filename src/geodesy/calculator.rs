use parking_lot::RwLock;
use std::sync::Arc;

use super::math::{self, PlanarOffset, Polar, ReferenceFrame};
use super::MEAN_EARTH_RADIUS_KM;
use crate::error::RelayError;
use crate::models::Coordinate;

/// Holds the current reference frame and answers geometry queries against it.
///
/// The frame is swapped as a whole on `setup`, so a concurrent reader sees
/// either the old frame or the new one. Clones share the same frame.
#[derive(Debug, Clone, Default)]
pub struct DistanceCalculator {
    frame: Arc<RwLock<Option<Arc<ReferenceFrame>>>>,
}

impl DistanceCalculator {
    /// Creates a calculator with no reference point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a calculator already centered on `origin`.
    pub fn centered_on(origin: Coordinate) -> Self {
        let calculator = Self::new();
        calculator.install(origin);
        calculator
    }

    /// Validates the reference point and replaces the frame.
    ///
    /// A rejected point leaves the previous frame in place.
    pub fn setup(&self, latitude: f64, longitude: f64) -> Result<(), RelayError> {
        let origin = Coordinate::new(latitude, longitude)?;
        self.install(origin);
        Ok(())
    }

    /// Replaces the frame with one centered on an already validated coordinate.
    pub fn install(&self, origin: Coordinate) {
        let frame = Arc::new(ReferenceFrame::new(origin));
        log::debug!(
            "Reference point set to ({}, {}), local radius {:.4} km",
            origin.latitude(),
            origin.longitude(),
            frame.radius_km()
        );
        *self.frame.write() = Some(frame);
    }

    /// Snapshot of the current frame.
    pub fn frame(&self) -> Result<Arc<ReferenceFrame>, RelayError> {
        self.frame.read().clone().ok_or(RelayError::UninitializedReference)
    }

    pub fn reference(&self) -> Option<Coordinate> {
        self.frame.read().as_ref().map(|f| f.origin())
    }

    /// Local Earth radius, or the mean radius before any setup.
    pub fn earth_radius_km(&self) -> f64 {
        self.frame
            .read()
            .as_ref()
            .map_or(MEAN_EARTH_RADIUS_KM, |f| f.radius_km())
    }

    pub fn offset(&self, target: &Coordinate) -> Result<PlanarOffset, RelayError> {
        Ok(math::planar_offset(&*self.frame()?, target))
    }

    pub fn polar(&self, target: &Coordinate) -> Result<Polar, RelayError> {
        Ok(math::polar(&*self.frame()?, target))
    }

    pub fn distance(&self, target: &Coordinate) -> Result<i64, RelayError> {
        Ok(math::distance(&*self.frame()?, target))
    }
}
