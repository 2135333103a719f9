use async_trait::async_trait;

use crate::matrix::{MatrixError, TravelTimeMatrix};
use crate::order::model::Coord;

/// Rough conversion at mid latitudes; precision does not matter for a
/// synthetic matrix.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Synthetic matrix: Manhattan distance over degrees at a fixed speed.
/// Needs no prefetch and never fails; used in tests and local development.
pub struct ManhattanMatrix {
    speed_mps: f64,
}

impl ManhattanMatrix {
    pub fn new(speed_mps: f64) -> Self {
        assert!(speed_mps > 0.0, "speed must be positive");
        Self { speed_mps }
    }
}

#[async_trait]
impl TravelTimeMatrix for ManhattanMatrix {
    fn time(&self, a: Coord, b: Coord) -> Result<f64, MatrixError> {
        let meters = ((a.lon - b.lon).abs() + (a.lat - b.lat).abs()) * METERS_PER_DEGREE;
        Ok(meters / self.speed_mps)
    }

    async fn prefetch(&self, _coords: &[Coord]) -> Result<(), MatrixError> {
        Ok(())
    }
}
