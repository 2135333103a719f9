//! Travel-time capability used by batching and driver selection.
//!
//! `time` must answer from local state; `prefetch` is the only operation
//! allowed to touch the network. Callers treat any error as "skip this
//! pair", never as a fatal condition.

pub mod manhattan;
pub mod osrm;

use async_trait::async_trait;
use thiserror::Error;

use crate::order::model::Coord;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("travel time unavailable for requested pair")]
    Unavailable,

    #[error("matrix http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed matrix response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait TravelTimeMatrix: Send + Sync {
    /// Travel time in seconds from `a` to `b`. Non-negative, zero for the
    /// self pair; asymmetry is permitted. Served without I/O.
    fn time(&self, a: Coord, b: Coord) -> Result<f64, MatrixError>;

    /// Bulk-loads every pair within `coords` into local state. Idempotent
    /// and safe to call concurrently.
    async fn prefetch(&self, coords: &[Coord]) -> Result<(), MatrixError>;
}
