//! Best-insertion search for adding one order to an existing stop sequence.
//
//  This module is deliberately pure: no async, no IO.

use crate::matrix::{MatrixError, TravelTimeMatrix};
use crate::order::model::{Order, Stop};

/// Outcome of an insertion search. `is_feasible` is false only when the
/// matrix provider could not price any candidate sequence.
#[derive(Debug, Clone)]
pub struct FeasibilityResult {
    pub is_feasible: bool,
    pub best_stops: Vec<Stop>,
    pub best_time_seconds: f64,
}

impl FeasibilityResult {
    fn infeasible() -> Self {
        Self {
            is_feasible: false,
            best_stops: Vec::new(),
            best_time_seconds: f64::INFINITY,
        }
    }
}

/// Total traversal time of a stop sequence.
pub fn route_time(stops: &[Stop], matrix: &dyn TravelTimeMatrix) -> Result<f64, MatrixError> {
    let mut total = 0.0;
    for leg in stops.windows(2) {
        total += matrix.time(leg[0].coord, leg[1].coord)?;
    }
    Ok(total)
}

/// Finds the cheapest legal way to insert `order` into `existing`.
///
/// Every placement `(i, j)` with `0 <= i <= j <= existing.len()` is tried:
/// the pickup goes at position `i`, the dropoff immediately after position
/// `j` of the intermediate sequence, so the new pickup always precedes the
/// new dropoff. Pure insertions never reorder the stops already present, so
/// the pickup-before-dropoff invariant of prior orders is preserved by
/// construction.
///
/// Ties on total time resolve to the lexicographically smallest `(i, j)`,
/// which keeps the search deterministic. Candidates the matrix cannot price
/// are skipped.
pub fn evaluate_insertion(
    existing: &[Stop],
    order: &Order,
    matrix: &dyn TravelTimeMatrix,
) -> FeasibilityResult {
    let pickup = Stop::pickup(order);
    let dropoff = Stop::dropoff(order);

    if existing.is_empty() {
        let stops = vec![pickup, dropoff];
        return match route_time(&stops, matrix) {
            Ok(t) => FeasibilityResult {
                is_feasible: true,
                best_stops: stops,
                best_time_seconds: t,
            },
            Err(_) => FeasibilityResult::infeasible(),
        };
    }

    let n = existing.len();
    let mut best: Option<(f64, Vec<Stop>)> = None;

    for i in 0..=n {
        for j in i..=n {
            let mut candidate = Vec::with_capacity(n + 2);
            candidate.extend_from_slice(&existing[..i]);
            candidate.push(pickup.clone());
            candidate.extend_from_slice(&existing[i..]);
            candidate.insert(j + 1, dropoff.clone());

            let t = match route_time(&candidate, matrix) {
                Ok(t) => t,
                Err(_) => continue,
            };

            // Strict comparison keeps the first (i, j) on equal times.
            if best.as_ref().is_none_or(|(bt, _)| t < *bt) {
                best = Some((t, candidate));
            }
        }
    }

    match best {
        Some((t, stops)) => FeasibilityResult {
            is_feasible: true,
            best_stops: stops,
            best_time_seconds: t,
        },
        None => FeasibilityResult::infeasible(),
    }
}
