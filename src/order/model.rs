use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A WGS84 point as (lon, lat).
///
/// Equality and hashing are bitwise over the raw f64 payloads so that a
/// Coord can key the travel-time cache. Coordinates are validated finite at
/// ingress; no fuzzy comparison anywhere.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }

    /// Bit pattern used for cache keys and equality.
    pub fn bits(&self) -> (u64, u64) {
        (self.lon.to_bits(), self.lat.to_bits())
    }
}

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Coord {}

impl Hash for Coord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Raw,
    Batching,
    Ready,
    Assigned,
    Delivered,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Raw => "RAW",
            OrderStatus::Batching => "BATCHING",
            OrderStatus::Ready => "READY",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAW" => Ok(OrderStatus::Raw),
            "BATCHING" => Ok(OrderStatus::Batching),
            "READY" => Ok(OrderStatus::Ready),
            "ASSIGNED" => Ok(OrderStatus::Assigned),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(anyhow::anyhow!("Invalid OrderStatus value: {}", other)),
        }
    }
}

/// A delivery order as the batching core sees it.
///
/// The core only ever transitions Raw -> Batching -> Ready; later
/// transitions belong to the dispatcher and the external store.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,

    /// Identifies the pickup origin (e.g. merchant). Orders may share a
    /// pickup_id only when their pickup coord is identical.
    pub pickup_id: String,

    pub pickup: Coord,
    pub dropoff: Coord,

    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Pickup,
    Dropoff,
}

impl fmt::Display for StopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopKind::Pickup => f.write_str("PICKUP"),
            StopKind::Dropoff => f.write_str("DROPOFF"),
        }
    }
}

impl FromStr for StopKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PICKUP" => Ok(StopKind::Pickup),
            "DROPOFF" => Ok(StopKind::Dropoff),
            other => Err(anyhow::anyhow!("Invalid StopKind value: {}", other)),
        }
    }
}

/// One leg endpoint of a routed job. References its order by id, never by
/// pointer, so jobs stay freely cloneable values.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub kind: StopKind,
    pub order_id: String,
    pub coord: Coord,
}

impl Stop {
    pub fn pickup(order: &Order) -> Self {
        Self {
            kind: StopKind::Pickup,
            order_id: order.id.clone(),
            coord: order.pickup,
        }
    }

    pub fn dropoff(order: &Order) -> Self {
        Self {
            kind: StopKind::Dropoff,
            order_id: order.id.clone(),
            coord: order.dropoff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Single,
    Batch,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Single => f.write_str("SINGLE"),
            JobType::Batch => f.write_str("BATCH"),
        }
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINGLE" => Ok(JobType::Single),
            "BATCH" => Ok(JobType::Batch),
            other => Err(anyhow::anyhow!("Invalid JobType value: {}", other)),
        }
    }
}

/// A routed unit of driver work covering one or more orders.
///
/// Jobs are immutable after construction; `assemble` is the only way to
/// build one and rejects any stop sequence that violates the routing
/// invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub order_ids: Vec<String>,
    pub stops: Vec<Stop>,
    pub total_time_seconds: f64,
    pub detour_factor: f64,
    pub savings_percentage: f64,
}

impl Job {
    /// Validates and builds a job.
    ///
    /// Enforced invariants:
    ///   - order_ids non-empty, no duplicates
    ///   - stops.len() == 2 * order_ids.len()
    ///   - per order exactly one PICKUP and one DROPOFF, pickup first
    ///   - first stop is a PICKUP, last stop is a DROPOFF
    ///
    /// `baseline_sum_single` is the sum of the standalone single-route times
    /// of the member orders; it anchors the derived detour/savings metrics.
    pub fn assemble(
        id: String,
        order_ids: Vec<String>,
        stops: Vec<Stop>,
        total_time_seconds: f64,
        baseline_sum_single: f64,
    ) -> Result<Self, AppError> {
        let fail = |msg: String| Err(AppError::InvariantViolation(msg));

        if order_ids.is_empty() {
            return fail(format!("job {id} has no orders"));
        }
        if stops.len() != 2 * order_ids.len() {
            return fail(format!(
                "job {id} has {} stops for {} orders",
                stops.len(),
                order_ids.len()
            ));
        }

        match stops.first().map(|s| s.kind) {
            Some(StopKind::Pickup) => {}
            _ => return fail(format!("job {id} does not start with a pickup")),
        }
        match stops.last().map(|s| s.kind) {
            Some(StopKind::Dropoff) => {}
            _ => return fail(format!("job {id} does not end with a dropoff")),
        }

        for oid in &order_ids {
            if order_ids.iter().filter(|o| *o == oid).count() != 1 {
                return fail(format!("order {oid} appears twice in job {id}"));
            }

            let pickup_at = stops
                .iter()
                .position(|s| s.kind == StopKind::Pickup && s.order_id == *oid);
            let dropoff_at = stops
                .iter()
                .position(|s| s.kind == StopKind::Dropoff && s.order_id == *oid);

            let (Some(p), Some(d)) = (pickup_at, dropoff_at) else {
                return fail(format!("order {oid} is missing a stop in job {id}"));
            };
            if p >= d {
                return fail(format!("order {oid} drops off before pickup in job {id}"));
            }

            let occurrences = stops.iter().filter(|s| s.order_id == *oid).count();
            if occurrences != 2 {
                return fail(format!(
                    "order {oid} has {occurrences} stops in job {id}, expected 2"
                ));
            }
        }

        for s in &stops {
            if !order_ids.contains(&s.order_id) {
                return fail(format!(
                    "stop references unknown order {} in job {id}",
                    s.order_id
                ));
            }
        }

        let job_type = if order_ids.len() == 1 {
            JobType::Single
        } else {
            JobType::Batch
        };

        let (detour_factor, savings_percentage) = if baseline_sum_single > 0.0 {
            (
                total_time_seconds / baseline_sum_single,
                (baseline_sum_single - total_time_seconds) / baseline_sum_single * 100.0,
            )
        } else {
            (1.0, 0.0)
        };

        Ok(Self {
            id,
            job_type,
            order_ids,
            stops,
            total_time_seconds,
            detour_factor,
            savings_percentage,
        })
    }

    /// Estimated completion instant for a route started at `start`.
    pub fn eta_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::milliseconds((self.total_time_seconds * 1_000.0) as i64)
    }
}

/// Output of one batching run: `jobs` and `unbatched_orders` partition the
/// input pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub jobs: Vec<Job>,
    pub unbatched_orders: Vec<Order>,
}
