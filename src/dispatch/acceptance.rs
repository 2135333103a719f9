//! Acceptance resolution: the only path from Offering to Assigned.
//!
//! All concurrent taps funnel through the repository's conditional claim,
//! so exactly one driver wins per job no matter how many workers race.

use tracing::{debug, info, instrument};

use crate::dispatch::dispatcher::OfferBoard;
use crate::driver::model::{Driver, DriverStatus};
use crate::error::AppError;
use crate::metrics::counters::Counters;
use crate::order::model::{Job, OrderStatus};
use crate::store::repository::DispatchRepository;

/// Applies a successful acceptance to the courier's value.
///
/// Pure: capacity accounting and the status transition only, no hidden
/// state. Capacity is counted in orders and never goes below zero.
pub fn handle_driver_acceptance(mut driver: Driver, job: &Job) -> Driver {
    driver.max_capacity = driver
        .max_capacity
        .saturating_sub(job.order_ids.len() as u32);
    driver.status = DriverStatus::TransitToCollect;
    driver
}

/// Resolves one driver tap. Returns true iff this caller is the first to
/// claim the job; later callers get false regardless of driver.
#[instrument(skip(repo, board, counters), target = "dispatch")]
pub async fn resolve_driver_acceptance(
    repo: &dyn DispatchRepository,
    board: &OfferBoard,
    counters: &Counters,
    job_id: &str,
    driver_id: &str,
) -> anyhow::Result<bool> {
    let relaxed = std::sync::atomic::Ordering::Relaxed;

    let won = repo.try_claim_job(job_id, driver_id).await?;
    if !won {
        counters.accept_lost.fetch_add(1, relaxed);
        debug!("acceptance lost; job already claimed");
        return Ok(false);
    }

    counters.accept_won.fetch_add(1, relaxed);

    // Wake the dispatcher task so no further waves go out. The claim is
    // already durable, so a settled offer (late tap) is fine to miss.
    board.assign(job_id, driver_id);

    info!("driver acceptance committed");
    Ok(true)
}

/// Full acceptance flow for the edge handler: claim, update the courier,
/// mark the member orders assigned. A lost race surfaces as
/// `AppError::AcceptanceLost` (mapped to 409 at the edge); store failures
/// propagate as-is (5xx territory).
pub async fn accept_job(
    repo: &dyn DispatchRepository,
    board: &OfferBoard,
    counters: &Counters,
    job: &Job,
    driver: Driver,
) -> anyhow::Result<Driver> {
    let won = resolve_driver_acceptance(repo, board, counters, &job.id, &driver.id).await?;
    if !won {
        return Err(AppError::AcceptanceLost(job.id.clone()).into());
    }

    let updated = handle_driver_acceptance(driver, job);
    repo.update_driver(&updated).await?;

    for oid in &job.order_ids {
        repo.update_order_status(oid, OrderStatus::Assigned).await?;
    }

    Ok(updated)
}
