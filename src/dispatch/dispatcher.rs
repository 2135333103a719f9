//! Wave dispatcher.
//!
//! This module owns the per-job offer lifecycle:
//!
//!   Pending -> Offering(wave k) -> Assigned | Abandoned
//!
//! Design principles:
//! - **One task per live job**: jobs dispatch in parallel and never block
//!   each other.
//! - **Acceptance is the only exit from Offering**: the state machine
//!   leaves the offering loop solely through its assignment slot, which
//!   `resolve_driver_acceptance` fills after winning the job lock.
//! - **Cooperative cancellation**: an accepted job stops issuing waves at
//!   the next suspension point, with no polling.
//! - **Fail-open on push errors**: a failed broadcast skips that wave; the
//!   deadline still bounds the job's lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::mpsc::Receiver;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::dispatch::push::PushService;
use crate::metrics::counters::Counters;
use crate::order::model::Job;
use crate::store::repository::DispatchRepository;

/// Offer waves plus the timing the dispatcher must honour for one job.
pub enum DispatchEvent {
    Offer {
        job: Job,
        waves: Vec<Vec<String>>,
        wave_interval: Duration,
        deadline: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Assigned(String),
    Abandoned,
}

/// Assignment slot for one live job. The acceptance path records the
/// winner and wakes the dispatcher task.
pub struct OfferSlot {
    assigned: parking_lot::Mutex<Option<String>>,
    notify: Notify,
}

impl OfferSlot {
    fn new() -> Self {
        Self {
            assigned: parking_lot::Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn assigned_driver(&self) -> Option<String> {
        self.assigned.lock().clone()
    }
}

/// Registry of live offers keyed by job id. Shared between the dispatcher
/// tasks and the acceptance path.
#[derive(Clone, Default)]
pub struct OfferBoard {
    inner: Arc<parking_lot::Mutex<HashMap<String, Arc<OfferSlot>>>>,
}

impl OfferBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, job_id: &str) -> Arc<OfferSlot> {
        let slot = Arc::new(OfferSlot::new());
        self.inner.lock().insert(job_id.to_string(), slot.clone());
        slot
    }

    fn close(&self, job_id: &str) {
        self.inner.lock().remove(job_id);
    }

    /// Records the winning driver and wakes the job's dispatcher task.
    /// Returns false when the job has no live offer (already settled).
    pub fn assign(&self, job_id: &str, driver_id: &str) -> bool {
        let slot = match self.inner.lock().get(job_id) {
            Some(s) => s.clone(),
            None => return false,
        };

        *slot.assigned.lock() = Some(driver_id.to_string());
        // notify_one stores a permit, so an assignment between suspension
        // points is still observed at the next await.
        slot.notify.notify_one();
        true
    }
}

/// Consumes offer events and runs one dispatcher task per job.
pub struct DispatchRouter<P: PushService> {
    repo: Arc<dyn DispatchRepository>,
    push: Arc<P>,
    board: OfferBoard,
    counters: Counters,
}

impl<P: PushService> DispatchRouter<P> {
    pub fn new(repo: Arc<dyn DispatchRepository>, push: Arc<P>, counters: Counters) -> Self {
        Self {
            repo,
            push,
            board: OfferBoard::new(),
            counters,
        }
    }

    pub fn board(&self) -> OfferBoard {
        self.board.clone()
    }

    /// Main router loop. Work delivery only; the per-job tasks own every
    /// state transition.
    pub async fn run(self: Arc<Self>, mut rx: Receiver<DispatchEvent>) {
        info!(component = "dispatch_router", event = "startup");

        while let Some(ev) = rx.recv().await {
            match ev {
                DispatchEvent::Offer {
                    job,
                    waves,
                    wave_interval,
                    deadline,
                } => {
                    let repo = self.repo.clone();
                    let push = self.push.clone();
                    let board = self.board.clone();
                    let counters = self.counters.clone();

                    let span = info_span!("job_dispatch", job_id = %job.id);
                    tokio::spawn(
                        async move {
                            dispatch_job(job, waves, wave_interval, deadline, push, repo, board, counters)
                                .await;
                        }
                        .instrument(span),
                    );
                }
            }
        }

        warn!(component = "dispatch_router", "offer channel closed");
    }
}

/// Runs the full offer lifecycle for one job and settles it.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_job<P: PushService>(
    job: Job,
    waves: Vec<Vec<String>>,
    wave_interval: Duration,
    deadline: Duration,
    push: Arc<P>,
    repo: Arc<dyn DispatchRepository>,
    board: OfferBoard,
    counters: Counters,
) -> DispatchOutcome {
    let slot = board.open(&job.id);

    let outcome = offer_waves(&job, &waves, wave_interval, deadline, &push, &slot, &counters).await;

    board.close(&job.id);

    match &outcome {
        DispatchOutcome::Assigned(driver_id) => {
            info!(driver_id = %driver_id, "job assigned");
        }
        DispatchOutcome::Abandoned => {
            counters
                .jobs_abandoned
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(
                error = %crate::error::AppError::DispatchTimeout(job.id.clone()),
                "no acceptance before deadline; job abandoned"
            );

            // Hand the job to the external abandon queue. The conditional
            // update never clobbers a claim that raced the deadline.
            if let Err(e) = repo.mark_job_abandoned(&job.id).await {
                tracing::error!(error = ?e, "failed to park abandoned job");
            }
        }
    }

    outcome
}

/// The Offering loop: publish wave k, wait one interval, repeat. Exits on
/// assignment or the absolute deadline, whichever comes first.
async fn offer_waves<P: PushService>(
    job: &Job,
    waves: &[Vec<String>],
    wave_interval: Duration,
    deadline: Duration,
    push: &Arc<P>,
    slot: &Arc<OfferSlot>,
    counters: &Counters,
) -> DispatchOutcome {
    let deadline_sleep = tokio::time::sleep(deadline);
    tokio::pin!(deadline_sleep);

    for (wave_idx, wave) in waves.iter().enumerate() {
        // A claim may have landed while the previous broadcast was in
        // flight; never offer a job that is already taken.
        if let Some(driver) = slot.assigned_driver() {
            return DispatchOutcome::Assigned(driver);
        }

        if wave.is_empty() {
            // Padded wave: keep the cadence, skip the broadcast.
            debug!(wave = wave_idx, "empty wave");
        } else if let Err(e) = push.broadcast_offer(wave, job).await {
            warn!(wave = wave_idx, error = ?e, "offer broadcast failed; wave skipped");
        } else {
            debug!(wave = wave_idx, drivers = wave.len(), "wave broadcast");
            counters
                .offers_broadcast
                .fetch_add(wave.len() as u64, std::sync::atomic::Ordering::Relaxed);
        }

        tokio::select! {
            _ = slot.notify.notified() => {
                if let Some(driver) = slot.assigned_driver() {
                    return DispatchOutcome::Assigned(driver);
                }
            }
            _ = &mut deadline_sleep => return DispatchOutcome::Abandoned,
            _ = tokio::time::sleep(wave_interval) => {}
        }
    }

    // Waves exhausted; a late tap may still land before the deadline.
    tokio::select! {
        _ = slot.notify.notified() => match slot.assigned_driver() {
            Some(driver) => DispatchOutcome::Assigned(driver),
            None => DispatchOutcome::Abandoned,
        },
        _ = &mut deadline_sleep => DispatchOutcome::Abandoned,
    }
}
