use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub horizon_cycles: Arc<AtomicU64>,
    pub jobs_batch: Arc<AtomicU64>,
    pub jobs_single: Arc<AtomicU64>,
    pub orders_deferred: Arc<AtomicU64>,

    pub offers_broadcast: Arc<AtomicU64>,
    pub accept_won: Arc<AtomicU64>,
    pub accept_lost: Arc<AtomicU64>,
    pub jobs_abandoned: Arc<AtomicU64>,
}
