//! The batching engine: sole external entry point for turning a pool of
//! pending orders into routed jobs.
//!
//! Flow per call:
//!   1. Partition the pool into clusters.
//!   2. Bulk-prefetch each cluster's coordinates (one table request per
//!      cluster instead of N point queries).
//!   3. Run the greedy scoring loop per cluster and concatenate.
//!
//! The engine performs no concurrent work of its own; its only suspension
//! point is the matrix prefetch. Identical inputs produce identical
//! results.

use std::collections::{HashMap, HashSet};

use tracing::{error, instrument, warn};

use crate::batching::cluster::cluster_orders;
use crate::batching::policy::BatchPolicy;
use crate::batching::scoring::score_cluster;
use crate::matrix::TravelTimeMatrix;
use crate::order::model::{BatchResult, Coord, Order};

#[instrument(
    skip_all,
    target = "batching",
    fields(pool = pool.len(), jobs = tracing::field::Empty)
)]
pub async fn batch_orders(
    pool: &[Order],
    matrix: &dyn TravelTimeMatrix,
    policy: &BatchPolicy,
    order_age_seconds: &HashMap<String, f64>,
) -> BatchResult {
    if pool.is_empty() {
        return BatchResult::default();
    }

    let clusters = cluster_orders(pool, policy);

    let mut jobs = Vec::new();
    let mut unbatched: Vec<Order> = Vec::new();

    for cluster in clusters {
        let coords = distinct_coords(&cluster);

        if let Err(e) = matrix.prefetch(&coords).await {
            warn!(
                error = %e,
                cluster_len = cluster.len(),
                "matrix prefetch failed; deferring cluster"
            );
            unbatched.extend(cluster);
            continue;
        }

        match score_cluster(&cluster, matrix, policy, order_age_seconds) {
            Ok(mut partial) => {
                jobs.append(&mut partial.jobs);
                unbatched.extend(partial.unbatched_orders);
            }
            Err(e) => {
                // Programmer error in assembly; keep the cluster pooled so
                // the next cycle sees it untouched.
                error!(error = %e, cluster_len = cluster.len(), "job assembly failed; skipping cluster");
                unbatched.extend(cluster);
            }
        }
    }

    // Deferred orders come back in input-pool order regardless of which
    // cluster they fell out of.
    let position: HashMap<&str, usize> = pool
        .iter()
        .enumerate()
        .map(|(idx, o)| (o.id.as_str(), idx))
        .collect();
    unbatched.sort_by_key(|o| position.get(o.id.as_str()).copied().unwrap_or(usize::MAX));

    tracing::Span::current().record("jobs", jobs.len());

    BatchResult {
        jobs,
        unbatched_orders: unbatched,
    }
}

/// Every pickup and dropoff of the cluster, first occurrence order.
fn distinct_coords(cluster: &[Order]) -> Vec<Coord> {
    let mut seen: HashSet<(u64, u64)> = HashSet::new();
    let mut out = Vec::with_capacity(cluster.len() * 2);

    for order in cluster {
        for coord in [order.pickup, order.dropoff] {
            if seen.insert(coord.bits()) {
                out.push(coord);
            }
        }
    }

    out
}
