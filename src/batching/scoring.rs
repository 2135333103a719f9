//! Greedy max-savings growth of jobs within one cluster.
//!
//! Responsibilities:
//! - Seed a job with the oldest waiting order, then repeatedly insert the
//!   most profitable remaining order under the detour caps.
//! - Decide singleton fate via the rolling horizon (defer young orders,
//!   release aged ones as SINGLE jobs).
//!
//! Non-responsibilities:
//! - Clustering and coordinate prefetch (the engine does both first).
//! - Persistence and dispatch.

use std::collections::HashMap;

use tracing::debug;

use crate::batching::feasibility::evaluate_insertion;
use crate::batching::policy::BatchPolicy;
use crate::error::AppError;
use crate::matrix::TravelTimeMatrix;
use crate::order::model::{BatchResult, Job, Order, Stop};

/// Deterministic ordering used for seed picks and savings ties: older
/// `created_at` first, then smaller id.
fn age_key(order: &Order) -> (chrono::DateTime<chrono::Utc>, &str) {
    (order.created_at, order.id.as_str())
}

/// Runs the greedy insertion loop over one cluster.
///
/// Errors only on a job-assembly invariant violation, which the caller
/// treats as "skip this cluster, keep its orders pooled".
pub fn score_cluster(
    cluster: &[Order],
    matrix: &dyn TravelTimeMatrix,
    policy: &BatchPolicy,
    order_age_seconds: &HashMap<String, f64>,
) -> Result<BatchResult, AppError> {
    let mut remaining: Vec<Order> = cluster.to_vec();
    let mut jobs: Vec<Job> = Vec::new();
    let mut unbatched: Vec<Order> = Vec::new();

    while !remaining.is_empty() {
        let seed_idx = remaining
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| age_key(a).cmp(&age_key(b)))
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        let seed = remaining.remove(seed_idx);

        let seed_single = match matrix.time(seed.pickup, seed.dropoff) {
            Ok(t) => t,
            Err(_) => {
                // Cannot even price the standalone route; retry next cycle.
                debug!(order_id = %seed.id, "seed route unpriceable; deferring");
                unbatched.push(seed);
                continue;
            }
        };

        let mut members: Vec<Order> = vec![seed];
        let mut stops: Vec<Stop> = vec![Stop::pickup(&members[0]), Stop::dropoff(&members[0])];
        let mut baseline_sum = seed_single;
        let mut total_time = seed_single;

        while members.len() < policy.max_batch_size && !remaining.is_empty() {
            let mut best: Option<(usize, Vec<Stop>, f64, f64, f64)> = None;

            for (idx, candidate) in remaining.iter().enumerate() {
                let t_single = match matrix.time(candidate.pickup, candidate.dropoff) {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                let eval = evaluate_insertion(&stops, candidate, matrix);
                if !eval.is_feasible {
                    continue;
                }

                let new_baseline = baseline_sum + t_single;
                let savings = new_baseline - eval.best_time_seconds;

                // Chaining a pickup onto the tail of another route always
                // costs its connector leg, so strictly positive savings is
                // only demanded when grouping by pickup; under continuous
                // chaining the detour caps alone bound the route.
                if savings <= 0.0 && !policy.enable_continuous_chaining {
                    continue;
                }

                let cap = if members.len() + 1 == 2 {
                    policy.pair_detour_cap
                } else {
                    policy.multi_detour_cap
                };
                let detour = eval.best_time_seconds / new_baseline;
                if detour > cap {
                    continue;
                }

                let beats_current = match &best {
                    None => true,
                    Some((best_idx, _, best_savings, _, _)) => {
                        savings > *best_savings
                            || (savings == *best_savings
                                && age_key(candidate) < age_key(&remaining[*best_idx]))
                    }
                };
                if beats_current {
                    best = Some((idx, eval.best_stops, savings, eval.best_time_seconds, t_single));
                }
            }

            let Some((idx, best_stops, savings, best_time, t_single)) = best else {
                break;
            };

            let chosen = remaining.remove(idx);
            debug!(
                order_id = %chosen.id,
                savings_seconds = savings,
                batch_len = members.len() + 1,
                "committed insertion"
            );

            stops = best_stops;
            total_time = best_time;
            baseline_sum += t_single;
            members.push(chosen);
        }

        if members.len() >= 2 {
            jobs.push(assemble_job(&members, stops, total_time, baseline_sum)?);
            continue;
        }

        // Singleton: the horizon decides whether it waits for more batch
        // material or ships alone.
        let age = order_age_seconds
            .get(&members[0].id)
            .copied()
            .unwrap_or(0.0);

        if policy.enable_rolling_horizon && age < policy.max_wait_time_seconds {
            debug!(order_id = %members[0].id, age_seconds = age, "deferred for more batch material");
            unbatched.extend(members);
        } else {
            jobs.push(assemble_job(&members, stops, total_time, baseline_sum)?);
        }
    }

    Ok(BatchResult {
        jobs,
        unbatched_orders: unbatched,
    })
}

/// Job ids derive from the seed order so identical inputs reproduce
/// identical results; every order seeds at most one job per cycle.
fn assemble_job(
    members: &[Order],
    stops: Vec<Stop>,
    total_time: f64,
    baseline_sum: f64,
) -> Result<Job, AppError> {
    let id = format!("job-{}", members[0].id);
    let order_ids = members.iter().map(|o| o.id.clone()).collect();
    Job::assemble(id, order_ids, stops, total_time, baseline_sum)
}
