//! Rolling horizon queue.
//!
//! Holds RAW orders and deliberately delays dispatch of young ones so the
//! batcher has more material per cycle, while the policy's maximum wait
//! bounds every order's delay. The pool has exactly one writer: the pool
//! mutex is held across a full cycle, so cycles never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, field, info, instrument};
use uuid::Uuid;

use crate::batching::engine::batch_orders;
use crate::batching::policy::BatchPolicy;
use crate::logger::warn_if_slow;
use crate::matrix::TravelTimeMatrix;
use crate::metrics::counters::Counters;
use crate::order::model::{Job, JobType, Order, OrderStatus};
use crate::store::repository::DispatchRepository;
use crate::time::now_utc;

pub struct RollingHorizonQueue {
    pool: tokio::sync::Mutex<Vec<Order>>,
    policy: parking_lot::Mutex<BatchPolicy>,
    matrix: Arc<dyn TravelTimeMatrix>,
    repo: Arc<dyn DispatchRepository>,
    counters: Counters,
}

impl RollingHorizonQueue {
    pub fn new(
        matrix: Arc<dyn TravelTimeMatrix>,
        repo: Arc<dyn DispatchRepository>,
        policy: BatchPolicy,
        counters: Counters,
    ) -> Self {
        Self {
            pool: tokio::sync::Mutex::new(Vec::new()),
            policy: parking_lot::Mutex::new(policy),
            matrix,
            repo,
            counters,
        }
    }

    /// Replaces the active policy. Takes effect at the next cycle boundary.
    pub fn set_policy(&self, policy: BatchPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn policy_snapshot(&self) -> BatchPolicy {
        self.policy.lock().clone()
    }

    /// Reloads previously persisted RAW orders into the pool. Called once
    /// on startup before the tick loop begins.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let orders = self.repo.load_raw_orders().await?;
        let count = orders.len();

        let mut pool = self.pool.lock().await;
        *pool = orders;

        info!(count, "horizon pool restored from store");
        Ok(count)
    }

    /// Accepts a freshly ingested order into the pool.
    pub async fn enqueue_raw(&self, mut order: Order) -> anyhow::Result<()> {
        order.status = OrderStatus::Raw;
        self.repo.save_order(&order).await?;

        let mut pool = self.pool.lock().await;
        debug!(order_id = %order.id, pool_len = pool.len() + 1, "order enqueued");
        pool.push(order);

        Ok(())
    }

    /// Runs one batching cycle over the full pool.
    ///
    /// Orders that land in a job are marked READY and persisted; deferred
    /// orders stay pooled for the next tick. On a persistence failure the
    /// pool is left untouched so the next cycle retries the same material.
    #[instrument(
        skip(self),
        target = "horizon",
        fields(cycle_id = %Uuid::new_v4(), pool_len = field::Empty, jobs = field::Empty)
    )]
    pub async fn run_cycle(&self) -> anyhow::Result<Vec<Job>> {
        let policy = self.policy_snapshot();
        let mut pool = self.pool.lock().await;

        tracing::Span::current().record("pool_len", pool.len());

        if pool.is_empty() {
            debug!("horizon pool empty; nothing to batch");
            return Ok(Vec::new());
        }

        let now = now_utc();
        let ages: HashMap<String, f64> = pool
            .iter()
            .map(|o| {
                let age = (now - o.created_at).num_milliseconds().max(0) as f64 / 1_000.0;
                (o.id.clone(), age)
            })
            .collect();

        let snapshot: Vec<Order> = pool
            .iter()
            .cloned()
            .map(|mut o| {
                o.status = OrderStatus::Batching;
                o
            })
            .collect();

        let result = warn_if_slow("batch_orders", Duration::from_millis(500), async {
            batch_orders(&snapshot, self.matrix.as_ref(), &policy, &ages).await
        })
        .await;

        // Persist before mutating the pool: a failed save keeps every order
        // pooled and the cycle is retried wholesale.
        for job in &result.jobs {
            for oid in &job.order_ids {
                self.repo
                    .update_order_status(oid, OrderStatus::Ready)
                    .await?;
            }
            self.repo.save_job(job).await?;
        }

        *pool = result
            .unbatched_orders
            .into_iter()
            .map(|mut o| {
                o.status = OrderStatus::Raw;
                o
            })
            .collect();

        let relaxed = std::sync::atomic::Ordering::Relaxed;
        self.counters.horizon_cycles.fetch_add(1, relaxed);
        self.counters
            .orders_deferred
            .fetch_add(pool.len() as u64, relaxed);
        for job in &result.jobs {
            match job.job_type {
                JobType::Single => self.counters.jobs_single.fetch_add(1, relaxed),
                JobType::Batch => self.counters.jobs_batch.fetch_add(1, relaxed),
            };
        }

        tracing::Span::current().record("jobs", result.jobs.len());
        info!(
            jobs = result.jobs.len(),
            deferred = pool.len(),
            "batching cycle complete"
        );

        Ok(result.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::model::Driver;
    use crate::matrix::manhattan::ManhattanMatrix;
    use crate::order::model::Coord;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    const M: f64 = 1.0 / 111_320.0;

    fn coord_m(x_m: f64, y_m: f64) -> Coord {
        Coord::new(x_m * M, y_m * M)
    }

    fn mk_order(id: &str, pickup_id: &str, age_seconds: i64) -> Order {
        Order {
            id: id.to_string(),
            pickup_id: pickup_id.to_string(),
            pickup: coord_m(0.0, 0.0),
            dropoff: coord_m(1000.0, 0.0),
            created_at: Utc::now() - chrono::Duration::seconds(age_seconds),
            status: OrderStatus::Raw,
        }
    }

    #[derive(Default)]
    struct RecordingRepo {
        pub orders: Mutex<Vec<(String, OrderStatus)>>,
        pub jobs: Mutex<Vec<Job>>,
        pub raw_seed: Mutex<Vec<Order>>,
    }

    #[async_trait]
    impl DispatchRepository for RecordingRepo {
        async fn save_order(&self, order: &Order) -> anyhow::Result<()> {
            self.orders.lock().push((order.id.clone(), order.status));
            Ok(())
        }

        async fn update_order_status(
            &self,
            order_id: &str,
            status: OrderStatus,
        ) -> anyhow::Result<()> {
            self.orders.lock().push((order_id.to_string(), status));
            Ok(())
        }

        async fn load_raw_orders(&self) -> anyhow::Result<Vec<Order>> {
            Ok(self.raw_seed.lock().clone())
        }

        async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
            self.jobs.lock().push(job.clone());
            Ok(())
        }

        async fn try_claim_job(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn mark_job_abandoned(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn fetch_online_drivers(&self) -> anyhow::Result<Vec<Driver>> {
            Ok(vec![])
        }

        async fn update_driver(&self, _: &Driver) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn mk_queue(repo: Arc<RecordingRepo>, policy: BatchPolicy) -> RollingHorizonQueue {
        RollingHorizonQueue::new(
            Arc::new(ManhattanMatrix::new(10.0)),
            repo,
            policy,
            Counters::default(),
        )
    }

    #[tokio::test]
    async fn young_orders_stay_pooled() {
        let repo = Arc::new(RecordingRepo::default());
        let queue = mk_queue(repo.clone(), BatchPolicy::default());

        queue.enqueue_raw(mk_order("o1", "m1", 0)).await.unwrap();

        let jobs = queue.run_cycle().await.unwrap();

        assert!(jobs.is_empty());
        assert!(repo.jobs.lock().is_empty());
        // Still pooled for the next cycle.
        let jobs = queue.run_cycle().await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn aged_orders_are_released_as_jobs() {
        let repo = Arc::new(RecordingRepo::default());
        let queue = mk_queue(repo.clone(), BatchPolicy::default());

        queue.enqueue_raw(mk_order("o1", "m1", 500)).await.unwrap();

        let jobs = queue.run_cycle().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].order_ids, vec!["o1".to_string()]);
        assert_eq!(repo.jobs.lock().len(), 1);
        assert!(
            repo.orders
                .lock()
                .iter()
                .any(|(id, st)| id == "o1" && *st == OrderStatus::Ready)
        );

        // Pool is drained afterwards.
        let jobs = queue.run_cycle().await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn pairable_orders_leave_even_when_young() {
        let repo = Arc::new(RecordingRepo::default());
        let queue = mk_queue(repo.clone(), BatchPolicy::default());

        let mut o1 = mk_order("o1", "m1", 10);
        o1.dropoff = coord_m(2000.0, 0.0);
        let mut o2 = mk_order("o2", "m1", 5);
        o2.dropoff = coord_m(2200.0, 0.0);

        queue.enqueue_raw(o1).await.unwrap();
        queue.enqueue_raw(o2).await.unwrap();

        let jobs = queue.run_cycle().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].order_ids.len(), 2);
    }

    #[tokio::test]
    async fn policy_swap_applies_next_cycle() {
        let repo = Arc::new(RecordingRepo::default());
        let queue = mk_queue(repo.clone(), BatchPolicy::default());

        queue.enqueue_raw(mk_order("o1", "m1", 90)).await.unwrap();

        // Default horizon (180 s) keeps a 90 s old order pooled.
        assert!(queue.run_cycle().await.unwrap().is_empty());

        // Off-peak waits only 60 s, so the same order now releases.
        queue.set_policy(BatchPolicy::offpeak());
        let jobs = queue.run_cycle().await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn restore_rebuilds_pool_from_store() {
        let repo = Arc::new(RecordingRepo::default());
        repo.raw_seed.lock().push(mk_order("o1", "m1", 400));

        let queue = mk_queue(repo.clone(), BatchPolicy::default());
        let restored = queue.restore().await.unwrap();
        assert_eq!(restored, 1);

        let jobs = queue.run_cycle().await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn save_failure_keeps_pool_intact() {
        struct FailingRepo(RecordingRepo);

        #[async_trait]
        impl DispatchRepository for FailingRepo {
            async fn save_order(&self, order: &Order) -> anyhow::Result<()> {
                self.0.save_order(order).await
            }
            async fn update_order_status(
                &self,
                _: &str,
                _: OrderStatus,
            ) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("store offline"))
            }
            async fn load_raw_orders(&self) -> anyhow::Result<Vec<Order>> {
                Ok(vec![])
            }
            async fn save_job(&self, _: &Job) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("store offline"))
            }
            async fn try_claim_job(&self, _: &str, _: &str) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn mark_job_abandoned(&self, _: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn fetch_online_drivers(&self) -> anyhow::Result<Vec<Driver>> {
                Ok(vec![])
            }
            async fn update_driver(&self, _: &Driver) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let repo = Arc::new(FailingRepo(RecordingRepo::default()));
        let queue = RollingHorizonQueue::new(
            Arc::new(ManhattanMatrix::new(10.0)),
            repo,
            BatchPolicy::default(),
            Counters::default(),
        );

        queue.enqueue_raw(mk_order("o1", "m1", 500)).await.unwrap();

        assert!(queue.run_cycle().await.is_err());

        // The order is still pooled; a later cycle can retry.
        let pool_len = queue.pool.lock().await.len();
        assert_eq!(pool_len, 1);
    }
}
