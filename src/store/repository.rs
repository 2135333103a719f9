use anyhow::Result;
use async_trait::async_trait;

use crate::driver::model::Driver;
use crate::order::model::{Job, Order, OrderStatus};

/// Persistence commands the core issues against the external store.
///
/// The core operates on value copies; implementations own schema and
/// transaction shape. `try_claim_job` is the distributed job lock and must
/// be atomic with respect to every concurrent caller in the cluster.
#[async_trait]
pub trait DispatchRepository: Send + Sync {
    async fn save_order(&self, order: &Order) -> Result<()>;

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<()>;

    /// RAW orders in creation order; used to rebuild the horizon pool on
    /// startup.
    async fn load_raw_orders(&self) -> Result<Vec<Order>>;

    async fn save_job(&self, job: &Job) -> Result<()>;

    /// Claims the job for `driver_id` iff nobody holds it yet. Returns
    /// false on a lost race; that is not an error.
    async fn try_claim_job(&self, job_id: &str, driver_id: &str) -> Result<bool>;

    /// Parks an unaccepted job for the external abandon queue. Must not
    /// clobber a concurrent claim.
    async fn mark_job_abandoned(&self, job_id: &str) -> Result<()>;

    async fn fetch_online_drivers(&self) -> Result<Vec<Driver>>;

    async fn update_driver(&self, driver: &Driver) -> Result<()>;
}
