use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::order::model::{Coord, Job};

/// Payload delivered to driver devices for a new job offer. The transport
/// (device tokens, FCM, websockets) lives outside this crate.
#[derive(Debug, Clone, Serialize)]
pub struct OfferPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub job_id: String,
    pub num_orders: usize,
    pub pickup_coord: Coord,
}

impl OfferPayload {
    pub fn for_job(job: &Job) -> Self {
        Self {
            kind: "NEW_JOB_OFFER",
            job_id: job.id.clone(),
            num_orders: job.order_ids.len(),
            // Jobs always carry at least one stop and start with a pickup.
            pickup_coord: job.stops[0].coord,
        }
    }
}

/// Abstraction over the push-notification transport.
///
/// Errors must be recoverable: a failed broadcast skips the wave, it never
/// kills the job.
#[async_trait]
pub trait PushService: Send + Sync + 'static {
    async fn broadcast_offer(&self, driver_ids: &[String], job: &Job) -> anyhow::Result<()>;
}

/// Stand-in transport that logs offers instead of delivering them.
pub struct LogPushService;

#[async_trait]
impl PushService for LogPushService {
    async fn broadcast_offer(&self, driver_ids: &[String], job: &Job) -> anyhow::Result<()> {
        let payload = OfferPayload::for_job(job);
        info!(
            target: "push",
            drivers = driver_ids.len(),
            payload = %serde_json::to_string(&payload)?,
            "offer broadcast"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::model::{Coord, Order, OrderStatus, Stop};
    use chrono::DateTime;

    #[test]
    fn payload_carries_first_pickup() {
        let order = Order {
            id: "o1".into(),
            pickup_id: "m1".into(),
            pickup: Coord::new(13.4, 52.5),
            dropoff: Coord::new(13.5, 52.6),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            status: OrderStatus::Ready,
        };
        let job = Job::assemble(
            "job-o1".into(),
            vec!["o1".into()],
            vec![Stop::pickup(&order), Stop::dropoff(&order)],
            100.0,
            100.0,
        )
        .unwrap();

        let payload = OfferPayload::for_job(&job);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "NEW_JOB_OFFER");
        assert_eq!(json["job_id"], "job-o1");
        assert_eq!(json["num_orders"], 1);
        assert_eq!(json["pickup_coord"]["lon"], 13.4);
    }
}
