//! Webhook-facing order payload.
//!
//! The HTTP transport itself lives outside this crate; handlers decode the
//! JSON body into `RawOrderPayload` and convert it here before enqueueing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::order::model::{Coord, Order, OrderStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct RawOrderPayload {
    pub order_id: String,
    pub restaurant_id: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub created_at: DateTime<Utc>,
}

impl RawOrderPayload {
    /// Validates the payload and produces a RAW order.
    pub fn into_order(self) -> anyhow::Result<Order> {
        let pickup = Coord::new(self.pickup_lon, self.pickup_lat);
        let dropoff = Coord::new(self.dropoff_lon, self.dropoff_lat);

        if !pickup.is_finite() || !dropoff.is_finite() {
            anyhow::bail!("order {}: non-finite coordinates", self.order_id);
        }
        if pickup == dropoff {
            anyhow::bail!("order {}: pickup equals dropoff", self.order_id);
        }
        if self.order_id.is_empty() {
            anyhow::bail!("order id must not be empty");
        }

        Ok(Order {
            id: self.order_id,
            pickup_id: self.restaurant_id,
            pickup,
            dropoff,
            created_at: self.created_at,
            status: OrderStatus::Raw,
        })
    }
}
