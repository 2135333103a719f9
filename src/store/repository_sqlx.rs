use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{AnyPool, Row};

use crate::driver::model::{Driver, DriverStatus};
use crate::order::model::{Coord, Job, Order, OrderStatus, Stop, StopKind};
use crate::store::repository::DispatchRepository;
use crate::time::now_ms;

/// SQLx-backed implementation of DispatchRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxDispatchRepository {
    pool: AnyPool,
}

impl SqlxDispatchRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl DispatchRepository for SqlxDispatchRepository {
    async fn save_order(&self, order: &Order) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO orders(order_id, pickup_id, pickup_lon, pickup_lat, dropoff_lon, dropoff_lat, created_ms, status)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(order_id) DO UPDATE SET status = excluded.status;
"#,
        )
        .bind(&order.id)
        .bind(&order.pickup_id)
        .bind(order.pickup.lon)
        .bind(order.pickup.lat)
        .bind(order.dropoff.lon)
        .bind(order.dropoff.lat)
        .bind(order.created_at.timestamp_millis())
        .bind(order.status.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE orders SET status = ? WHERE order_id = ?;"#)
            .bind(status.to_string())
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_raw_orders(&self) -> anyhow::Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
SELECT order_id, pickup_id, pickup_lon, pickup_lat, dropoff_lon, dropoff_lat, created_ms, status
FROM orders
WHERE status = 'RAW'
ORDER BY created_ms ASC;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_order(&r) {
                Ok(o) => out.push(o),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the load
                    tracing::warn!(error = %e, "skipping malformed order row");
                }
            }
        }

        Ok(out)
    }

    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO jobs(job_id, job_type, total_time_seconds, detour_factor, savings_percentage, status, assigned_driver_id, created_ms)
VALUES (?, ?, ?, ?, ?, 'OFFERING', NULL, ?)
ON CONFLICT(job_id) DO NOTHING;
"#,
        )
        .bind(&job.id)
        .bind(job.job_type.to_string())
        .bind(job.total_time_seconds)
        .bind(job.detour_factor)
        .bind(job.savings_percentage)
        .bind(now_ms() as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM job_stops WHERE job_id = ?;"#)
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;

        for (seq, stop) in job.stops.iter().enumerate() {
            sqlx::query(
                r#"
INSERT INTO job_stops(job_id, seq, kind, order_id, lon, lat)
VALUES (?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(&job.id)
            .bind(seq as i64)
            .bind(stop.kind.to_string())
            .bind(&stop.order_id)
            .bind(stop.coord.lon)
            .bind(stop.coord.lat)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn try_claim_job(&self, job_id: &str, driver_id: &str) -> anyhow::Result<bool> {
        // The whole lock: one conditional update, first writer wins.
        let res = sqlx::query(
            r#"
UPDATE jobs
SET assigned_driver_id = ?, status = 'ASSIGNED'
WHERE job_id = ? AND assigned_driver_id IS NULL;
"#,
        )
        .bind(driver_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn mark_job_abandoned(&self, job_id: &str) -> anyhow::Result<()> {
        // Conditional so a concurrent claim is never overwritten.
        sqlx::query(
            r#"
UPDATE jobs
SET status = 'ABANDONED'
WHERE job_id = ? AND assigned_driver_id IS NULL;
"#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_online_drivers(&self) -> anyhow::Result<Vec<Driver>> {
        let rows = sqlx::query(
            r#"
SELECT driver_id, lon, lat, status, max_capacity, push_token
FROM drivers
WHERE status IN ('AVAILABLE', 'TRANSIT_TO_COLLECT');
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_driver(&r) {
                Ok(d) => out.push(d),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed driver row");
                }
            }
        }

        Ok(out)
    }

    async fn update_driver(&self, driver: &Driver) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO drivers(driver_id, lon, lat, status, max_capacity, push_token)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT(driver_id) DO UPDATE SET
  lon = excluded.lon,
  lat = excluded.lat,
  status = excluded.status,
  max_capacity = excluded.max_capacity,
  push_token = excluded.push_token;
"#,
        )
        .bind(&driver.id)
        .bind(driver.location.lon)
        .bind(driver.location.lat)
        .bind(driver.status.to_string())
        .bind(driver.max_capacity as i64)
        .bind(&driver.push_token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_order(r: &sqlx::any::AnyRow) -> anyhow::Result<Order> {
    let created_ms: i64 = r.try_get("created_ms")?;
    let created_at = DateTime::from_timestamp_millis(created_ms)
        .context("created_ms out of range")?;

    let status_raw: String = r.try_get("status")?;

    Ok(Order {
        id: r.try_get("order_id")?,
        pickup_id: r.try_get("pickup_id")?,
        pickup: Coord::new(r.try_get("pickup_lon")?, r.try_get("pickup_lat")?),
        dropoff: Coord::new(r.try_get("dropoff_lon")?, r.try_get("dropoff_lat")?),
        created_at,
        status: OrderStatus::from_str(&status_raw)?,
    })
}

fn row_to_driver(r: &sqlx::any::AnyRow) -> anyhow::Result<Driver> {
    let status_raw: String = r.try_get("status")?;
    let capacity: i64 = r.try_get("max_capacity")?;

    Ok(Driver {
        id: r.try_get("driver_id")?,
        location: Coord::new(r.try_get("lon")?, r.try_get("lat")?),
        status: DriverStatus::from_str(&status_raw)?,
        max_capacity: capacity.max(0) as u32,
        push_token: r.try_get("push_token")?,
    })
}

/// Rebuilds a job's stop list from its persisted rows; used by operational
/// tooling and tests rather than the hot path.
pub fn rows_to_stops(rows: &[sqlx::any::AnyRow]) -> anyhow::Result<Vec<Stop>> {
    let mut stops = Vec::with_capacity(rows.len());
    for r in rows {
        let kind_raw: String = r.try_get("kind")?;
        stops.push(Stop {
            kind: StopKind::from_str(&kind_raw)?,
            order_id: r.try_get("order_id")?,
            coord: Coord::new(r.try_get("lon")?, r.try_get("lat")?),
        });
    }
    Ok(stops)
}
