use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Orders
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS orders (
  order_id TEXT PRIMARY KEY,
  pickup_id TEXT NOT NULL,

  pickup_lon DOUBLE PRECISION NOT NULL,
  pickup_lat DOUBLE PRECISION NOT NULL,
  dropoff_lon DOUBLE PRECISION NOT NULL,
  dropoff_lat DOUBLE PRECISION NOT NULL,

  created_ms BIGINT NOT NULL,
  status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Drivers
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS drivers (
  driver_id TEXT PRIMARY KEY,
  lon DOUBLE PRECISION NOT NULL,
  lat DOUBLE PRECISION NOT NULL,
  status TEXT NOT NULL,
  max_capacity BIGINT NOT NULL,
  push_token TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Jobs; assigned_driver_id doubles as the distributed lock cell.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS jobs (
  job_id TEXT PRIMARY KEY,
  job_type TEXT NOT NULL,
  total_time_seconds DOUBLE PRECISION NOT NULL,
  detour_factor DOUBLE PRECISION NOT NULL,
  savings_percentage DOUBLE PRECISION NOT NULL,
  status TEXT NOT NULL,
  assigned_driver_id TEXT,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Job stops
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS job_stops (
  job_id TEXT NOT NULL,
  seq BIGINT NOT NULL,
  kind TEXT NOT NULL,
  order_id TEXT NOT NULL,
  lon DOUBLE PRECISION NOT NULL,
  lat DOUBLE PRECISION NOT NULL,
  PRIMARY KEY (job_id, seq)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_job_stops_job ON job_stops(job_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_drivers_status ON drivers(status);"#)
        .execute(pool)
        .await?;

    Ok(())
}
