//! End-to-end flow: webhook payload -> horizon pool -> batching cycle ->
//! driver waves -> offer -> acceptance race -> committed assignment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use courier_dispatch::{
    batching::policy::BatchPolicy,
    db::Db,
    dispatch::acceptance::accept_job,
    dispatch::dispatcher::{DispatchOutcome, OfferBoard, dispatch_job},
    dispatch::push::PushService,
    dispatch::waves::build_driver_waves,
    driver::model::{Driver, DriverStatus},
    horizon::RollingHorizonQueue,
    matrix::manhattan::ManhattanMatrix,
    metrics::counters::Counters,
    order::ingress::RawOrderPayload,
    order::model::{Coord, Job, JobType, OrderStatus},
    store::{repository::DispatchRepository, repository_sqlx::SqlxDispatchRepository},
};

const M: f64 = 1.0 / 111_320.0;

async fn setup_repo() -> Arc<SqlxDispatchRepository> {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let db = Db::connect(&conn).await.expect("connect sqlite memory db");
    db.migrate().await.expect("run migrations");

    Arc::new(SqlxDispatchRepository::new(db.pool.clone()))
}

fn payload(order_id: &str, restaurant_id: &str, dropoff_east_m: f64) -> RawOrderPayload {
    RawOrderPayload {
        order_id: order_id.to_string(),
        restaurant_id: restaurant_id.to_string(),
        pickup_lat: 0.0,
        pickup_lon: 0.0,
        dropoff_lat: 0.0,
        dropoff_lon: dropoff_east_m * M,
        created_at: Utc::now() - chrono::Duration::seconds(30),
    }
}

fn mk_driver(id: &str, east_m: f64) -> Driver {
    Driver {
        id: id.to_string(),
        location: Coord::new(east_m * M, 0.0),
        status: DriverStatus::Available,
        max_capacity: 4,
        push_token: format!("tok-{id}"),
    }
}

#[derive(Default)]
struct RecordingPush {
    broadcasts: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl PushService for RecordingPush {
    async fn broadcast_offer(&self, driver_ids: &[String], _job: &Job) -> anyhow::Result<()> {
        self.broadcasts.lock().push(driver_ids.to_vec());
        Ok(())
    }
}

async fn run_cycle_for_pair(repo: Arc<SqlxDispatchRepository>) -> (RollingHorizonQueue, Vec<Job>) {
    let horizon = RollingHorizonQueue::new(
        Arc::new(ManhattanMatrix::new(10.0)),
        repo,
        BatchPolicy::default(),
        Counters::default(),
    );

    // Two orders from one merchant with dropoffs 200 m apart: a clean pair
    // well under the default detour cap.
    for p in [
        payload("ord-1", "rest-1", 2_000.0),
        payload("ord-2", "rest-1", 2_200.0),
    ] {
        horizon.enqueue_raw(p.into_order().unwrap()).await.unwrap();
    }

    let jobs = horizon.run_cycle().await.unwrap();
    (horizon, jobs)
}

#[tokio::test]
async fn cycle_produces_a_pair_job_and_marks_orders_ready() {
    let repo = setup_repo().await;
    let (_horizon, jobs) = run_cycle_for_pair(repo.clone()).await;

    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.job_type, JobType::Batch);
    assert_eq!(job.order_ids.len(), 2);
    assert_eq!(job.stops.len(), 4);

    // READY orders no longer reload as RAW.
    assert!(repo.load_raw_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn offered_job_is_accepted_and_committed() {
    let repo = setup_repo().await;
    let (_horizon, jobs) = run_cycle_for_pair(repo.clone()).await;
    let job = jobs.into_iter().next().unwrap();

    // Driver snapshot: d-near is closest to the shared pickup.
    for d in [mk_driver("d-near", 100.0), mk_driver("d-far", 5_000.0)] {
        repo.update_driver(&d).await.unwrap();
    }
    let online = repo.fetch_online_drivers().await.unwrap();

    let matrix = ManhattanMatrix::new(10.0);
    // Real-time test: keep the cadence short but comfortably wider than a
    // sqlite round-trip.
    let policy = BatchPolicy {
        wave_size: 1,
        wave_count: 2,
        wave_interval_ms: 500,
        acceptance_deadline_ms: 5_000,
        ..BatchPolicy::default()
    };
    let waves = build_driver_waves(&job, &online, &matrix, &policy).await;
    assert_eq!(waves[0], vec!["d-near".to_string()]);
    assert_eq!(waves[1], vec!["d-far".to_string()]);

    let push = Arc::new(RecordingPush::default());
    let board = OfferBoard::new();
    let counters = Counters::default();

    let handle = tokio::spawn(dispatch_job(
        job.clone(),
        waves,
        Duration::from_millis(policy.wave_interval_ms),
        Duration::from_millis(policy.acceptance_deadline_ms),
        push.clone(),
        Arc::clone(&repo) as Arc<dyn DispatchRepository>,
        board.clone(),
        counters.clone(),
    ));

    // First wave reaches the nearest driver.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(push.broadcasts.lock().len(), 1);

    // That driver taps accept.
    let accepted = accept_job(
        repo.as_ref(),
        &board,
        &counters,
        &job,
        mk_driver("d-near", 100.0),
    )
    .await
    .unwrap();

    assert_eq!(accepted.max_capacity, 2, "capacity drops by the order count");
    assert_eq!(accepted.status, DriverStatus::TransitToCollect);

    let outcome = handle.await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Assigned("d-near".to_string()));
    assert_eq!(push.broadcasts.lock().len(), 1, "no waves after acceptance");

    // The loser gets a 409-shaped error.
    let lost = accept_job(
        repo.as_ref(),
        &board,
        &counters,
        &job,
        mk_driver("d-far", 5_000.0),
    )
    .await;
    assert!(lost.is_err());

    // Orders were committed as ASSIGNED.
    use sqlx::Row;
    let rows = sqlx::query("SELECT status FROM orders ORDER BY order_id")
        .fetch_all(repo.pool())
        .await
        .unwrap();
    for row in rows {
        let status: String = row.try_get("status").unwrap();
        assert_eq!(status, OrderStatus::Assigned.to_string());
    }
}

#[tokio::test]
async fn unaccepted_job_is_abandoned_at_deadline() {
    let repo = setup_repo().await;
    let (_horizon, jobs) = run_cycle_for_pair(repo.clone()).await;
    let job = jobs.into_iter().next().unwrap();

    let push = Arc::new(RecordingPush::default());
    let board = OfferBoard::new();

    let handle = tokio::spawn(dispatch_job(
        job.clone(),
        vec![vec!["d1".to_string()], vec!["d2".to_string()]],
        Duration::from_millis(50),
        Duration::from_millis(400),
        push.clone(),
        Arc::clone(&repo) as Arc<dyn DispatchRepository>,
        board,
        Counters::default(),
    ));

    let outcome = handle.await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Abandoned);
    assert_eq!(push.broadcasts.lock().len(), 2, "both waves went out");

    use sqlx::Row;
    let row = sqlx::query("SELECT status FROM jobs WHERE job_id = ?")
        .bind(&job.id)
        .fetch_one(repo.pool())
        .await
        .unwrap();
    let status: String = row.try_get("status").unwrap();
    assert_eq!(status, "ABANDONED");
}
