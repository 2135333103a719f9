use std::sync::Arc;
use std::time::Duration;

use courier_dispatch::{
    batching::policy::BatchPolicy,
    config::AppConfig,
    db::Db,
    dispatch::dispatcher::{DispatchEvent, DispatchRouter},
    dispatch::push::LogPushService,
    dispatch::waves::build_driver_waves,
    horizon::RollingHorizonQueue,
    logger::init_tracing,
    matrix::TravelTimeMatrix,
    matrix::osrm::OsrmMatrix,
    metrics::counters::Counters,
    store::repository::DispatchRepository,
    store::repository_sqlx::SqlxDispatchRepository,
};
use tokio::sync::mpsc;

/// Initializes DB, runs migrations, and constructs the repository.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<SqlxDispatchRepository>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    Ok(Arc::new(SqlxDispatchRepository::new(db.pool.clone())))
}

/// Starts the dispatch router and returns the horizon->router sender.
fn start_dispatch_router(
    repo: Arc<dyn DispatchRepository>,
    counters: Counters,
    capacity: usize,
) -> mpsc::Sender<DispatchEvent> {
    let (offer_tx, offer_rx) = mpsc::channel::<DispatchEvent>(capacity);

    let push = Arc::new(LogPushService);
    let router = Arc::new(DispatchRouter::new(repo, push, counters));

    tokio::spawn(router.run(offer_rx));

    offer_tx
}

/// Starts the horizon loop (fixed cadence). Each tick runs one batching
/// cycle and hands the produced jobs to the dispatch router.
fn start_horizon_loop(
    horizon: Arc<RollingHorizonQueue>,
    repo: Arc<dyn DispatchRepository>,
    matrix: Arc<dyn TravelTimeMatrix>,
    offer_tx: mpsc::Sender<DispatchEvent>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let jobs = match horizon.run_cycle().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(error = ?e, "batching cycle failed");
                    continue;
                }
            };

            if jobs.is_empty() {
                continue;
            }

            let drivers = match repo.fetch_online_drivers().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(error = ?e, "driver snapshot failed; jobs wait for next tick");
                    continue;
                }
            };

            let policy = horizon.policy_snapshot();

            for job in jobs {
                let waves = build_driver_waves(&job, &drivers, matrix.as_ref(), &policy).await;

                let event = DispatchEvent::Offer {
                    job,
                    waves,
                    wave_interval: Duration::from_millis(policy.wave_interval_ms),
                    deadline: Duration::from_millis(policy.acceptance_deadline_ms),
                };

                if offer_tx.send(event).await.is_err() {
                    tracing::warn!("dispatch router is gone; dropping offers this tick");
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting courier-dispatch backend...");

    let cfg = AppConfig::from_env();
    let policy = BatchPolicy::from_profile(&cfg.policy_profile);
    let counters = Counters::default();

    let repo = init_store(&cfg).await?;
    let matrix: Arc<dyn TravelTimeMatrix> = Arc::new(OsrmMatrix::new(cfg.osrm_url.clone())?);

    let horizon = Arc::new(RollingHorizonQueue::new(
        matrix.clone(),
        repo.clone(),
        policy,
        counters.clone(),
    ));

    // Restart safety: RAW orders persisted before a crash re-enter the pool.
    let restored = horizon.restore().await?;
    tracing::info!(restored, "horizon restored");

    let offer_tx =
        start_dispatch_router(repo.clone(), counters.clone(), cfg.dispatch_queue_capacity);

    start_horizon_loop(
        horizon,
        repo,
        matrix,
        offer_tx,
        Duration::from_millis(cfg.horizon_tick_ms),
    );

    tracing::info!(
        tick_ms = cfg.horizon_tick_ms,
        profile = %cfg.policy_profile,
        "Backend started; waiting for shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}
