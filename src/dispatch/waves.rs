//! Orders online drivers into timed offer waves for one job.

use tracing::warn;

use crate::batching::policy::BatchPolicy;
use crate::driver::model::Driver;
use crate::matrix::TravelTimeMatrix;
use crate::order::model::{Coord, Job};

/// Builds exactly `policy.wave_count` driver buckets for `job`.
///
/// Offerable drivers are ranked by travel time from their location to the
/// job's first stop (ties: smaller driver id) and chunked into waves of
/// `wave_size`. Trailing waves pad out empty; drivers beyond
/// `wave_count * wave_size` are never offered this job. Drivers whose
/// travel time cannot be priced are excluded rather than guessed at.
pub async fn build_driver_waves(
    job: &Job,
    online_drivers: &[Driver],
    matrix: &dyn TravelTimeMatrix,
    policy: &BatchPolicy,
) -> Vec<Vec<String>> {
    let mut waves = vec![Vec::new(); policy.wave_count];
    if policy.wave_count == 0 || policy.wave_size == 0 {
        return waves;
    }

    let first_stop = job.stops[0].coord;

    let candidates: Vec<&Driver> = online_drivers.iter().filter(|d| d.is_offerable()).collect();
    if candidates.is_empty() {
        return waves;
    }

    let mut coords: Vec<Coord> = candidates.iter().map(|d| d.location).collect();
    coords.push(first_stop);

    if let Err(e) = matrix.prefetch(&coords).await {
        warn!(error = %e, job_id = %job.id, "driver ranking prefetch failed; no waves built");
        return waves;
    }

    let mut ranked: Vec<(f64, &str)> = candidates
        .iter()
        .filter_map(|d| {
            matrix
                .time(d.location, first_stop)
                .ok()
                .map(|t| (t, d.id.as_str()))
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });

    for (slot, chunk) in ranked
        .chunks(policy.wave_size)
        .take(policy.wave_count)
        .enumerate()
    {
        waves[slot] = chunk.iter().map(|(_, id)| id.to_string()).collect();
    }

    waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::model::DriverStatus;
    use crate::matrix::manhattan::ManhattanMatrix;
    use crate::order::model::{Order, OrderStatus, Stop};
    use chrono::DateTime;

    const M: f64 = 1.0 / 111_320.0;

    fn coord_m(x_m: f64, y_m: f64) -> Coord {
        Coord::new(x_m * M, y_m * M)
    }

    fn mk_job() -> Job {
        let order = Order {
            id: "o1".into(),
            pickup_id: "m1".into(),
            pickup: coord_m(0.0, 0.0),
            dropoff: coord_m(1000.0, 0.0),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            status: OrderStatus::Ready,
        };
        Job::assemble(
            "job-o1".into(),
            vec!["o1".into()],
            vec![Stop::pickup(&order), Stop::dropoff(&order)],
            100.0,
            100.0,
        )
        .unwrap()
    }

    fn mk_driver(id: &str, x_m: f64, status: DriverStatus) -> Driver {
        Driver {
            id: id.to_string(),
            location: coord_m(x_m, 0.0),
            status,
            max_capacity: 3,
            push_token: format!("tok-{id}"),
        }
    }

    fn policy(wave_size: usize, wave_count: usize) -> BatchPolicy {
        BatchPolicy {
            wave_size,
            wave_count,
            ..BatchPolicy::default()
        }
    }

    #[tokio::test]
    async fn ranks_by_travel_time_then_id() {
        let m = ManhattanMatrix::new(10.0);
        let drivers = vec![
            mk_driver("far", 5000.0, DriverStatus::Available),
            mk_driver("near", 100.0, DriverStatus::Available),
            // Same distance as "near" but larger id
            mk_driver("near2", -100.0, DriverStatus::Available),
        ];

        let waves = build_driver_waves(&mk_job(), &drivers, &m, &policy(2, 2)).await;

        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec!["near".to_string(), "near2".to_string()]);
        assert_eq!(waves[1], vec!["far".to_string()]);
    }

    #[tokio::test]
    async fn equal_distance_breaks_ties_by_id() {
        let m = ManhattanMatrix::new(10.0);
        let drivers = vec![
            mk_driver("b", 200.0, DriverStatus::Available),
            mk_driver("a", -200.0, DriverStatus::Available),
        ];

        let waves = build_driver_waves(&mk_job(), &drivers, &m, &policy(1, 2)).await;

        assert_eq!(waves[0], vec!["a".to_string()]);
        assert_eq!(waves[1], vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn offline_and_exhausted_drivers_are_excluded() {
        let m = ManhattanMatrix::new(10.0);
        let mut exhausted = mk_driver("full", 50.0, DriverStatus::Available);
        exhausted.max_capacity = 0;

        let drivers = vec![
            mk_driver("off", 10.0, DriverStatus::Offline),
            mk_driver("susp", 20.0, DriverStatus::Suspended),
            exhausted,
            mk_driver("transit", 300.0, DriverStatus::TransitToCollect),
            mk_driver("avail", 400.0, DriverStatus::Available),
        ];

        let waves = build_driver_waves(&mk_job(), &drivers, &m, &policy(5, 5)).await;

        assert_eq!(waves[0], vec!["transit".to_string(), "avail".to_string()]);
        assert!(waves[1..].iter().all(|w| w.is_empty()));
    }

    #[tokio::test]
    async fn surplus_drivers_are_dropped() {
        let m = ManhattanMatrix::new(10.0);
        let drivers: Vec<Driver> = (0..7)
            .map(|i| mk_driver(&format!("d{i}"), 100.0 * (i + 1) as f64, DriverStatus::Available))
            .collect();

        let waves = build_driver_waves(&mk_job(), &drivers, &m, &policy(2, 2)).await;

        assert_eq!(waves.len(), 2);
        let offered: usize = waves.iter().map(|w| w.len()).sum();
        assert_eq!(offered, 4, "only wave_count * wave_size drivers get offers");
    }

    #[tokio::test]
    async fn fewer_drivers_than_waves_pads_with_empty() {
        let m = ManhattanMatrix::new(10.0);
        let drivers = vec![mk_driver("d0", 100.0, DriverStatus::Available)];

        let waves = build_driver_waves(&mk_job(), &drivers, &m, &policy(3, 4)).await;

        assert_eq!(waves.len(), 4);
        assert_eq!(waves[0].len(), 1);
        assert!(waves[1..].iter().all(|w| w.is_empty()));
    }

    #[tokio::test]
    async fn no_offerable_drivers_means_empty_waves() {
        let m = ManhattanMatrix::new(10.0);
        let drivers = vec![mk_driver("off", 10.0, DriverStatus::Offline)];

        let waves = build_driver_waves(&mk_job(), &drivers, &m, &policy(2, 3)).await;

        assert_eq!(waves.len(), 3);
        assert!(waves.iter().all(|w| w.is_empty()));
    }
}
