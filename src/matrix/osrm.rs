use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::matrix::{MatrixError, TravelTimeMatrix};
use crate::order::model::Coord;

type PairKey = ((u64, u64), (u64, u64));

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    /// `durations[i][j]` is seconds from source i to destination j;
    /// unroutable pairs come back as null.
    durations: Option<Vec<Vec<Option<f64>>>>,
}

/// OSRM-backed travel-time matrix.
///
/// `prefetch` issues one bulk `/table` request per coordinate set and fills
/// a process-local cache; `time` answers exclusively from that cache so the
/// batching loop never blocks on the network. A cold pair is reported as
/// `Unavailable` and retried on a later cycle.
pub struct OsrmMatrix {
    http: Client,
    base_url: String,
    cache: RwLock<HashMap<PairKey, f64>>,
}

impl OsrmMatrix {
    pub fn new(base_url: String) -> Result<Self, MatrixError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            cache: RwLock::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    fn seed_pair(&self, a: Coord, b: Coord, seconds: f64) {
        self.cache.write().insert((a.bits(), b.bits()), seconds);
    }
}

#[async_trait]
impl TravelTimeMatrix for OsrmMatrix {
    fn time(&self, a: Coord, b: Coord) -> Result<f64, MatrixError> {
        if a == b {
            return Ok(0.0);
        }

        self.cache
            .read()
            .get(&(a.bits(), b.bits()))
            .copied()
            .ok_or(MatrixError::Unavailable)
    }

    #[instrument(skip(self, coords), fields(coords = coords.len()), level = "debug")]
    async fn prefetch(&self, coords: &[Coord]) -> Result<(), MatrixError> {
        // Dedup while keeping positions aligned with the response matrix.
        let mut distinct: Vec<Coord> = Vec::with_capacity(coords.len());
        for c in coords {
            if !distinct.contains(c) {
                distinct.push(*c);
            }
        }

        if distinct.len() < 2 {
            return Ok(());
        }

        let mut path = String::new();
        for (idx, c) in distinct.iter().enumerate() {
            if idx > 0 {
                path.push(';');
            }
            let _ = write!(path, "{},{}", c.lon, c.lat);
        }

        let url = format!(
            "{}/table/v1/driving/{}?annotations=duration",
            self.base_url, path
        );

        let resp = self.http.get(&url).send().await?.error_for_status()?;
        let table: TableResponse = resp.json().await?;

        if table.code != "Ok" {
            return Err(MatrixError::InvalidResponse(table.code));
        }
        let durations = table
            .durations
            .ok_or_else(|| MatrixError::InvalidResponse("missing durations".into()))?;
        if durations.len() != distinct.len() {
            return Err(MatrixError::InvalidResponse(format!(
                "expected {} rows, got {}",
                distinct.len(),
                durations.len()
            )));
        }

        let mut cached = 0usize;
        let mut guard = self.cache.write();
        for (i, row) in durations.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                // Unroutable pairs stay absent and surface as Unavailable.
                if let Some(seconds) = cell {
                    guard.insert((distinct[i].bits(), distinct[j].bits()), seconds.max(0.0));
                    cached += 1;
                }
            }
        }
        drop(guard);

        debug!(pairs = cached, "travel-time table cached");
        Ok(())
    }
}
