#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Base URL of the routing service providing travel-time tables.
    pub osrm_url: String,

    // =========================
    // Horizon configuration
    // =========================
    /// Interval (in milliseconds) between batching cycles.
    ///
    /// Each tick the horizon queue hands its full pool to the batching
    /// engine. Shorter ticks reduce dispatch latency; longer ticks give the
    /// batcher more material per cycle.
    pub horizon_tick_ms: u64,

    /// Policy profile selected at startup: "default", "peak" or "offpeak".
    ///
    /// The profile can be replaced at runtime; replacements take effect at
    /// the next cycle boundary.
    pub policy_profile: String,

    // =========================
    // Dispatch configuration
    // =========================
    /// Capacity of the async channel between the horizon loop and the
    /// dispatch router.
    ///
    /// Acts as backpressure: if dispatch falls behind, the horizon loop
    /// naturally blocks instead of growing an unbounded offer backlog.
    pub dispatch_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://courier_dev.db".to_string());

        let osrm_url =
            std::env::var("OSRM_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

        let horizon_tick_ms = std::env::var("HORIZON_TICK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000);

        let policy_profile =
            std::env::var("POLICY_PROFILE").unwrap_or_else(|_| "default".to_string());

        Self {
            database_url,
            osrm_url,
            horizon_tick_ms,
            policy_profile,
            dispatch_queue_capacity: 256,
        }
    }
}
