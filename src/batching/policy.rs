/// Thresholds and feature flags controlling batching and dispatch.
///
/// Policies are immutable; operational tuning swaps in a freshly
/// constructed value at a cycle boundary.
#[derive(Clone, Debug)]
pub struct BatchPolicy {
    /// Upper bound on orders per job.
    pub max_batch_size: usize,

    /// Max allowed ratio of batched route time to the sum of standalone
    /// route times when the job holds exactly two orders.
    pub pair_detour_cap: f64,

    /// Same cap for jobs holding three or more orders.
    pub multi_detour_cap: f64,

    /// When set, clustering returns one global group so orders from
    /// different pickups may chain into the same route. Otherwise orders
    /// are grouped by pickup.
    pub enable_continuous_chaining: bool,

    /// When unset, every leftover order becomes a SINGLE job immediately
    /// instead of waiting for batch material.
    pub enable_rolling_horizon: bool,

    /// Age at which a leftover is forced into a SINGLE job regardless of
    /// the horizon.
    pub max_wait_time_seconds: f64,

    /// Drivers per offer wave.
    pub wave_size: usize,

    /// Offer waves per job.
    pub wave_count: usize,

    /// Delay between successive waves.
    pub wave_interval_ms: u64,

    /// Total time a job may stay live before being abandoned.
    pub acceptance_deadline_ms: u64,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 4,
            pair_detour_cap: 1.4,
            multi_detour_cap: 1.3,
            enable_continuous_chaining: false,
            enable_rolling_horizon: true,
            max_wait_time_seconds: 180.0,
            wave_size: 5,
            wave_count: 5,
            wave_interval_ms: 15_000,
            acceptance_deadline_ms: 90_000,
        }
    }
}

impl BatchPolicy {
    /// Lunch/dinner rush: more material per route, looser caps, wider waves.
    pub fn peak() -> Self {
        Self {
            max_batch_size: 6,
            pair_detour_cap: 1.5,
            multi_detour_cap: 1.4,
            enable_continuous_chaining: true,
            max_wait_time_seconds: 240.0,
            wave_size: 8,
            ..Self::default()
        }
    }

    /// Quiet hours: batching rarely pays off, so release orders quickly.
    pub fn offpeak() -> Self {
        Self {
            max_batch_size: 2,
            pair_detour_cap: 1.25,
            multi_detour_cap: 1.2,
            max_wait_time_seconds: 60.0,
            wave_size: 3,
            ..Self::default()
        }
    }

    pub fn from_profile(name: &str) -> Self {
        match name {
            "peak" => Self::peak(),
            "offpeak" => Self::offpeak(),
            _ => Self::default(),
        }
    }
}
