//! Runtime knobs of the lobby registry

use std::time::Duration;

/// Registry settings, usually built from the `matching` config section
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingSettings {
    /// Tolerance used when the caller does not supply one
    pub default_max_distance_km: f64,
    /// Seats offered when the driver does not choose
    pub default_max_passengers: u32,
    /// Upper bound on `max_passengers` for a new lobby
    pub max_passengers_limit: u32,
    /// Size of the best-ranked pool a join picks from
    pub candidate_pool_size: usize,
    /// Waiting-approval window; `None` disables expiry
    pub approval_timeout: Option<Duration>,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            default_max_distance_km: 5.0,
            default_max_passengers: 1,
            max_passengers_limit: 6,
            candidate_pool_size: 3,
            approval_timeout: Some(Duration::from_secs(90)),
        }
    }
}
