//! Registry metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.
//!
//! # Metrics
//!
//! * `pool_lobbies_created_total`
//! * `pool_lobbies_closed_total{reason}`
//! * `pool_joins_total`
//! * `pool_join_misses_total`
//! * `pool_approvals_total`
//! * `pool_matches_finalized_total`
//! * `pool_matches_archived_total`
//! * `pool_approvals_expired_total`
//! * `pool_finalize_duration_seconds`
//! * `pool_active_lobbies`

use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

#[derive(Clone)]
pub struct RegistryMetrics {
    lobbies_created: Counter,
    joins: Counter,
    join_misses: Counter,
    approvals: Counter,
    matches_finalized: Counter,
    matches_archived: Counter,
    approvals_expired: Counter,
    finalize_duration: Histogram,
    active_lobbies: Gauge,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self {
            lobbies_created: counter!("pool_lobbies_created_total"),
            joins: counter!("pool_joins_total"),
            join_misses: counter!("pool_join_misses_total"),
            approvals: counter!("pool_approvals_total"),
            matches_finalized: counter!("pool_matches_finalized_total"),
            matches_archived: counter!("pool_matches_archived_total"),
            approvals_expired: counter!("pool_approvals_expired_total"),
            finalize_duration: histogram!("pool_finalize_duration_seconds"),
            active_lobbies: gauge!("pool_active_lobbies"),
        }
    }

    pub fn lobby_created(&self) {
        self.lobbies_created.increment(1);
    }

    pub fn lobby_closed(&self, reason: &'static str) {
        counter!("pool_lobbies_closed_total", "reason" => reason).increment(1);
    }

    pub fn join(&self) {
        self.joins.increment(1);
    }

    pub fn join_miss(&self) {
        self.join_misses.increment(1);
    }

    pub fn approval(&self) {
        self.approvals.increment(1);
    }

    pub fn match_finalized(&self, took: Duration) {
        self.matches_finalized.increment(1);
        self.finalize_duration.record(took.as_secs_f64());
    }

    pub fn match_archived(&self) {
        self.matches_archived.increment(1);
    }

    pub fn approval_expired(&self) {
        self.approvals_expired.increment(1);
    }

    pub fn set_active_lobbies(&self, count: usize) {
        self.active_lobbies.set(count as f64);
    }
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        // no recorder installed; calls are no-ops
        let metrics = RegistryMetrics::new();
        metrics.lobby_created();
        metrics.lobby_closed("driver_closed");
        metrics.match_finalized(Duration::from_millis(3));
        metrics.set_active_lobbies(2);
    }
}
