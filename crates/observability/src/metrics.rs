//! Prometheus exporter
//!
//! The matching core records through the `metrics` facade; this module
//! installs the recorder and attaches descriptions to the pool metrics.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Start the Prometheus exporter
///
/// Serves `/metrics` on `0.0.0.0:{port}`. Must be called inside a Tokio
/// runtime.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_pool_metrics();
    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Register help text for every `pool_*` metric
pub fn describe_pool_metrics() {
    describe_counter!("pool_lobbies_created_total", "Lobbies opened by drivers");
    describe_counter!(
        "pool_lobbies_closed_total",
        "Lobbies torn down before a match, by reason"
    );
    describe_counter!("pool_joins_total", "Passengers placed into a lobby");
    describe_counter!(
        "pool_join_misses_total",
        "Join searches that found no eligible lobby"
    );
    describe_counter!("pool_approvals_total", "Approvals recorded");
    describe_counter!("pool_matches_finalized_total", "Matches confirmed with a route");
    describe_counter!("pool_matches_archived_total", "Matches moved to history");
    describe_counter!(
        "pool_approvals_expired_total",
        "Full lobbies closed for missing approvals"
    );
    describe_histogram!(
        "pool_finalize_duration_seconds",
        Unit::Seconds,
        "Time spent finalizing a match"
    );
    describe_gauge!("pool_active_lobbies", "Lobbies currently held in the registry");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder() {
        // no recorder installed; descriptions are dropped
        describe_pool_metrics();
    }
}
