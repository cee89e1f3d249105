//! Scripted ride: one driver and a full lobby of riders, create through archive

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::{Coordinate, UserId};
use config::{validate_config, MatchingConfig, PoolConfig, RouteProviderKind, RoutingConfig};
use matching::{
    spawn_approval_reaper, ApprovalOutcome, ConnectionHub, InMemoryMatchStore, LobbyEvent,
    LobbyRegistry, MatchingSettings, RandomTopK, Rating, RouteProvider, StraightLineRouteProvider,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DRIVER_ID: UserId = UserId(1);
const DRIVER_START: Coordinate = Coordinate::new(35.681, 139.767);
const DRIVER_DEST: Coordinate = Coordinate::new(35.689, 139.691);

/// Build the registry from `config` and run one ride end to end
///
/// The lobby offers `passengers` seats, or `matching.default_max_passengers`
/// when unset.
pub async fn run(config: PoolConfig, seed: Option<u64>, passengers: Option<u32>) -> Result<()> {
    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            tracing::error!("{}", err);
        }
        anyhow::bail!("Cannot run demo due to configuration errors");
    }

    if config.metrics.enabled {
        observability::init_metrics(config.metrics.port)?;
    }

    let store = Arc::new(InMemoryMatchStore::new());
    let hub = Arc::new(ConnectionHub::new(
        config.notifications.channel_capacity,
        config.notifications.send_timeout(),
    ));
    let routes = build_route_provider(&config.routing)?;

    let selection = match seed.or(config.matching.selection_seed) {
        Some(seed) => {
            info!(seed, "Using seeded candidate selection");
            RandomTopK::seeded(seed)
        }
        None => RandomTopK::from_entropy(),
    };

    let settings = matching_settings(&config.matching);
    let seats = passengers.unwrap_or(settings.default_max_passengers);
    let registry = Arc::new(
        LobbyRegistry::new(store.clone(), routes, hub.clone(), settings)
        .with_selection(Box::new(selection)),
    );

    let shutdown = CancellationToken::new();
    let reaper = registry.settings().approval_timeout.map(|_| {
        spawn_approval_reaper(registry.clone(), Duration::from_secs(1), shutdown.clone())
    });

    let riders: Vec<UserId> = (0..u64::from(seats)).map(|i| UserId(100 + i)).collect();
    let mut inboxes: Vec<(UserId, mpsc::Receiver<LobbyEvent>)> = std::iter::once(DRIVER_ID)
        .chain(riders.iter().copied())
        .map(|user| (user, hub.connect(user)))
        .collect();

    let result = ride(&registry, &riders, seats).await;

    shutdown.cancel();
    if let Some(reaper) = reaper {
        reaper.await.context("Approval reaper panicked")?;
    }

    for (user, inbox) in &mut inboxes {
        while let Ok(event) = inbox.try_recv() {
            info!(user_id = %user, ?event, "Notification delivered");
        }
    }

    result?;
    info!(
        active = store.active_match_count(),
        archived = store.archived_match_count(),
        "Demo finished"
    );
    Ok(())
}

async fn ride(registry: &LobbyRegistry, riders: &[UserId], seats: u32) -> Result<()> {
    let settings = registry.settings().clone();

    let lobby = registry
        .create_lobby(
            DRIVER_ID,
            DRIVER_START,
            DRIVER_DEST,
            settings.default_max_distance_km,
            seats,
            Default::default(),
        )
        .await
        .context("Driver could not open a lobby")?;
    info!(
        lobby_id = %lobby.lobby_id,
        match_id = %lobby.match_id,
        seats,
        route_points = lobby.route.as_ref().map(Vec::len).unwrap_or(0),
        "Lobby opened"
    );

    for (i, rider) in riders.iter().enumerate() {
        let (pickup, dropoff) = rider_trip(i);
        let joined = registry
            .find_and_join(*rider, pickup, dropoff, settings.default_max_distance_km)
            .await
            .with_context(|| format!("Passenger {} found no lobby", rider))?;
        info!(
            user_id = %rider,
            lobby_id = %joined.lobby_id,
            pickup_km = joined.pickup_distance_km,
            dropoff_km = joined.dropoff_distance_km,
            on_route = joined.matched_on_route,
            full = joined.is_full,
            "Passenger joined"
        );
    }

    let mut summary = None;
    for user in std::iter::once(DRIVER_ID).chain(riders.iter().copied()) {
        match registry.approve(user, lobby.lobby_id).await? {
            ApprovalOutcome::Pending {
                approved, total, ..
            } => info!(user_id = %user, approved, total, "Approval recorded"),
            ApprovalOutcome::Matched(matched) => summary = Some(matched),
        }
    }
    let summary = summary.context("Lobby did not reach a match")?;
    info!(
        match_id = %summary.match_id,
        visit_order = ?summary.visit_order,
        geometry_points = summary.route_geometry.len(),
        "Match confirmed"
    );

    for user in &summary.participants {
        let outcome = registry.report_completion(*user, summary.match_id).await?;
        info!(user_id = %user, all_completed = outcome.all_completed, "Ride completed");
    }

    for evaluator in &summary.participants {
        let ratings: Vec<Rating> = summary
            .participants
            .iter()
            .filter(|other| *other != evaluator)
            .map(|other| Rating::new(*other, Rating::MAX))
            .collect();
        let outcome = registry
            .submit_ratings(summary.match_id, *evaluator, &ratings)
            .await?;
        info!(
            user_id = %evaluator,
            recorded = outcome.recorded,
            archived = outcome.archived,
            "Ratings submitted"
        );
    }

    for user in &summary.participants {
        info!(user_id = %user, status = ?registry.user_status(*user).await?, "Final status");
    }
    Ok(())
}

/// Pickups spread west from just east of the driver start, drop-offs near the destination
fn rider_trip(index: usize) -> (Coordinate, Coordinate) {
    let step = index as f64;
    (
        Coordinate::new(35.684 - 0.001 * step, 139.774 - 0.01 * step),
        Coordinate::new(35.690, 139.700 + 0.005 * step),
    )
}

fn matching_settings(matching: &MatchingConfig) -> MatchingSettings {
    MatchingSettings {
        default_max_distance_km: matching.default_max_distance_km,
        default_max_passengers: matching.default_max_passengers,
        max_passengers_limit: matching.max_passengers_limit,
        candidate_pool_size: matching.candidate_pool_size,
        approval_timeout: matching.approval_timeout(),
    }
}

fn build_route_provider(routing: &RoutingConfig) -> Result<Arc<dyn RouteProvider>> {
    match routing.provider {
        RouteProviderKind::StraightLine => Ok(Arc::new(StraightLineRouteProvider::new(
            routing.densify_step_km,
        ))),
        RouteProviderKind::Osrm => osrm_provider(routing),
    }
}

#[cfg(feature = "osrm")]
fn osrm_provider(routing: &RoutingConfig) -> Result<Arc<dyn RouteProvider>> {
    let endpoint = routing
        .endpoint
        .as_deref()
        .context("routing.endpoint is required for the osrm provider")?;
    let provider = matching::OsrmRouteProvider::new(endpoint, routing.timeout())
        .context("Failed to build OSRM client")?;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "osrm"))]
fn osrm_provider(_routing: &RoutingConfig) -> Result<Arc<dyn RouteProvider>> {
    anyhow::bail!("poolx was built without the `osrm` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_runs_to_archive() {
        let mut config = PoolConfig::default();
        config.matching.max_passengers_limit = 3;
        run(config, Some(7), Some(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_demo_seats_default_from_config() {
        let mut config = PoolConfig::default();
        config.matching.default_max_passengers = 2;
        run(config, Some(7), None).await.unwrap();
    }

    #[test]
    fn test_settings_from_config() {
        let mut matching = MatchingConfig::default();
        matching.approval_timeout_secs = None;
        let settings = matching_settings(&matching);
        assert_eq!(settings.approval_timeout, None);
        assert_eq!(settings.candidate_pool_size, 3);
        assert_eq!(settings.max_passengers_limit, 6);
        assert_eq!(settings.default_max_passengers, 1);
    }

    #[cfg(not(feature = "osrm"))]
    #[test]
    fn test_osrm_requires_feature() {
        let routing = RoutingConfig {
            provider: RouteProviderKind::Osrm,
            endpoint: Some("http://localhost:5000".to_string()),
            ..RoutingConfig::default()
        };
        assert!(build_route_provider(&routing).is_err());
    }
}
