//! Lobby registry - orchestration of the lobby lifecycle
//!
//! The registry owns every active [`Lobby`] and the user to lobby index.
//! All operations, reads included, run under one async mutex; store, route
//! and notification calls are awaited while it is held, so at most one
//! mutation is ever in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Coordinate, LobbyId, UserId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clients::notify::{broadcast, CloseReason, LobbyEvent, NotificationPort};
use crate::clients::route::RouteProvider;
use crate::error::{MatchingError, Result};
use crate::geo::haversine_km;
use crate::lobby::Lobby;
use crate::metrics::RegistryMetrics;
use crate::route_matcher::{rank, Eligibility, MatchBasis, RouteMatcher};
use crate::selection::{select_from_top, RandomTopK, SelectionStrategy};
use crate::settings::MatchingSettings;
use crate::store::traits::MatchStore;
use crate::types::{
    ApprovalOutcome, AvailableLobby, CancelOutcome, JoinResult, LobbySnapshot, LobbyStatus,
    MatchUpdate, NewMatch, NewParticipant, Participant, ParticipantStatus, ParticipantUpdate,
    Preferences, Role,
};

/// State guarded by the registry lock
pub(crate) struct RegistryState {
    pub(crate) lobbies: HashMap<LobbyId, Lobby>,
    pub(crate) user_lobbies: HashMap<UserId, LobbyId>,
    selector: Box<dyn SelectionStrategy>,
}

/// How a lobby leaves the registry without being matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Passengers are evicted with `lobby_closed`
    Closed(CloseReason),
    /// Everyone is told the approval window ran out
    Expired,
}

impl Teardown {
    fn metric_label(&self) -> &'static str {
        match self {
            Teardown::Closed(CloseReason::DriverClosed) => "driver_closed",
            Teardown::Closed(CloseReason::DriverCancelled) => "driver_cancelled",
            Teardown::Closed(CloseReason::DriverDisconnected) => "driver_disconnected",
            Teardown::Expired => "approval_expired",
        }
    }
}

/// Process-wide registry of active lobbies
pub struct LobbyRegistry {
    pub(crate) store: Arc<dyn MatchStore>,
    pub(crate) routes: Arc<dyn RouteProvider>,
    pub(crate) notifier: Arc<dyn NotificationPort>,
    pub(crate) settings: MatchingSettings,
    pub(crate) metrics: RegistryMetrics,
    matcher: RouteMatcher,
    pub(crate) state: Mutex<RegistryState>,
}

impl LobbyRegistry {
    /// Create a registry with entropy-seeded candidate selection
    pub fn new(
        store: Arc<dyn MatchStore>,
        routes: Arc<dyn RouteProvider>,
        notifier: Arc<dyn NotificationPort>,
        settings: MatchingSettings,
    ) -> Self {
        Self {
            store,
            routes,
            notifier,
            settings,
            metrics: RegistryMetrics::new(),
            matcher: RouteMatcher::new(),
            state: Mutex::new(RegistryState {
                lobbies: HashMap::new(),
                user_lobbies: HashMap::new(),
                selector: Box::new(RandomTopK::from_entropy()),
            }),
        }
    }

    /// Replace the candidate selection strategy
    pub fn with_selection(mut self, selector: Box<dyn SelectionStrategy>) -> Self {
        self.state.get_mut().selector = selector;
        self
    }

    pub fn settings(&self) -> &MatchingSettings {
        &self.settings
    }

    // ==================== Lobby lifecycle ====================

    /// Create a lobby owned by `driver_id`
    ///
    /// The advisory route is best effort; the lobby is created without one
    /// if the provider fails.
    pub async fn create_lobby(
        &self,
        driver_id: UserId,
        start: Coordinate,
        destination: Coordinate,
        max_distance_km: f64,
        max_passengers: u32,
        preferences: Preferences,
    ) -> Result<LobbySnapshot> {
        validate_coordinates(start, destination)?;
        validate_distance(max_distance_km)?;
        if max_passengers == 0 || max_passengers > self.settings.max_passengers_limit {
            return Err(MatchingError::Validation(format!(
                "max_passengers must be between 1 and {}",
                self.settings.max_passengers_limit
            )));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.user_lobbies.contains_key(&driver_id) {
            warn!(user_id = %driver_id, "Driver already in a lobby");
            return Err(MatchingError::AlreadyInLobby(driver_id));
        }

        let route = match self
            .routes
            .compute_visit_order_and_geometry(&[start, destination], &[], 0, 1)
            .await
        {
            Ok(plan) if !plan.geometry.is_empty() => Some(plan.geometry),
            Ok(_) => None,
            Err(e) => {
                warn!(user_id = %driver_id, error = %e, "Advisory route unavailable, creating lobby without one");
                None
            }
        };

        let record = self
            .store
            .create_match(NewMatch {
                status: LobbyStatus::Open,
                route_geometry: route.clone(),
                max_passengers,
                max_distance_km,
                preferences: preferences.clone(),
            })
            .await?;

        let driver = Participant::new(driver_id, Role::Driver, start, destination);
        if let Err(e) = self
            .store
            .add_participant(NewParticipant::from_participant(record.match_id, &driver))
            .await
        {
            if let Err(discard) = self.store.discard_match(record.match_id).await {
                warn!(match_id = %record.match_id, error = %discard, "Failed to discard orphaned match record");
            }
            return Err(e.into());
        }

        let lobby = Lobby::new(
            LobbyId::new(),
            record.match_id,
            driver,
            max_passengers,
            max_distance_km,
            preferences,
            route,
        );
        let lobby_id = lobby.lobby_id();
        let snapshot = lobby.snapshot();
        state.lobbies.insert(lobby_id, lobby);
        state.user_lobbies.insert(driver_id, lobby_id);

        self.metrics.lobby_created();
        self.metrics.set_active_lobbies(state.lobbies.len());
        info!(
            lobby_id = %lobby_id,
            match_id = %record.match_id,
            driver_id = %driver_id,
            max_passengers,
            has_route = snapshot.route.is_some(),
            "Lobby created"
        );

        Ok(snapshot)
    }

    /// Join the best-fitting open lobby
    ///
    /// Eligible lobbies are ranked by pickup distance and one is chosen
    /// among the best `candidate_pool_size`.
    pub async fn find_and_join(
        &self,
        passenger_id: UserId,
        location: Coordinate,
        destination: Coordinate,
        max_distance_km: f64,
    ) -> Result<JoinResult> {
        validate_coordinates(location, destination)?;
        validate_distance(max_distance_km)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.user_lobbies.contains_key(&passenger_id) {
            return Err(MatchingError::AlreadyInLobby(passenger_id));
        }

        let mut candidates: Vec<((LobbyId, DateTime<Utc>), Eligibility)> = Vec::new();
        for lobby in state.lobbies.values() {
            if lobby.status() != LobbyStatus::Open
                || lobby.is_full()
                || lobby.contains(passenger_id)
            {
                continue;
            }
            let tolerance = max_distance_km.min(lobby.max_distance_km());
            match self
                .matcher
                .evaluate(&lobby.driver_path(), location, destination, tolerance)
            {
                Ok(eligibility) => {
                    candidates.push(((lobby.lobby_id(), lobby.created_at()), eligibility))
                }
                Err(rejection) => {
                    debug!(lobby_id = %lobby.lobby_id(), ?rejection, "Lobby not eligible")
                }
            }
        }

        let scanned = candidates.len();
        let ranked = rank(candidates, |(id, created)| (*created, *id));
        let Some(((lobby_id, _), eligibility)) = select_from_top(
            ranked,
            self.settings.candidate_pool_size,
            state.selector.as_mut(),
        ) else {
            self.metrics.join_miss();
            info!(user_id = %passenger_id, "No eligible lobby");
            return Err(MatchingError::NoEligibleLobby);
        };

        debug!(
            user_id = %passenger_id,
            lobby_id = %lobby_id,
            eligible = scanned,
            "Lobby selected"
        );

        self.join_locked(state, passenger_id, lobby_id, location, destination, eligibility)
            .await
    }

    /// Join a specific lobby
    ///
    /// The same route fit is required as for [`Self::find_and_join`], using
    /// the lobby's own distance tolerance.
    pub async fn join_lobby(
        &self,
        passenger_id: UserId,
        lobby_id: LobbyId,
        location: Coordinate,
        destination: Coordinate,
    ) -> Result<JoinResult> {
        validate_coordinates(location, destination)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.user_lobbies.contains_key(&passenger_id) {
            return Err(MatchingError::AlreadyInLobby(passenger_id));
        }
        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        lobby.check_join(passenger_id)?;

        let eligibility = self
            .matcher
            .evaluate(
                &lobby.driver_path(),
                location,
                destination,
                lobby.max_distance_km(),
            )
            .map_err(|rejection| {
                MatchingError::Validation(format!(
                    "trip does not fit lobby {}: {:?}",
                    lobby_id, rejection
                ))
            })?;

        self.join_locked(state, passenger_id, lobby_id, location, destination, eligibility)
            .await
    }

    async fn join_locked(
        &self,
        state: &mut RegistryState,
        passenger_id: UserId,
        lobby_id: LobbyId,
        location: Coordinate,
        destination: Coordinate,
        eligibility: Eligibility,
    ) -> Result<JoinResult> {
        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        lobby.check_join(passenger_id)?;

        let match_id = lobby.match_id();
        let fills_lobby = lobby.participants().len() as u64 + 1
            >= u64::from(lobby.max_passengers()) + 1;
        let participant = Participant::new(passenger_id, Role::Passenger, location, destination);

        self.store
            .add_participant(NewParticipant::from_participant(match_id, &participant))
            .await?;

        if fills_lobby {
            if let Err(e) = self
                .store
                .update_match(match_id, MatchUpdate::status(LobbyStatus::WaitingApproval))
                .await
            {
                if let Err(undo) = self.store.remove_participant(match_id, passenger_id).await {
                    warn!(match_id = %match_id, user_id = %passenger_id, error = %undo, "Failed to undo participant row");
                }
                return Err(e.into());
            }
        }

        let lobby = state
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        let is_full = lobby.add_passenger(participant)?;
        let snapshot = lobby.snapshot();
        let users = lobby.user_ids();
        state.user_lobbies.insert(passenger_id, lobby_id);

        self.metrics.join();
        info!(
            lobby_id = %lobby_id,
            user_id = %passenger_id,
            pickup_km = eligibility.pickup_distance_km,
            on_route = eligibility.basis == MatchBasis::Route,
            is_full,
            "Passenger joined lobby"
        );

        if is_full {
            info!(lobby_id = %lobby_id, "Lobby full, waiting for approvals");
            let event = LobbyEvent::LobbyFull { lobby_id, match_id };
            broadcast(self.notifier.as_ref(), &users, &event).await;
        }

        Ok(JoinResult {
            lobby_id,
            match_id,
            is_full,
            pickup_distance_km: eligibility.pickup_distance_km,
            dropoff_distance_km: eligibility.dropoff_distance_km,
            matched_on_route: eligibility.basis == MatchBasis::Route,
            lobby: snapshot,
        })
    }

    /// Withdraw from a lobby
    ///
    /// A passenger who has not approved leaves; a driver closes the whole
    /// lobby. Without `lobby_id` the user's current lobby is used.
    pub async fn cancel_request(
        &self,
        user_id: UserId,
        lobby_id: Option<LobbyId>,
    ) -> Result<CancelOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let lobby_id = match lobby_id {
            Some(id) => id,
            None => *state
                .user_lobbies
                .get(&user_id)
                .ok_or_else(|| MatchingError::ParticipantNotFound {
                    user_id,
                    scope: "any lobby".to_string(),
                })?,
        };

        self.cancel_locked(state, user_id, lobby_id, CloseReason::DriverCancelled)
            .await
    }

    async fn cancel_locked(
        &self,
        state: &mut RegistryState,
        user_id: UserId,
        lobby_id: LobbyId,
        driver_reason: CloseReason,
    ) -> Result<CancelOutcome> {
        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;

        if lobby.driver_id() == user_id {
            let evicted = self
                .teardown_locked(state, lobby_id, Teardown::Closed(driver_reason))
                .await?;
            return Ok(CancelOutcome::LobbyClosed { lobby_id, evicted });
        }

        lobby.check_cancel(user_id)?;
        let match_id = lobby.match_id();
        let reopens = lobby.status() == LobbyStatus::WaitingApproval;

        if reopens {
            self.store
                .update_match(match_id, MatchUpdate::status(LobbyStatus::Open))
                .await?;
        }
        if let Err(e) = self.store.remove_participant(match_id, user_id).await {
            if reopens {
                if let Err(undo) = self
                    .store
                    .update_match(match_id, MatchUpdate::status(LobbyStatus::WaitingApproval))
                    .await
                {
                    warn!(match_id = %match_id, error = %undo, "Failed to restore match status");
                }
            }
            return Err(e.into());
        }

        let lobby = state
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        lobby.remove_passenger(user_id)?;
        let remaining = lobby.user_ids();
        state.user_lobbies.remove(&user_id);

        info!(lobby_id = %lobby_id, user_id = %user_id, reopened = reopens, "Passenger left lobby");
        let event = LobbyEvent::ParticipantLeft { lobby_id, user_id };
        broadcast(self.notifier.as_ref(), &remaining, &event).await;

        Ok(CancelOutcome::Left { lobby_id })
    }

    /// Approve the lobby roster
    ///
    /// The last approval finalizes the match. Approving a lobby stuck in
    /// `Matched` after a failed finalization retries it.
    pub async fn approve(&self, user_id: UserId, lobby_id: LobbyId) -> Result<ApprovalOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;

        if lobby.status() == LobbyStatus::Matched {
            if !lobby.contains(user_id) {
                return Err(MatchingError::not_in_lobby(user_id, lobby_id));
            }
            info!(lobby_id = %lobby_id, "Retrying match finalization");
            return self
                .finalize_locked(state, lobby_id)
                .await
                .map(ApprovalOutcome::Matched);
        }

        lobby.check_approve(user_id)?;
        let match_id = lobby.match_id();
        let already = lobby
            .participant(user_id)
            .map(|p| p.status == ParticipantStatus::Approved)
            .unwrap_or(false);

        if !already {
            self.store
                .update_participant(
                    match_id,
                    user_id,
                    ParticipantUpdate::status(ParticipantStatus::Approved),
                )
                .await?;
        }

        let lobby = state
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        let all_approved = lobby.approve(user_id)?;
        let (approved, total) = lobby.approval_counts();

        if !already {
            self.metrics.approval();
        }
        info!(lobby_id = %lobby_id, user_id = %user_id, approved, total, "Participant approved");

        if all_approved {
            return self
                .finalize_locked(state, lobby_id)
                .await
                .map(ApprovalOutcome::Matched);
        }

        Ok(ApprovalOutcome::Pending {
            lobby_id,
            approved,
            total,
        })
    }

    /// Close a lobby; only its driver may do this
    ///
    /// Returns the evicted passengers.
    pub async fn close_lobby(&self, driver_id: UserId, lobby_id: LobbyId) -> Result<Vec<UserId>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        if lobby.driver_id() != driver_id {
            warn!(lobby_id = %lobby_id, user_id = %driver_id, "Non-owner tried to close lobby");
            return Err(MatchingError::NotAuthorized(format!(
                "user {} does not own lobby {}",
                driver_id, lobby_id
            )));
        }

        self.teardown_locked(state, lobby_id, Teardown::Closed(CloseReason::DriverClosed))
            .await
    }

    /// Connection-loss cascade
    ///
    /// A driver's lobby is closed; a passenger's pending request is
    /// cancelled. Approved passengers stay. Returns `None` when nothing
    /// changed.
    pub async fn handle_disconnect(&self, user_id: UserId) -> Result<Option<CancelOutcome>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(lobby_id) = state.user_lobbies.get(&user_id).copied() else {
            return Ok(None);
        };
        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;

        if lobby.driver_id() != user_id {
            if let Err(e) = lobby.check_cancel(user_id) {
                debug!(user_id = %user_id, lobby_id = %lobby_id, reason = %e, "Disconnect leaves participant in lobby");
                return Ok(None);
            }
        }

        self.cancel_locked(state, user_id, lobby_id, CloseReason::DriverDisconnected)
            .await
            .map(Some)
    }

    /// Remove an unmatched lobby, persisting first
    pub(crate) async fn teardown_locked(
        &self,
        state: &mut RegistryState,
        lobby_id: LobbyId,
        how: Teardown,
    ) -> Result<Vec<UserId>> {
        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        if !lobby.status().can_transition_to(LobbyStatus::Closed) {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} is {} and cannot be closed",
                lobby_id,
                lobby.status()
            )));
        }
        let match_id = lobby.match_id();
        let previous = lobby.status();

        self.store
            .update_match(match_id, MatchUpdate::status(LobbyStatus::Closed))
            .await?;
        if let Err(e) = self.store.archive_and_delete(match_id).await {
            // the lobby stays live, so the row must not read Closed
            if let Err(undo) = self
                .store
                .update_match(match_id, MatchUpdate::status(previous))
                .await
            {
                warn!(match_id = %match_id, error = %undo, "Failed to restore match status");
            }
            return Err(e.into());
        }

        let mut lobby = state
            .lobbies
            .remove(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        lobby.transition(LobbyStatus::Closed)?;
        let everyone = lobby.user_ids();
        for user in &everyone {
            state.user_lobbies.remove(user);
        }
        let evicted: Vec<UserId> = lobby.passengers().map(|p| p.user_id).collect();

        self.metrics.lobby_closed(how.metric_label());
        self.metrics.set_active_lobbies(state.lobbies.len());
        info!(lobby_id = %lobby_id, match_id = %match_id, reason = how.metric_label(), evicted = evicted.len(), "Lobby closed");

        match how {
            Teardown::Closed(reason) => {
                let event = LobbyEvent::LobbyClosed { lobby_id, reason };
                broadcast(self.notifier.as_ref(), &evicted, &event).await;
            }
            Teardown::Expired => {
                let event = LobbyEvent::ApprovalExpired { lobby_id };
                broadcast(self.notifier.as_ref(), &everyone, &event).await;
            }
        }

        Ok(evicted)
    }

    // ==================== Read-only views ====================

    pub async fn get_lobby_info(&self, lobby_id: LobbyId) -> Result<LobbySnapshot> {
        let state = self.state.lock().await;
        state
            .lobbies
            .get(&lobby_id)
            .map(Lobby::snapshot)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))
    }

    /// All active lobbies, oldest first
    pub async fn list_lobbies(&self) -> Vec<LobbySnapshot> {
        let state = self.state.lock().await;
        let mut lobbies: Vec<LobbySnapshot> = state.lobbies.values().map(Lobby::snapshot).collect();
        lobbies.sort_by_key(|l| (l.created_at, l.lobby_id));
        lobbies
    }

    pub async fn list_participants(&self, lobby_id: LobbyId) -> Result<Vec<Participant>> {
        let state = self.state.lock().await;
        state
            .lobbies
            .get(&lobby_id)
            .map(|l| l.participants().to_vec())
            .ok_or(MatchingError::LobbyNotFound(lobby_id))
    }

    /// Open lobbies whose driver starts within `max_distance_km`, nearest first
    pub async fn available_lobbies(
        &self,
        location: Coordinate,
        max_distance_km: f64,
    ) -> Result<Vec<AvailableLobby>> {
        if !location.is_valid() {
            return Err(MatchingError::Validation(format!("invalid coordinate {}", location)));
        }
        validate_distance(max_distance_km)?;

        let state = self.state.lock().await;
        let mut available: Vec<AvailableLobby> = state
            .lobbies
            .values()
            .filter(|l| l.status() == LobbyStatus::Open && !l.is_full())
            .filter_map(|l| {
                let distance_km = haversine_km(location, l.driver().start);
                (distance_km <= max_distance_km).then(|| AvailableLobby {
                    lobby: l.snapshot(),
                    distance_km,
                })
            })
            .collect();
        available.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(available)
    }

    /// Lobby the user currently belongs to
    pub async fn lobby_of(&self, user_id: UserId) -> Option<LobbyId> {
        self.state.lock().await.user_lobbies.get(&user_id).copied()
    }

    pub async fn active_lobby_count(&self) -> usize {
        self.state.lock().await.lobbies.len()
    }
}

fn validate_coordinates(start: Coordinate, destination: Coordinate) -> Result<()> {
    for c in [start, destination] {
        if !c.is_valid() {
            return Err(MatchingError::Validation(format!("invalid coordinate {}", c)));
        }
    }
    Ok(())
}

fn validate_distance(max_distance_km: f64) -> Result<()> {
    if !max_distance_km.is_finite() || max_distance_km <= 0.0 {
        return Err(MatchingError::Validation(format!(
            "max distance must be positive, got {}",
            max_distance_km
        )));
    }
    Ok(())
}
