//! Lobby aggregate
//!
//! One driver plus the passengers who joined, the capacity rule and the
//! status state machine. The registry validates with the `check_*` methods,
//! persists, and only then applies the matching mutation here.

use chrono::{DateTime, Utc};
use common::{Coordinate, LobbyId, MatchId, UserId};

use crate::error::{MatchingError, Result};
use crate::route_matcher::DriverPath;
use crate::types::{LobbySnapshot, LobbyStatus, Participant, ParticipantStatus, Preferences, Role};

/// Stops handed to the route provider when a match is finalized
#[derive(Debug, Clone, PartialEq)]
pub struct StopPlan {
    /// Driver start, then each passenger's pickup and drop-off, then driver destination
    pub stops: Vec<Coordinate>,
    /// `(pickup, dropoff)` indices into `stops`
    pub pairs: Vec<(usize, usize)>,
    pub start: usize,
    pub end: usize,
}

/// In-memory ride-pooling lobby
#[derive(Debug, Clone)]
pub struct Lobby {
    lobby_id: LobbyId,
    match_id: MatchId,
    max_passengers: u32,
    max_distance_km: f64,
    preferences: Preferences,
    status: LobbyStatus,
    route: Option<Vec<Coordinate>>,
    /// Driver first, passengers in join order
    participants: Vec<Participant>,
    created_at: DateTime<Utc>,
    waiting_since: Option<DateTime<Utc>>,
}

impl Lobby {
    /// Create an open lobby owned by `driver`
    pub fn new(
        lobby_id: LobbyId,
        match_id: MatchId,
        driver: Participant,
        max_passengers: u32,
        max_distance_km: f64,
        preferences: Preferences,
        route: Option<Vec<Coordinate>>,
    ) -> Self {
        let driver = Participant {
            role: Role::Driver,
            ..driver
        };
        Self {
            lobby_id,
            match_id,
            max_passengers,
            max_distance_km,
            preferences,
            status: LobbyStatus::Open,
            route,
            participants: vec![driver],
            created_at: Utc::now(),
            waiting_since: None,
        }
    }

    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn status(&self) -> LobbyStatus {
        self.status
    }

    pub fn max_passengers(&self) -> u32 {
        self.max_passengers
    }

    pub fn max_distance_km(&self) -> f64 {
        self.max_distance_km
    }

    pub fn route(&self) -> Option<&[Coordinate]> {
        self.route.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the lobby last became full
    pub fn waiting_since(&self) -> Option<DateTime<Utc>> {
        self.waiting_since
    }

    pub fn driver(&self) -> &Participant {
        &self.participants[0]
    }

    pub fn driver_id(&self) -> UserId {
        self.driver().user_id
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn passengers(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().skip(1)
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.participants.iter().map(|p| p.user_id).collect()
    }

    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.participant(user_id).is_some()
    }

    /// Seats are `max_passengers` plus the driver
    pub fn is_full(&self) -> bool {
        self.participants.len() as u64 >= u64::from(self.max_passengers) + 1
    }

    pub fn driver_path(&self) -> DriverPath<'_> {
        DriverPath {
            start: self.driver().start,
            destination: self.driver().destination,
            route: self.route(),
        }
    }

    /// Whether a new passenger could be added right now
    pub fn check_join(&self, user_id: UserId) -> Result<()> {
        if self.status != LobbyStatus::Open {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} is {} and not accepting passengers",
                self.lobby_id, self.status
            )));
        }
        if self.contains(user_id) {
            return Err(MatchingError::Validation(format!(
                "user {} already joined lobby {}",
                user_id, self.lobby_id
            )));
        }
        if self.is_full() {
            return Err(MatchingError::Validation(format!(
                "lobby {} is at capacity",
                self.lobby_id
            )));
        }
        Ok(())
    }

    /// Add a passenger; returns `true` when this join filled the lobby
    pub fn add_passenger(&mut self, passenger: Participant) -> Result<bool> {
        self.check_join(passenger.user_id)?;
        self.participants.push(Participant {
            role: Role::Passenger,
            ..passenger
        });

        if self.is_full() {
            self.transition(LobbyStatus::WaitingApproval)?;
            self.waiting_since = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether a passenger may leave right now
    pub fn check_cancel(&self, user_id: UserId) -> Result<()> {
        let participant = self
            .participant(user_id)
            .ok_or_else(|| MatchingError::not_in_lobby(user_id, self.lobby_id))?;

        if participant.is_driver() {
            return Err(MatchingError::InvalidState(
                "driver cannot leave their own lobby".to_string(),
            ));
        }
        if !matches!(
            self.status,
            LobbyStatus::Open | LobbyStatus::WaitingApproval
        ) {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} is already {}",
                self.lobby_id, self.status
            )));
        }
        if participant.status == ParticipantStatus::Approved {
            return Err(MatchingError::CannotCancelConfirmed(user_id));
        }
        Ok(())
    }

    /// Remove a passenger; a full lobby reopens
    pub fn remove_passenger(&mut self, user_id: UserId) -> Result<Participant> {
        self.check_cancel(user_id)?;
        let index = self
            .participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or_else(|| MatchingError::not_in_lobby(user_id, self.lobby_id))?;
        let removed = self.participants.remove(index);

        if self.status == LobbyStatus::WaitingApproval {
            self.transition(LobbyStatus::Open)?;
            self.waiting_since = None;
        }
        Ok(removed)
    }

    /// Whether `user_id` may approve right now
    pub fn check_approve(&self, user_id: UserId) -> Result<()> {
        if !self.contains(user_id) {
            return Err(MatchingError::not_in_lobby(user_id, self.lobby_id));
        }
        if self.status != LobbyStatus::WaitingApproval {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} is {}, approvals are not open",
                self.lobby_id, self.status
            )));
        }
        Ok(())
    }

    /// Mark a participant approved; returns `true` once everyone has
    pub fn approve(&mut self, user_id: UserId) -> Result<bool> {
        self.check_approve(user_id)?;
        if let Some(p) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
            p.status = ParticipantStatus::Approved;
        }
        Ok(self.all_approved())
    }

    pub fn all_approved(&self) -> bool {
        self.participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Approved)
    }

    /// `(approved, total)`
    pub fn approval_counts(&self) -> (usize, usize) {
        let approved = self
            .participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Approved)
            .count();
        (approved, self.participants.len())
    }

    /// Advance the state machine
    pub fn transition(&mut self, next: LobbyStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} cannot move from {} to {}",
                self.lobby_id, self.status, next
            )));
        }
        if next == LobbyStatus::Matched && !self.all_approved() {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} has unapproved participants",
                self.lobby_id
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn set_participant_statuses(&mut self, status: ParticipantStatus) {
        for p in &mut self.participants {
            p.status = status;
        }
    }

    pub fn set_route(&mut self, route: Vec<Coordinate>) {
        self.route = Some(route);
    }

    /// Whether the approval window ran out at `now`
    pub fn approval_expired(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        if self.status != LobbyStatus::WaitingApproval {
            return false;
        }
        let Some(since) = self.waiting_since else {
            return false;
        };
        chrono::Duration::from_std(timeout)
            .map(|window| since + window <= now)
            .unwrap_or(false)
    }

    /// Stops for route finalization
    ///
    /// Passenger `i` contributes pickup `1 + 2i` and drop-off `2 + 2i`.
    pub fn stop_plan(&self) -> StopPlan {
        let driver = self.driver();
        let mut stops = vec![driver.start];
        let mut pairs = Vec::new();
        for passenger in self.passengers() {
            let pickup = stops.len();
            stops.push(passenger.start);
            stops.push(passenger.destination);
            pairs.push((pickup, pickup + 1));
        }
        stops.push(driver.destination);
        let end = stops.len() - 1;
        StopPlan {
            stops,
            pairs,
            start: 0,
            end,
        }
    }

    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            lobby_id: self.lobby_id,
            match_id: self.match_id,
            driver_id: self.driver_id(),
            status: self.status,
            max_passengers: self.max_passengers,
            max_distance_km: self.max_distance_km,
            preferences: self.preferences.clone(),
            current_users: self.participants.len(),
            route: self.route.clone(),
            participants: self.participants.clone(),
            created_at: self.created_at,
        }
    }
}
