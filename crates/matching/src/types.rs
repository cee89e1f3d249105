//! Ride-pooling domain types
//!
//! Status vocabularies, the durable records owned by the store, the typed
//! update structs used to mutate them, and the values returned by the
//! registry operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Coordinate, LobbyId, MatchId, UserId};
use serde::{Deserialize, Serialize};

/// Free-form lobby preferences supplied by the driver
pub type Preferences = BTreeMap<String, serde_json::Value>;

/// Role of a participant inside a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owner of the lobby and the vehicle
    Driver,
    /// Rider sharing the driver's trip
    Passenger,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Driver => write!(f, "driver"),
            Role::Passenger => write!(f, "passenger"),
        }
    }
}

/// Lobby (and match record) status
///
/// `Open -> WaitingApproval -> Matched -> Navigating -> Completed`, with
/// `Closed` reachable from `Open` and `WaitingApproval`. A full lobby drops
/// back to `Open` when a passenger leaves before approving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Accepting passengers
    Open,
    /// Full, waiting for every participant to approve
    WaitingApproval,
    /// Everyone approved, route not yet finalized
    Matched,
    /// Route finalized, trip under way
    Navigating,
    /// Trip finished
    Completed,
    /// Torn down before the match was confirmed
    Closed,
}

impl LobbyStatus {
    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: LobbyStatus) -> bool {
        use LobbyStatus::*;
        matches!(
            (self, next),
            (Open, WaitingApproval)
                | (Open, Closed)
                | (WaitingApproval, Open)
                | (WaitingApproval, Matched)
                | (WaitingApproval, Closed)
                | (Matched, Navigating)
                | (Navigating, Completed)
        )
    }

    /// Terminal statuses remove the lobby from the registry
    pub fn is_terminal(&self) -> bool {
        matches!(self, LobbyStatus::Completed | LobbyStatus::Closed)
    }
}

impl std::fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LobbyStatus::Open => write!(f, "open"),
            LobbyStatus::WaitingApproval => write!(f, "waiting_approval"),
            LobbyStatus::Matched => write!(f, "matched"),
            LobbyStatus::Navigating => write!(f, "navigating"),
            LobbyStatus::Completed => write!(f, "completed"),
            LobbyStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Per-user status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Not involved in any lobby or match
    #[default]
    Idle,
    /// Looking for a lobby
    Searching,
    /// Attached to a lobby, not yet approved
    InLobby,
    /// Approved the lobby roster
    Approved,
    /// Match confirmed
    Matched,
    /// On the trip
    Navigating,
    /// Reported ride completion
    Completed,
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantStatus::Idle => write!(f, "idle"),
            ParticipantStatus::Searching => write!(f, "searching"),
            ParticipantStatus::InLobby => write!(f, "in_lobby"),
            ParticipantStatus::Approved => write!(f, "approved"),
            ParticipantStatus::Matched => write!(f, "matched"),
            ParticipantStatus::Navigating => write!(f, "navigating"),
            ParticipantStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Status of one directed evaluation pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Rating not yet submitted
    Waiting,
    /// Rating submitted
    Completed,
}

/// A user attached to a lobby
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
    /// Pickup point (driver: trip origin)
    pub start: Coordinate,
    /// Drop-off point (driver: trip destination)
    pub destination: Coordinate,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Create a participant in the `InLobby` status
    pub fn new(user_id: UserId, role: Role, start: Coordinate, destination: Coordinate) -> Self {
        Self {
            user_id,
            role,
            start,
            destination,
            status: ParticipantStatus::InLobby,
            joined_at: Utc::now(),
        }
    }

    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }
}

// ==================== Store records ====================

/// Durable twin of a lobby
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub status: LobbyStatus,
    pub route_geometry: Option<Vec<Coordinate>>,
    pub max_passengers: u32,
    pub max_distance_km: f64,
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new match record; the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewMatch {
    pub status: LobbyStatus,
    pub route_geometry: Option<Vec<Coordinate>>,
    pub max_passengers: u32,
    pub max_distance_km: f64,
    pub preferences: Preferences,
}

/// Persisted participant row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub role: Role,
    pub start: Coordinate,
    pub destination: Coordinate,
    pub status: ParticipantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new participant row
#[derive(Debug, Clone, PartialEq)]
pub struct NewParticipant {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub role: Role,
    pub start: Coordinate,
    pub destination: Coordinate,
    pub status: ParticipantStatus,
}

impl NewParticipant {
    /// Row for a participant of the given match
    pub fn from_participant(match_id: MatchId, participant: &Participant) -> Self {
        Self {
            match_id,
            user_id: participant.user_id,
            role: participant.role,
            start: participant.start,
            destination: participant.destination,
            status: participant.status,
        }
    }
}

/// Mutable fields of a match record; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchUpdate {
    pub status: Option<LobbyStatus>,
    pub route_geometry: Option<Vec<Coordinate>>,
}

impl MatchUpdate {
    pub fn status(status: LobbyStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Mutable fields of a participant row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParticipantUpdate {
    pub status: Option<ParticipantStatus>,
}

impl ParticipantUpdate {
    pub fn status(status: ParticipantStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

/// One directed peer review inside a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub match_id: MatchId,
    pub evaluator_id: UserId,
    pub evaluatee_id: UserId,
    /// 1..=5 once completed
    pub rating: Option<u8>,
    pub status: EvaluationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single rating submitted by an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub evaluatee_id: UserId,
    pub rating: u8,
}

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(evaluatee_id: UserId, rating: u8) -> Self {
        Self {
            evaluatee_id,
            rating,
        }
    }

    pub fn in_range(&self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.rating)
    }
}

/// History copy of a match made when it is archived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMatch {
    pub record: MatchRecord,
    pub participants: Vec<ParticipantRecord>,
    pub evaluations: Vec<EvaluationRecord>,
    pub archived_at: DateTime<Utc>,
}

// ==================== Registry results ====================

/// Read-only view of an in-memory lobby
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LobbySnapshot {
    pub lobby_id: LobbyId,
    pub match_id: MatchId,
    pub driver_id: UserId,
    pub status: LobbyStatus,
    pub max_passengers: u32,
    pub max_distance_km: f64,
    pub preferences: Preferences,
    pub current_users: usize,
    pub route: Option<Vec<Coordinate>>,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
}

/// A lobby in range of a prospective passenger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableLobby {
    pub lobby: LobbySnapshot,
    pub distance_km: f64,
}

/// Outcome of a successful join
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinResult {
    pub lobby_id: LobbyId,
    pub match_id: MatchId,
    /// Lobby reached capacity with this join
    pub is_full: bool,
    /// Distance from the pickup to the driver's path (or start)
    pub pickup_distance_km: f64,
    /// Distance from the drop-off to the driver's path (or destination)
    pub dropoff_distance_km: f64,
    /// Eligibility came from the advisory route rather than the fallback
    pub matched_on_route: bool,
    pub lobby: LobbySnapshot,
}

/// Finalized match returned to the participant whose approval completed it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub lobby_id: LobbyId,
    pub match_id: MatchId,
    pub participants: Vec<UserId>,
    /// Indices into the stop list in visiting order
    pub visit_order: Vec<usize>,
    pub route_geometry: Vec<Coordinate>,
}

/// Result of an approval
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// Waiting on other participants
    Pending {
        lobby_id: LobbyId,
        approved: usize,
        total: usize,
    },
    /// Everyone approved and the match was finalized
    Matched(MatchSummary),
}

/// Result of a cancellation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Passenger left the lobby
    Left { lobby_id: LobbyId },
    /// Driver cancelled; the lobby was closed
    LobbyClosed {
        lobby_id: LobbyId,
        evicted: Vec<UserId>,
    },
}

/// Result of a ride completion report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    pub match_id: MatchId,
    /// Every participant has reported completion
    pub all_completed: bool,
    pub archived: bool,
}

/// Result of a rating submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingOutcome {
    pub match_id: MatchId,
    pub recorded: usize,
    pub archived: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_transitions() {
        use LobbyStatus::*;
        assert!(Open.can_transition_to(WaitingApproval));
        assert!(Open.can_transition_to(Closed));
        assert!(WaitingApproval.can_transition_to(Closed));
        assert!(WaitingApproval.can_transition_to(Open));
        assert!(Matched.can_transition_to(Navigating));
        assert!(!Matched.can_transition_to(Closed));
        assert!(!Navigating.can_transition_to(Open));
        assert!(!Completed.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Matched));
    }

    #[test]
    fn test_rating_range() {
        assert!(Rating::new(UserId(1), 1).in_range());
        assert!(Rating::new(UserId(1), 5).in_range());
        assert!(!Rating::new(UserId(1), 0).in_range());
        assert!(!Rating::new(UserId(1), 6).in_range());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&LobbyStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
        assert_eq!(ParticipantStatus::default(), ParticipantStatus::Idle);
    }
}
