//! Matching error types

use common::{LobbyId, MatchId, UserId};
use serde::Serialize;
use thiserror::Error;

use crate::clients::route::RouteError;
use crate::store::traits::StoreError;

/// Stable classification of a [`MatchingError`]
///
/// Callers branch on the kind; the `Display` text of the error is the
/// human-readable reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or disallowed input
    Validation,
    /// Unknown lobby, match or participant
    NotFound,
    /// Caller is not allowed to perform the action
    Authorization,
    /// Action is invalid for the current status
    StateConflict,
    /// Store call failed; no local mutation was applied
    Persistence,
    /// Route provider unavailable
    ExternalService,
}

impl ErrorKind {
    /// Stable string form of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Authorization => "authorization",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Persistence => "persistence",
            ErrorKind::ExternalService => "external_service",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the lobby registry
#[derive(Error, Debug)]
pub enum MatchingError {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// User already owns or occupies an active lobby
    #[error("User {0} is already in a lobby")]
    AlreadyInLobby(UserId),

    /// No lobby satisfied the route and distance constraints
    #[error("No eligible lobby within range")]
    NoEligibleLobby,

    /// Participant already approved and can no longer cancel
    #[error("User {0} has already approved and cannot cancel")]
    CannotCancelConfirmed(UserId),

    /// Lobby not found
    #[error("Lobby not found: {0}")]
    LobbyNotFound(LobbyId),

    /// Match record not found
    #[error("Match not found: {0}")]
    MatchNotFound(MatchId),

    /// User is not a participant of the lobby or match
    #[error("User {user_id} is not a participant of {scope}")]
    ParticipantNotFound {
        /// Missing user
        user_id: UserId,
        /// Lobby or match the lookup was scoped to
        scope: String,
    },

    /// Caller is not allowed to perform a driver-only action
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Store error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Route provider unavailable
    #[error("Route provider unavailable: {0}")]
    RouteUnavailable(String),
}

impl MatchingError {
    /// Stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatchingError::Validation(_)
            | MatchingError::AlreadyInLobby(_)
            | MatchingError::NoEligibleLobby => ErrorKind::Validation,
            MatchingError::LobbyNotFound(_)
            | MatchingError::MatchNotFound(_)
            | MatchingError::ParticipantNotFound { .. } => ErrorKind::NotFound,
            MatchingError::NotAuthorized(_) => ErrorKind::Authorization,
            MatchingError::CannotCancelConfirmed(_) | MatchingError::InvalidState(_) => {
                ErrorKind::StateConflict
            }
            MatchingError::Persistence(_) => ErrorKind::Persistence,
            MatchingError::RouteUnavailable(_) => ErrorKind::ExternalService,
        }
    }

    pub(crate) fn not_in_lobby(user_id: UserId, lobby_id: LobbyId) -> Self {
        Self::ParticipantNotFound {
            user_id,
            scope: format!("lobby {}", lobby_id),
        }
    }

    pub(crate) fn not_in_match(user_id: UserId, match_id: MatchId) -> Self {
        Self::ParticipantNotFound {
            user_id,
            scope: format!("match {}", match_id),
        }
    }
}

impl From<StoreError> for MatchingError {
    fn from(err: StoreError) -> Self {
        MatchingError::Persistence(err.to_string())
    }
}

impl From<RouteError> for MatchingError {
    fn from(err: RouteError) -> Self {
        MatchingError::RouteUnavailable(err.to_string())
    }
}

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, MatchingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(MatchingError::NoEligibleLobby.kind(), ErrorKind::Validation);
        assert_eq!(
            MatchingError::LobbyNotFound(LobbyId::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            MatchingError::CannotCancelConfirmed(UserId(1)).kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            MatchingError::from(StoreError::Unavailable("down".into())).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(ErrorKind::ExternalService.as_str(), "external_service");
    }

    #[test]
    fn test_error_carries_reason() {
        let err = MatchingError::not_in_match(UserId(3), MatchId(9));
        assert_eq!(err.to_string(), "User 3 is not a participant of match 9");
    }
}
