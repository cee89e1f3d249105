//! MatchStore trait definition

use async_trait::async_trait;
use common::{MatchId, UserId};
use thiserror::Error;

use crate::types::{
    ArchivedMatch, EvaluationRecord, MatchRecord, MatchUpdate, NewMatch, NewParticipant,
    ParticipantRecord, ParticipantUpdate, Rating,
};

/// Errors raised by a [`MatchStore`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Match not found: {0}")]
    MatchNotFound(MatchId),

    #[error("Participant {user_id} not found in match {match_id}")]
    ParticipantNotFound { match_id: MatchId, user_id: UserId },

    #[error("Participant {user_id} already exists in match {match_id}")]
    DuplicateParticipant { match_id: MatchId, user_id: UserId },

    #[error("No pending evaluation {evaluator_id} -> {evaluatee_id} in match {match_id}")]
    EvaluationNotPending {
        match_id: MatchId,
        evaluator_id: UserId,
        evaluatee_id: UserId,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for MatchStore operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// MatchStore trait - durable storage for matches, participants and evaluations
///
/// Every call is atomic on its own. The registry never relies on
/// transactions spanning several calls.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Create a match record; the store assigns the id and timestamps
    async fn create_match(&self, fields: NewMatch) -> StoreResult<MatchRecord>;

    /// Add a participant row to an existing match
    async fn add_participant(&self, fields: NewParticipant) -> StoreResult<ParticipantRecord>;

    /// Apply a typed update to a match record
    async fn update_match(&self, match_id: MatchId, update: MatchUpdate)
        -> StoreResult<MatchRecord>;

    /// Apply a typed update to one participant row
    async fn update_participant(
        &self,
        match_id: MatchId,
        user_id: UserId,
        update: ParticipantUpdate,
    ) -> StoreResult<ParticipantRecord>;

    /// Update several participant rows of one match; all or nothing
    async fn bulk_update_participants(
        &self,
        match_id: MatchId,
        updates: &[(UserId, ParticipantUpdate)],
    ) -> StoreResult<()>;

    /// Delete one participant row
    async fn remove_participant(&self, match_id: MatchId, user_id: UserId) -> StoreResult<()>;

    /// Delete a match and everything tied to it without keeping history
    async fn discard_match(&self, match_id: MatchId) -> StoreResult<()>;

    /// Copy a match, its participants and evaluations into history, then
    /// remove them from active storage
    async fn archive_and_delete(&self, match_id: MatchId) -> StoreResult<ArchivedMatch>;

    /// Create one WAITING evaluation per ordered pair of distinct users
    ///
    /// Pairs that already exist are left untouched. Returns how many rows
    /// were created.
    async fn create_evaluation_pairs(
        &self,
        match_id: MatchId,
        user_ids: &[UserId],
    ) -> StoreResult<usize>;

    /// Complete the evaluator's pending records toward each rated user
    ///
    /// Fails without changing anything if any rating has no pending record.
    async fn record_ratings(
        &self,
        match_id: MatchId,
        evaluator_id: UserId,
        ratings: &[Rating],
    ) -> StoreResult<usize>;

    /// Whether the match has evaluations and all of them are completed
    async fn all_evaluations_complete(&self, match_id: MatchId) -> StoreResult<bool>;

    /// Get an active match record
    async fn get_match(&self, match_id: MatchId) -> StoreResult<Option<MatchRecord>>;

    /// Participant rows of an active match
    async fn list_participants(&self, match_id: MatchId) -> StoreResult<Vec<ParticipantRecord>>;

    /// Most recent active participant row of a user
    async fn find_participant(&self, user_id: UserId) -> StoreResult<Option<ParticipantRecord>>;

    /// Evaluation rows of an active match
    async fn list_evaluations(&self, match_id: MatchId) -> StoreResult<Vec<EvaluationRecord>>;

    /// History copy of an archived match
    async fn get_archived(&self, match_id: MatchId) -> StoreResult<Option<ArchivedMatch>>;
}
