//! In-memory match store implementation

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{MatchId, UserId};
use parking_lot::{Mutex, RwLock};

use crate::store::traits::{MatchStore, StoreError, StoreResult};
use crate::types::{
    ArchivedMatch, EvaluationRecord, EvaluationStatus, MatchRecord, MatchUpdate, NewMatch,
    NewParticipant, ParticipantRecord, ParticipantUpdate, Rating,
};

/// Store operation, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateMatch,
    AddParticipant,
    UpdateMatch,
    UpdateParticipant,
    BulkUpdateParticipants,
    RemoveParticipant,
    DiscardMatch,
    ArchiveAndDelete,
    CreateEvaluationPairs,
    RecordRatings,
}

#[derive(Default)]
struct Tables {
    matches: HashMap<MatchId, MatchRecord>,
    participants: HashMap<MatchId, BTreeMap<UserId, ParticipantRecord>>,
    evaluations: HashMap<MatchId, BTreeMap<(UserId, UserId), EvaluationRecord>>,
    history: HashMap<MatchId, ArchivedMatch>,
}

/// In-memory match store for testing and development
///
/// One lock guards all tables so every call is atomic.
pub struct InMemoryMatchStore {
    tables: RwLock<Tables>,
    next_match_id: AtomicU64,
    failures: Mutex<Vec<StoreOp>>,
}

impl InMemoryMatchStore {
    /// Create a new in-memory match store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_match_id: AtomicU64::new(1),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Make the next call of `op` fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, op: StoreOp) {
        self.failures.lock().push(op);
    }

    /// Number of matches in active storage
    pub fn active_match_count(&self) -> usize {
        self.tables.read().matches.len()
    }

    /// Number of matches in history
    pub fn archived_match_count(&self) -> usize {
        self.tables.read().history.len()
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|f| *f == op) {
            failures.remove(pos);
            return Err(StoreError::Unavailable(format!("injected failure on {:?}", op)));
        }
        Ok(())
    }
}

impl Default for InMemoryMatchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn create_match(&self, fields: NewMatch) -> StoreResult<MatchRecord> {
        self.check(StoreOp::CreateMatch)?;

        let now = Utc::now();
        let record = MatchRecord {
            match_id: MatchId(self.next_match_id.fetch_add(1, Ordering::Relaxed)),
            status: fields.status,
            route_geometry: fields.route_geometry,
            max_passengers: fields.max_passengers,
            max_distance_km: fields.max_distance_km,
            preferences: fields.preferences,
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.write();
        tables.matches.insert(record.match_id, record.clone());
        tables.participants.entry(record.match_id).or_default();
        Ok(record)
    }

    async fn add_participant(&self, fields: NewParticipant) -> StoreResult<ParticipantRecord> {
        self.check(StoreOp::AddParticipant)?;

        let mut tables = self.tables.write();
        if !tables.matches.contains_key(&fields.match_id) {
            return Err(StoreError::MatchNotFound(fields.match_id));
        }
        let rows = tables.participants.entry(fields.match_id).or_default();
        if rows.contains_key(&fields.user_id) {
            return Err(StoreError::DuplicateParticipant {
                match_id: fields.match_id,
                user_id: fields.user_id,
            });
        }

        let now = Utc::now();
        let record = ParticipantRecord {
            match_id: fields.match_id,
            user_id: fields.user_id,
            role: fields.role,
            start: fields.start,
            destination: fields.destination,
            status: fields.status,
            created_at: now,
            updated_at: now,
        };
        rows.insert(record.user_id, record.clone());
        Ok(record)
    }

    async fn update_match(
        &self,
        match_id: MatchId,
        update: MatchUpdate,
    ) -> StoreResult<MatchRecord> {
        self.check(StoreOp::UpdateMatch)?;

        let mut tables = self.tables.write();
        let record = tables
            .matches
            .get_mut(&match_id)
            .ok_or(StoreError::MatchNotFound(match_id))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(geometry) = update.route_geometry {
            record.route_geometry = Some(geometry);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn update_participant(
        &self,
        match_id: MatchId,
        user_id: UserId,
        update: ParticipantUpdate,
    ) -> StoreResult<ParticipantRecord> {
        self.check(StoreOp::UpdateParticipant)?;

        let mut tables = self.tables.write();
        let row = tables
            .participants
            .get_mut(&match_id)
            .and_then(|rows| rows.get_mut(&user_id))
            .ok_or(StoreError::ParticipantNotFound { match_id, user_id })?;

        if let Some(status) = update.status {
            row.status = status;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn bulk_update_participants(
        &self,
        match_id: MatchId,
        updates: &[(UserId, ParticipantUpdate)],
    ) -> StoreResult<()> {
        self.check(StoreOp::BulkUpdateParticipants)?;

        let mut tables = self.tables.write();
        let rows = tables
            .participants
            .get_mut(&match_id)
            .ok_or(StoreError::MatchNotFound(match_id))?;

        // validate first so a missing row leaves every row untouched
        if let Some((user_id, _)) = updates.iter().find(|(u, _)| !rows.contains_key(u)) {
            return Err(StoreError::ParticipantNotFound {
                match_id,
                user_id: *user_id,
            });
        }

        let now = Utc::now();
        for (user_id, update) in updates {
            if let Some(row) = rows.get_mut(user_id) {
                if let Some(status) = update.status {
                    row.status = status;
                }
                row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn remove_participant(&self, match_id: MatchId, user_id: UserId) -> StoreResult<()> {
        self.check(StoreOp::RemoveParticipant)?;

        let mut tables = self.tables.write();
        tables
            .participants
            .get_mut(&match_id)
            .and_then(|rows| rows.remove(&user_id))
            .map(|_| ())
            .ok_or(StoreError::ParticipantNotFound { match_id, user_id })
    }

    async fn discard_match(&self, match_id: MatchId) -> StoreResult<()> {
        self.check(StoreOp::DiscardMatch)?;

        let mut tables = self.tables.write();
        if tables.matches.remove(&match_id).is_none() {
            return Err(StoreError::MatchNotFound(match_id));
        }
        tables.participants.remove(&match_id);
        tables.evaluations.remove(&match_id);
        Ok(())
    }

    async fn archive_and_delete(&self, match_id: MatchId) -> StoreResult<ArchivedMatch> {
        self.check(StoreOp::ArchiveAndDelete)?;

        let mut tables = self.tables.write();
        let record = tables
            .matches
            .remove(&match_id)
            .ok_or(StoreError::MatchNotFound(match_id))?;
        let participants = tables
            .participants
            .remove(&match_id)
            .map(|rows| rows.into_values().collect())
            .unwrap_or_default();
        let evaluations = tables
            .evaluations
            .remove(&match_id)
            .map(|rows| rows.into_values().collect())
            .unwrap_or_default();

        let archived = ArchivedMatch {
            record,
            participants,
            evaluations,
            archived_at: Utc::now(),
        };
        tables.history.insert(match_id, archived.clone());
        Ok(archived)
    }

    async fn create_evaluation_pairs(
        &self,
        match_id: MatchId,
        user_ids: &[UserId],
    ) -> StoreResult<usize> {
        self.check(StoreOp::CreateEvaluationPairs)?;

        let mut tables = self.tables.write();
        if !tables.matches.contains_key(&match_id) {
            return Err(StoreError::MatchNotFound(match_id));
        }

        let now = Utc::now();
        let rows = tables.evaluations.entry(match_id).or_default();
        let mut created = 0;
        for evaluator_id in user_ids {
            for evaluatee_id in user_ids {
                if evaluator_id == evaluatee_id {
                    continue;
                }
                rows.entry((*evaluator_id, *evaluatee_id)).or_insert_with(|| {
                    created += 1;
                    EvaluationRecord {
                        match_id,
                        evaluator_id: *evaluator_id,
                        evaluatee_id: *evaluatee_id,
                        rating: None,
                        status: EvaluationStatus::Waiting,
                        created_at: now,
                        updated_at: now,
                    }
                });
            }
        }
        Ok(created)
    }

    async fn record_ratings(
        &self,
        match_id: MatchId,
        evaluator_id: UserId,
        ratings: &[Rating],
    ) -> StoreResult<usize> {
        self.check(StoreOp::RecordRatings)?;

        let mut tables = self.tables.write();
        let rows = tables
            .evaluations
            .get_mut(&match_id)
            .ok_or(StoreError::MatchNotFound(match_id))?;

        for rating in ratings {
            let pending = rows
                .get(&(evaluator_id, rating.evaluatee_id))
                .map(|r| r.status == EvaluationStatus::Waiting)
                .unwrap_or(false);
            if !pending {
                return Err(StoreError::EvaluationNotPending {
                    match_id,
                    evaluator_id,
                    evaluatee_id: rating.evaluatee_id,
                });
            }
        }

        let now = Utc::now();
        for rating in ratings {
            if let Some(row) = rows.get_mut(&(evaluator_id, rating.evaluatee_id)) {
                row.rating = Some(rating.rating);
                row.status = EvaluationStatus::Completed;
                row.updated_at = now;
            }
        }
        Ok(ratings.len())
    }

    async fn all_evaluations_complete(&self, match_id: MatchId) -> StoreResult<bool> {
        let tables = self.tables.read();
        Ok(tables
            .evaluations
            .get(&match_id)
            .map(|rows| {
                !rows.is_empty()
                    && rows
                        .values()
                        .all(|r| r.status == EvaluationStatus::Completed)
            })
            .unwrap_or(false))
    }

    async fn get_match(&self, match_id: MatchId) -> StoreResult<Option<MatchRecord>> {
        Ok(self.tables.read().matches.get(&match_id).cloned())
    }

    async fn list_participants(&self, match_id: MatchId) -> StoreResult<Vec<ParticipantRecord>> {
        Ok(self
            .tables
            .read()
            .participants
            .get(&match_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_participant(&self, user_id: UserId) -> StoreResult<Option<ParticipantRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .participants
            .values()
            .filter_map(|rows| rows.get(&user_id))
            .max_by_key(|row| (row.created_at, row.match_id))
            .cloned())
    }

    async fn list_evaluations(&self, match_id: MatchId) -> StoreResult<Vec<EvaluationRecord>> {
        Ok(self
            .tables
            .read()
            .evaluations
            .get(&match_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_archived(&self, match_id: MatchId) -> StoreResult<Option<ArchivedMatch>> {
        Ok(self.tables.read().history.get(&match_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LobbyStatus, ParticipantStatus, Preferences, Role};
    use assert_matches::assert_matches;
    use common::Coordinate;

    fn new_match() -> NewMatch {
        NewMatch {
            status: LobbyStatus::Open,
            route_geometry: None,
            max_passengers: 2,
            max_distance_km: 5.0,
            preferences: Preferences::new(),
        }
    }

    fn new_participant(match_id: MatchId, user: u64, role: Role) -> NewParticipant {
        NewParticipant {
            match_id,
            user_id: UserId(user),
            role,
            start: Coordinate::new(35.0, 139.0),
            destination: Coordinate::new(35.1, 139.1),
            status: ParticipantStatus::InLobby,
        }
    }

    async fn seeded_store() -> (InMemoryMatchStore, MatchId) {
        let store = InMemoryMatchStore::new();
        let record = store.create_match(new_match()).await.unwrap();
        for (user, role) in [(1, Role::Driver), (2, Role::Passenger), (3, Role::Passenger)] {
            store
                .add_participant(new_participant(record.match_id, user, role))
                .await
                .unwrap();
        }
        (store, record.match_id)
    }

    #[tokio::test]
    async fn test_match_ids_are_monotonic() {
        let store = InMemoryMatchStore::new();
        let a = store.create_match(new_match()).await.unwrap();
        let b = store.create_match(new_match()).await.unwrap();
        assert!(b.match_id > a.match_id);
        assert_eq!(store.active_match_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_participant_rejected() {
        let (store, match_id) = seeded_store().await;
        let result = store
            .add_participant(new_participant(match_id, 2, Role::Passenger))
            .await;
        assert_matches!(result, Err(StoreError::DuplicateParticipant { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = InMemoryMatchStore::new();
        store.fail_next(StoreOp::CreateMatch);

        assert_matches!(
            store.create_match(new_match()).await,
            Err(StoreError::Unavailable(_))
        );
        assert!(store.create_match(new_match()).await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_update_is_all_or_nothing() {
        let (store, match_id) = seeded_store().await;
        let updates = vec![
            (UserId(1), ParticipantUpdate::status(ParticipantStatus::Matched)),
            (UserId(99), ParticipantUpdate::status(ParticipantStatus::Matched)),
        ];

        let result = store.bulk_update_participants(match_id, &updates).await;
        assert_matches!(result, Err(StoreError::ParticipantNotFound { .. }));

        let rows = store.list_participants(match_id).await.unwrap();
        assert!(rows.iter().all(|r| r.status == ParticipantStatus::InLobby));
    }

    #[tokio::test]
    async fn test_evaluation_pairs_exclude_self_and_are_idempotent() {
        let (store, match_id) = seeded_store().await;
        let users = [UserId(1), UserId(2), UserId(3)];

        assert_eq!(store.create_evaluation_pairs(match_id, &users).await.unwrap(), 6);
        assert_eq!(store.create_evaluation_pairs(match_id, &users).await.unwrap(), 0);

        let evaluations = store.list_evaluations(match_id).await.unwrap();
        assert_eq!(evaluations.len(), 6);
        assert!(evaluations.iter().all(|e| e.evaluator_id != e.evaluatee_id));
        assert!(!store.all_evaluations_complete(match_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_ratings_rejects_unknown_pair_without_mutation() {
        let (store, match_id) = seeded_store().await;
        store
            .create_evaluation_pairs(match_id, &[UserId(1), UserId(2), UserId(3)])
            .await
            .unwrap();

        let ratings = [Rating::new(UserId(2), 5), Rating::new(UserId(1), 4)];
        let result = store.record_ratings(match_id, UserId(1), &ratings).await;
        assert_matches!(result, Err(StoreError::EvaluationNotPending { .. }));

        let evaluations = store.list_evaluations(match_id).await.unwrap();
        assert!(evaluations
            .iter()
            .all(|e| e.status == EvaluationStatus::Waiting));
    }

    #[tokio::test]
    async fn test_archive_moves_everything_to_history() {
        let (store, match_id) = seeded_store().await;
        store
            .create_evaluation_pairs(match_id, &[UserId(1), UserId(2)])
            .await
            .unwrap();

        let archived = store.archive_and_delete(match_id).await.unwrap();
        assert_eq!(archived.participants.len(), 3);
        assert_eq!(archived.evaluations.len(), 2);

        assert!(store.get_match(match_id).await.unwrap().is_none());
        assert!(store.list_participants(match_id).await.unwrap().is_empty());
        assert!(store.get_archived(match_id).await.unwrap().is_some());
        assert_eq!(store.archived_match_count(), 1);
        assert_matches!(
            store.archive_and_delete(match_id).await,
            Err(StoreError::MatchNotFound(_))
        );
    }

    #[tokio::test]
    async fn test_find_participant_across_matches() {
        let (store, match_id) = seeded_store().await;
        let row = store.find_participant(UserId(3)).await.unwrap().unwrap();
        assert_eq!(row.match_id, match_id);
        assert!(store.find_participant(UserId(42)).await.unwrap().is_none());
    }
}
