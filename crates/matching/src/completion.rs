//! Match finalization, ride completion and peer evaluation
//!
//! Finalization runs when the last participant approves: persist the
//! matched roster, compute the shared route, persist it, create the
//! evaluation pairs and tell everyone. Each step checks the lobby status so
//! a failed run can be resumed by the next approval.
//!
//! After finalization the lobby leaves the registry and the match lives on
//! in the store until every participant has reported completion and every
//! evaluation is in, at which point it is archived.

use std::collections::HashSet;
use std::time::Instant;

use common::{Coordinate, LobbyId, MatchId, UserId};
use tracing::{info, warn};

use crate::clients::notify::{broadcast, LobbyEvent};
use crate::error::{MatchingError, Result};
use crate::registry::{LobbyRegistry, RegistryState};
use crate::types::{
    CompletionOutcome, EvaluationRecord, EvaluationStatus, LobbyStatus, MatchRecord,
    MatchSummary, MatchUpdate, ParticipantStatus, ParticipantUpdate, Rating, RatingOutcome,
};

impl LobbyRegistry {
    /// Drive a fully approved lobby to `Navigating`
    pub(crate) async fn finalize_locked(
        &self,
        state: &mut RegistryState,
        lobby_id: LobbyId,
    ) -> Result<MatchSummary> {
        let started = Instant::now();
        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        let match_id = lobby.match_id();
        let users = lobby.user_ids();

        if lobby.status() == LobbyStatus::WaitingApproval {
            if !lobby.all_approved() {
                return Err(MatchingError::InvalidState(format!(
                    "lobby {} has unapproved participants",
                    lobby_id
                )));
            }
            let updates = status_updates(&users, ParticipantStatus::Matched);
            self.store.bulk_update_participants(match_id, &updates).await?;
            self.store
                .update_match(match_id, MatchUpdate::status(LobbyStatus::Matched))
                .await?;

            let lobby = state
                .lobbies
                .get_mut(&lobby_id)
                .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
            lobby.transition(LobbyStatus::Matched)?;
            lobby.set_participant_statuses(ParticipantStatus::Matched);
            info!(lobby_id = %lobby_id, match_id = %match_id, "Lobby matched");
        }

        let lobby = state
            .lobbies
            .get(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        if lobby.status() != LobbyStatus::Matched {
            return Err(MatchingError::InvalidState(format!(
                "lobby {} is {} and cannot be finalized",
                lobby_id,
                lobby.status()
            )));
        }

        let plan = lobby.stop_plan();
        let route = match self
            .routes
            .compute_visit_order_and_geometry(&plan.stops, &plan.pairs, plan.start, plan.end)
            .await
        {
            Ok(route) if !route.geometry.is_empty() => route,
            Ok(_) => {
                warn!(lobby_id = %lobby_id, "Route provider returned empty geometry");
                return Err(MatchingError::RouteUnavailable(
                    "empty route geometry".to_string(),
                ));
            }
            Err(e) => {
                warn!(lobby_id = %lobby_id, error = %e, "Route finalization failed, lobby stays matched");
                return Err(e.into());
            }
        };

        // The match row moves last: completion reports and ratings are only
        // accepted once it reads Navigating.
        let updates = status_updates(&users, ParticipantStatus::Navigating);
        self.store.bulk_update_participants(match_id, &updates).await?;
        let pairs = self.store.create_evaluation_pairs(match_id, &users).await?;
        self.store
            .update_match(
                match_id,
                MatchUpdate {
                    status: Some(LobbyStatus::Navigating),
                    route_geometry: Some(route.geometry.clone()),
                },
            )
            .await?;

        let mut lobby = state
            .lobbies
            .remove(&lobby_id)
            .ok_or(MatchingError::LobbyNotFound(lobby_id))?;
        lobby.set_route(route.geometry.clone());
        lobby.transition(LobbyStatus::Navigating)?;
        lobby.set_participant_statuses(ParticipantStatus::Navigating);
        for user in &users {
            state.user_lobbies.remove(user);
        }

        self.metrics.match_finalized(started.elapsed());
        self.metrics.set_active_lobbies(state.lobbies.len());
        info!(
            lobby_id = %lobby_id,
            match_id = %match_id,
            participants = users.len(),
            evaluation_pairs = pairs,
            vertices = route.geometry.len(),
            "Match confirmed, navigating"
        );

        let event = LobbyEvent::MatchConfirmed {
            lobby_id,
            match_id,
            participants: users.clone(),
        };
        broadcast(self.notifier.as_ref(), &users, &event).await;

        Ok(MatchSummary {
            lobby_id,
            match_id,
            participants: users,
            visit_order: route.visit_order,
            route_geometry: route.geometry,
        })
    }

    /// Record that `user_id` finished the ride
    ///
    /// Once everyone has reported, the match becomes `Completed`; it is
    /// archived as soon as the evaluations are complete too.
    pub async fn report_completion(
        &self,
        user_id: UserId,
        match_id: MatchId,
    ) -> Result<CompletionOutcome> {
        let _guard = self.state.lock().await;

        let record = self.active_match(match_id).await?;
        if !matches!(
            record.status,
            LobbyStatus::Navigating | LobbyStatus::Completed
        ) {
            return Err(MatchingError::InvalidState(format!(
                "match {} is {}, not under way",
                match_id, record.status
            )));
        }

        let rows = self.store.list_participants(match_id).await?;
        let row = rows
            .iter()
            .find(|r| r.user_id == user_id)
            .ok_or_else(|| MatchingError::not_in_match(user_id, match_id))?;

        if row.status != ParticipantStatus::Completed {
            self.store
                .update_participant(
                    match_id,
                    user_id,
                    ParticipantUpdate::status(ParticipantStatus::Completed),
                )
                .await?;
            info!(match_id = %match_id, user_id = %user_id, "Ride completion reported");
        }

        let all_completed = rows
            .iter()
            .all(|r| r.user_id == user_id || r.status == ParticipantStatus::Completed);
        if all_completed && record.status == LobbyStatus::Navigating {
            self.store
                .update_match(match_id, MatchUpdate::status(LobbyStatus::Completed))
                .await?;
            info!(match_id = %match_id, "All participants completed the ride");
        }

        let archived = self.try_archive(match_id).await?;
        Ok(CompletionOutcome {
            match_id,
            all_completed,
            archived,
        })
    }

    /// Submit an evaluator's ratings of other participants
    ///
    /// Every rating is validated before anything is written.
    pub async fn submit_ratings(
        &self,
        match_id: MatchId,
        evaluator_id: UserId,
        ratings: &[Rating],
    ) -> Result<RatingOutcome> {
        validate_ratings(evaluator_id, ratings)?;

        let _guard = self.state.lock().await;

        let record = self.active_match(match_id).await?;
        if !matches!(
            record.status,
            LobbyStatus::Navigating | LobbyStatus::Completed
        ) {
            return Err(MatchingError::InvalidState(format!(
                "match {} is {}, evaluations are not open",
                match_id, record.status
            )));
        }

        let members: HashSet<UserId> = self
            .store
            .list_participants(match_id)
            .await?
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        if !members.contains(&evaluator_id) {
            return Err(MatchingError::not_in_match(evaluator_id, match_id));
        }
        if let Some(r) = ratings.iter().find(|r| !members.contains(&r.evaluatee_id)) {
            return Err(MatchingError::not_in_match(r.evaluatee_id, match_id));
        }

        let evaluations = self.store.list_evaluations(match_id).await?;
        for rating in ratings {
            let pending = evaluations.iter().any(|e| {
                e.evaluator_id == evaluator_id
                    && e.evaluatee_id == rating.evaluatee_id
                    && e.status == EvaluationStatus::Waiting
            });
            if !pending {
                return Err(MatchingError::Validation(format!(
                    "user {} has no pending evaluation of user {}",
                    evaluator_id, rating.evaluatee_id
                )));
            }
        }

        let recorded = self
            .store
            .record_ratings(match_id, evaluator_id, ratings)
            .await?;
        info!(match_id = %match_id, evaluator_id = %evaluator_id, recorded, "Ratings recorded");

        let archived = self.try_archive(match_id).await?;
        Ok(RatingOutcome {
            match_id,
            recorded,
            archived,
        })
    }

    /// Archive the match if every evaluation and every participant is done
    async fn try_archive(&self, match_id: MatchId) -> Result<bool> {
        if !self.store.all_evaluations_complete(match_id).await? {
            return Ok(false);
        }
        let rows = self.store.list_participants(match_id).await?;
        if !rows
            .iter()
            .all(|r| r.status == ParticipantStatus::Completed)
        {
            return Ok(false);
        }

        let archived = self.store.archive_and_delete(match_id).await?;
        self.metrics.match_archived();
        info!(
            match_id = %match_id,
            participants = archived.participants.len(),
            evaluations = archived.evaluations.len(),
            "Match archived"
        );
        Ok(true)
    }

    async fn active_match(&self, match_id: MatchId) -> Result<MatchRecord> {
        self.store
            .get_match(match_id)
            .await?
            .ok_or(MatchingError::MatchNotFound(match_id))
    }

    // ==================== Match read model ====================

    /// Active match the user takes part in
    pub async fn match_for_user(&self, user_id: UserId) -> Result<Option<MatchRecord>> {
        let _guard = self.state.lock().await;
        let Some(row) = self.store.find_participant(user_id).await? else {
            return Ok(None);
        };
        Ok(self.store.get_match(row.match_id).await?)
    }

    /// Current status of a user; `Idle` when they are not involved anywhere
    pub async fn user_status(&self, user_id: UserId) -> Result<ParticipantStatus> {
        let state = self.state.lock().await;
        if let Some(status) = state
            .user_lobbies
            .get(&user_id)
            .and_then(|id| state.lobbies.get(id))
            .and_then(|lobby| lobby.participant(user_id))
            .map(|p| p.status)
        {
            return Ok(status);
        }
        Ok(self
            .store
            .find_participant(user_id)
            .await?
            .map(|row| row.status)
            .unwrap_or_default())
    }

    /// Finalized route of an active match, if computed yet
    pub async fn match_route(&self, match_id: MatchId) -> Result<Option<Vec<Coordinate>>> {
        let _guard = self.state.lock().await;
        let record = self.active_match(match_id).await?;
        Ok(match record.status {
            LobbyStatus::Navigating | LobbyStatus::Completed => record.route_geometry,
            _ => None,
        })
    }

    /// Evaluation rows of an active match
    pub async fn evaluations(&self, match_id: MatchId) -> Result<Vec<EvaluationRecord>> {
        let _guard = self.state.lock().await;
        self.active_match(match_id).await?;
        Ok(self.store.list_evaluations(match_id).await?)
    }
}

fn status_updates(
    users: &[UserId],
    status: ParticipantStatus,
) -> Vec<(UserId, ParticipantUpdate)> {
    users
        .iter()
        .map(|u| (*u, ParticipantUpdate::status(status)))
        .collect()
}

fn validate_ratings(evaluator_id: UserId, ratings: &[Rating]) -> Result<()> {
    if ratings.is_empty() {
        return Err(MatchingError::Validation("no ratings submitted".to_string()));
    }
    let mut seen = HashSet::new();
    for rating in ratings {
        if !rating.in_range() {
            return Err(MatchingError::Validation(format!(
                "rating {} for user {} is outside {}..={}",
                rating.rating,
                rating.evaluatee_id,
                Rating::MIN,
                Rating::MAX
            )));
        }
        if rating.evaluatee_id == evaluator_id {
            return Err(MatchingError::Validation(format!(
                "user {} cannot rate themself",
                evaluator_id
            )));
        }
        if !seen.insert(rating.evaluatee_id) {
            return Err(MatchingError::Validation(format!(
                "user {} rated more than once",
                rating.evaluatee_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{harness, open_lobby, Harness, DROPOFF, PICKUP};
    use crate::store::memory::StoreOp;
    use crate::store::traits::MatchStore;
    use crate::types::ApprovalOutcome;
    use assert_matches::assert_matches;

    /// Driver 1 and passenger 2 matched and navigating
    async fn navigating_pair(h: &Harness) -> MatchSummary {
        let lobby = open_lobby(h, 1, 1).await;
        h.registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();
        h.registry.approve(UserId(2), lobby.lobby_id).await.unwrap();
        match h.registry.approve(UserId(1), lobby.lobby_id).await.unwrap() {
            ApprovalOutcome::Matched(summary) => summary,
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scenario_full_approval_reaches_navigating() {
        let h = harness();
        let lobby = open_lobby(&h, 1, 1).await;
        let joined = h
            .registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();
        assert_eq!(joined.lobby.status, LobbyStatus::WaitingApproval);

        let pending = h.registry.approve(UserId(2), lobby.lobby_id).await.unwrap();
        assert_eq!(
            pending,
            ApprovalOutcome::Pending {
                lobby_id: lobby.lobby_id,
                approved: 1,
                total: 2,
            }
        );

        let summary = match h.registry.approve(UserId(1), lobby.lobby_id).await.unwrap() {
            ApprovalOutcome::Matched(summary) => summary,
            other => panic!("expected a match, got {:?}", other),
        };
        assert_eq!(summary.participants, vec![UserId(1), UserId(2)]);
        assert!(!summary.route_geometry.is_empty());
        assert_eq!(summary.visit_order, vec![0, 1, 2, 3]);

        let record = h.store.get_match(summary.match_id).await.unwrap().unwrap();
        assert_eq!(record.status, LobbyStatus::Navigating);
        assert_eq!(record.route_geometry.as_deref(), Some(&summary.route_geometry[..]));

        // lobby leaves the registry, users are free again
        assert_eq!(h.registry.active_lobby_count().await, 0);
        assert_eq!(h.registry.lobby_of(UserId(2)).await, None);
        assert_eq!(
            h.registry.user_status(UserId(2)).await.unwrap(),
            ParticipantStatus::Navigating
        );

        let evaluations = h.registry.evaluations(summary.match_id).await.unwrap();
        assert_eq!(evaluations.len(), 2);
        assert!(evaluations.iter().all(|e| e.evaluator_id != e.evaluatee_id));

        let confirmed = LobbyEvent::MatchConfirmed {
            lobby_id: lobby.lobby_id,
            match_id: summary.match_id,
            participants: vec![UserId(1), UserId(2)],
        };
        assert!(h.notifier.events_for(UserId(1)).contains(&confirmed));
        assert!(h.notifier.events_for(UserId(2)).contains(&confirmed));
    }

    #[tokio::test]
    async fn test_route_failure_keeps_lobby_matched_and_retry_succeeds() {
        let h = harness();
        let lobby = open_lobby(&h, 1, 1).await;
        h.registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();
        h.registry.approve(UserId(2), lobby.lobby_id).await.unwrap();

        h.routes.set_unavailable(true);
        let failed = h.registry.approve(UserId(1), lobby.lobby_id).await;
        assert_matches!(failed, Err(MatchingError::RouteUnavailable(_)));

        let info = h.registry.get_lobby_info(lobby.lobby_id).await.unwrap();
        assert_eq!(info.status, LobbyStatus::Matched);
        let record = h.store.get_match(lobby.match_id).await.unwrap().unwrap();
        assert_eq!(record.status, LobbyStatus::Matched);

        h.routes.set_unavailable(false);
        let retried = h.registry.approve(UserId(2), lobby.lobby_id).await.unwrap();
        assert_matches!(retried, ApprovalOutcome::Matched(_));
        let record = h.store.get_match(lobby.match_id).await.unwrap().unwrap();
        assert_eq!(record.status, LobbyStatus::Navigating);
    }

    #[tokio::test]
    async fn test_store_failure_during_matching_is_resumable() {
        let h = harness();
        let lobby = open_lobby(&h, 1, 1).await;
        h.registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();
        h.registry.approve(UserId(2), lobby.lobby_id).await.unwrap();

        h.store.fail_next(StoreOp::CreateEvaluationPairs);
        let failed = h.registry.approve(UserId(1), lobby.lobby_id).await;
        assert_matches!(failed, Err(MatchingError::Persistence(_)));
        assert_eq!(
            h.registry.get_lobby_info(lobby.lobby_id).await.unwrap().status,
            LobbyStatus::Matched
        );

        let retried = h.registry.approve(UserId(1), lobby.lobby_id).await.unwrap();
        assert_matches!(retried, ApprovalOutcome::Matched(_));
        assert_eq!(h.registry.evaluations(lobby.match_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_completion_rejected_until_finalization_lands() {
        let h = harness();
        let lobby = open_lobby(&h, 1, 1).await;
        h.registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();
        h.registry.approve(UserId(2), lobby.lobby_id).await.unwrap();

        h.store.fail_next(StoreOp::CreateEvaluationPairs);
        assert!(h.registry.approve(UserId(1), lobby.lobby_id).await.is_err());
        let record = h.store.get_match(lobby.match_id).await.unwrap().unwrap();
        assert_eq!(record.status, LobbyStatus::Matched);

        let early = h.registry.report_completion(UserId(2), lobby.match_id).await;
        assert_matches!(early, Err(MatchingError::InvalidState(_)));
        let ratings = [Rating::new(UserId(1), 5)];
        let early = h
            .registry
            .submit_ratings(lobby.match_id, UserId(2), &ratings)
            .await;
        assert_matches!(early, Err(MatchingError::InvalidState(_)));

        h.store.fail_next(StoreOp::UpdateMatch);
        assert!(h.registry.approve(UserId(1), lobby.lobby_id).await.is_err());
        assert_eq!(
            h.registry.get_lobby_info(lobby.lobby_id).await.unwrap().status,
            LobbyStatus::Matched
        );
        let early = h.registry.report_completion(UserId(2), lobby.match_id).await;
        assert_matches!(early, Err(MatchingError::InvalidState(_)));

        let retried = h.registry.approve(UserId(1), lobby.lobby_id).await.unwrap();
        assert_matches!(retried, ApprovalOutcome::Matched(_));

        h.registry
            .report_completion(UserId(2), lobby.match_id)
            .await
            .unwrap();
        assert_eq!(
            h.registry.user_status(UserId(2)).await.unwrap(),
            ParticipantStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_rating_out_of_range_rejected_without_mutation() {
        let h = harness();
        let summary = navigating_pair(&h).await;

        let result = h
            .registry
            .submit_ratings(summary.match_id, UserId(2), &[Rating::new(UserId(1), 6)])
            .await;
        assert_matches!(result, Err(MatchingError::Validation(_)));

        let evaluations = h.registry.evaluations(summary.match_id).await.unwrap();
        assert!(evaluations
            .iter()
            .all(|e| e.status == EvaluationStatus::Waiting && e.rating.is_none()));
    }

    #[tokio::test]
    async fn test_self_rating_and_strangers_rejected() {
        let h = harness();
        let summary = navigating_pair(&h).await;

        let own = h
            .registry
            .submit_ratings(summary.match_id, UserId(1), &[Rating::new(UserId(1), 5)])
            .await;
        assert_matches!(own, Err(MatchingError::Validation(_)));

        let stranger = h
            .registry
            .submit_ratings(summary.match_id, UserId(1), &[Rating::new(UserId(7), 5)])
            .await;
        assert_matches!(stranger, Err(MatchingError::ParticipantNotFound { .. }));

        let outsider = h
            .registry
            .submit_ratings(summary.match_id, UserId(7), &[Rating::new(UserId(1), 5)])
            .await;
        assert_matches!(outsider, Err(MatchingError::ParticipantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_double_rating_rejected() {
        let h = harness();
        let summary = navigating_pair(&h).await;

        h.registry
            .submit_ratings(summary.match_id, UserId(1), &[Rating::new(UserId(2), 4)])
            .await
            .unwrap();
        let again = h
            .registry
            .submit_ratings(summary.match_id, UserId(1), &[Rating::new(UserId(2), 5)])
            .await;
        assert_matches!(again, Err(MatchingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_archive_waits_for_last_evaluation() {
        let h = harness();
        let summary = navigating_pair(&h).await;
        let match_id = summary.match_id;

        for user in [UserId(1), UserId(2)] {
            let outcome = h.registry.report_completion(user, match_id).await.unwrap();
            assert!(!outcome.archived);
        }
        let record = h.store.get_match(match_id).await.unwrap().unwrap();
        assert_eq!(record.status, LobbyStatus::Completed);

        let first = h
            .registry
            .submit_ratings(match_id, UserId(1), &[Rating::new(UserId(2), 5)])
            .await
            .unwrap();
        assert!(!first.archived);
        assert!(h.store.get_match(match_id).await.unwrap().is_some());

        let last = h
            .registry
            .submit_ratings(match_id, UserId(2), &[Rating::new(UserId(1), 4)])
            .await
            .unwrap();
        assert!(last.archived);
        assert!(h.store.get_match(match_id).await.unwrap().is_none());
        let history = h.store.get_archived(match_id).await.unwrap().unwrap();
        assert_eq!(history.evaluations.len(), 2);
        assert!(history
            .evaluations
            .iter()
            .all(|e| e.status == EvaluationStatus::Completed));
        assert_eq!(
            h.registry.user_status(UserId(1)).await.unwrap(),
            ParticipantStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_archive_waits_for_completion_reports() {
        let h = harness();
        let summary = navigating_pair(&h).await;
        let match_id = summary.match_id;

        h.registry
            .submit_ratings(match_id, UserId(1), &[Rating::new(UserId(2), 5)])
            .await
            .unwrap();
        h.registry
            .submit_ratings(match_id, UserId(2), &[Rating::new(UserId(1), 5)])
            .await
            .unwrap();
        assert!(h.store.get_match(match_id).await.unwrap().is_some());

        let first = h.registry.report_completion(UserId(1), match_id).await.unwrap();
        assert!(!first.all_completed);
        let second = h.registry.report_completion(UserId(2), match_id).await.unwrap();
        assert!(second.all_completed);
        assert!(second.archived);
    }

    #[tokio::test]
    async fn test_completion_requires_participant_and_active_match() {
        let h = harness();
        let summary = navigating_pair(&h).await;

        let stranger = h.registry.report_completion(UserId(9), summary.match_id).await;
        assert_matches!(stranger, Err(MatchingError::ParticipantNotFound { .. }));

        let missing = h.registry.report_completion(UserId(1), MatchId(999)).await;
        assert_matches!(missing, Err(MatchingError::MatchNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_model() {
        let h = harness();
        assert_eq!(
            h.registry.user_status(UserId(1)).await.unwrap(),
            ParticipantStatus::Idle
        );
        let summary = navigating_pair(&h).await;

        let record = h.registry.match_for_user(UserId(2)).await.unwrap().unwrap();
        assert_eq!(record.match_id, summary.match_id);
        let route = h.registry.match_route(summary.match_id).await.unwrap();
        assert_eq!(route, Some(summary.route_geometry.clone()));
        assert!(h.registry.match_for_user(UserId(5)).await.unwrap().is_none());
    }
}
