//! Approval expiry
//!
//! A full lobby whose participants do not all approve within the configured
//! window is closed and everyone goes back to searching.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::LobbyId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::{LobbyRegistry, Teardown};

impl LobbyRegistry {
    /// Close every lobby that has waited for approvals longer than allowed
    ///
    /// Returns the expired lobbies. A lobby whose teardown fails is left in
    /// place and retried on the next sweep.
    pub async fn expire_stale_approvals(&self, now: DateTime<Utc>) -> Vec<LobbyId> {
        let Some(timeout) = self.settings.approval_timeout else {
            return Vec::new();
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let stale: Vec<LobbyId> = state
            .lobbies
            .values()
            .filter(|lobby| lobby.approval_expired(now, timeout))
            .map(|lobby| lobby.lobby_id())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for lobby_id in stale {
            match self.teardown_locked(state, lobby_id, Teardown::Expired).await {
                Ok(_) => {
                    self.metrics.approval_expired();
                    expired.push(lobby_id);
                }
                Err(e) => error!(lobby_id = %lobby_id, error = %e, "Failed to expire lobby"),
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale approvals");
        }
        expired
    }
}

/// Run [`LobbyRegistry::expire_stale_approvals`] every `period` until `shutdown` fires
pub fn spawn_approval_reaper(
    registry: Arc<LobbyRegistry>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Approval reaper shutting down");
                    return;
                }
                _ = timer.tick() => {
                    registry.expire_stale_approvals(Utc::now()).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::notify::LobbyEvent;
    use crate::registry::tests::{harness, harness_with, open_lobby, DROPOFF, PICKUP};
    use crate::settings::MatchingSettings;
    use crate::store::traits::MatchStore;
    use crate::types::LobbyStatus;
    use common::UserId;

    #[tokio::test]
    async fn test_expires_only_after_window() {
        let h = harness();
        let lobby = open_lobby(&h, 1, 1).await;
        h.registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();
        let since = h
            .registry
            .get_lobby_info(lobby.lobby_id)
            .await
            .unwrap()
            .created_at;

        // well before the 90s window
        assert!(h.registry.expire_stale_approvals(since).await.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(91);
        let expired = h.registry.expire_stale_approvals(later).await;
        assert_eq!(expired, vec![lobby.lobby_id]);

        assert_eq!(h.registry.active_lobby_count().await, 0);
        assert_eq!(h.registry.lobby_of(UserId(2)).await, None);
        assert!(h.store.get_match(lobby.match_id).await.unwrap().is_none());
        for user in [UserId(1), UserId(2)] {
            assert!(h
                .notifier
                .events_for(user)
                .contains(&LobbyEvent::ApprovalExpired {
                    lobby_id: lobby.lobby_id
                }));
        }
    }

    #[tokio::test]
    async fn test_open_lobbies_never_expire() {
        let h = harness();
        open_lobby(&h, 1, 2).await;
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(h.registry.expire_stale_approvals(later).await.is_empty());
        assert_eq!(h.registry.active_lobby_count().await, 1);
    }

    #[tokio::test]
    async fn test_expiry_disabled() {
        let h = harness_with(MatchingSettings {
            approval_timeout: None,
            ..MatchingSettings::default()
        });
        let lobby = open_lobby(&h, 1, 1).await;
        h.registry
            .find_and_join(UserId(2), PICKUP, DROPOFF, 5.0)
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(h.registry.expire_stale_approvals(later).await.is_empty());
        assert_eq!(
            h.registry.get_lobby_info(lobby.lobby_id).await.unwrap().status,
            LobbyStatus::WaitingApproval
        );
    }

    #[tokio::test]
    async fn test_reaper_stops_on_shutdown() {
        let h = harness();
        let registry = Arc::new(h.registry);
        let shutdown = CancellationToken::new();

        let handle = spawn_approval_reaper(
            registry.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        assert!(handle.await.is_ok());
    }
}
