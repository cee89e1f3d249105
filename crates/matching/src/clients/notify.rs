//! Notification port - trait and implementations

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use common::{LobbyId, MatchId, UserId};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Why a lobby was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Driver closed the lobby
    DriverClosed,
    /// Driver cancelled their own request
    DriverCancelled,
    /// Driver lost their connection
    DriverDisconnected,
}

/// Event pushed to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyEvent {
    /// Lobby reached capacity; approvals are now expected
    LobbyFull { lobby_id: LobbyId, match_id: MatchId },
    /// A passenger left the lobby
    ParticipantLeft { lobby_id: LobbyId, user_id: UserId },
    /// Lobby was closed and the recipient evicted
    LobbyClosed {
        lobby_id: LobbyId,
        reason: CloseReason,
    },
    /// Everyone approved and the route is ready
    MatchConfirmed {
        lobby_id: LobbyId,
        match_id: MatchId,
        participants: Vec<UserId>,
    },
    /// Approvals did not complete in time; back to searching
    ApprovalExpired { lobby_id: LobbyId },
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Delivered,
    Unreachable,
}

/// Best-effort push channel to users
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Push an event to a user if they are currently reachable
    ///
    /// Must return within a bounded time.
    async fn send_to_user(&self, user_id: UserId, event: &LobbyEvent) -> Delivery;
}

/// Send the same event to several users concurrently
///
/// Returns how many deliveries succeeded.
pub async fn broadcast(port: &dyn NotificationPort, users: &[UserId], event: &LobbyEvent) -> usize {
    let results = join_all(users.iter().map(|user| port.send_to_user(*user, event))).await;
    let delivered = results
        .iter()
        .filter(|d| **d == Delivery::Delivered)
        .count();
    tracing::debug!(
        recipients = users.len(),
        delivered,
        event = ?event,
        "Broadcast event"
    );
    delivered
}

// ==================== Channel hub ====================

/// Notification port backed by one bounded channel per connected user
///
/// The transport layer calls [`ConnectionHub::connect`] when a user's
/// session opens and drains the returned receiver.
pub struct ConnectionHub {
    channels: RwLock<HashMap<UserId, mpsc::Sender<LobbyEvent>>>,
    capacity: usize,
    send_timeout: Duration,
}

impl ConnectionHub {
    /// Create a hub with per-user channel capacity and send timeout
    pub fn new(capacity: usize, send_timeout: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            send_timeout,
        }
    }

    /// Register a user, replacing any previous connection
    pub fn connect(&self, user_id: UserId) -> mpsc::Receiver<LobbyEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.channels.write().insert(user_id, tx);
        tracing::debug!(user_id = %user_id, "User connected");
        rx
    }

    /// Drop a user's channel; returns whether one existed
    pub fn disconnect(&self, user_id: UserId) -> bool {
        let removed = self.channels.write().remove(&user_id).is_some();
        if removed {
            tracing::debug!(user_id = %user_id, "User disconnected");
        }
        removed
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.channels
            .read()
            .get(&user_id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(64, Duration::from_secs(2))
    }
}

#[async_trait]
impl NotificationPort for ConnectionHub {
    async fn send_to_user(&self, user_id: UserId, event: &LobbyEvent) -> Delivery {
        // clone the sender so the map lock is not held across the send
        let sender = self.channels.read().get(&user_id).cloned();
        let Some(sender) = sender else {
            return Delivery::Unreachable;
        };

        match tokio::time::timeout(self.send_timeout, sender.send(event.clone())).await {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(_)) => {
                // receiver dropped
                let mut channels = self.channels.write();
                if channels.get(&user_id).map(|tx| tx.same_channel(&sender)) == Some(true) {
                    channels.remove(&user_id);
                }
                Delivery::Unreachable
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "Notification send timed out");
                Delivery::Unreachable
            }
        }
    }
}

// ==================== Recording Implementation ====================

/// Notification port that records every event for assertions
pub struct RecordingNotifier {
    events: Mutex<Vec<(UserId, LobbyEvent)>>,
    unreachable: Mutex<HashSet<UserId>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// Treat a user as offline; their events are not recorded
    pub fn with_unreachable(self, user_id: UserId) -> Self {
        self.unreachable.lock().insert(user_id);
        self
    }

    /// All delivered events in order
    pub fn events(&self) -> Vec<(UserId, LobbyEvent)> {
        self.events.lock().clone()
    }

    /// Delivered events for one user
    pub fn events_for(&self, user_id: UserId) -> Vec<LobbyEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn send_to_user(&self, user_id: UserId, event: &LobbyEvent) -> Delivery {
        if self.unreachable.lock().contains(&user_id) {
            return Delivery::Unreachable;
        }
        self.events.lock().push((user_id, event.clone()));
        Delivery::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let lobby_id = LobbyId::new();
        let event = LobbyEvent::LobbyFull {
            lobby_id,
            match_id: MatchId(7),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "lobby_full");
        assert_eq!(json["match_id"], 7);

        let closed = LobbyEvent::LobbyClosed {
            lobby_id,
            reason: CloseReason::DriverDisconnected,
        };
        let json = serde_json::to_value(&closed).unwrap();
        assert_eq!(json["type"], "lobby_closed");
        assert_eq!(json["reason"], "driver_disconnected");
    }

    #[tokio::test]
    async fn test_hub_delivers_to_connected_user() {
        let hub = ConnectionHub::new(4, Duration::from_millis(100));
        let mut rx = hub.connect(UserId(1));
        let event = LobbyEvent::ApprovalExpired {
            lobby_id: LobbyId::new(),
        };

        assert_eq!(hub.send_to_user(UserId(1), &event).await, Delivery::Delivered);
        assert_eq!(rx.recv().await, Some(event.clone()));
        assert_eq!(hub.send_to_user(UserId(2), &event).await, Delivery::Unreachable);
    }

    #[tokio::test]
    async fn test_hub_drops_closed_channel() {
        let hub = ConnectionHub::new(4, Duration::from_millis(100));
        let rx = hub.connect(UserId(1));
        drop(rx);

        let event = LobbyEvent::ApprovalExpired {
            lobby_id: LobbyId::new(),
        };
        assert_eq!(hub.send_to_user(UserId(1), &event).await, Delivery::Unreachable);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_hub_send_is_bounded_by_timeout() {
        let hub = ConnectionHub::new(1, Duration::from_millis(20));
        let _rx = hub.connect(UserId(1));
        let event = LobbyEvent::ApprovalExpired {
            lobby_id: LobbyId::new(),
        };

        assert_eq!(hub.send_to_user(UserId(1), &event).await, Delivery::Delivered);
        // channel is full and nobody drains it
        assert_eq!(hub.send_to_user(UserId(1), &event).await, Delivery::Unreachable);
        assert!(hub.is_connected(UserId(1)));
    }

    #[tokio::test]
    async fn test_broadcast_counts_deliveries() {
        let notifier = RecordingNotifier::new().with_unreachable(UserId(2));
        let event = LobbyEvent::ApprovalExpired {
            lobby_id: LobbyId::new(),
        };

        let delivered = broadcast(&notifier, &[UserId(1), UserId(2), UserId(3)], &event).await;

        assert_eq!(delivered, 2);
        assert_eq!(notifier.events_for(UserId(1)), vec![event]);
        assert!(notifier.events_for(UserId(2)).is_empty());
    }
}
