//! Ride-pooling matching core for RidePool
//!
//! One driver and up to `max_passengers` passengers negotiate a shared trip
//! in a lobby. This crate holds the lobby state machine, route-constrained
//! candidate matching, the approval protocol and the completion and
//! evaluation workflow.
//!
//! # Features
//!
//! - Lobby creation, joining, cancellation and closing
//! - Route matching with pickup-before-drop-off ordering
//! - Multi-party approval and resumable match finalization
//! - Ride completion reports, peer ratings and archival
//! - Approval expiry sweeps
//!
//! # Feature Flags
//!
//! - `client` - Enable the OSRM route provider

pub mod clients;
pub mod completion;
pub mod error;
pub mod expiry;
pub mod geo;
pub mod lobby;
pub mod metrics;
pub mod registry;
pub mod route_matcher;
pub mod selection;
pub mod settings;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{ErrorKind, MatchingError, Result};
pub use expiry::spawn_approval_reaper;
pub use lobby::Lobby;
pub use registry::LobbyRegistry;
pub use route_matcher::{MatchBasis, RouteMatcher};
pub use selection::{FirstRanked, RandomTopK, SelectionStrategy};
pub use settings::MatchingSettings;
pub use types::*;

// Store exports
pub use store::memory::{InMemoryMatchStore, StoreOp};
pub use store::traits::{MatchStore, StoreError};

// Client exports
pub use clients::notify::{
    CloseReason, ConnectionHub, Delivery, LobbyEvent, NotificationPort, RecordingNotifier,
};
pub use clients::route::{
    MockRouteProvider, RouteError, RoutePlan, RouteProvider, StraightLineRouteProvider,
};

#[cfg(feature = "client")]
pub use clients::route::osrm::OsrmRouteProvider;
