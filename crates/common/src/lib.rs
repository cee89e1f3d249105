//! Common types for RidePool
//!
//! This crate provides the shared primitive types used across
//! all RidePool crates.
//!
//! # Modules
//!
//! - [`types`] - Identifiers and coordinates (UserId, LobbyId, MatchId, Coordinate)

pub mod types;

pub use types::*;
