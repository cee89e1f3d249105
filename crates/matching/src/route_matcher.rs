//! Route matching
//!
//! Decides whether a passenger's pickup and drop-off fit a driver's planned
//! path. With an advisory route both points must lie within tolerance of the
//! path and the pickup must come strictly before the drop-off along it.
//! Without a route the matcher falls back to straight distances between the
//! passenger's and the driver's start and destination.

use common::Coordinate;
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::geo::{haversine_km, nearest_point};

/// What the candidate was matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    /// Nearest points on the driver's advisory route
    Route,
    /// Direct distance to the driver's start and destination
    Distance,
}

/// A successful route fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Eligibility {
    pub basis: MatchBasis,
    pub pickup_distance_km: f64,
    pub dropoff_distance_km: f64,
    /// Route vertex nearest to the pickup (route basis only)
    pub pickup_index: Option<usize>,
    /// Route vertex nearest to the drop-off (route basis only)
    pub dropoff_index: Option<usize>,
}

/// Why a candidate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    PickupTooFar { distance_km: f64 },
    DropoffTooFar { distance_km: f64 },
    /// Drop-off is not strictly after the pickup along the route
    BackwardTravel {
        pickup_index: usize,
        dropoff_index: usize,
    },
}

/// The driver side of a fit check
#[derive(Debug, Clone, Copy)]
pub struct DriverPath<'a> {
    pub start: Coordinate,
    pub destination: Coordinate,
    pub route: Option<&'a [Coordinate]>,
}

/// Stateless route fit evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteMatcher;

impl RouteMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check a pickup/drop-off pair against a driver path
    pub fn evaluate(
        &self,
        driver: &DriverPath<'_>,
        pickup: Coordinate,
        dropoff: Coordinate,
        max_distance_km: f64,
    ) -> Result<Eligibility, Rejection> {
        match driver.route {
            Some(route) if !route.is_empty() => {
                Self::evaluate_on_route(route, pickup, dropoff, max_distance_km)
            }
            _ => Self::evaluate_by_distance(driver, pickup, dropoff, max_distance_km),
        }
    }

    fn evaluate_on_route(
        route: &[Coordinate],
        pickup: Coordinate,
        dropoff: Coordinate,
        max_distance_km: f64,
    ) -> Result<Eligibility, Rejection> {
        // route is non-empty so both lookups succeed
        let (Some(near_pickup), Some(near_dropoff)) =
            (nearest_point(route, pickup), nearest_point(route, dropoff))
        else {
            return Err(Rejection::PickupTooFar {
                distance_km: f64::INFINITY,
            });
        };

        if near_pickup.distance_km > max_distance_km {
            return Err(Rejection::PickupTooFar {
                distance_km: near_pickup.distance_km,
            });
        }
        if near_dropoff.distance_km > max_distance_km {
            return Err(Rejection::DropoffTooFar {
                distance_km: near_dropoff.distance_km,
            });
        }
        if near_pickup.index >= near_dropoff.index {
            return Err(Rejection::BackwardTravel {
                pickup_index: near_pickup.index,
                dropoff_index: near_dropoff.index,
            });
        }

        Ok(Eligibility {
            basis: MatchBasis::Route,
            pickup_distance_km: near_pickup.distance_km,
            dropoff_distance_km: near_dropoff.distance_km,
            pickup_index: Some(near_pickup.index),
            dropoff_index: Some(near_dropoff.index),
        })
    }

    fn evaluate_by_distance(
        driver: &DriverPath<'_>,
        pickup: Coordinate,
        dropoff: Coordinate,
        max_distance_km: f64,
    ) -> Result<Eligibility, Rejection> {
        let pickup_distance_km = haversine_km(pickup, driver.start);
        if pickup_distance_km > max_distance_km {
            return Err(Rejection::PickupTooFar {
                distance_km: pickup_distance_km,
            });
        }
        let dropoff_distance_km = haversine_km(dropoff, driver.destination);
        if dropoff_distance_km > max_distance_km {
            return Err(Rejection::DropoffTooFar {
                distance_km: dropoff_distance_km,
            });
        }

        Ok(Eligibility {
            basis: MatchBasis::Distance,
            pickup_distance_km,
            dropoff_distance_km,
            pickup_index: None,
            dropoff_index: None,
        })
    }
}

/// Order eligible candidates for selection
///
/// If any candidate matched on a route, distance-only candidates are
/// dropped. The rest are sorted by pickup distance ascending; `tiebreak`
/// orders candidates at equal distance.
pub fn rank<T, K: Ord>(
    mut candidates: Vec<(T, Eligibility)>,
    tiebreak: impl Fn(&T) -> K,
) -> Vec<(T, Eligibility)> {
    if candidates
        .iter()
        .any(|(_, e)| e.basis == MatchBasis::Route)
    {
        candidates.retain(|(_, e)| e.basis == MatchBasis::Route);
    }
    candidates.sort_by(|(a, ea), (b, eb)| {
        OrderedFloat(ea.pickup_distance_km)
            .cmp(&OrderedFloat(eb.pickup_distance_km))
            .then_with(|| tiebreak(a).cmp(&tiebreak(b)))
    });
    candidates
}
