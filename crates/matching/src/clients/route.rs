//! Route provider - trait and implementations

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::Coordinate;
use parking_lot::Mutex;
use thiserror::Error;

use crate::geo::{densify, haversine_km};

/// Errors raised by a [`RouteProvider`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("route service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid route request: {0}")]
    InvalidRequest(String),
}

/// Visiting order and drivable geometry for a set of stops
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Indices into the stop list, starting at the start stop and ending at the end stop
    pub visit_order: Vec<usize>,
    /// Polyline following the visiting order
    pub geometry: Vec<Coordinate>,
}

/// Client trait for route computation - protocol agnostic
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Order the stops and compute a routable polyline
    ///
    /// `pairs` holds `(pickup, dropoff)` index pairs; every pickup must be
    /// visited before its drop-off. The plan starts at `start` and ends at
    /// `end`.
    async fn compute_visit_order_and_geometry(
        &self,
        stops: &[Coordinate],
        pairs: &[(usize, usize)],
        start: usize,
        end: usize,
    ) -> Result<RoutePlan, RouteError>;
}

/// Greedy nearest-neighbour visiting order honouring pickup/drop-off pairs
///
/// From the current stop, move to the closest stop whose pickup (if it is a
/// drop-off) was already visited. Ties go to the lower index.
pub fn plan_visit_order(
    stops: &[Coordinate],
    pairs: &[(usize, usize)],
    start: usize,
    end: usize,
) -> Result<Vec<usize>, RouteError> {
    let n = stops.len();
    if n == 0 {
        return Err(RouteError::InvalidRequest("no stops".to_string()));
    }
    if start >= n || end >= n {
        return Err(RouteError::InvalidRequest(format!(
            "start {} / end {} out of range for {} stops",
            start, end, n
        )));
    }
    if n == 1 {
        return Ok(vec![start]);
    }
    if start == end {
        return Err(RouteError::InvalidRequest(
            "start and end must differ".to_string(),
        ));
    }

    let mut pickup_of: Vec<Option<usize>> = vec![None; n];
    for &(pickup, dropoff) in pairs {
        if pickup >= n || dropoff >= n || pickup == dropoff {
            return Err(RouteError::InvalidRequest(format!(
                "invalid pair ({}, {})",
                pickup, dropoff
            )));
        }
        if pickup == start || pickup == end || dropoff == start || dropoff == end {
            return Err(RouteError::InvalidRequest(format!(
                "pair ({}, {}) overlaps the start or end stop",
                pickup, dropoff
            )));
        }
        pickup_of[dropoff] = Some(pickup);
    }

    let mut visited = vec![false; n];
    visited[start] = true;
    let mut order = Vec::with_capacity(n);
    order.push(start);
    let mut current = start;

    for _ in 0..n.saturating_sub(2) {
        let next = (0..n)
            .filter(|&i| i != end && !visited[i])
            .filter(|&i| pickup_of[i].map(|p| visited[p]).unwrap_or(true))
            .map(|i| (i, haversine_km(stops[current], stops[i])))
            .fold(None::<(usize, f64)>, |best, (i, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            });

        match next {
            Some((i, _)) => {
                visited[i] = true;
                order.push(i);
                current = i;
            }
            None => {
                return Err(RouteError::InvalidRequest(
                    "pairing constraints cannot be satisfied".to_string(),
                ))
            }
        }
    }

    order.push(end);
    Ok(order)
}

fn ordered_stops(stops: &[Coordinate], order: &[usize]) -> Vec<Coordinate> {
    order.iter().map(|&i| stops[i]).collect()
}

// ==================== Straight-line Implementation ====================

/// In-process provider: greedy order, great-circle geometry
pub struct StraightLineRouteProvider {
    densify_step_km: f64,
}

impl StraightLineRouteProvider {
    /// Create a provider that inserts a vertex every `densify_step_km`
    pub fn new(densify_step_km: f64) -> Self {
        Self { densify_step_km }
    }
}

impl Default for StraightLineRouteProvider {
    fn default() -> Self {
        Self::new(0.25)
    }
}

#[async_trait]
impl RouteProvider for StraightLineRouteProvider {
    async fn compute_visit_order_and_geometry(
        &self,
        stops: &[Coordinate],
        pairs: &[(usize, usize)],
        start: usize,
        end: usize,
    ) -> Result<RoutePlan, RouteError> {
        let visit_order = plan_visit_order(stops, pairs, start, end)?;
        let geometry = densify(&ordered_stops(stops, &visit_order), self.densify_step_km);

        tracing::debug!(
            stops = stops.len(),
            vertices = geometry.len(),
            "Straight-line route computed"
        );

        Ok(RoutePlan {
            visit_order,
            geometry,
        })
    }
}

// ==================== Mock Implementation ====================

/// Mock route provider for testing
///
/// Returns the ordered stops as geometry and records every request.
pub struct MockRouteProvider {
    unavailable: AtomicBool,
    requests: Mutex<Vec<Vec<Coordinate>>>,
}

impl MockRouteProvider {
    /// Create a new mock route provider
    pub fn new() -> Self {
        Self {
            unavailable: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Configure the provider to fail every request
    pub fn with_unavailable(self) -> Self {
        self.set_unavailable(true);
        self
    }

    /// Toggle availability at runtime
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stop lists of every request received
    pub fn requests(&self) -> Vec<Vec<Coordinate>> {
        self.requests.lock().clone()
    }
}

impl Default for MockRouteProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteProvider for MockRouteProvider {
    async fn compute_visit_order_and_geometry(
        &self,
        stops: &[Coordinate],
        pairs: &[(usize, usize)],
        start: usize,
        end: usize,
    ) -> Result<RoutePlan, RouteError> {
        self.requests.lock().push(stops.to_vec());

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RouteError::Unavailable("mock provider offline".to_string()));
        }

        let visit_order = plan_visit_order(stops, pairs, start, end)?;
        let geometry = ordered_stops(stops, &visit_order);
        Ok(RoutePlan {
            visit_order,
            geometry,
        })
    }
}

// ==================== OSRM Implementation ====================

#[cfg(feature = "client")]
pub mod osrm {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::Coordinate;
    use reqwest::Client;
    use serde::Deserialize;

    use super::{ordered_stops, plan_visit_order, RouteError, RoutePlan, RouteProvider};

    #[derive(Deserialize)]
    struct OsrmResponse {
        code: String,
        #[serde(default)]
        routes: Vec<OsrmRoute>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        geometry: OsrmGeometry,
    }

    #[derive(Deserialize)]
    struct OsrmGeometry {
        /// `[lng, lat]` pairs
        coordinates: Vec<(f64, f64)>,
    }

    /// Provider backed by an OSRM `route/v1/driving` endpoint
    ///
    /// The visiting order is solved locally; OSRM supplies the road geometry.
    pub struct OsrmRouteProvider {
        client: Client,
        base_url: String,
    }

    impl OsrmRouteProvider {
        /// Create a new OSRM provider with a request timeout
        pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RouteError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| RouteError::Unavailable(e.to_string()))?;

            Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
            })
        }
    }

    #[async_trait]
    impl RouteProvider for OsrmRouteProvider {
        async fn compute_visit_order_and_geometry(
            &self,
            stops: &[Coordinate],
            pairs: &[(usize, usize)],
            start: usize,
            end: usize,
        ) -> Result<RoutePlan, RouteError> {
            let visit_order = plan_visit_order(stops, pairs, start, end)?;
            let waypoints = ordered_stops(stops, &visit_order)
                .iter()
                .map(|c| format!("{},{}", c.lng, c.lat))
                .collect::<Vec<_>>()
                .join(";");

            let url = format!(
                "{}/route/v1/driving/{}?overview=full&geometries=geojson",
                self.base_url, waypoints
            );

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| RouteError::Unavailable(e.to_string()))?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(RouteError::Unavailable(error_text));
            }

            let body: OsrmResponse = response
                .json()
                .await
                .map_err(|e| RouteError::Unavailable(e.to_string()))?;

            if body.code != "Ok" {
                return Err(RouteError::Unavailable(format!("OSRM returned {}", body.code)));
            }

            let geometry = body
                .routes
                .into_iter()
                .next()
                .map(|route| {
                    route
                        .geometry
                        .coordinates
                        .into_iter()
                        .map(|(lng, lat)| Coordinate::new(lat, lng))
                        .collect::<Vec<_>>()
                })
                .filter(|g| !g.is_empty())
                .ok_or_else(|| RouteError::Unavailable("OSRM returned no route".to_string()))?;

            Ok(RoutePlan {
                visit_order,
                geometry,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn stops() -> Vec<Coordinate> {
        vec![
            Coordinate::new(35.681, 139.767), // driver start
            Coordinate::new(35.684, 139.774), // pickup A
            Coordinate::new(35.690, 139.700), // dropoff A
            Coordinate::new(35.683, 139.750), // pickup B
            Coordinate::new(35.686, 139.720), // dropoff B
            Coordinate::new(35.689, 139.691), // driver destination
        ]
    }

    #[test]
    fn test_visit_order_respects_pairs() {
        let pairs = [(1, 2), (3, 4)];
        let order = plan_visit_order(&stops(), &pairs, 0, 5).unwrap();

        assert_eq!(order.first(), Some(&0));
        assert_eq!(order.last(), Some(&5));
        assert_eq!(order.len(), 6);
        for (pickup, dropoff) in pairs {
            let p = order.iter().position(|&i| i == pickup).unwrap();
            let d = order.iter().position(|&i| i == dropoff).unwrap();
            assert!(p < d);
        }
    }

    #[test]
    fn test_visit_order_holds_dropoff_until_pickup() {
        // the drop-off is nearest to the start but its pickup is far away
        let stops = vec![
            Coordinate::new(35.0, 139.0),
            Coordinate::new(35.2, 139.0),
            Coordinate::new(35.01, 139.0),
            Coordinate::new(35.3, 139.0),
        ];
        let order = plan_visit_order(&stops, &[(1, 2)], 0, 3).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_visit_order_rejects_bad_requests() {
        assert_matches!(
            plan_visit_order(&[], &[], 0, 0),
            Err(RouteError::InvalidRequest(_))
        );
        assert_matches!(
            plan_visit_order(&stops(), &[(1, 9)], 0, 5),
            Err(RouteError::InvalidRequest(_))
        );
        assert_matches!(
            plan_visit_order(&stops(), &[], 0, 0),
            Err(RouteError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn test_straight_line_geometry_is_dense() {
        let provider = StraightLineRouteProvider::new(0.5);
        let plan = provider
            .compute_visit_order_and_geometry(&stops(), &[(1, 2), (3, 4)], 0, 5)
            .await
            .unwrap();

        assert_eq!(plan.geometry.first(), Some(&stops()[0]));
        assert!(plan.geometry.len() > stops().len());
        for pair in plan.geometry.windows(2) {
            assert!(haversine_km(pair[0], pair[1]) <= 0.5 + 1e-6);
        }
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let provider = MockRouteProvider::new().with_unavailable();
        let result = provider
            .compute_visit_order_and_geometry(&stops(), &[], 0, 5)
            .await;
        assert_matches!(result, Err(RouteError::Unavailable(_)));
        assert_eq!(provider.requests().len(), 1);

        provider.set_unavailable(false);
        let plan = provider
            .compute_visit_order_and_geometry(&stops(), &[], 0, 5)
            .await
            .unwrap();
        assert_eq!(plan.geometry.len(), 6);
    }
}
