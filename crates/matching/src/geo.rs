//! Great-circle geometry helpers
//!
//! Pure functions over [`Coordinate`]s. Distances are in kilometres.

use common::Coordinate;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates in kilometres
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Closest vertex of a path to a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    /// Index of the vertex in the path
    pub index: usize,
    /// Distance from the point to that vertex in kilometres
    pub distance_km: f64,
}

/// Find the path vertex closest to `point`
///
/// Linear scan; on ties the first minimal index wins. Returns `None` for an
/// empty path.
pub fn nearest_point(path: &[Coordinate], point: Coordinate) -> Option<NearestPoint> {
    let mut best: Option<NearestPoint> = None;
    for (index, vertex) in path.iter().enumerate() {
        let distance_km = haversine_km(*vertex, point);
        match best {
            Some(current) if current.distance_km <= distance_km => {}
            _ => best = Some(NearestPoint { index, distance_km }),
        }
    }
    best
}

/// Points along the great circle from `a` to `b`, excluding `a`, including `b`
///
/// The segment is split so that consecutive points are at most `step_km`
/// apart. A non-positive step yields just `b`.
pub fn interpolate(a: Coordinate, b: Coordinate, step_km: f64) -> Vec<Coordinate> {
    let total = haversine_km(a, b);
    if step_km <= 0.0 || total <= step_km {
        return vec![b];
    }
    let segments = (total / step_km).ceil() as usize;
    (1..=segments)
        .map(|i| slerp(a, b, i as f64 / segments as f64))
        .collect()
}

/// Densify a polyline so no two consecutive vertices are more than `step_km` apart
pub fn densify(points: &[Coordinate], step_km: f64) -> Vec<Coordinate> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let mut out = vec![*first];
    for pair in points.windows(2) {
        out.extend(interpolate(pair[0], pair[1], step_km));
    }
    out
}

/// Spherical linear interpolation between two coordinates
fn slerp(a: Coordinate, b: Coordinate, fraction: f64) -> Coordinate {
    let va = to_vec(a);
    let vb = to_vec(b);
    let dot = (va[0] * vb[0] + va[1] * vb[1] + va[2] * vb[2]).clamp(-1.0, 1.0);
    let theta = dot.acos();
    if theta.abs() < 1e-12 {
        return a;
    }
    let sin_theta = theta.sin();
    let w1 = ((1.0 - fraction) * theta).sin() / sin_theta;
    let w2 = (fraction * theta).sin() / sin_theta;
    from_vec([
        va[0] * w1 + vb[0] * w2,
        va[1] * w1 + vb[1] * w2,
        va[2] * w1 + vb[2] * w2,
    ])
}

fn to_vec(c: Coordinate) -> [f64; 3] {
    let (lat, lng) = (c.lat.to_radians(), c.lng.to_radians());
    [lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin()]
}

fn from_vec(v: [f64; 3]) -> Coordinate {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    let (x, y, z) = (v[0] / norm, v[1] / norm, v[2] / norm);
    Coordinate::new(z.asin().to_degrees(), y.atan2(x).to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKYO: Coordinate = Coordinate::new(35.681, 139.767);
    const SHINJUKU: Coordinate = Coordinate::new(35.689, 139.691);

    #[test]
    fn test_haversine_known_distance() {
        let d = haversine_km(TOKYO, SHINJUKU);
        // roughly 6.9 km between Tokyo station and Shinjuku
        assert!((d - 6.9).abs() < 0.3, "got {}", d);
        assert_eq!(haversine_km(TOKYO, TOKYO), 0.0);
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = haversine_km(TOKYO, SHINJUKU);
        let b = haversine_km(SHINJUKU, TOKYO);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_point_prefers_first_on_tie() {
        let path = vec![SHINJUKU, TOKYO, TOKYO];
        let nearest = nearest_point(&path, TOKYO).unwrap();
        assert_eq!(nearest.index, 1);
        assert_eq!(nearest.distance_km, 0.0);
        assert!(nearest_point(&[], TOKYO).is_none());
    }

    #[test]
    fn test_densify_respects_step() {
        let path = densify(&[TOKYO, SHINJUKU], 0.5);
        assert_eq!(path.first(), Some(&TOKYO));
        let last = path.last().unwrap();
        assert!(haversine_km(*last, SHINJUKU) < 1e-6);
        assert!(path.len() >= 14);
        for pair in path.windows(2) {
            assert!(haversine_km(pair[0], pair[1]) <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_interpolate_short_segment() {
        let near = Coordinate::new(35.6811, 139.7671);
        assert_eq!(interpolate(TOKYO, near, 1.0), vec![near]);
        assert_eq!(interpolate(TOKYO, SHINJUKU, 0.0), vec![SHINJUKU]);
    }
}
