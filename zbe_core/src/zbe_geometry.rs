//! The "GEOMETRY" Kernel - Stateless Predicates over WGS84 Points and Rings
//!
//! Everything here is a pure function of its inputs:
//! - Great-circle distance (haversine, R = 6 371 000 m)
//! - Even-odd ray casting for containment
//! - Nearest-edge distance with flat lat/lng projection
//! - Flat vertex-average centroid
//!
//! The projection and centroid math treat degrees as a flat plane. This is
//! accurate enough for city-sized zones and is kept that way on purpose.

use h3o::{CellIndex, LatLng, Resolution};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every distance in the engine (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// H3 cell containing this point at the given resolution.
    ///
    /// Returns `None` for coordinates H3 rejects (NaN, infinities).
    pub fn to_cell(&self, resolution: Resolution) -> Option<CellIndex> {
        LatLng::new(self.lat, self.lng)
            .ok()
            .map(|ll| ll.to_cell(resolution))
    }
}

impl From<Point> for geo::Coord<f64> {
    fn from(p: Point) -> Self {
        geo::Coord { x: p.lng, y: p.lat }
    }
}

impl From<geo::Coord<f64>> for Point {
    fn from(c: geo::Coord<f64>) -> Self {
        Point::new(c.y, c.x)
    }
}

impl From<&zbe_env::Position> for Point {
    fn from(pos: &zbe_env::Position) -> Self {
        Point::new(pos.lat, pos.lng)
    }
}

/// Great-circle distance between two points in meters.
pub fn haversine_meters(a: Point, b: Point) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Even-odd ray casting test.
///
/// Casts a horizontal ray from `point` and counts edge crossings. A point
/// lying exactly on an edge or vertex may be reported either way.
pub fn contains_point(point: Point, ring: &[Point]) -> bool {
    let n = ring.len();
    if n == 0 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = ring[i];
        let pj = ring[j];

        // Horizontal edges never satisfy the straddle test, so the division is safe
        if (pi.lat > point.lat) != (pj.lat > point.lat) {
            let crossing_lng = (pj.lng - pi.lng) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng;
            if point.lng < crossing_lng {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// Distance from `point` to the segment `start`-`end` in meters.
///
/// The projection parameter is computed in flat lat/lng space and clamped
/// to [0, 1]; the final distance is haversine to the clamped projection.
pub fn distance_to_segment(point: Point, start: Point, end: Point) -> f64 {
    let p = Vector2::new(point.lat, point.lng);
    let a = Vector2::new(start.lat, start.lng);
    let b = Vector2::new(end.lat, end.lng);

    let seg = b - a;
    let len_sq = seg.norm_squared();
    if len_sq == 0.0 {
        return haversine_meters(point, start);
    }

    let t = ((p - a).dot(&seg) / len_sq).clamp(0.0, 1.0);
    let closest = a + seg * t;

    haversine_meters(point, Point::new(closest.x, closest.y))
}

/// Minimum distance from `point` to any consecutive edge of `ring`.
///
/// The closing edge is only considered when the ring is already closed.
/// Rings with fewer than two points have no edges and yield `+inf`.
pub fn distance_to_boundary(point: Point, ring: &[Point]) -> f64 {
    ring.windows(2)
        .map(|edge| distance_to_segment(point, edge[0], edge[1]))
        .fold(f64::INFINITY, f64::min)
}

/// Flat arithmetic mean of the ring's vertices.
///
/// Not area-weighted; a closed ring counts its first vertex twice.
pub fn centroid(ring: &[Point]) -> Option<Point> {
    if ring.is_empty() {
        return None;
    }

    let (lat_sum, lng_sum) = ring
        .iter()
        .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
    let n = ring.len() as f64;

    Some(Point::new(lat_sum / n, lng_sum / n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(40.00, -3.00),
            Point::new(40.00, -3.01),
            Point::new(40.01, -3.01),
            Point::new(40.01, -3.00),
            Point::new(40.00, -3.00),
        ]
    }

    fn rectangle(lat0: f64, lng0: f64, d_lat: f64, d_lng: f64) -> Vec<Point> {
        vec![
            Point::new(lat0, lng0),
            Point::new(lat0, lng0 + d_lng),
            Point::new(lat0 + d_lat, lng0 + d_lng),
            Point::new(lat0 + d_lat, lng0),
            Point::new(lat0, lng0),
        ]
    }

    #[test]
    fn test_haversine_madrid_latitude_delta() {
        let sol = Point::new(40.4168, -3.7038);
        let north = Point::new(40.4200, -3.7038);

        // 0.0032 degrees of latitude
        assert_relative_eq!(haversine_meters(sol, north), 355.8, epsilon = 1.0);
    }

    #[test]
    fn test_square_scenario() {
        let ring = square();
        let user = Point::new(40.005, -3.005);

        assert!(contains_point(user, &ring));

        // Nearest edges are the meridians 0.005 deg of longitude away
        let d = distance_to_boundary(user, &ring);
        assert_relative_eq!(d, 425.9, epsilon = 1.0);
    }

    #[test]
    fn test_point_outside_square() {
        let ring = square();
        assert!(!contains_point(Point::new(40.02, -3.005), &ring));
        assert!(!contains_point(Point::new(40.005, -2.99), &ring));

        // 0.01 deg of latitude north of the top edge
        let d = distance_to_boundary(Point::new(40.02, -3.005), &ring);
        assert_relative_eq!(d, 1111.9, epsilon = 1.0);
    }

    #[test]
    fn test_degenerate_rings() {
        let p = Point::new(40.0, -3.0);

        assert!(distance_to_boundary(p, &[]).is_infinite());
        assert!(distance_to_boundary(p, &[Point::new(41.0, -3.0)]).is_infinite());
        assert!(!contains_point(p, &[]));
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn test_zero_length_segment_measures_to_start() {
        let p = Point::new(40.4168, -3.7038);
        let a = Point::new(40.4200, -3.7038);

        assert_relative_eq!(
            distance_to_segment(p, a, a),
            haversine_meters(p, a),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_segment_projection_clamps_to_endpoints() {
        let start = Point::new(40.0, -3.0);
        let end = Point::new(40.0, -3.01);

        // Beyond `end` along the segment's direction
        let beyond = Point::new(40.0, -3.02);
        assert_relative_eq!(
            distance_to_segment(beyond, start, end),
            haversine_meters(beyond, end),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_unclosed_ring_skips_closing_edge() {
        let open: Vec<Point> = square().into_iter().take(4).collect();
        // Just south of the missing closing edge (40.01,-3.00)->(40.00,-3.00)
        let p = Point::new(40.005, -2.9999);

        assert!(distance_to_boundary(p, &open) > distance_to_boundary(p, &square()));
    }

    #[test]
    fn test_expanded_ring_is_farther_from_interior_point() {
        let inner = square();
        let outer = rectangle(39.999, -3.011, 0.012, 0.012);
        let user = Point::new(40.005, -3.005);

        assert!(distance_to_boundary(user, &inner) <= distance_to_boundary(user, &outer));
    }

    #[test]
    fn test_centroid_is_flat_average() {
        let c = centroid(&square()).unwrap();
        // First vertex counted twice
        assert_relative_eq!(c.lat, 40.004, epsilon = 1e-12);
        assert_relative_eq!(c.lng, -3.004, epsilon = 1e-12);
    }

    #[test]
    fn test_h3_cell_rejects_nan() {
        assert!(Point::new(f64::NAN, 0.0).to_cell(Resolution::Twelve).is_none());
        assert!(Point::new(40.4168, -3.7038).to_cell(Resolution::Twelve).is_some());
    }

    #[test]
    fn test_agrees_with_geo_for_interior_points() {
        use geo::Contains;

        let ring = square();
        let polygon = geo::Polygon::new(
            geo::LineString::from(ring.iter().copied().map(geo::Coord::from).collect::<Vec<_>>()),
            vec![],
        );

        for p in [Point::new(40.005, -3.005), Point::new(40.009, -3.001), Point::new(40.02, -3.0)] {
            let geo_point = geo::Point::from(geo::Coord::from(p));
            assert_eq!(contains_point(p, &ring), polygon.contains(&geo_point));
        }
    }

    proptest! {
        #[test]
        fn prop_haversine_self_distance_is_zero(lat in -89.0f64..89.0, lng in -179.0f64..179.0) {
            let p = Point::new(lat, lng);
            prop_assert_eq!(haversine_meters(p, p), 0.0);
        }

        #[test]
        fn prop_haversine_is_symmetric(
            lat1 in -89.0f64..89.0, lng1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lng2 in -179.0f64..179.0,
        ) {
            let a = Point::new(lat1, lng1);
            let b = Point::new(lat2, lng2);
            let ab = haversine_meters(a, b);
            prop_assert!(ab >= 0.0);
            prop_assert!((ab - haversine_meters(b, a)).abs() < 1e-6);
        }

        #[test]
        fn prop_convex_centroid_is_inside(
            lat0 in -60.0f64..60.0, lng0 in -170.0f64..170.0,
            d_lat in 0.001f64..1.0, d_lng in 0.001f64..1.0,
        ) {
            let ring = rectangle(lat0, lng0, d_lat, d_lng);
            let c = centroid(&ring).unwrap();
            prop_assert!(contains_point(c, &ring));
        }
    }
}
