//! Geographic utilities: great-circle distance, bearings and bounds.

use geo::{BoundingRect, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[inline]
pub fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

#[inline]
pub fn to_degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

/// Great-circle distance between two coordinates in meters (Haversine).
///
/// # Example
/// ```
/// use safe_route_nav::{haversine_distance, Coordinate};
///
/// let a = Coordinate::new(12.90, 77.50);
/// let b = Coordinate::new(12.91, 77.50);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 1112.0).abs() < 1.0);
/// ```
#[inline]
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = to_radians(a.latitude);
    let phi2 = to_radians(b.latitude);
    let d_phi = to_radians(b.latitude - a.latitude);
    let d_lambda = to_radians(b.longitude - a.longitude);

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[Coordinate]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Initial bearing from `a` to `b` in degrees, normalized to [0, 360).
pub fn initial_bearing(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = to_radians(a.latitude);
    let phi2 = to_radians(b.latitude);
    let d_lambda = to_radians(b.longitude - a.longitude);

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    (to_degrees(y.atan2(x)) + 360.0) % 360.0
}

/// Signed change of heading from `bearing_in` to `bearing_out`, in (-180, 180].
/// Positive values turn right.
pub fn bearing_change(bearing_in: f64, bearing_out: f64) -> f64 {
    let mut delta = (bearing_out - bearing_in) % 360.0;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

/// Bounding box of a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

/// Compute the bounding box of a polyline. `None` for an empty slice.
pub fn compute_bounds(points: &[Coordinate]) -> Option<Bounds> {
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    line.bounding_rect().map(|rect| Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_and_symmetric() {
        let a = Coordinate::new(12.90, 77.50);
        let b = Coordinate::new(12.92, 77.52);
        assert_eq!(haversine_distance(&a, &a), 0.0);
        assert_eq!(haversine_distance(&a, &b), haversine_distance(&b, &a));
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris is ~343.5 km on a 6371 km sphere
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let d = haversine_distance(&london, &paris);
        assert!((d - 343_500.0).abs() < 1_000.0, "got {}", d);
    }

    #[test]
    fn test_radian_roundtrip() {
        assert!((to_radians(180.0) - std::f64::consts::PI).abs() < 1e-12);
        assert!((to_degrees(to_radians(37.5)) - 37.5).abs() < 1e-12);
    }

    #[test]
    fn test_bearing_cardinal() {
        let origin = Coordinate::new(0.0, 0.0);
        let north = initial_bearing(&origin, &Coordinate::new(1.0, 0.0));
        let east = initial_bearing(&origin, &Coordinate::new(0.0, 1.0));
        assert!(north.abs() < 1e-9);
        assert!((east - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_change_wraps() {
        assert_eq!(bearing_change(350.0, 10.0), 20.0);
        assert_eq!(bearing_change(10.0, 350.0), -20.0);
        assert_eq!(bearing_change(0.0, 90.0), 90.0);
    }

    #[test]
    fn test_bounds() {
        let points = vec![
            Coordinate::new(12.90, 77.50),
            Coordinate::new(12.92, 77.48),
            Coordinate::new(12.91, 77.52),
        ];
        let bounds = compute_bounds(&points).unwrap();
        assert_eq!(bounds.min_lat, 12.90);
        assert_eq!(bounds.max_lat, 12.92);
        assert_eq!(bounds.min_lng, 77.48);
        assert_eq!(bounds.max_lng, 77.52);
        assert!(bounds.contains(&bounds.center()));
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_polyline_length() {
        let points = vec![
            Coordinate::new(12.90, 77.50),
            Coordinate::new(12.91, 77.50),
            Coordinate::new(12.92, 77.50),
        ];
        let total = polyline_length(&points);
        let direct = haversine_distance(&points[0], &points[2]);
        assert!((total - direct).abs() < 0.01);
        assert_eq!(polyline_length(&points[..1]), 0.0);
    }
}
