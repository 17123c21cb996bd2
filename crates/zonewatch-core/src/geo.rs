//! Spherical geometry helpers: great-circle distance, ray-casting
//! containment, and the direct geodesic problem.
//!
//! Earth is modelled as a sphere of radius 6,371 km.

use crate::types::LatLng;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two points in meters (haversine formula).
///
/// Symmetric in its arguments and zero for coincident points.
pub fn haversine_distance_m(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let sin_d_lat = (d_lat / 2.0).sin();
    let sin_d_lng = (d_lng / 2.0).sin();

    let h = sin_d_lat * sin_d_lat + lat1.cos() * lat2.cos() * sin_d_lng * sin_d_lng;

    // Rounding can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Even-odd ray-casting test.
///
/// `ring` is implicitly closed (the last vertex connects back to the first).
/// Rings with fewer than three vertices contain nothing. Points exactly on an
/// edge may land on either side, but the answer is deterministic for identical
/// input and does not depend on which vertex the ring starts at.
pub fn point_in_polygon(point: LatLng, ring: &[LatLng]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let (x, y) = (point.lat, point.lng);
    let mut inside = false;
    let mut j = ring.len() - 1;

    for i in 0..ring.len() {
        let (xi, yi) = (ring[i].lat, ring[i].lng);
        let (xj, yj) = (ring[j].lat, ring[j].lng);

        // (yi > y) != (yj > y) implies yi != yj, so the division is safe.
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// Normalize a bearing into `[0, 360)`.
pub fn normalize_bearing(bearing_deg: f64) -> f64 {
    bearing_deg.rem_euclid(360.0)
}

/// Normalize a longitude into `[-180, 180)`.
fn normalize_lng(lng_deg: f64) -> f64 {
    (lng_deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Point reached by travelling `distance_km` from `(lat, lng)` along the
/// initial bearing `bearing_deg` (0 = north, clockwise).
pub fn destination_point(lat: f64, lng: f64, bearing_deg: f64, distance_km: f64) -> LatLng {
    let lat_rad = lat.to_radians();
    let lng_rad = lng.to_radians();
    let bearing_rad = normalize_bearing(bearing_deg).to_radians();
    let angular = distance_km / EARTH_RADIUS_KM;

    let new_lat_rad = (lat_rad.sin() * angular.cos()
        + lat_rad.cos() * angular.sin() * bearing_rad.cos())
    .clamp(-1.0, 1.0)
    .asin();

    let new_lng_rad = lng_rad
        + (bearing_rad.sin() * angular.sin() * lat_rad.cos())
            .atan2(angular.cos() - lat_rad.sin() * new_lat_rad.sin());

    LatLng::new(new_lat_rad.to_degrees(), normalize_lng(new_lng_rad.to_degrees()))
}

// ─── Tests ────────────────────────────────────────────────────────
