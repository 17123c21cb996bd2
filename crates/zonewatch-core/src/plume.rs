//! Wind-driven gas plume zones.
//!
//! A gas source gets two areas per cycle:
//!
//! - **Danger**: a circle around the source, radius `100 + 0.5 * 500 / v` meters
//!   where `v` is the wind speed floored at 1 m/s. Faster wind disperses gas
//!   faster, so the radius shrinks toward 100 m.
//! - **Alert**: a plume polygon downwind: the source, a left ray at
//!   `direction - 15°` for 8.8 km, the center ray at `direction` for 8 km,
//!   and a right ray at `direction + 15°` for 8.8 km.
//!
//! All constants are fixed design parameters.

use crate::geo::{destination_point, normalize_bearing};
use crate::types::{GasSource, Geometry, LatLng, ResolvedZone, Wind, ZoneSource};

/// Base radius of the danger circle in meters.
pub const INITIAL_RADIUS_M: f64 = 100.0;

/// Critical dispersion factor applied to `DISPERSION_REFERENCE / wind`.
pub const CRITICAL_DISPERSION_FACTOR: f64 = 0.5;

/// Reference dispersion term (meters times m/s).
pub const DISPERSION_REFERENCE: f64 = 500.0;

/// Wind speeds below this are treated as this value.
pub const MIN_WIND_SPEED_MPS: f64 = 1.0;

/// Length of the plume center ray in kilometers.
pub const PLUME_LENGTH_KM: f64 = 8.0;

/// Half of the plume spread angle in degrees.
pub const PLUME_HALF_ANGLE_DEG: f64 = 15.0;

/// Side rays are this much longer than the center ray.
pub const PLUME_SIDE_STRETCH: f64 = 1.1;

/// Danger circle and alert plume computed for one gas source and one wind sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PlumeZones {
    pub center: LatLng,
    pub danger_radius_m: f64,
    /// Source, left, center, right. Implicitly closed.
    pub alert_ring: Vec<LatLng>,
}

impl PlumeZones {
    pub fn danger(&self) -> Geometry {
        Geometry::Circle {
            center: self.center,
            radius_m: self.danger_radius_m,
        }
    }

    pub fn alert(&self) -> Geometry {
        Geometry::Polygon {
            ring: self.alert_ring.clone(),
        }
    }
}

/// Danger radius in meters for a given wind speed (floored at 1 m/s).
pub fn danger_radius_m(wind_speed_mps: f64) -> f64 {
    // f64::max ignores NaN, so a NaN speed also lands on the floor.
    let effective = wind_speed_mps.max(MIN_WIND_SPEED_MPS);
    INITIAL_RADIUS_M + CRITICAL_DISPERSION_FACTOR * DISPERSION_REFERENCE / effective
}

/// Compute the danger circle and alert plume for a source point.
///
/// `wind.direction_deg` is the direction the wind blows toward.
pub fn calculate_plume(source: LatLng, wind: Wind) -> PlumeZones {
    let bearing = normalize_bearing(wind.direction_deg);
    let side_km = PLUME_LENGTH_KM * PLUME_SIDE_STRETCH;

    let left = destination_point(
        source.lat,
        source.lng,
        bearing - PLUME_HALF_ANGLE_DEG,
        side_km,
    );
    let center = destination_point(source.lat, source.lng, bearing, PLUME_LENGTH_KM);
    let right = destination_point(
        source.lat,
        source.lng,
        bearing + PLUME_HALF_ANGLE_DEG,
        side_km,
    );

    PlumeZones {
        center: source,
        danger_radius_m: danger_radius_m(wind.speed_mps),
        alert_ring: vec![source, left, center, right],
    }
}

/// True when a wind sample can drive a plume: finite, with a positive speed.
pub fn is_usable_wind(wind: &Wind) -> bool {
    wind.speed_mps.is_finite() && wind.speed_mps > 0.0 && wind.direction_deg.is_finite()
}

/// Resolve a gas source for one cycle.
///
/// Without usable wind the source resolves to a zone with no geometry, which
/// never registers a containment.
pub fn resolve_gas_source(gas: &GasSource, wind: Option<Wind>) -> ResolvedZone {
    let usable = wind.filter(is_usable_wind);
    let plume = usable.map(|w| calculate_plume(gas.position, w));

    ResolvedZone {
        zone_id: gas.id.clone(),
        zone_name: gas.name.clone(),
        source: ZoneSource::Gas,
        danger: plume.as_ref().map(PlumeZones::danger),
        alert: plume.as_ref().map(PlumeZones::alert),
        wind: usable,
    }
}

// ─── Tests ────────────────────────────────────────────────────────
