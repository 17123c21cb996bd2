//! Zone containment evaluation with danger-over-alert precedence.
//!
//! A [`ZoneSnapshot`] freezes the zone geometry for one polling cycle
//! (machine zones as stored, gas sources resolved against that cycle's wind).
//! [`evaluate`] then classifies a single point against the snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plume::resolve_gas_source;
use crate::types::{
    ContainmentResult, LatLng, ResolvedZone, ViolatingZone, Wind, Zone, ZoneLevel, ZoneSource,
};

// ─── Snapshot ─────────────────────────────────────────────────────

/// Immutable zone geometry used for one cycle's evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    zones: Vec<ResolvedZone>,
    resolved_at: Option<DateTime<Utc>>,
}

impl ZoneSnapshot {
    /// Resolve every zone for this cycle.
    ///
    /// `winds` maps gas-source zone ids to the wind fetched this cycle; a gas
    /// source missing from the map resolves to no geometry. Zone order is kept.
    pub fn resolve(zones: &[Zone], winds: &HashMap<String, Wind>, at: DateTime<Utc>) -> Self {
        let resolved = zones
            .iter()
            .map(|zone| match zone {
                Zone::Machine(m) => ResolvedZone {
                    zone_id: m.id.clone(),
                    zone_name: m.name.clone(),
                    source: ZoneSource::Machine,
                    danger: m.danger.clone(),
                    alert: m.alert.clone(),
                    wind: None,
                },
                Zone::Gas(g) => resolve_gas_source(g, winds.get(&g.id).copied()),
            })
            .collect();

        Self {
            zones: resolved,
            resolved_at: Some(at),
        }
    }

    pub fn from_resolved(zones: Vec<ResolvedZone>) -> Self {
        Self {
            zones,
            resolved_at: None,
        }
    }

    pub fn zones(&self) -> &[ResolvedZone] {
        &self.zones
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Gas sources that produced geometry this cycle.
    pub fn active_gas_zones(&self) -> impl Iterator<Item = &ResolvedZone> {
        self.zones
            .iter()
            .filter(|z| z.source == ZoneSource::Gas && z.has_geometry())
    }

    /// Gas sources that stayed zone-less this cycle (no usable wind).
    pub fn inactive_gas_zones(&self) -> impl Iterator<Item = &ResolvedZone> {
        self.zones
            .iter()
            .filter(|z| z.source == ZoneSource::Gas && !z.has_geometry())
    }

    pub fn evaluate(&self, point: LatLng) -> ContainmentResult {
        evaluate(point, &self.zones)
    }
}

// ─── Evaluation ───────────────────────────────────────────────────

fn violating(zone: &ResolvedZone, level: ZoneLevel) -> ViolatingZone {
    ViolatingZone {
        zone_id: zone.zone_id.clone(),
        zone_name: zone.zone_name.clone(),
        level,
        source: zone.source,
    }
}

/// Classify one point against the resolved zones, in order.
///
/// - The first zone whose danger geometry contains the point wins outright
///   and stops the scan.
/// - Otherwise every alert hit overwrites the previous one, so the last
///   matching alert zone is reported.
/// - `in_danger` always clears `in_alert`.
pub fn evaluate(point: LatLng, zones: &[ResolvedZone]) -> ContainmentResult {
    let mut result = ContainmentResult::clear();

    for zone in zones {
        if zone.danger.as_ref().is_some_and(|g| g.contains(point)) {
            result.in_danger = true;
            result.violating_zone = Some(violating(zone, ZoneLevel::Danger));
            break;
        }

        if !result.in_danger && zone.alert.as_ref().is_some_and(|g| g.contains(point)) {
            result.in_alert = true;
            result.violating_zone = Some(violating(zone, ZoneLevel::Alert));
        }
    }

    if result.in_danger {
        result.in_alert = false;
    }

    result
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::destination_point;
    use crate::types::{GasSource, Geometry, MachineZone, ZoneShape};

    fn circle_zone(id: &str, center: LatLng, danger_m: f64, alert_m: f64) -> Zone {
        Zone::Machine(
            MachineZone::new(
                id,
                format!("Zone {id}"),
                ZoneShape::Circle,
                Some(Geometry::circle(center, danger_m).expect("circle")),
                Some(Geometry::circle(center, alert_m).expect("circle")),
            )
            .expect("zone"),
        )
    }

    fn square(lat: f64, lng: f64, half: f64) -> Geometry {
        Geometry::polygon(vec![
            LatLng::new(lat - half, lng - half),
            LatLng::new(lat - half, lng + half),
            LatLng::new(lat + half, lng + half),
            LatLng::new(lat + half, lng - half),
        ])
        .expect("square")
    }

    fn snapshot(zones: &[Zone]) -> ZoneSnapshot {
        ZoneSnapshot::resolve(zones, &HashMap::new(), Utc::now())
    }

    #[test]
    fn clear_when_no_zones() {
        let result = evaluate(LatLng::new(0.0, 0.0), &[]);
        assert_eq!(result, ContainmentResult::clear());
    }

    #[test]
    fn machine_circle_alert_ring() {
        let center = LatLng::new(10.0, 10.0);
        let snap = snapshot(&[circle_zone("m1", center, 500.0, 1_000.0)]);
        let device = destination_point(10.0, 10.0, 0.0, 0.75);
        let result = snap.evaluate(device);
        assert!(!result.in_danger);
        assert!(result.in_alert);
        let vz = result.violating_zone.expect("violating zone");
        assert_eq!(vz.zone_id, "m1");
        assert_eq!(vz.level, ZoneLevel::Alert);
        assert_eq!(vz.source, ZoneSource::Machine);
    }

    #[test]
    fn machine_circle_inside_danger() {
        let center = LatLng::new(10.0, 10.0);
        let snap = snapshot(&[circle_zone("m1", center, 500.0, 1_000.0)]);
        let result = snap.evaluate(destination_point(10.0, 10.0, 45.0, 0.2));
        assert!(result.in_danger);
        assert!(!result.in_alert);
    }

    #[test]
    fn machine_circle_outside_both() {
        let snap = snapshot(&[circle_zone("m1", LatLng::new(10.0, 10.0), 500.0, 1_000.0)]);
        let result = snap.evaluate(destination_point(10.0, 10.0, 180.0, 1.5));
        assert_eq!(result, ContainmentResult::clear());
    }

    #[test]
    fn danger_overrides_other_zone_alert() {
        // Alert-only zone first, then a zone whose danger area holds the device.
        let alert_first = Zone::Machine(
            MachineZone::new(
                "a",
                "Crusher",
                ZoneShape::Polygon,
                None,
                Some(square(5.0, 5.0, 1.0)),
            )
            .expect("zone"),
        );
        let danger_second = Zone::Machine(
            MachineZone::new(
                "d",
                "Kiln",
                ZoneShape::Polygon,
                Some(square(5.0, 5.0, 0.1)),
                None,
            )
            .expect("zone"),
        );
        let result = snapshot(&[alert_first, danger_second]).evaluate(LatLng::new(5.0, 5.0));
        assert!(result.in_danger);
        assert!(!result.in_alert);
        assert_eq!(result.violating_zone.expect("zone").zone_id, "d");
    }

    #[test]
    fn danger_short_circuits_later_zones() {
        let first = circle_zone("first", LatLng::new(0.0, 0.0), 1_000.0, 2_000.0);
        let second = circle_zone("second", LatLng::new(0.0, 0.0), 1_000.0, 2_000.0);
        let result = snapshot(&[first, second]).evaluate(LatLng::new(0.0, 0.0));
        assert_eq!(result.violating_zone.expect("zone").zone_id, "first");
    }

    #[test]
    fn last_alert_match_wins() {
        let a = circle_zone("a", LatLng::new(0.0, 0.0), 10.0, 5_000.0);
        let b = circle_zone("b", LatLng::new(0.0, 0.01), 10.0, 5_000.0);
        let result = snapshot(&[a, b]).evaluate(LatLng::new(0.0, 0.005));
        assert!(result.in_alert);
        assert_eq!(result.violating_zone.expect("zone").zone_id, "b");
    }

    #[test]
    fn gas_without_wind_never_contains() {
        let gas = Zone::Gas(GasSource {
            id: "g".into(),
            name: "Tank".into(),
            position: LatLng::new(32.2, -7.9),
        });
        let snap = snapshot(&[gas]);
        assert_eq!(snap.active_gas_zones().count(), 0);
        assert_eq!(snap.inactive_gas_zones().count(), 1);
        assert_eq!(snap.evaluate(LatLng::new(32.2, -7.9)), ContainmentResult::clear());
    }

    #[test]
    fn gas_source_point_is_in_danger() {
        let gas = Zone::Gas(GasSource {
            id: "g".into(),
            name: "Tank".into(),
            position: LatLng::new(32.2, -7.9),
        });
        let winds = HashMap::from([(
            "g".to_string(),
            Wind {
                speed_mps: 2.0,
                direction_deg: 90.0,
            },
        )]);
        let snap = ZoneSnapshot::resolve(&[gas], &winds, Utc::now());
        let result = snap.evaluate(LatLng::new(32.2, -7.9));
        assert!(result.in_danger);
        let vz = result.violating_zone.expect("zone");
        assert_eq!(vz.source, ZoneSource::Gas);
        assert_eq!(vz.level, ZoneLevel::Danger);
    }

    #[test]
    fn snapshot_keeps_zone_order() {
        let zones = [
            circle_zone("z3", LatLng::new(0.0, 0.0), 1.0, 2.0),
            circle_zone("z1", LatLng::new(0.0, 0.0), 1.0, 2.0),
            circle_zone("z2", LatLng::new(0.0, 0.0), 1.0, 2.0),
        ];
        let snap = snapshot(&zones);
        let ids: Vec<&str> = snap.zones().iter().map(|z| z.zone_id.as_str()).collect();
        assert_eq!(ids, ["z3", "z1", "z2"]);
    }
}
