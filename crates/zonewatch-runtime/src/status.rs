//! Per-cycle status report published to the UDS server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zonewatch_core::{
    ContainmentResult, Device, DeviceReading, ResolvedZone, Transition, ViolationTracker,
    ZoneSnapshot,
};

use crate::alerts::NotificationPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: Device,
    pub battery_percent: Option<f64>,
    pub containment: ContainmentResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub cycle: u64,
    pub generated_at: Option<DateTime<Utc>>,
    /// False when the last position fetch failed; device data is then from
    /// the previous successful cycle.
    pub feed_ok: bool,
    pub devices: Vec<DeviceStatus>,
    /// Device ids, independent lists.
    pub in_danger: Vec<String>,
    pub in_alert: Vec<String>,
    /// Gas sources as resolved this cycle, with the wind used.
    pub gas_zones: Vec<ResolvedZone>,
    pub open_violations: usize,
    pub unsynced_violations: usize,
    pub low_battery: Vec<String>,
}

impl StatusReport {
    pub fn device(&self, device_id: &str) -> Option<&DeviceStatus> {
        self.devices.iter().find(|d| d.device.id == device_id)
    }

    /// Keep the last device data but mark the feed as down.
    pub fn feed_failed(&self, cycle: u64, now: DateTime<Utc>) -> Self {
        Self {
            cycle,
            generated_at: Some(now),
            feed_ok: false,
            ..self.clone()
        }
    }
}

/// One device's reading this cycle, with what the tracker made of it.
pub struct Observation<'a> {
    pub reading: &'a DeviceReading,
    pub containment: &'a ContainmentResult,
    pub transition: &'a Transition,
}

/// Assemble the report for one completed cycle.
///
/// A reading the tracker rejected as stale keeps the device's entry from
/// `previous`, so the report agrees with the tracker's open violations.
pub fn build_report(
    previous: &StatusReport,
    cycle: u64,
    now: DateTime<Utc>,
    observed: &[Observation<'_>],
    snapshot: &ZoneSnapshot,
    tracker: &ViolationTracker,
    policy: &NotificationPolicy,
) -> StatusReport {
    let mut devices = Vec::with_capacity(observed.len());
    let mut low_battery = Vec::new();

    for obs in observed {
        let carried = match obs.transition {
            Transition::Stale => previous.device(&obs.reading.device_id),
            _ => None,
        };
        match carried {
            Some(status) => {
                if previous.low_battery.contains(&status.device.id) {
                    low_battery.push(status.device.id.clone());
                }
                devices.push(status.clone());
            }
            None => {
                if policy.flags_low_battery(obs.reading) {
                    low_battery.push(obs.reading.device_id.clone());
                }
                devices.push(DeviceStatus {
                    device: Device::from(obs.reading),
                    battery_percent: obs.reading.battery_percent,
                    containment: obs.containment.clone(),
                });
            }
        }
    }

    StatusReport {
        cycle,
        generated_at: Some(now),
        feed_ok: true,
        in_danger: device_ids(&devices, |c| c.in_danger),
        in_alert: device_ids(&devices, |c| c.in_alert),
        devices,
        gas_zones: snapshot
            .active_gas_zones()
            .chain(snapshot.inactive_gas_zones())
            .cloned()
            .collect(),
        open_violations: tracker.open_count(),
        unsynced_violations: tracker.unsynced_count(),
        low_battery,
    }
}

fn device_ids(devices: &[DeviceStatus], pred: impl Fn(&ContainmentResult) -> bool) -> Vec<String> {
    devices
        .iter()
        .filter(|d| pred(&d.containment))
        .map(|d| d.device.id.clone())
        .collect()
}
