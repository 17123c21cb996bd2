//! Violation lifecycle tracking: at most one open violation per device.
//!
//! Pure, deterministic state machine with no IO. Each polling cycle the
//! caller feeds one [`ContainmentResult`] per device to
//! [`ViolationTracker::observe`] and gets back a [`Transition`] describing the
//! store writes to perform:
//!
//! | open violation      | result              | transition      |
//! |---------------------|---------------------|-----------------|
//! | none                | clear               | `Unchanged`     |
//! | none                | zone A              | `Entered(A)`    |
//! | A (synced)          | zone A              | `Unchanged`     |
//! | A (never persisted) | zone A              | `RetryCreate(A)`|
//! | A                   | zone B              | `Moved(A → B)`  |
//! | A                   | clear               | `Exited(A)`     |
//!
//! The in-memory pointer is updated before the caller talks to the store.
//! A violation whose creation failed stays tracked without a store id
//! (unsynced) so later cycles do not open duplicates; creation is retried
//! with the original `entered_at` while the stay continues, and a closed
//! unsynced violation carries enough to create its record after the fact.
//! The store must treat `(device_id, zone_id, entered_at)` as the identity of
//! a stay so a retry after a timed-out write returns the existing record.
//! Call [`ViolationTracker::confirm_created`] once the store returns an id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ContainmentResult, LatLng, NewViolation, Position, Violation, ViolatingZone, ZoneLevel,
    ZoneSource,
};

// ─── Records ──────────────────────────────────────────────────────

/// The violation currently open for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenViolation {
    /// Store id; `None` until the store acknowledged creation.
    pub violation_id: Option<String>,
    pub device_name: String,
    pub zone_id: String,
    pub zone_name: String,
    pub level: ZoneLevel,
    pub source: ZoneSource,
    pub position: LatLng,
    pub entered_at: DateTime<Utc>,
}

impl OpenViolation {
    pub fn is_synced(&self) -> bool {
        self.violation_id.is_some()
    }

    fn to_new(&self, device_id: &str) -> NewViolation {
        NewViolation {
            device_id: device_id.to_string(),
            device_name: self.device_name.clone(),
            zone_id: self.zone_id.clone(),
            zone_name: self.zone_name.clone(),
            level: self.level,
            source: self.source,
            position: self.position,
            entered_at: self.entered_at,
        }
    }

    fn close(self, device_id: &str, exited_at: DateTime<Utc>) -> ClosedViolation {
        ClosedViolation {
            device_id: device_id.to_string(),
            duration_seconds: duration_seconds(self.entered_at, exited_at),
            violation_id: self.violation_id,
            device_name: self.device_name,
            zone_id: self.zone_id,
            zone_name: self.zone_name,
            level: self.level,
            source: self.source,
            position: self.position,
            entered_at: self.entered_at,
            exited_at,
        }
    }
}

/// A violation that just ended; the caller writes `exited_at` and duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedViolation {
    pub device_id: String,
    /// `None` when creation was never acknowledged by the store.
    pub violation_id: Option<String>,
    pub device_name: String,
    pub zone_id: String,
    pub zone_name: String,
    pub level: ZoneLevel,
    pub source: ZoneSource,
    pub position: LatLng,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

impl ClosedViolation {
    /// The creation record for this stay, for a store that never acknowledged it.
    pub fn to_new(&self) -> NewViolation {
        NewViolation {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            zone_id: self.zone_id.clone(),
            zone_name: self.zone_name.clone(),
            level: self.level,
            source: self.source,
            position: self.position,
            entered_at: self.entered_at,
        }
    }
}

// ─── Transition ───────────────────────────────────────────────────

/// Store work implied by one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing to write.
    Unchanged,
    /// Reading older than one already processed for this device; ignored.
    Stale,
    /// Device entered a zone with nothing open before.
    Entered { open: NewViolation },
    /// Device left its zone and is clear.
    Exited { closed: ClosedViolation },
    /// Device went straight from one zone to another.
    Moved {
        closed: ClosedViolation,
        open: NewViolation,
    },
    /// Ongoing stay whose creation has not been persisted yet.
    RetryCreate { open: NewViolation },
}

impl Transition {
    /// Violation to create, if any.
    pub fn to_create(&self) -> Option<&NewViolation> {
        match self {
            Self::Entered { open } | Self::Moved { open, .. } | Self::RetryCreate { open } => {
                Some(open)
            }
            Self::Unchanged | Self::Stale | Self::Exited { .. } => None,
        }
    }

    /// Violation to close, if any.
    pub fn to_close(&self) -> Option<&ClosedViolation> {
        match self {
            Self::Exited { closed } | Self::Moved { closed, .. } => Some(closed),
            Self::Unchanged | Self::Stale | Self::Entered { .. } | Self::RetryCreate { .. } => {
                None
            }
        }
    }

    /// True for a fresh zone entry (not a retry). Notifications key off this.
    pub fn is_new_entry(&self) -> bool {
        matches!(self, Self::Entered { .. } | Self::Moved { .. })
    }
}

/// `floor((exited - entered) / 1s)`, never negative.
pub fn duration_seconds(entered_at: DateTime<Utc>, exited_at: DateTime<Utc>) -> i64 {
    (exited_at - entered_at)
        .num_milliseconds()
        .div_euclid(1000)
        .max(0)
}

// ─── Tracker ──────────────────────────────────────────────────────

/// Maps each device to its currently open violation.
///
/// Owned by the caller (one per tracking session); no global state.
#[derive(Debug, Clone, Default)]
pub struct ViolationTracker {
    open: HashMap<String, OpenViolation>,
    /// Newest position timestamp processed per device.
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from violations the store still has open.
    ///
    /// Closed records are skipped. When a device has several open records the
    /// most recently entered one is kept and the others are returned as
    /// closed, each ending when the next one for that device began.
    pub fn restore(violations: impl IntoIterator<Item = Violation>) -> (Self, Vec<ClosedViolation>) {
        let mut by_device: HashMap<String, Vec<OpenViolation>> = HashMap::new();
        for v in violations.into_iter().filter(Violation::is_open) {
            by_device.entry(v.device_id).or_default().push(OpenViolation {
                violation_id: Some(v.id),
                device_name: v.device_name,
                zone_id: v.zone_id,
                zone_name: v.zone_name,
                level: v.level,
                source: v.source,
                position: v.position,
                entered_at: v.entered_at,
            });
        }

        let mut tracker = Self::new();
        let mut superseded = Vec::new();
        for (device_id, mut records) in by_device {
            records.sort_by_key(|r| r.entered_at);
            let Some(newest) = records.pop() else {
                continue;
            };
            let mut ends_at = newest.entered_at;
            for older in records.into_iter().rev() {
                let entered_at = older.entered_at;
                superseded.push(older.close(&device_id, ends_at));
                ends_at = entered_at;
            }
            tracker.open.insert(device_id, newest);
        }

        superseded.sort_by(|a, b| {
            a.device_id
                .cmp(&b.device_id)
                .then(a.entered_at.cmp(&b.entered_at))
        });
        (tracker, superseded)
    }

    /// Apply one containment result for a device.
    ///
    /// `now` becomes `entered_at` of a new violation or `exited_at` of a
    /// closed one. `position.timestamp` only guards against out-of-order
    /// readings.
    pub fn observe(
        &mut self,
        device_id: &str,
        device_name: &str,
        position: &Position,
        result: &ContainmentResult,
        now: DateTime<Utc>,
    ) -> Transition {
        if self
            .last_seen
            .get(device_id)
            .is_some_and(|seen| position.timestamp < *seen)
        {
            return Transition::Stale;
        }
        self.last_seen
            .insert(device_id.to_string(), position.timestamp);

        match &result.violating_zone {
            Some(zone) => self.observe_violation(device_id, device_name, position, zone, now),
            None => match self.open.remove(device_id) {
                Some(open) => Transition::Exited {
                    closed: open.close(device_id, now),
                },
                None => Transition::Unchanged,
            },
        }
    }

    fn observe_violation(
        &mut self,
        device_id: &str,
        device_name: &str,
        position: &Position,
        zone: &ViolatingZone,
        now: DateTime<Utc>,
    ) -> Transition {
        match self.open.get(device_id) {
            Some(current) if current.zone_id == zone.zone_id => {
                return if current.is_synced() {
                    Transition::Unchanged
                } else {
                    Transition::RetryCreate {
                        open: current.to_new(device_id),
                    }
                };
            }
            _ => {}
        }

        let entry = OpenViolation {
            violation_id: None,
            device_name: device_name.to_string(),
            zone_id: zone.zone_id.clone(),
            zone_name: zone.zone_name.clone(),
            level: zone.level,
            source: zone.source,
            position: position.point(),
            entered_at: now,
        };
        let open = entry.to_new(device_id);

        match self.open.insert(device_id.to_string(), entry) {
            Some(previous) => Transition::Moved {
                closed: previous.close(device_id, now),
                open,
            },
            None => Transition::Entered { open },
        }
    }

    /// Record the store id of a created violation.
    ///
    /// Ignored (returns `false`) when the device has since moved on to a
    /// different zone or left, so a late acknowledgement cannot attach to the
    /// wrong record.
    pub fn confirm_created(&mut self, device_id: &str, zone_id: &str, violation_id: String) -> bool {
        match self.open.get_mut(device_id) {
            Some(open) if open.zone_id == zone_id => {
                open.violation_id = Some(violation_id);
                true
            }
            _ => false,
        }
    }

    pub fn open_violation(&self, device_id: &str) -> Option<&OpenViolation> {
        self.open.get(device_id)
    }

    pub fn open_violations(&self) -> impl Iterator<Item = (&str, &OpenViolation)> {
        self.open.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Open violations that the store has not acknowledged yet.
    pub fn unsynced_count(&self) -> usize {
        self.open.values().filter(|v| !v.is_synced()).count()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
