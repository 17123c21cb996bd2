//! History records, query filters and the analytics summary.
//!
//! The store fetches rows; the arithmetic lives here so it is testable
//! without a database.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceReading, Violation, ZoneLevel};

/// Maximum rows returned by a violation listing.
pub const VIOLATION_QUERY_LIMIT: usize = 500;

/// Maximum rows returned by a history listing.
pub const HISTORY_QUERY_LIMIT: usize = 1000;

/// One device position appended to the history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub device_id: String,
    pub device_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_percent: Option<f64>,
    pub altitude_m: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&DeviceReading> for HistoryRecord {
    fn from(r: &DeviceReading) -> Self {
        Self {
            device_id: r.device_id.clone(),
            device_name: r.device_name.clone(),
            latitude: r.position.latitude,
            longitude: r.position.longitude,
            battery_percent: r.battery_percent,
            altitude_m: r.altitude_m,
            accuracy_m: r.accuracy_m,
            timestamp: r.position.timestamp,
        }
    }
}

/// Inclusive time window; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The `hours` hours ending at `now`.
    pub fn last_hours(hours: u32, now: DateTime<Utc>) -> Self {
        Self::between(now - TimeDelta::hours(i64::from(hours)), now)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| at >= s) && self.end.is_none_or(|e| at <= e)
    }
}

/// Filter for violation listings (by `entered_at`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationQuery {
    #[serde(default)]
    pub range: TimeRange,
    #[serde(default)]
    pub level: Option<ZoneLevel>,
}

impl ViolationQuery {
    pub fn matches(&self, v: &Violation) -> bool {
        self.range.contains(v.entered_at) && self.level.is_none_or(|l| l == v.level)
    }
}

/// Filter for history listings (by reading timestamp).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub range: TimeRange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_violations: usize,
    pub danger_violations: usize,
    pub alert_violations: usize,
    /// Violations entered in the range that are still open.
    pub open_violations: usize,
    /// Distinct devices with at least one history record in the range.
    pub total_devices_tracked: usize,
    /// Mean of reported battery levels, rounded; 0 when none were reported.
    pub avg_battery_level: u32,
}

/// Summarize violations and history already filtered to one time range.
pub fn summarize(violations: &[Violation], history: &[HistoryRecord]) -> AnalyticsSummary {
    let count = |level| violations.iter().filter(|v| v.level == level).count();

    let devices: HashSet<&str> = history.iter().map(|h| h.device_id.as_str()).collect();

    let batteries: Vec<f64> = history
        .iter()
        .filter_map(|h| h.battery_percent)
        .filter(|b| b.is_finite())
        .collect();
    let avg_battery_level = if batteries.is_empty() {
        0
    } else {
        let mean = batteries.iter().sum::<f64>() / batteries.len() as f64;
        mean.round().clamp(0.0, f64::from(u32::MAX)) as u32
    };

    AnalyticsSummary {
        total_violations: violations.len(),
        danger_violations: count(ZoneLevel::Danger),
        alert_violations: count(ZoneLevel::Alert),
        open_violations: violations.iter().filter(|v| v.is_open()).count(),
        total_devices_tracked: devices.len(),
        avg_battery_level,
    }
}

// ─── Tests ────────────────────────────────────────────────────────
