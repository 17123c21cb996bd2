//! Collaborator traits. The polling loop only sees these, so tests can
//! inject fakes that fail, hang, or record calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zonewatch_core::analytics::{HistoryQuery, HistoryRecord, ViolationQuery};
use zonewatch_core::{DeviceReading, LatLng, NewViolation, Violation, Wind, Zone};

use crate::SourceError;
use crate::infobip::AlertMessage;

/// Latest positions of all tracked devices.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn fetch_positions(&self) -> Result<Vec<DeviceReading>, SourceError>;
}

/// Current wind at a location. Direction is where the wind blows toward.
#[async_trait]
pub trait WeatherFeed: Send + Sync {
    async fn fetch_wind(&self, at: LatLng) -> Result<Wind, SourceError>;
}

#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Persist a newly opened violation and return its store id.
    ///
    /// Idempotent per stay: creating the same `(device_id, zone_id,
    /// entered_at)` again returns the existing id.
    async fn create_violation(&self, violation: NewViolation) -> Result<String, SourceError>;

    /// Set exit time and duration. Unknown ids are not an error.
    async fn close_violation(
        &self,
        id: &str,
        exited_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), SourceError>;

    /// Violations without an exit time.
    async fn list_open_violations(&self) -> Result<Vec<Violation>, SourceError>;

    /// Newest first, capped at the query limit.
    async fn list_violations(&self, query: ViolationQuery) -> Result<Vec<Violation>, SourceError>;
}

#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// All zones, newest first.
    async fn list_zones(&self) -> Result<Vec<Zone>, SourceError>;

    /// Insert a zone; the store assigns the id (the input id is ignored).
    async fn save_zone(&self, zone: Zone) -> Result<String, SourceError>;

    /// Returns `false` when no zone had that id.
    async fn delete_zone(&self, id: &str) -> Result<bool, SourceError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_history(&self, records: Vec<HistoryRecord>) -> Result<(), SourceError>;

    /// Newest first, capped at the query limit.
    async fn list_history(&self, query: HistoryQuery) -> Result<Vec<HistoryRecord>, SourceError>;
}

/// Outbound alert channel (SMS).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &AlertMessage) -> Result<(), SourceError>;
}
