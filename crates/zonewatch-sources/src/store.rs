//! SQLite persistence for zones, violations and device history.
//!
//! Geometry columns hold `SRID=4326;` EWKT text, longitude first. Timestamps
//! are fixed-width RFC 3339 (microseconds, `Z`) so string comparison orders
//! them chronologically.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use zonewatch_core::analytics::{
    HISTORY_QUERY_LIMIT, HistoryQuery, HistoryRecord, TimeRange, VIOLATION_QUERY_LIMIT,
    ViolationQuery,
};
use zonewatch_core::codec::{self, parse_geometry_text};
use zonewatch_core::{
    GasSource, Geometry, MachineZone, NewViolation, Violation, Zone, ZoneShape,
};

use crate::SourceError;
use crate::traits::{HistoryStore, ViolationStore, ZoneStore};

/// SQLite-backed store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn point_column(idx: usize, raw: &str) -> rusqlite::Result<zonewatch_core::LatLng> {
    parse_geometry_text(raw)
        .and_then(|g| g.into_point())
        .map_err(|e| conversion_error(idx, e))
}

/// `(clause, params)` for an optional time window on `column`.
fn range_clause(column: &str, range: &TimeRange) -> (String, Vec<String>) {
    let mut clause = String::new();
    let mut values = Vec::new();
    if let Some(start) = range.start {
        values.push(to_db_time(start));
        clause.push_str(&format!(" AND {column} >= ?{}", values.len()));
    }
    if let Some(end) = range.end {
        values.push(to_db_time(end));
        clause.push_str(&format!(" AND {column} <= ?{}", values.len()));
    }
    (clause, values)
}

impl Store {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, SourceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SourceError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-applied in SQLite.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a synchronous store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, SourceError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    // ─── Violations ───────────────────────────────────────────────

    /// Insert a violation, or return the id of the row already recorded for
    /// the same stay (device, zone, entry time). A retry after a write that
    /// timed out on our side but committed in SQLite lands here.
    pub fn insert_violation(&self, v: &NewViolation) -> Result<String, SourceError> {
        let id: i64 = self.lock().query_row(
            "INSERT INTO zone_violations
                (device_id, device_name, zone_id, zone_name, zone_type, zone_source,
                 location, entered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (device_id, zone_id, entered_at)
                DO UPDATE SET device_name = excluded.device_name
             RETURNING id",
            params![
                v.device_id,
                v.device_name,
                v.zone_id,
                v.zone_name,
                v.level.as_str(),
                v.source.as_str(),
                codec::point_to_wkt(v.position),
                to_db_time(v.entered_at),
            ],
            |row| row.get(0),
        )?;
        Ok(id.to_string())
    }

    pub fn update_violation_exit(
        &self,
        id: &str,
        exited_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<bool, SourceError> {
        let changed = self.lock().execute(
            "UPDATE zone_violations SET exited_at = ?1, duration_seconds = ?2
             WHERE id = ?3",
            params![to_db_time(exited_at), duration_seconds, id],
        )?;
        Ok(changed > 0)
    }

    pub fn open_violations(&self) -> Result<Vec<Violation>, SourceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{VIOLATION_COLUMNS} WHERE exited_at IS NULL ORDER BY entered_at DESC"
        ))?;
        let rows = stmt.query_map([], violation_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn violations(&self, query: &ViolationQuery) -> Result<Vec<Violation>, SourceError> {
        let (mut clause, mut values) = range_clause("entered_at", &query.range);
        if let Some(level) = query.level {
            values.push(level.as_str().to_string());
            clause.push_str(&format!(" AND zone_type = ?{}", values.len()));
        }
        let sql = format!(
            "{VIOLATION_COLUMNS} WHERE 1 = 1{clause} ORDER BY entered_at DESC LIMIT {VIOLATION_QUERY_LIMIT}"
        );

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), violation_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ─── Zones ────────────────────────────────────────────────────

    pub fn insert_zone(&self, zone: &Zone, created_at: DateTime<Utc>) -> Result<String, SourceError> {
        let mut row = ZoneRow {
            name: zone.name().to_string(),
            source: zone.source().as_str(),
            created_at: to_db_time(created_at),
            ..ZoneRow::default()
        };

        match zone {
            Zone::Machine(m) => {
                row.shape = Some(m.shape.as_str());
                let (geometry, center, radius) = geometry_columns(m.danger.as_ref());
                row.danger_geometry = geometry;
                row.danger_center = center;
                row.danger_radius = radius;
                let (geometry, center, radius) = geometry_columns(m.alert.as_ref());
                row.alert_geometry = geometry;
                row.alert_center = center;
                row.alert_radius = radius;
            }
            Zone::Gas(g) => {
                row.gas_source_position = Some(codec::point_to_wkt(g.position));
            }
        }

        let conn = self.lock();
        conn.execute(
            "INSERT INTO zones
                (name, source, shape,
                 danger_zone_geometry, danger_zone_center, danger_zone_radius,
                 alert_zone_geometry, alert_zone_center, alert_zone_radius,
                 gas_source_position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.name,
                row.source,
                row.shape,
                row.danger_geometry,
                row.danger_center,
                row.danger_radius,
                row.alert_geometry,
                row.alert_center,
                row.alert_radius,
                row.gas_source_position,
                row.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid().to_string())
    }

    /// All zones, newest first. A row whose geometry no longer parses fails the load.
    pub fn zones(&self) -> Result<Vec<Zone>, SourceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, source, shape,
                    danger_zone_geometry, danger_zone_center, danger_zone_radius,
                    alert_zone_geometry, alert_zone_center, alert_zone_radius,
                    gas_source_position
             FROM zones ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], zone_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn remove_zone(&self, id: &str) -> Result<bool, SourceError> {
        let changed = self
            .lock()
            .execute("DELETE FROM zones WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ─── History ──────────────────────────────────────────────────

    pub fn insert_history(&self, records: &[HistoryRecord]) -> Result<(), SourceError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO device_history
                    (device_id, device_name, location, battery, altitude_m, accuracy_m, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.device_id,
                    r.device_name,
                    codec::point_to_wkt(zonewatch_core::LatLng::new(r.latitude, r.longitude)),
                    r.battery_percent,
                    r.altitude_m,
                    r.accuracy_m,
                    to_db_time(r.timestamp),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>, SourceError> {
        let (mut clause, mut values) = range_clause("timestamp", &query.range);
        if let Some(device_id) = &query.device_id {
            values.push(device_id.clone());
            clause.push_str(&format!(" AND device_id = ?{}", values.len()));
        }
        let sql = format!(
            "SELECT device_id, device_name, location, battery, altitude_m, accuracy_m, timestamp
             FROM device_history WHERE 1 = 1{clause}
             ORDER BY timestamp DESC LIMIT {HISTORY_QUERY_LIMIT}"
        );

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| {
            let location: String = row.get(2)?;
            let timestamp: String = row.get(6)?;
            let point = point_column(2, &location)?;
            Ok(HistoryRecord {
                device_id: row.get(0)?,
                device_name: row.get(1)?,
                latitude: point.lat,
                longitude: point.lng,
                battery_percent: row.get(3)?,
                altitude_m: row.get(4)?,
                accuracy_m: row.get(5)?,
                timestamp: from_db_time(6, &timestamp)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[cfg(test)]
    fn violation_by_id(&self, id: &str) -> Option<Violation> {
        use rusqlite::OptionalExtension;
        let conn = self.lock();
        conn.query_row(
            &format!("{VIOLATION_COLUMNS} WHERE id = ?1"),
            params![id],
            violation_from_row,
        )
        .optional()
        .ok()
        .flatten()
    }
}

/// Create the schema if it does not already exist.
fn migrate(conn: &Connection) -> Result<(), SourceError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS zones (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            name                 TEXT NOT NULL,
            source               TEXT NOT NULL,
            shape                TEXT,
            danger_zone_geometry TEXT,
            danger_zone_center   TEXT,
            danger_zone_radius   REAL,
            alert_zone_geometry  TEXT,
            alert_zone_center    TEXT,
            alert_zone_radius    REAL,
            gas_source_position  TEXT,
            created_at           TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS zone_violations (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id        TEXT NOT NULL,
            device_name      TEXT NOT NULL,
            zone_id          TEXT NOT NULL,
            zone_name        TEXT NOT NULL,
            zone_type        TEXT NOT NULL,
            zone_source      TEXT NOT NULL,
            location         TEXT NOT NULL,
            entered_at       TEXT NOT NULL,
            exited_at        TEXT,
            duration_seconds INTEGER
        );
        CREATE INDEX IF NOT EXISTS zone_violations_entered_at
            ON zone_violations (entered_at);
        CREATE UNIQUE INDEX IF NOT EXISTS zone_violations_stay
            ON zone_violations (device_id, zone_id, entered_at);
        CREATE TABLE IF NOT EXISTS device_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id   TEXT NOT NULL,
            device_name TEXT NOT NULL,
            location    TEXT NOT NULL,
            battery     REAL,
            altitude_m  REAL,
            accuracy_m  REAL,
            timestamp   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS device_history_timestamp
            ON device_history (timestamp);",
    )?;
    Ok(())
}

// ─── Row mapping ──────────────────────────────────────────────────

const VIOLATION_COLUMNS: &str = "SELECT id, device_id, device_name, zone_id, zone_name, zone_type,
        zone_source, location, entered_at, exited_at, duration_seconds
     FROM zone_violations";

fn violation_from_row(row: &Row<'_>) -> rusqlite::Result<Violation> {
    let id: i64 = row.get(0)?;
    let level: String = row.get(5)?;
    let source: String = row.get(6)?;
    let location: String = row.get(7)?;
    let entered_at: String = row.get(8)?;
    let exited_at: Option<String> = row.get(9)?;

    Ok(Violation {
        id: id.to_string(),
        device_id: row.get(1)?,
        device_name: row.get(2)?,
        zone_id: row.get(3)?,
        zone_name: row.get(4)?,
        level: level.parse().map_err(|e| conversion_error(5, e))?,
        source: source.parse().map_err(|e| conversion_error(6, e))?,
        position: point_column(7, &location)?,
        entered_at: from_db_time(8, &entered_at)?,
        exited_at: exited_at
            .as_deref()
            .map(|raw| from_db_time(9, raw))
            .transpose()?,
        duration_seconds: row.get(10)?,
    })
}

#[derive(Default)]
struct ZoneRow {
    name: String,
    source: &'static str,
    shape: Option<&'static str>,
    danger_geometry: Option<String>,
    danger_center: Option<String>,
    danger_radius: Option<f64>,
    alert_geometry: Option<String>,
    alert_center: Option<String>,
    alert_radius: Option<f64>,
    gas_source_position: Option<String>,
    created_at: String,
}

/// `(polygon, center, radius)` columns for one area.
fn geometry_columns(geometry: Option<&Geometry>) -> (Option<String>, Option<String>, Option<f64>) {
    match geometry {
        Some(Geometry::Polygon { ring }) => (Some(codec::ring_to_wkt(ring)), None, None),
        Some(Geometry::Circle { center, radius_m }) => {
            (None, Some(codec::point_to_wkt(*center)), Some(*radius_m))
        }
        None => (None, None, None),
    }
}

fn area_from_columns(
    shape: ZoneShape,
    polygon: Option<String>,
    center: Option<String>,
    radius: Option<f64>,
    idx: usize,
) -> rusqlite::Result<Option<Geometry>> {
    let geometry = match shape {
        ZoneShape::Polygon => match polygon {
            Some(raw) => {
                let ring = parse_geometry_text(&raw)
                    .and_then(|g| g.into_ring())
                    .map_err(|e| conversion_error(idx, e))?;
                Some(Geometry::polygon(ring).map_err(|e| conversion_error(idx, e))?)
            }
            None => None,
        },
        ZoneShape::Circle => match (center, radius) {
            (Some(raw), Some(radius)) => {
                let center = point_column(idx + 1, &raw)?;
                Some(Geometry::circle(center, radius).map_err(|e| conversion_error(idx + 2, e))?)
            }
            _ => None,
        },
    };
    Ok(geometry)
}

fn zone_from_row(row: &Row<'_>) -> rusqlite::Result<Zone> {
    let id: i64 = row.get(0)?;
    let id = id.to_string();
    let name: String = row.get(1)?;
    let source: String = row.get(2)?;

    if source == "gas" {
        let raw: Option<String> = row.get(10)?;
        let raw = raw.ok_or(rusqlite::Error::InvalidColumnType(
            10,
            "gas_source_position".into(),
            Type::Null,
        ))?;
        return Ok(Zone::Gas(GasSource {
            id,
            name,
            position: point_column(10, &raw)?,
        }));
    }

    let shape: Option<String> = row.get(3)?;
    let shape: ZoneShape = shape
        .as_deref()
        .unwrap_or("polygon")
        .parse()
        .map_err(|e| conversion_error(3, e))?;
    let danger = area_from_columns(shape, row.get(4)?, row.get(5)?, row.get(6)?, 4)?;
    let alert = area_from_columns(shape, row.get(7)?, row.get(8)?, row.get(9)?, 7)?;
    MachineZone::new(id, name, shape, danger, alert)
        .map(Zone::Machine)
        .map_err(|e| conversion_error(3, e))
}

// ─── Trait impls ──────────────────────────────────────────────────

#[async_trait]
impl ViolationStore for Store {
    async fn create_violation(&self, violation: NewViolation) -> Result<String, SourceError> {
        self.blocking(move |s| s.insert_violation(&violation)).await
    }

    async fn close_violation(
        &self,
        id: &str,
        exited_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), SourceError> {
        let id = id.to_string();
        let updated = self
            .blocking(move |s| s.update_violation_exit(&id, exited_at, duration_seconds))
            .await?;
        if !updated {
            tracing::debug!("close_violation: no row matched");
        }
        Ok(())
    }

    async fn list_open_violations(&self) -> Result<Vec<Violation>, SourceError> {
        self.blocking(|s| s.open_violations()).await
    }

    async fn list_violations(&self, query: ViolationQuery) -> Result<Vec<Violation>, SourceError> {
        self.blocking(move |s| s.violations(&query)).await
    }
}

#[async_trait]
impl ZoneStore for Store {
    async fn list_zones(&self) -> Result<Vec<Zone>, SourceError> {
        self.blocking(|s| s.zones()).await
    }

    async fn save_zone(&self, zone: Zone) -> Result<String, SourceError> {
        self.blocking(move |s| s.insert_zone(&zone, Utc::now())).await
    }

    async fn delete_zone(&self, id: &str) -> Result<bool, SourceError> {
        let id = id.to_string();
        self.blocking(move |s| s.remove_zone(&id)).await
    }
}

#[async_trait]
impl HistoryStore for Store {
    async fn append_history(&self, records: Vec<HistoryRecord>) -> Result<(), SourceError> {
        if records.is_empty() {
            return Ok(());
        }
        self.blocking(move |s| s.insert_history(&records)).await
    }

    async fn list_history(&self, query: HistoryQuery) -> Result<Vec<HistoryRecord>, SourceError> {
        self.blocking(move |s| s.history(&query)).await
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use zonewatch_core::{LatLng, ZoneLevel, ZoneSource};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn new_violation(device: &str, level: ZoneLevel, entered_at: DateTime<Utc>) -> NewViolation {
        NewViolation {
            device_id: device.into(),
            device_name: format!("Truck {device}"),
            zone_id: "7".into(),
            zone_name: "Kiln".into(),
            level,
            source: ZoneSource::Machine,
            position: LatLng::new(32.2, -7.9),
            entered_at,
        }
    }

    fn polygon_zone() -> Zone {
        let ring = vec![
            LatLng::new(32.0, -8.0),
            LatLng::new(32.0, -7.5),
            LatLng::new(32.5, -7.5),
        ];
        Zone::Machine(
            MachineZone::new(
                "",
                "Crusher",
                ZoneShape::Polygon,
                Some(Geometry::polygon(ring.clone()).expect("polygon")),
                None,
            )
            .expect("zone"),
        )
    }

    fn circle_zone() -> Zone {
        let center = LatLng::new(10.0, 10.0);
        Zone::Machine(
            MachineZone::new(
                "",
                "Press",
                ZoneShape::Circle,
                Some(Geometry::circle(center, 500.0).expect("circle")),
                Some(Geometry::circle(center, 1_000.0).expect("circle")),
            )
            .expect("zone"),
        )
    }

    fn gas_zone() -> Zone {
        Zone::Gas(GasSource {
            id: String::new(),
            name: "Ammonia".into(),
            position: LatLng::new(32.2, -7.9),
        })
    }

    fn record(device: &str, at: DateTime<Utc>, battery: Option<f64>) -> HistoryRecord {
        HistoryRecord {
            device_id: device.into(),
            device_name: device.into(),
            latitude: 32.2,
            longitude: -7.9,
            battery_percent: battery,
            altitude_m: Some(400.0),
            accuracy_m: None,
            timestamp: at,
        }
    }

    #[test]
    fn open_in_memory_creates_tables() {
        let store = Store::open_in_memory().expect("should open in-memory db");
        let conn = store.lock();
        for table in ["zones", "zone_violations", "device_history"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .expect("table should exist");
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn violation_create_and_close() {
        let store = Store::open_in_memory().expect("open");
        let entered = ts("2026-03-01T08:00:00Z");
        let id = store
            .insert_violation(&new_violation("d1", ZoneLevel::Danger, entered))
            .expect("insert");

        let open = store.open_violations().expect("open list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
        assert_eq!(open[0].level, ZoneLevel::Danger);
        assert_eq!(open[0].position, LatLng::new(32.2, -7.9));
        assert_eq!(open[0].entered_at, entered);
        assert!(open[0].is_open());

        let exited = entered + TimeDelta::seconds(95);
        assert!(store.update_violation_exit(&id, exited, 95).expect("update"));
        assert!(store.open_violations().expect("open list").is_empty());

        let closed = store.violation_by_id(&id).expect("row");
        assert_eq!(closed.exited_at, Some(exited));
        assert_eq!(closed.duration_seconds, Some(95));
    }

    #[test]
    fn closing_unknown_id_reports_no_change() {
        let store = Store::open_in_memory().expect("open");
        assert!(!store.update_violation_exit("404", Utc::now(), 1).expect("update"));
    }

    #[test]
    fn same_stay_inserted_twice_is_one_row() {
        let store = Store::open_in_memory().expect("open");
        let entered = ts("2026-03-01T08:00:00Z");
        let v = new_violation("d1", ZoneLevel::Danger, entered);

        let first = store.insert_violation(&v).expect("insert");
        let again = store.insert_violation(&v).expect("insert again");
        assert_eq!(first, again);

        // A different entry time is a different stay.
        let later = store
            .insert_violation(&new_violation("d1", ZoneLevel::Danger, entered + TimeDelta::seconds(1)))
            .expect("insert later");
        assert_ne!(first, later);
        assert_eq!(store.open_violations().expect("open").len(), 2);
    }

    #[test]
    fn insert_waits_out_a_held_write_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("zonewatch.db");
        let store = Store::open(&path).expect("open");

        let other = Connection::open(&path).expect("second connection");
        other.execute_batch("BEGIN IMMEDIATE").expect("take write lock");
        let release = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            other.execute_batch("COMMIT").expect("release write lock");
        });

        let v = new_violation("d1", ZoneLevel::Alert, ts("2026-03-01T08:00:00Z"));
        let id = store.insert_violation(&v).expect("insert after lock released");
        release.join().expect("release thread");
        assert_eq!(store.insert_violation(&v).expect("retry"), id);
    }

    #[test]
    fn violation_query_filters_and_orders() {
        let store = Store::open_in_memory().expect("open");
        let base = ts("2026-03-01T08:00:00Z");
        for (i, level) in [ZoneLevel::Danger, ZoneLevel::Alert, ZoneLevel::Alert]
            .into_iter()
            .enumerate()
        {
            let at = base + TimeDelta::hours(i as i64);
            store
                .insert_violation(&new_violation("d1", level, at))
                .expect("insert");
        }

        let all = store.violations(&ViolationQuery::default()).expect("all");
        let times: Vec<_> = all.iter().map(|v| v.entered_at).collect();
        assert_eq!(
            times,
            [
                base + TimeDelta::hours(2),
                base + TimeDelta::hours(1),
                base
            ]
        );

        let alerts = store
            .violations(&ViolationQuery {
                level: Some(ZoneLevel::Alert),
                ..ViolationQuery::default()
            })
            .expect("alerts");
        assert_eq!(alerts.len(), 2);

        let windowed = store
            .violations(&ViolationQuery {
                range: TimeRange::between(base, base + TimeDelta::minutes(90)),
                level: Some(ZoneLevel::Alert),
            })
            .expect("windowed");
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].entered_at, base + TimeDelta::hours(1));
    }

    #[test]
    fn zones_roundtrip_all_kinds() {
        let store = Store::open_in_memory().expect("open");
        let created = ts("2026-03-01T08:00:00Z");
        let poly_id = store.insert_zone(&polygon_zone(), created).expect("polygon");
        let circle_id = store
            .insert_zone(&circle_zone(), created + TimeDelta::seconds(1))
            .expect("circle");
        let gas_id = store
            .insert_zone(&gas_zone(), created + TimeDelta::seconds(2))
            .expect("gas");

        let zones = store.zones().expect("zones");
        let ids: Vec<&str> = zones.iter().map(Zone::id).collect();
        assert_eq!(ids, [gas_id.as_str(), circle_id.as_str(), poly_id.as_str()]);

        let Zone::Machine(poly) = &zones[2] else {
            panic!("expected machine zone");
        };
        assert_eq!(poly.shape, ZoneShape::Polygon);
        assert!(poly.alert.is_none());
        let Some(Geometry::Polygon { ring }) = &poly.danger else {
            panic!("expected polygon danger");
        };
        assert_eq!(ring.len(), 3);

        let Zone::Machine(circle) = &zones[1] else {
            panic!("expected machine zone");
        };
        assert_eq!(
            circle.alert,
            Some(Geometry::Circle {
                center: LatLng::new(10.0, 10.0),
                radius_m: 1_000.0
            })
        );

        let Zone::Gas(gas) = &zones[0] else {
            panic!("expected gas source");
        };
        assert_eq!(gas.position, LatLng::new(32.2, -7.9));
    }

    #[test]
    fn delete_zone() {
        let store = Store::open_in_memory().expect("open");
        let id = store.insert_zone(&gas_zone(), Utc::now()).expect("insert");
        assert!(store.remove_zone(&id).expect("delete"));
        assert!(!store.remove_zone(&id).expect("delete again"));
        assert!(store.zones().expect("zones").is_empty());
    }

    #[test]
    fn stored_geojson_text_is_accepted() {
        let store = Store::open_in_memory().expect("open");
        store
            .lock()
            .execute(
                "INSERT INTO zones (name, source, gas_source_position, created_at)
                 VALUES ('Legacy', 'gas', ?1, ?2)",
                params![
                    r#"{"type":"Point","coordinates":[-7.9,32.2]}"#,
                    to_db_time(Utc::now())
                ],
            )
            .expect("raw insert");
        let zones = store.zones().expect("zones");
        assert_eq!(zones.len(), 1);
        let Zone::Gas(gas) = &zones[0] else {
            panic!("expected gas source");
        };
        assert_eq!(gas.position, LatLng::new(32.2, -7.9));
    }

    #[test]
    fn history_filters_by_device_and_range() {
        let store = Store::open_in_memory().expect("open");
        let base = ts("2026-03-01T08:00:00Z");
        store
            .insert_history(&[
                record("a", base, Some(80.0)),
                record("b", base + TimeDelta::minutes(1), None),
                record("a", base + TimeDelta::minutes(2), Some(78.0)),
            ])
            .expect("insert");

        let all = store.history(&HistoryQuery::default()).expect("all");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp, base + TimeDelta::minutes(2));
        assert_eq!(all[0].altitude_m, Some(400.0));

        let a_only = store
            .history(&HistoryQuery {
                device_id: Some("a".into()),
                range: TimeRange::between(base + TimeDelta::seconds(30), base + TimeDelta::hours(1)),
            })
            .expect("filtered");
        assert_eq!(a_only.len(), 1);
        assert_eq!(a_only[0].battery_percent, Some(78.0));
    }

    #[tokio::test]
    async fn trait_impls_run_on_blocking_pool() {
        let store = Store::open_in_memory().expect("open");
        let id = store
            .create_violation(new_violation("d1", ZoneLevel::Alert, Utc::now()))
            .await
            .expect("create");
        assert_eq!(store.list_open_violations().await.expect("open").len(), 1);
        store
            .close_violation(&id, Utc::now(), 3)
            .await
            .expect("close");
        assert!(store.list_open_violations().await.expect("open").is_empty());

        store
            .append_history(vec![record("d1", Utc::now(), Some(50.0))])
            .await
            .expect("history");
        assert_eq!(
            store
                .list_history(HistoryQuery::default())
                .await
                .expect("list")
                .len(),
            1
        );

        let zone_id = store
            .save_zone(Zone::Gas(GasSource {
                id: String::new(),
                name: "Tank".into(),
                position: LatLng::new(32.2, -7.9),
            }))
            .await
            .expect("save zone");
        assert_eq!(store.list_zones().await.expect("zones").len(), 1);
        assert!(store.delete_zone(&zone_id).await.expect("delete"));
        assert!(!store.delete_zone(&zone_id).await.expect("delete again"));
        assert!(store.list_zones().await.expect("zones").is_empty());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("zonewatch.db");
        let id = {
            let store = Store::open(&path).expect("open");
            store
                .insert_violation(&new_violation("d1", ZoneLevel::Danger, Utc::now()))
                .expect("insert")
        };
        let reopened = Store::open(&path).expect("reopen");
        let open = reopened.open_violations().expect("open list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
    }
}
