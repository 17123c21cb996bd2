use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geo;

// ─── Coordinates ──────────────────────────────────────────────────

/// A WGS84 point in decimal degrees, latitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Reject non-finite values and latitudes/longitudes outside the WGS84 range.
    pub fn validate(self) -> Result<Self, GeofenceError> {
        let ok = self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng);
        if ok {
            Ok(self)
        } else {
            Err(GeofenceError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

// ─── Position & Device ────────────────────────────────────────────

/// Immutable sample of a device's location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    pub fn point(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// One record pulled from the position feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub device_id: String,
    pub device_name: String,
    pub position: Position,
    pub battery_percent: Option<f64>,
    pub altitude_m: Option<f64>,
    pub accuracy_m: Option<f64>,
}

impl DeviceReading {
    /// True when a battery level is reported and is at or below `threshold` percent.
    pub fn is_low_battery(&self, threshold: f64) -> bool {
        self.battery_percent.is_some_and(|b| b <= threshold)
    }
}

/// Latest known state of a tracked device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub last_position: Position,
}

impl From<&DeviceReading> for Device {
    fn from(reading: &DeviceReading) -> Self {
        Self {
            id: reading.device_id.clone(),
            name: reading.device_name.clone(),
            last_position: reading.position,
        }
    }
}

// ─── Zone enums ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneLevel {
    Danger,
    Alert,
}

impl ZoneLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Danger => "danger",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for ZoneLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneLevel {
    type Err = GeofenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "danger" => Ok(Self::Danger),
            "alert" => Ok(Self::Alert),
            _ => Err(GeofenceError::UnknownVariant {
                kind: "zone level",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneSource {
    Machine,
    Gas,
}

impl ZoneSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::Gas => "gas",
        }
    }
}

impl fmt::Display for ZoneSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneSource {
    type Err = GeofenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "machine" => Ok(Self::Machine),
            "gas" => Ok(Self::Gas),
            _ => Err(GeofenceError::UnknownVariant {
                kind: "zone source",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneShape {
    Polygon,
    Circle,
}

impl ZoneShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Circle => "circle",
        }
    }
}

impl FromStr for ZoneShape {
    type Err = GeofenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "polygon" => Ok(Self::Polygon),
            "circle" => Ok(Self::Circle),
            _ => Err(GeofenceError::UnknownVariant {
                kind: "zone shape",
                value: s.to_string(),
            }),
        }
    }
}

// ─── Geometry ─────────────────────────────────────────────────────

/// A containment area: an implicitly closed ring, or a center with a radius in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    Polygon { ring: Vec<LatLng> },
    Circle { center: LatLng, radius_m: f64 },
}

impl Geometry {
    /// Build a polygon from at least three valid vertices.
    ///
    /// A trailing vertex equal to the first one is dropped, so closed and
    /// open rings describe the same polygon.
    pub fn polygon(mut ring: Vec<LatLng>) -> Result<Self, GeofenceError> {
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            return Err(GeofenceError::DegenerateRing(ring.len()));
        }
        for vertex in &ring {
            vertex.validate()?;
        }
        Ok(Self::Polygon { ring })
    }

    pub fn circle(center: LatLng, radius_m: f64) -> Result<Self, GeofenceError> {
        center.validate()?;
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(GeofenceError::InvalidRadius(radius_m));
        }
        Ok(Self::Circle { center, radius_m })
    }

    pub fn shape(&self) -> ZoneShape {
        match self {
            Self::Polygon { .. } => ZoneShape::Polygon,
            Self::Circle { .. } => ZoneShape::Circle,
        }
    }

    /// Containment test: ray casting for polygons, haversine distance for circles.
    pub fn contains(&self, point: LatLng) -> bool {
        match self {
            Self::Polygon { ring } => geo::point_in_polygon(point, ring),
            Self::Circle { center, radius_m } => {
                geo::haversine_distance_m(point, *center) <= *radius_m
            }
        }
    }
}

// ─── Zones ────────────────────────────────────────────────────────

/// Operator-drawn zone around fixed equipment. Danger and alert areas are independent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineZone {
    pub id: String,
    pub name: String,
    pub shape: ZoneShape,
    pub danger: Option<Geometry>,
    pub alert: Option<Geometry>,
}

impl MachineZone {
    /// Build a machine zone, checking that every present geometry matches `shape`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        shape: ZoneShape,
        danger: Option<Geometry>,
        alert: Option<Geometry>,
    ) -> Result<Self, GeofenceError> {
        let id = id.into();
        for geometry in danger.iter().chain(alert.iter()) {
            if geometry.shape() != shape {
                return Err(GeofenceError::InvalidZone {
                    zone_id: id,
                    detail: format!(
                        "{} geometry in a {} zone",
                        geometry.shape().as_str(),
                        shape.as_str()
                    ),
                });
            }
        }
        Ok(Self {
            id,
            name: name.into(),
            shape,
            danger,
            alert,
        })
    }
}

/// Point hazard whose geometry is derived from live wind every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasSource {
    pub id: String,
    pub name: String,
    pub position: LatLng,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Zone {
    Machine(MachineZone),
    Gas(GasSource),
}

impl Zone {
    pub fn id(&self) -> &str {
        match self {
            Self::Machine(z) => &z.id,
            Self::Gas(g) => &g.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Machine(z) => &z.name,
            Self::Gas(g) => &g.name,
        }
    }

    pub fn source(&self) -> ZoneSource {
        match self {
            Self::Machine(_) => ZoneSource::Machine,
            Self::Gas(_) => ZoneSource::Gas,
        }
    }
}

/// Current wind at a gas source. Direction is where the wind blows toward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed_mps: f64,
    pub direction_deg: f64,
}

/// Concrete zone geometry for a single polling cycle.
///
/// Machine zones resolve to their stored geometry; gas sources to a plume
/// computed from that cycle's wind, or to no geometry when wind is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedZone {
    pub zone_id: String,
    pub zone_name: String,
    pub source: ZoneSource,
    pub danger: Option<Geometry>,
    pub alert: Option<Geometry>,
    /// Wind used to derive a gas plume (`None` for machine zones).
    pub wind: Option<Wind>,
}

impl ResolvedZone {
    pub fn has_geometry(&self) -> bool {
        self.danger.is_some() || self.alert.is_some()
    }
}

// ─── Containment ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolatingZone {
    pub zone_id: String,
    pub zone_name: String,
    pub level: ZoneLevel,
    pub source: ZoneSource,
}

/// Per-device, per-cycle containment status. `in_danger` and `in_alert` are never both set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentResult {
    pub in_danger: bool,
    pub in_alert: bool,
    pub violating_zone: Option<ViolatingZone>,
}

impl ContainmentResult {
    pub fn clear() -> Self {
        Self::default()
    }
}

// ─── Violations ───────────────────────────────────────────────────

/// A violation about to be written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewViolation {
    pub device_id: String,
    pub device_name: String,
    pub zone_id: String,
    pub zone_name: String,
    pub level: ZoneLevel,
    pub source: ZoneSource,
    pub position: LatLng,
    pub entered_at: DateTime<Utc>,
}

/// A persisted violation record; open while `exited_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    pub zone_id: String,
    pub zone_name: String,
    pub level: ZoneLevel,
    pub source: ZoneSource,
    pub position: LatLng,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl Violation {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("polygon ring needs at least 3 vertices, got {0}")]
    DegenerateRing(usize),

    #[error("invalid radius: {0}")]
    InvalidRadius(f64),

    #[error("invalid zone {zone_id}: {detail}")]
    InvalidZone { zone_id: String, detail: String },

    #[error("geometry parse error: {0}")]
    Parse(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

// ─── Tests ────────────────────────────────────────────────────────
