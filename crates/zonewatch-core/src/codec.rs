//! Geometry text encodings used by the zone store.
//!
//! Stored geometry uses EWKT with a `SRID=4326;` prefix and longitude-first
//! coordinate pairs; polygon rings are written closed. Reads also accept
//! GeoJSON `Point` / `Polygon` objects. Parsed rings are returned open (the
//! closing vertex is dropped) and latitude-first.

use serde_json::Value;

use crate::types::{GeofenceError, LatLng};

pub const SRID_PREFIX: &str = "SRID=4326;";

/// A parsed point or polygon ring.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedGeometry {
    Point(LatLng),
    Ring(Vec<LatLng>),
}

impl ParsedGeometry {
    pub fn into_point(self) -> Result<LatLng, GeofenceError> {
        match self {
            Self::Point(p) => Ok(p),
            Self::Ring(_) => Err(GeofenceError::Parse("expected POINT, got POLYGON".into())),
        }
    }

    pub fn into_ring(self) -> Result<Vec<LatLng>, GeofenceError> {
        match self {
            Self::Ring(r) => Ok(r),
            Self::Point(_) => Err(GeofenceError::Parse("expected POLYGON, got POINT".into())),
        }
    }
}

// ─── Encode ───────────────────────────────────────────────────────

pub fn point_to_wkt(point: LatLng) -> String {
    format!("{SRID_PREFIX}POINT({} {})", point.lng, point.lat)
}

/// Encode an open ring as a closed EWKT polygon.
pub fn ring_to_wkt(ring: &[LatLng]) -> String {
    let coords = ring
        .iter()
        .chain(ring.first())
        .map(|p| format!("{} {}", p.lng, p.lat))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{SRID_PREFIX}POLYGON(({coords}))")
}

// ─── Decode ───────────────────────────────────────────────────────

/// Parse a stored geometry value: strings as WKT, objects as GeoJSON.
pub fn parse_geometry_value(value: &Value) -> Result<ParsedGeometry, GeofenceError> {
    match value {
        Value::String(s) => parse_wkt(s),
        Value::Object(_) => parse_geojson(value),
        other => Err(GeofenceError::Parse(format!(
            "unsupported geometry value: {other}"
        ))),
    }
}

/// Parse geometry stored as text: a GeoJSON object, otherwise WKT.
pub fn parse_geometry_text(text: &str) -> Result<ParsedGeometry, GeofenceError> {
    if text.trim_start().starts_with('{') {
        let value: Value =
            serde_json::from_str(text).map_err(|e| GeofenceError::Parse(e.to_string()))?;
        parse_geometry_value(&value)
    } else {
        parse_wkt(text)
    }
}

/// Parse `POINT(lng lat)` or `POLYGON((lng lat, ...))`, with or without an
/// `SRID=...;` prefix.
pub fn parse_wkt(text: &str) -> Result<ParsedGeometry, GeofenceError> {
    let body = match text.trim().split_once(';') {
        Some((srid, rest)) if srid.trim().to_ascii_uppercase().starts_with("SRID=") => rest,
        _ => text,
    }
    .trim();

    let upper = body.to_ascii_uppercase();
    if let Some(inner) = strip_wrapped(&upper, body, "POINT", 1) {
        return parse_pair(inner).map(ParsedGeometry::Point);
    }
    if let Some(inner) = strip_wrapped(&upper, body, "POLYGON", 2) {
        // Only the outer ring; holes are not supported.
        let outer = inner.split("),").next().unwrap_or(inner);
        let ring = outer
            .split(',')
            .map(parse_pair)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ParsedGeometry::Ring(open_ring(ring)));
    }

    Err(GeofenceError::Parse(format!("unsupported WKT: {text}")))
}

/// `keyword(...)` with `depth` levels of parentheses; returns the inner text.
fn strip_wrapped<'a>(upper: &str, body: &'a str, keyword: &str, depth: usize) -> Option<&'a str> {
    if !upper.starts_with(keyword) {
        return None;
    }
    let mut inner = body[keyword.len()..].trim();
    for _ in 0..depth {
        inner = inner.strip_prefix('(')?.strip_suffix(')')?.trim();
    }
    Some(inner)
}

/// `"lng lat"` to a validated point.
fn parse_pair(pair: &str) -> Result<LatLng, GeofenceError> {
    let mut parts = pair.split_whitespace();
    let (Some(lng), Some(lat), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(GeofenceError::Parse(format!("bad coordinate pair: {pair:?}")));
    };
    let lng: f64 = lng
        .trim_start_matches('(')
        .parse()
        .map_err(|_| GeofenceError::Parse(format!("bad longitude: {lng}")))?;
    let lat: f64 = lat
        .trim_end_matches(')')
        .parse()
        .map_err(|_| GeofenceError::Parse(format!("bad latitude: {lat}")))?;
    LatLng::new(lat, lng).validate()
}

/// Parse a GeoJSON `Point` or `Polygon` geometry object.
pub fn parse_geojson(value: &Value) -> Result<ParsedGeometry, GeofenceError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeofenceError::Parse("GeoJSON without type".into()))?;
    let coords = value
        .get("coordinates")
        .ok_or_else(|| GeofenceError::Parse("GeoJSON without coordinates".into()))?;

    match kind {
        "Point" => json_position(coords).map(ParsedGeometry::Point),
        "Polygon" => {
            let outer = coords
                .get(0)
                .and_then(Value::as_array)
                .ok_or_else(|| GeofenceError::Parse("Polygon without outer ring".into()))?;
            let ring = outer
                .iter()
                .map(json_position)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ParsedGeometry::Ring(open_ring(ring)))
        }
        other => Err(GeofenceError::Parse(format!(
            "unsupported GeoJSON type: {other}"
        ))),
    }
}

/// `[lng, lat]` to a validated point.
fn json_position(value: &Value) -> Result<LatLng, GeofenceError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| GeofenceError::Parse(format!("bad GeoJSON position: {value}")))?;
    let lng = pair[0].as_f64();
    let lat = pair[1].as_f64();
    match (lat, lng) {
        (Some(lat), Some(lng)) => LatLng::new(lat, lng).validate(),
        _ => Err(GeofenceError::Parse(format!(
            "non-numeric GeoJSON position: {value}"
        ))),
    }
}

fn open_ring(mut ring: Vec<LatLng>) -> Vec<LatLng> {
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

// ─── Tests ────────────────────────────────────────────────────────
