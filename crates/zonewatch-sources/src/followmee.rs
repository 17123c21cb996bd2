//! FollowMee `devicelist` position feed.
//!
//! `GET {base}/api/info.aspx?key=..&username=..&function=devicelist` returns
//! `{"Device": [{"DeviceID", "DeviceName", "Latitude", "Longitude",
//! "Battery", "Altitude(m)", "Accuracy", "Date"}, ...]}`. Numeric fields
//! sometimes arrive as strings; both are accepted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use zonewatch_core::{DeviceReading, Position};

use crate::SourceError;
use crate::traits::PositionFeed;

const SERVICE: &str = "followmee";

pub const DEFAULT_BASE_URL: &str = "https://www.followmee.com";

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(rename = "DeviceID")]
    device_id: Value,
    #[serde(rename = "DeviceName", default)]
    device_name: Option<String>,
    #[serde(rename = "Latitude")]
    latitude: Value,
    #[serde(rename = "Longitude")]
    longitude: Value,
    #[serde(rename = "Battery", default)]
    battery: Option<Value>,
    #[serde(rename = "Altitude(m)", default)]
    altitude_m: Option<Value>,
    #[serde(rename = "Accuracy", default)]
    accuracy: Option<Value>,
    #[serde(rename = "Date", default)]
    date: Option<String>,
}

/// Number or numeric string. `"N/A"`, `null` and friends give `None`.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS` taken as UTC.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn to_reading(raw: RawDevice, fetched_at: DateTime<Utc>) -> Result<DeviceReading, String> {
    let device_id = text(&raw.device_id).ok_or("missing DeviceID")?;
    let lat = number(&raw.latitude);
    let lng = number(&raw.longitude);
    let (Some(lat), Some(lng)) = (lat, lng) else {
        return Err(format!("device {device_id}: non-numeric coordinates"));
    };
    let point = zonewatch_core::LatLng::new(lat, lng)
        .validate()
        .map_err(|e| format!("device {device_id}: {e}"))?;

    let timestamp = match raw.date.as_deref() {
        Some(d) => parse_date(d).unwrap_or_else(|| {
            tracing::debug!(device_id = %device_id, date = d, "unparseable Date, using fetch time");
            fetched_at
        }),
        None => fetched_at,
    };

    Ok(DeviceReading {
        device_name: raw
            .device_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| device_id.clone()),
        device_id,
        position: Position::new(point.lat, point.lng, timestamp),
        battery_percent: raw.battery.as_ref().and_then(number),
        altitude_m: raw.altitude_m.as_ref().and_then(number),
        accuracy_m: raw.accuracy.as_ref().and_then(number),
    })
}

/// Decode a `devicelist` payload. Malformed entries are dropped with a warning.
pub fn parse_device_list(body: &Value, fetched_at: DateTime<Utc>) -> Vec<DeviceReading> {
    let Some(devices) = body.get("Device").and_then(Value::as_array) else {
        return Vec::new();
    };

    devices
        .iter()
        .filter_map(|entry| {
            let parsed = serde_json::from_value::<RawDevice>(entry.clone())
                .map_err(|e| e.to_string())
                .and_then(|raw| to_reading(raw, fetched_at));
            match parsed {
                Ok(reading) => Some(reading),
                Err(reason) => {
                    tracing::warn!(%reason, "dropping feed entry");
                    None
                }
            }
        })
        .collect()
}

/// HTTP client for the FollowMee API.
pub struct FollowMeeFeed {
    client: reqwest::Client,
    base_url: String,
    username: String,
    api_key: String,
}

impl FollowMeeFeed {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self) -> String {
        format!("{}/api/info.aspx", self.base_url)
    }
}

#[async_trait]
impl PositionFeed for FollowMeeFeed {
    async fn fetch_positions(&self) -> Result<Vec<DeviceReading>, SourceError> {
        let response = self
            .client
            .get(self.url())
            .query(&[
                ("key", self.api_key.as_str()),
                ("username", self.username.as_str()),
                ("function", "devicelist"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::decode(SERVICE, e))?;
        Ok(parse_device_list(&body, Utc::now()))
    }
}

// ─── Tests ────────────────────────────────────────────────────────
