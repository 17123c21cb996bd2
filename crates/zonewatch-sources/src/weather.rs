//! Current-conditions weather feed (WeatherAPI-style `current.json`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use zonewatch_core::{LatLng, Wind};

use crate::SourceError;
use crate::traits::WeatherFeed;

const SERVICE: &str = "weather";

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current: Current,
}

#[derive(Debug, Deserialize)]
struct Current {
    wind_kph: f64,
    wind_degree: f64,
}

/// km/h to m/s.
pub fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

fn to_wind(current: &Current) -> Wind {
    Wind {
        speed_mps: kph_to_mps(current.wind_kph),
        direction_deg: current.wind_degree,
    }
}

pub struct WeatherApiFeed {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WeatherApiFeed {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl WeatherFeed for WeatherApiFeed {
    async fn fetch_wind(&self, at: LatLng) -> Result<Wind, SourceError> {
        let response = self
            .client
            .get(format!("{}/current.json", self.base_url))
            .query(&[
                ("key", self.api_key.clone()),
                ("q", format!("{},{}", at.lat, at.lng)),
                ("aqi", "no".to_string()),
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

        let body: CurrentResponse = response
            .json()
            .await
            .map_err(|e| SourceError::decode(SERVICE, e))?;
        Ok(to_wind(&body.current))
    }
}
