//! SMS alerts through the Infobip `sms/2/text/advanced` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use zonewatch_core::ZoneLevel;

use crate::SourceError;
use crate::traits::NotificationSink;

const SERVICE: &str = "infobip";

/// One zone-entry alert to deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub to: String,
    pub device_name: String,
    pub zone_name: String,
    pub level: ZoneLevel,
    pub timestamp: DateTime<Utc>,
}

/// Strip a single leading `+` or `00` international prefix.
pub fn normalize_phone(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix('+')
        .or_else(|| raw.strip_prefix("00"))
        .unwrap_or(raw)
}

pub fn compose_alert_text(message: &AlertMessage) -> String {
    let trailer = match message.level {
        ZoneLevel::Danger => "DANGER ZONE - Immediate action required!",
        ZoneLevel::Alert => "ALERT ZONE - Caution advised",
    };
    format!(
        "SAFETY ALERT\n\nDevice: {}\nZone: {}\nType: {}\nTime: {}\n\n{}",
        message.device_name,
        message.zone_name,
        message.level.as_str().to_uppercase(),
        message.timestamp.to_rfc3339(),
        trailer
    )
}

fn request_body(sender: &str, message: &AlertMessage) -> serde_json::Value {
    json!({
        "messages": [{
            "destinations": [{ "to": normalize_phone(&message.to) }],
            "from": sender,
            "text": compose_alert_text(message),
        }]
    })
}

pub struct InfobipSms {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: String,
}

impl InfobipSms {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            sender: sender.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for InfobipSms {
    async fn notify(&self, message: &AlertMessage) -> Result<(), SourceError> {
        let response = self
            .client
            .post(format!("{}/sms/2/text/advanced", self.base_url))
            .header("Authorization", format!("App {}", self.api_key))
            .header("Accept", "application/json")
            .json(&request_body(&self.sender, message))
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
        tracing::debug!(to = %normalize_phone(&message.to), "sms accepted");
        Ok(())
    }
}
