//! When to send an SMS for a zone entry, and detached dispatch.

use std::sync::Arc;
use std::time::Duration;

use zonewatch_core::{DeviceReading, NewViolation, ZoneLevel};
use zonewatch_sources::NotificationSink;
use zonewatch_sources::infobip::AlertMessage;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPolicy {
    enabled: bool,
    phone_number: Option<String>,
    danger_zone_alerts: bool,
    alert_zone_alerts: bool,
    low_battery_alerts: bool,
    battery_threshold: f64,
}

impl From<&NotificationConfig> for NotificationPolicy {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            phone_number: config
                .phone_number
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            danger_zone_alerts: config.danger_zone_alerts,
            alert_zone_alerts: config.alert_zone_alerts,
            low_battery_alerts: config.low_battery_alerts,
            battery_threshold: config.battery_threshold,
        }
    }
}

impl NotificationPolicy {
    /// Phone number to alert for a new violation at `level`, if any.
    pub fn recipient_for(&self, level: ZoneLevel) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        let allowed = match level {
            ZoneLevel::Danger => self.danger_zone_alerts,
            ZoneLevel::Alert => self.alert_zone_alerts,
        };
        if allowed { self.phone_number.as_deref() } else { None }
    }

    pub fn alert_for(&self, violation: &NewViolation) -> Option<AlertMessage> {
        let to = self.recipient_for(violation.level)?;
        Some(AlertMessage {
            to: to.to_string(),
            device_name: violation.device_name.clone(),
            zone_name: violation.zone_name.clone(),
            level: violation.level,
            timestamp: violation.entered_at,
        })
    }

    /// Low-battery flagging is independent of SMS delivery.
    pub fn flags_low_battery(&self, reading: &DeviceReading) -> bool {
        self.low_battery_alerts && reading.is_low_battery(self.battery_threshold)
    }
}

/// Send without blocking the caller. Failures and timeouts are only logged.
pub fn dispatch(
    sink: Arc<dyn NotificationSink>,
    message: AlertMessage,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, sink.notify(&message)).await {
            Ok(Ok(())) => tracing::info!(
                device = %message.device_name,
                zone = %message.zone_name,
                level = %message.level,
                "sms alert sent"
            ),
            Ok(Err(e)) => tracing::warn!(device = %message.device_name, "sms alert failed: {e}"),
            Err(_) => tracing::warn!(device = %message.device_name, "sms alert timed out"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use zonewatch_core::{LatLng, Position, ZoneSource};
    use zonewatch_sources::SourceError;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn config(enabled: bool, phone: Option<&str>) -> NotificationConfig {
        NotificationConfig {
            enabled,
            phone_number: phone.map(str::to_string),
            ..NotificationConfig::default()
        }
    }

    fn violation(level: ZoneLevel) -> NewViolation {
        NewViolation {
            device_id: "d1".into(),
            device_name: "Loader 3".into(),
            zone_id: "z1".into(),
            zone_name: "Kiln".into(),
            level,
            source: ZoneSource::Machine,
            position: LatLng::new(10.0, 10.0),
            entered_at: ts("2026-03-01T08:00:00Z"),
        }
    }

    #[test]
    fn disabled_policy_never_alerts() {
        let policy = NotificationPolicy::from(&config(false, Some("+212600000000")));
        assert_eq!(policy.recipient_for(ZoneLevel::Danger), None);
    }

    #[test]
    fn needs_a_phone_number() {
        let policy = NotificationPolicy::from(&config(true, Some("  ")));
        assert_eq!(policy.recipient_for(ZoneLevel::Danger), None);
        let policy = NotificationPolicy::from(&config(true, None));
        assert_eq!(policy.recipient_for(ZoneLevel::Alert), None);
    }

    #[test]
    fn level_flags_filter() {
        let mut cfg = config(true, Some("+212600000000"));
        cfg.alert_zone_alerts = false;
        let policy = NotificationPolicy::from(&cfg);
        assert_eq!(policy.recipient_for(ZoneLevel::Danger), Some("+212600000000"));
        assert_eq!(policy.recipient_for(ZoneLevel::Alert), None);
    }

    #[test]
    fn alert_message_carries_entry_details() {
        let policy = NotificationPolicy::from(&config(true, Some("+212600000000")));
        let msg = policy.alert_for(&violation(ZoneLevel::Danger)).expect("alert");
        assert_eq!(msg.to, "+212600000000");
        assert_eq!(msg.device_name, "Loader 3");
        assert_eq!(msg.zone_name, "Kiln");
        assert_eq!(msg.timestamp, ts("2026-03-01T08:00:00Z"));
    }

    #[test]
    fn low_battery_at_threshold() {
        let policy = NotificationPolicy::from(&config(false, None));
        let mut reading = DeviceReading {
            device_id: "d1".into(),
            device_name: "Loader 3".into(),
            position: Position::new(0.0, 0.0, ts("2026-03-01T08:00:00Z")),
            battery_percent: Some(20.0),
            altitude_m: None,
            accuracy_m: None,
        };
        assert!(policy.flags_low_battery(&reading));
        reading.battery_percent = Some(21.0);
        assert!(!policy.flags_low_battery(&reading));
        reading.battery_percent = None;
        assert!(!policy.flags_low_battery(&reading));
    }

    struct Recorder {
        sent: Mutex<Vec<AlertMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for Recorder {
        async fn notify(&self, message: &AlertMessage) -> Result<(), SourceError> {
            self.sent.lock().expect("lock").push(message.clone());
            if self.fail {
                Err(SourceError::NotConfigured("sms"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn dispatch_swallows_failures() {
        let sink = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let policy = NotificationPolicy::from(&config(true, Some("+212600000000")));
        let msg = policy.alert_for(&violation(ZoneLevel::Alert)).expect("alert");
        dispatch(sink.clone(), msg, Duration::from_secs(1))
            .await
            .expect("task completes");
        assert_eq!(sink.sent.lock().expect("lock").len(), 1);
    }
}
