//! Daemon configuration: `zonewatch.toml` plus environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "zonewatch.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_secs: u64,
    pub call_timeout_ms: u64,
    pub database_path: String,
    pub position_feed: PositionFeedConfig,
    pub weather: WeatherConfig,
    pub sms: SmsConfig,
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            call_timeout_ms: 5000,
            database_path: "zonewatch.db".to_string(),
            position_feed: PositionFeedConfig::default(),
            weather: WeatherConfig::default(),
            sms: SmsConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PositionFeedConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub api_key: Option<String>,
}

impl Default for PositionFeedConfig {
    fn default() -> Self {
        Self {
            base_url: zonewatch_sources::followmee::DEFAULT_BASE_URL.to_string(),
            username: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: zonewatch_sources::weather::DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub phone_number: Option<String>,
    pub danger_zone_alerts: bool,
    pub alert_zone_alerts: bool,
    pub low_battery_alerts: bool,
    pub battery_threshold: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            phone_number: None,
            danger_zone_alerts: true,
            alert_zone_alerts: true,
            low_battery_alerts: true,
            battery_threshold: 20.0,
        }
    }
}

impl Config {
    /// Read `path` if it exists (defaults otherwise) and apply the process
    /// environment on top.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&content).with_context(|| format!("invalid {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Secrets and endpoints from the environment win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FOLLOWMEE_API_KEY") {
            self.position_feed.api_key = Some(v);
        }
        if let Some(v) = get("FOLLOWMEE_USERNAME") {
            self.position_feed.username = Some(v);
        }
        if let Some(v) = get("WEATHER_API_KEY") {
            self.weather.api_key = Some(v);
        }
        if let Some(v) = get("WEATHER_BASE_URL") {
            self.weather.base_url = v;
        }
        if let Some(v) = get("INFOBIP_API_KEY") {
            self.sms.api_key = Some(v);
        }
        if let Some(v) = get("INFOBIP_BASE_URL") {
            self.sms.base_url = Some(v);
        }
        if let Some(v) = get("INFOBIP_SMS_FROM") {
            self.sms.sender = Some(v);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml("").expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.call_timeout(), Duration::from_millis(5000));
        assert!(!config.notifications.enabled);
        assert_eq!(config.notifications.battery_threshold, 20.0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            poll_interval_secs = 10
            database_path = "/var/lib/zonewatch/zw.db"

            [notifications]
            enabled = true
            phone_number = "+212600000000"
            alert_zone_alerts = false
            "#,
        )
        .expect("parse");
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.call_timeout_ms, 5000);
        assert_eq!(config.database_path, "/var/lib/zonewatch/zw.db");
        assert!(config.notifications.enabled);
        assert!(config.notifications.danger_zone_alerts);
        assert!(!config.notifications.alert_zone_alerts);
        assert_eq!(
            config.position_feed.base_url,
            zonewatch_sources::followmee::DEFAULT_BASE_URL
        );
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(Config::from_toml("poll_interval_secs = \"soon\"").is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_toml(
            r#"
            [position_feed]
            api_key = "from-file"
            username = "site"
            "#,
        )
        .expect("parse");
        let env: HashMap<&str, &str> = HashMap::from([
            ("FOLLOWMEE_API_KEY", "from-env"),
            ("WEATHER_BASE_URL", "http://localhost:9000/v1"),
            ("INFOBIP_SMS_FROM", "ZoneWatch"),
            ("INFOBIP_API_KEY", "  "),
        ]);
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.position_feed.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.position_feed.username.as_deref(), Some("site"));
        assert_eq!(config.weather.base_url, "http://localhost:9000/v1");
        assert_eq!(config.sms.sender.as_deref(), Some("ZoneWatch"));
        // Blank values do not clear anything.
        assert_eq!(config.sms.api_key, None);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = Config {
            poll_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
