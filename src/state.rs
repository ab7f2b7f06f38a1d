//! Application state
//!
//! Holds all shared components and state

use crate::error::{Error, Result};
use crate::motion_alert::{
    MotionAlertService, MotionAlertSettings, DEFAULT_COOLDOWN_MS, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_EVENT_BUFFER, DEFAULT_RECONNECT_DELAY_MS,
};
use crate::realtime_hub::RealtimeHub;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Motion detection control API base URL
    pub motion_api_url: String,
    /// Event channel (WebSocket) URL
    pub motion_events_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Cooldown before an unacknowledged alert is dismissed (ms)
    pub alert_cooldown_ms: u64,
    /// Alert history capacity
    pub alert_history_capacity: usize,
    /// Delay between event channel reconnect attempts (ms)
    pub reconnect_delay_ms: u64,
    pub auto_reconnect: bool,
    /// Devices subscribed at startup
    pub devices: Vec<String>,
    /// Control API request timeout
    pub control_timeout_sec: u64,
    /// Identity recorded on alerts acknowledged from the dashboard
    pub acknowledger_id: String,
    /// Pipeline events buffered for the dashboard forwarder
    pub event_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            motion_api_url: "http://localhost:3001".to_string(),
            motion_events_url: "ws://localhost:3001/ws/motion".to_string(),
            port: 8090,
            host: "0.0.0.0".to_string(),
            alert_cooldown_ms: DEFAULT_COOLDOWN_MS,
            alert_history_capacity: DEFAULT_HISTORY_CAPACITY,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            auto_reconnect: true,
            devices: Vec::new(),
            control_timeout_sec: 30,
            acknowledger_id: "dashboard".to_string(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl AppConfig {
    /// Load from the process environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            motion_api_url: lookup("MOTION_API_URL").unwrap_or(defaults.motion_api_url),
            motion_events_url: lookup("MOTION_EVENTS_URL").unwrap_or(defaults.motion_events_url),
            port: parse_var(&lookup, "PORT", defaults.port)?,
            host: lookup("HOST").unwrap_or(defaults.host),
            alert_cooldown_ms: parse_var(&lookup, "ALERT_COOLDOWN_MS", defaults.alert_cooldown_ms)?,
            alert_history_capacity: parse_var(
                &lookup,
                "ALERT_HISTORY_CAPACITY",
                defaults.alert_history_capacity,
            )?,
            reconnect_delay_ms: parse_var(
                &lookup,
                "RECONNECT_DELAY_MS",
                defaults.reconnect_delay_ms,
            )?,
            auto_reconnect: parse_var(&lookup, "AUTO_RECONNECT", defaults.auto_reconnect)?,
            devices: lookup("MOTION_DEVICES")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            control_timeout_sec: parse_var(
                &lookup,
                "CONTROL_TIMEOUT_SEC",
                defaults.control_timeout_sec,
            )?,
            acknowledger_id: lookup("ACKNOWLEDGER_ID").unwrap_or(defaults.acknowledger_id),
            event_buffer: parse_var(&lookup, "EVENT_BUFFER", defaults.event_buffer)?,
        };

        if config.alert_history_capacity == 0 {
            return Err(Error::Config(
                "ALERT_HISTORY_CAPACITY must be at least 1".to_string(),
            ));
        }

        if config.event_buffer == 0 {
            return Err(Error::Config("EVENT_BUFFER must be at least 1".to_string()));
        }

        Ok(config)
    }

    /// Pipeline tunables derived from this configuration
    pub fn motion_settings(&self) -> MotionAlertSettings {
        MotionAlertSettings {
            cooldown: Duration::from_millis(self.alert_cooldown_ms),
            history_capacity: self.alert_history_capacity,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            auto_reconnect: self.auto_reconnect,
            acknowledger: self.acknowledger_id.clone(),
            event_buffer: self.event_buffer,
        }
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_sec)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Motion alert pipeline
    pub motion: MotionAlertService,
    /// RealtimeHub (dashboard WebSocket)
    pub realtime: Arc<RealtimeHub>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8090);
        assert_eq!(config.alert_cooldown_ms, 5000);
        assert_eq!(config.alert_history_capacity, 100);
        assert!(config.auto_reconnect);
        assert!(config.devices.is_empty());
        assert_eq!(config.acknowledger_id, "dashboard");
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("ALERT_COOLDOWN_MS", "2500"),
            ("AUTO_RECONNECT", "false"),
            ("MOTION_DEVICES", "cam-1, cam-2,,"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(!config.auto_reconnect);
        assert_eq!(config.devices, vec!["cam-1", "cam-2"]);

        let settings = config.motion_settings();
        assert_eq!(settings.cooldown, Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_value() {
        let err = AppConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("PORT")));
    }

    #[test]
    fn test_zero_history_capacity_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("ALERT_HISTORY_CAPACITY", "0")])).is_err());
    }

    #[test]
    fn test_event_buffer() {
        let config = AppConfig::from_lookup(lookup_from(&[("EVENT_BUFFER", "64")])).unwrap();
        assert_eq!(config.motion_settings().event_buffer, 64);
        assert!(AppConfig::from_lookup(lookup_from(&[("EVENT_BUFFER", "0")])).is_err());
    }
}
