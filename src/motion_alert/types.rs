//! Motion alert data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Default cooldown before an unacknowledged alert leaves the live set
pub const DEFAULT_COOLDOWN_MS: u64 = 5000;
/// Default number of alerts retained in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
/// Fixed delay between event channel reconnect attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
/// Pipeline events a slow subscriber may fall behind by before it lags
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

const DEFAULT_KIND: &str = "motion";
const DEFAULT_SUMMARY: &str = "Motion detected";

/// Severity attached to an alert by the detecting backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    /// Any level string this build does not know about
    #[serde(other)]
    Unknown,
}

/// Bounding box of a detected object (normalized or pixel coordinates, as sent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Object reported alongside a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Alert payload as it arrives on the event channel
///
/// Only the alert and device identities are mandatory; everything else is
/// defaulted when the alert is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlertEvent {
    pub alert_id: String,
    pub device_id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub alert_level: Option<AlertLevel>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub objects: Option<Vec<DetectedObject>>,
    #[serde(default)]
    pub recording: Option<Value>,
    #[serde(default)]
    pub snapshot: Option<Value>,
}

/// A single detection instance tracked by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: Option<f64>,
    pub level: AlertLevel,
    pub summary: String,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<DetectedObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
}

impl Alert {
    /// Build an alert from a channel payload, filling in defaults
    pub fn from_event(event: RawAlertEvent) -> Self {
        let device_name = event
            .device_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| event.device_id.clone());

        Self {
            id: event.alert_id,
            device_id: event.device_id,
            device_name,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            kind: event.kind.unwrap_or_else(|| DEFAULT_KIND.to_string()),
            confidence: event.confidence,
            level: event.alert_level.unwrap_or_default(),
            summary: event
                .summary
                .unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            objects: event.objects,
            recording: event.recording,
            snapshot: event.snapshot,
        }
    }

    /// Record an acknowledgement. Only the acknowledger and timestamp change
    /// once the alert is acknowledged.
    pub fn mark_acknowledged(&mut self, acknowledged_by: Option<&str>, at: DateTime<Utc>) {
        self.acknowledged = true;
        self.acknowledged_by = acknowledged_by.map(str::to_string);
        self.acknowledged_at = Some(at);
    }
}

/// Per-device detection parameters
///
/// Every field is optional so the same shape serves as a full configuration
/// and as a partial update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Sensitivity 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f64>,
    /// Pixel change ratio that counts as motion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Value>,
    /// Backend-specific parameters passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DetectionConfig {
    /// Overlay every field present in `patch`
    pub fn merge(&mut self, patch: &DetectionConfig) {
        if patch.enabled.is_some() {
            self.enabled = patch.enabled;
        }
        if patch.sensitivity.is_some() {
            self.sensitivity = patch.sensitivity;
        }
        if patch.threshold.is_some() {
            self.threshold = patch.threshold;
        }
        if patch.min_area.is_some() {
            self.min_area = patch.min_area;
        }
        if patch.cooldown_seconds.is_some() {
            self.cooldown_seconds = patch.cooldown_seconds;
        }
        if patch.zones.is_some() {
            self.zones = patch.zones.clone();
        }
        if patch.schedule.is_some() {
            self.schedule = patch.schedule.clone();
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Aggregate detection counters for a device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStatistics {
    #[serde(default)]
    pub total_alerts: u64,
    #[serde(default)]
    pub alerts_today: u64,
    #[serde(default)]
    pub alerts_this_week: u64,
    #[serde(default)]
    pub alerts_this_month: u64,
    #[serde(default)]
    pub acknowledged_alerts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alert_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub by_level: HashMap<String, u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tunables for the alert pipeline
#[derive(Debug, Clone)]
pub struct MotionAlertSettings {
    /// Cooldown before an unacknowledged alert is auto-dismissed
    pub cooldown: Duration,
    /// Maximum number of alerts kept in history
    pub history_capacity: usize,
    /// Delay before reconnecting after the channel closes
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
    /// Identity recorded on alerts acknowledged from this consumer
    pub acknowledger: String,
    /// Capacity of the lifecycle event broadcast
    pub event_buffer: usize,
}

impl Default for MotionAlertSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            auto_reconnect: true,
            acknowledger: "dashboard".to_string(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Why an alert left the live set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// Acknowledgement reported by the backend
    Acknowledged,
    /// Acknowledged from this consumer
    LocalAck,
    /// Cooldown elapsed
    Expired,
    /// Device was unsubscribed
    Unsubscribed,
    /// Live set cleared by the caller
    Cleared,
}

/// Lifecycle notifications published by the pipeline
///
/// Published while the store lock is held, so subscribers see arrivals and
/// clears in the order the store applied them.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    AlertArrived(Alert),
    AlertCleared {
        alert_id: String,
        device_id: String,
        reason: ClearReason,
    },
    ChannelStatus {
        connected: bool,
        last_error: Option<String>,
    },
}

/// Point-in-time view of the pipeline for callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionAlertSnapshot {
    pub live_alerts: HashMap<String, Alert>,
    pub history: Vec<Alert>,
    pub focused_device: Option<String>,
    pub config: Option<DetectionConfig>,
    pub statistics: Option<DetectionStatistics>,
    pub connected: bool,
    pub last_error: Option<String>,
    pub subscriptions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(alert_id: &str) -> RawAlertEvent {
        serde_json::from_value(serde_json::json!({
            "alertId": alert_id,
            "deviceId": "cam-1"
        }))
        .unwrap()
    }

    #[test]
    fn test_alert_defaults() {
        let alert = Alert::from_event(raw("a1"));
        assert_eq!(alert.id, "a1");
        assert_eq!(alert.device_name, "cam-1");
        assert_eq!(alert.kind, "motion");
        assert_eq!(alert.summary, "Motion detected");
        assert_eq!(alert.level, AlertLevel::Medium);
        assert!(!alert.acknowledged);
        assert!(alert.confidence.is_none());
    }

    #[test]
    fn test_raw_event_full_payload() {
        let json = r#"{
            "alertId": "a7",
            "deviceId": "cam-2",
            "deviceName": "Front Door",
            "timestamp": "2026-01-11T10:00:00Z",
            "type": "person",
            "confidence": 0.92,
            "alertLevel": "high",
            "summary": "Person at the door",
            "objects": [{"type": "person", "confidence": 0.9}],
            "recording": {"id": "rec-1"},
            "snapshot": "/snapshots/a7.jpg"
        }"#;

        let event: RawAlertEvent = serde_json::from_str(json).unwrap();
        let alert = Alert::from_event(event);
        assert_eq!(alert.device_name, "Front Door");
        assert_eq!(alert.kind, "person");
        assert_eq!(alert.level, AlertLevel::High);
        assert_eq!(alert.confidence, Some(0.92));
        assert_eq!(alert.objects.as_ref().map(Vec::len), Some(1));
        assert!(alert.recording.is_some());
        assert!(alert.snapshot.is_some());
    }

    #[test]
    fn test_unknown_alert_level() {
        let level: AlertLevel = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(level, AlertLevel::Unknown);
    }

    #[test]
    fn test_mark_acknowledged() {
        let mut alert = Alert::from_event(raw("a1"));
        let at = Utc::now();
        alert.mark_acknowledged(Some("operator"), at);
        assert!(alert.acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("operator"));
        assert_eq!(alert.acknowledged_at, Some(at));
    }

    #[test]
    fn test_config_merge() {
        let mut config: DetectionConfig = serde_json::from_value(serde_json::json!({
            "enabled": true,
            "sensitivity": 50,
            "threshold": 0.2,
            "nightMode": false
        }))
        .unwrap();

        let patch: DetectionConfig = serde_json::from_value(serde_json::json!({
            "sensitivity": 80,
            "nightMode": true
        }))
        .unwrap();

        config.merge(&patch);
        assert_eq!(config.enabled, Some(true));
        assert_eq!(config.sensitivity, Some(80.0));
        assert_eq!(config.threshold, Some(0.2));
        assert_eq!(config.extra.get("nightMode"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_partial_config_serialization_skips_absent_fields() {
        let patch = DetectionConfig {
            sensitivity: Some(30.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"sensitivity": 30.0}));
    }

    #[test]
    fn test_config_accepts_fractional_and_negative_tunables() {
        let config: DetectionConfig = serde_json::from_value(serde_json::json!({
            "sensitivity": 42.5,
            "minArea": -1,
            "cooldownSeconds": 0.5
        }))
        .unwrap();

        assert_eq!(config.sensitivity, Some(42.5));
        assert_eq!(config.min_area, Some(-1.0));
        assert_eq!(config.cooldown_seconds, Some(0.5));
        assert!(config.extra.is_empty());
    }
}
