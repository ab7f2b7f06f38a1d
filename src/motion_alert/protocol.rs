//! Event channel wire messages
//!
//! Every frame is a JSON object with a `type` discriminator. The payload is
//! carried in a `data` object; frames without `data` are read flat, with the
//! payload fields next to `type`.

use super::types::{DetectionConfig, DetectionStatistics, RawAlertEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `alert-acknowledged` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgedPayload {
    pub alert_id: String,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
}

/// `config-updated` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdatedPayload {
    pub device_id: String,
    pub config: DetectionConfig,
}

/// `statistics` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsPayload {
    pub statistics: DetectionStatistics,
}

/// `pending-alerts` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAlertsPayload {
    #[serde(default)]
    pub alerts: Vec<RawAlertEvent>,
}

/// Messages received from the backend
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    MotionAlert(RawAlertEvent),
    AlertAcknowledged(AcknowledgedPayload),
    ConfigUpdated(ConfigUpdatedPayload),
    Statistics(StatisticsPayload),
    PendingAlerts(PendingAlertsPayload),
    /// Frame with a `type` this build does not handle
    Unknown(String),
}

/// Decode failure for an inbound frame
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no type discriminator")]
    MissingType,
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}

impl InboundMessage {
    /// Parse one text frame
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut frame) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let kind = match frame.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(DecodeError::MissingType),
        };

        let payload = match frame.remove("data") {
            Some(data) => data,
            None => Value::Object(frame),
        };

        fn parse<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(payload).map_err(|source| DecodeError::Payload {
                kind: kind.to_string(),
                source,
            })
        }

        let message = match kind.as_str() {
            "motion-alert" => Self::MotionAlert(parse(&kind, payload)?),
            "alert-acknowledged" => Self::AlertAcknowledged(parse(&kind, payload)?),
            "config-updated" => Self::ConfigUpdated(parse(&kind, payload)?),
            "statistics" => Self::Statistics(parse(&kind, payload)?),
            "pending-alerts" => Self::PendingAlerts(parse(&kind, payload)?),
            _ => Self::Unknown(kind),
        };

        Ok(message)
    }

    /// Wire name of the message kind
    pub fn kind(&self) -> &str {
        match self {
            Self::MotionAlert(_) => "motion-alert",
            Self::AlertAcknowledged(_) => "alert-acknowledged",
            Self::ConfigUpdated(_) => "config-updated",
            Self::Statistics(_) => "statistics",
            Self::PendingAlerts(_) => "pending-alerts",
            Self::Unknown(kind) => kind,
        }
    }
}

/// Requests sent to the backend over the event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum OutboundMessage {
    SubscribeDevice {
        device_id: String,
    },
    UnsubscribeDevice {
        device_id: String,
    },
    AcknowledgeAlert {
        device_id: String,
        alert_id: String,
    },
    UpdateMotionConfig {
        device_id: String,
        config: DetectionConfig,
    },
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeDevice { .. } => "subscribe-device",
            Self::UnsubscribeDevice { .. } => "unsubscribe-device",
            Self::AcknowledgeAlert { .. } => "acknowledge-alert",
            Self::UpdateMotionConfig { .. } => "update-motion-config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_motion_alert() {
        let frame = json!({
            "type": "motion-alert",
            "data": {"alertId": "a1", "deviceId": "cam-1", "confidence": 0.8}
        })
        .to_string();

        match InboundMessage::decode(&frame).unwrap() {
            InboundMessage::MotionAlert(event) => {
                assert_eq!(event.alert_id, "a1");
                assert_eq!(event.device_id, "cam-1");
                assert_eq!(event.confidence, Some(0.8));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_flat_frame() {
        let frame = r#"{"type":"alert-acknowledged","alertId":"a1","acknowledgedBy":"op-2"}"#;
        let message = InboundMessage::decode(frame).unwrap();
        assert_eq!(
            message,
            InboundMessage::AlertAcknowledged(AcknowledgedPayload {
                alert_id: "a1".to_string(),
                acknowledged_by: Some("op-2".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_pending_alerts() {
        let frame = json!({
            "type": "pending-alerts",
            "data": {"alerts": [
                {"alertId": "a1", "deviceId": "cam-1"},
                {"alertId": "a2", "deviceId": "cam-2"}
            ]}
        })
        .to_string();

        match InboundMessage::decode(&frame).unwrap() {
            InboundMessage::PendingAlerts(payload) => assert_eq!(payload.alerts.len(), 2),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_statistics_and_config() {
        let stats = json!({"type": "statistics", "data": {"statistics": {"totalAlerts": 12}}});
        match InboundMessage::decode(&stats.to_string()).unwrap() {
            InboundMessage::Statistics(payload) => assert_eq!(payload.statistics.total_alerts, 12),
            other => panic!("unexpected message: {:?}", other),
        }

        let config = json!({
            "type": "config-updated",
            "data": {"deviceId": "cam-1", "config": {"sensitivity": 70, "minArea": 12.5, "cooldownSeconds": -1}}
        });
        match InboundMessage::decode(&config.to_string()).unwrap() {
            InboundMessage::ConfigUpdated(payload) => {
                assert_eq!(payload.device_id, "cam-1");
                assert_eq!(payload.config.sensitivity, Some(70.0));
                assert_eq!(payload.config.min_area, Some(12.5));
                assert_eq!(payload.config.cooldown_seconds, Some(-1.0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_kind() {
        let message = InboundMessage::decode(r#"{"type":"heartbeat","data":{}}"#).unwrap();
        assert_eq!(message, InboundMessage::Unknown("heartbeat".to_string()));
        assert_eq!(message.kind(), "heartbeat");
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            InboundMessage::decode("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            InboundMessage::decode("[1, 2]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"data":{}}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"type":"motion-alert","data":{"deviceId":"cam-1"}}"#),
            Err(DecodeError::Payload { .. })
        ));
    }

    #[test]
    fn test_outbound_encoding() {
        let message = OutboundMessage::AcknowledgeAlert {
            device_id: "cam-1".to_string(),
            alert_id: "a1".to_string(),
        };
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "acknowledge-alert", "data": {"deviceId": "cam-1", "alertId": "a1"}})
        );

        let subscribe = OutboundMessage::SubscribeDevice {
            device_id: "cam-9".to_string(),
        };
        let value: Value = serde_json::from_str(&subscribe.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "subscribe-device", "data": {"deviceId": "cam-9"}}));
        assert_eq!(subscribe.kind(), "subscribe-device");
    }
}
