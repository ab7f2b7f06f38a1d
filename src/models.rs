//! Shared API models
//!
//! Types shared by the web API and the realtime hub.

use crate::motion_alert::ChannelState;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub channel_connected: bool,
    pub live_alerts: usize,
    pub dashboard_clients: u64,
}

/// Pipeline status for the dashboard header
#[derive(Debug, Clone, Serialize)]
pub struct MotionStatusResponse {
    pub connected: bool,
    pub channel_state: ChannelState,
    pub last_error: Option<String>,
    pub subscriptions: Vec<String>,
    pub live_alerts: usize,
    pub history_len: usize,
    pub pending_dismissals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::success(3)).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "data": 3}));

        let json = serde_json::to_value(ApiResponse::<()>::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"ok": false, "error": "boom"}));
    }
}
