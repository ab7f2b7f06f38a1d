//! ControlClient - Motion Detection Control API Adapter
//!
//! ## Responsibilities
//!
//! - Start/stop detection on a device
//! - Fetch/update per-device detection configuration
//! - Fetch detection statistics
//!
//! Every response carries a `success` flag; `false` is a rejected request
//! even when the HTTP status is 2xx.

use crate::error::{Error, Result};
use crate::motion_alert::{DetectionConfig, DetectionStatistics};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use reqwest::Url;
use std::time::Duration;

/// Request/response operations consumed by the alert pipeline
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn start_detection(&self, device_id: &str, config: Option<&DetectionConfig>)
        -> Result<()>;
    async fn stop_detection(&self, device_id: &str) -> Result<()>;
    async fn fetch_config(&self, device_id: &str) -> Result<DetectionConfig>;
    async fn update_config(&self, device_id: &str, patch: &DetectionConfig) -> Result<()>;
    async fn fetch_statistics(&self, device_id: &str) -> Result<DetectionStatistics>;
}

/// Response envelope of the control API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ControlResponse<T> {
    /// Turn a rejected envelope into an error naming the operation
    pub fn into_result(self, operation: &str) -> Result<Option<T>> {
        if self.success {
            return Ok(self.data);
        }

        let reason = self
            .error
            .or(self.message)
            .unwrap_or_else(|| "request rejected".to_string());
        Err(Error::Control(format!("{} failed: {}", operation, reason)))
    }

    /// Like [`Self::into_result`] but a successful envelope must carry data
    pub fn into_data(self, operation: &str) -> Result<T> {
        self.into_result(operation)?
            .ok_or_else(|| Error::Control(format!("{} failed: response has no data", operation)))
    }
}

/// HTTP implementation of [`ControlApi`]
pub struct HttpControlClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpControlClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid control API URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Control API URL cannot carry a path: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// `{base}/api/motion-detection/{device_id}/{action}`, with the device id
    /// escaped as a single path segment
    fn device_url(&self, device_id: &str, action: &str) -> Result<Url> {
        if device_id.is_empty() || device_id == "." || device_id == ".." {
            return Err(Error::Validation(format!("Invalid device id: {:?}", device_id)));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Control API URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "motion-detection", device_id, action]);
        Ok(url)
    }

    /// Decode the envelope; non-2xx bodies are still read for their message
    async fn read_envelope<T: DeserializeOwned>(
        operation: &str,
        resp: reqwest::Response,
    ) -> Result<ControlResponse<T>> {
        let status = resp.status();
        let body = resp.text().await?;

        match serde_json::from_str::<ControlResponse<T>>(&body) {
            Ok(envelope) if status.is_success() => Ok(envelope),
            Ok(envelope) => Err(Error::Control(format!(
                "{} failed: {} - {}",
                operation,
                status,
                envelope
                    .error
                    .or(envelope.message)
                    .unwrap_or_else(|| "no details".to_string())
            ))),
            Err(_) if !status.is_success() => Err(Error::Control(format!(
                "{} failed: {} - {}",
                operation, status, body
            ))),
            Err(e) => Err(Error::Serialization(e)),
        }
    }
}

#[async_trait]
impl ControlApi for HttpControlClient {
    async fn start_detection(
        &self,
        device_id: &str,
        config: Option<&DetectionConfig>,
    ) -> Result<()> {
        let url = self.device_url(device_id, "start")?;
        let mut req = self.client.post(url);
        if let Some(config) = config {
            req = req.json(config);
        }

        let resp = req.send().await?;
        Self::read_envelope::<serde_json::Value>("start detection", resp)
            .await?
            .into_result("start detection")?;

        tracing::info!(device_id = %device_id, "Motion detection started");
        Ok(())
    }

    async fn stop_detection(&self, device_id: &str) -> Result<()> {
        let url = self.device_url(device_id, "stop")?;
        let resp = self.client.post(url).send().await?;
        Self::read_envelope::<serde_json::Value>("stop detection", resp)
            .await?
            .into_result("stop detection")?;

        tracing::info!(device_id = %device_id, "Motion detection stopped");
        Ok(())
    }

    async fn fetch_config(&self, device_id: &str) -> Result<DetectionConfig> {
        let url = self.device_url(device_id, "config")?;
        let resp = self.client.get(url).send().await?;
        Self::read_envelope("fetch config", resp)
            .await?
            .into_data("fetch config")
    }

    async fn update_config(&self, device_id: &str, patch: &DetectionConfig) -> Result<()> {
        let url = self.device_url(device_id, "config")?;
        let resp = self.client.put(url).json(patch).send().await?;
        Self::read_envelope::<serde_json::Value>("update config", resp)
            .await?
            .into_result("update config")?;

        tracing::info!(device_id = %device_id, "Motion detection config updated");
        Ok(())
    }

    async fn fetch_statistics(&self, device_id: &str) -> Result<DetectionStatistics> {
        let url = self.device_url(device_id, "statistics")?;
        let resp = self.client.get(url).send().await?;
        Self::read_envelope("fetch statistics", resp)
            .await?
            .into_data("fetch statistics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success() {
        let json = r#"{"success": true, "data": {"sensitivity": 40}}"#;
        let envelope: ControlResponse<DetectionConfig> = serde_json::from_str(json).unwrap();
        let config = envelope.into_data("fetch config").unwrap();
        assert_eq!(config.sensitivity, Some(40.0));
    }

    #[test]
    fn test_envelope_rejected() {
        let json = r#"{"success": false, "error": "device offline"}"#;
        let envelope: ControlResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        let err = envelope.into_result("start detection").unwrap_err();
        assert!(matches!(err, Error::Control(ref msg) if msg.contains("device offline")));
    }

    #[test]
    fn test_envelope_rejected_falls_back_to_message() {
        let json = r#"{"success": false, "message": "not supported"}"#;
        let envelope: ControlResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        let err = envelope.into_result("stop detection").unwrap_err();
        assert_eq!(err.to_string(), "Control request failed: stop detection failed: not supported");
    }

    #[test]
    fn test_envelope_missing_data() {
        let json = r#"{"success": true}"#;
        let envelope: ControlResponse<DetectionStatistics> = serde_json::from_str(json).unwrap();
        assert!(envelope.into_data("fetch statistics").is_err());
    }

    #[test]
    fn test_device_url() {
        let client =
            HttpControlClient::new("http://localhost:3001/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.device_url("cam-1", "start").unwrap().as_str(),
            "http://localhost:3001/api/motion-detection/cam-1/start"
        );
    }

    #[test]
    fn test_device_url_keeps_base_path() {
        let client =
            HttpControlClient::new("http://gateway:8080/motion", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.device_url("cam-1", "config").unwrap().as_str(),
            "http://gateway:8080/motion/api/motion-detection/cam-1/config"
        );
    }

    #[test]
    fn test_device_url_escapes_device_id() {
        let client =
            HttpControlClient::new("http://localhost:3001", Duration::from_secs(5)).unwrap();
        let url = client
            .device_url("x/../../../admin/reset?", "stop")
            .unwrap();

        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(&segments[..2], &["api", "motion-detection"]);
        assert_eq!(segments[3], "stop");
        assert!(!segments[2].contains('/'));
        assert!(!segments[2].contains('?'));
        assert!(url.query().is_none());
        assert!(url.path().starts_with("/api/motion-detection/x%2F..%2F"));
    }

    #[test]
    fn test_device_url_rejects_dot_segments() {
        let client =
            HttpControlClient::new("http://localhost:3001", Duration::from_secs(5)).unwrap();
        for device_id in ["", ".", ".."] {
            assert!(matches!(
                client.device_url(device_id, "stop"),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpControlClient::new("not a url", Duration::from_secs(5)),
            Err(Error::Config(_))
        ));
    }
}
