//! RealtimeHub - Dashboard WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management
//! - Motion alert broadcasting (one message per arrival)
//! - Alert cleared notifications (acknowledged, expired, unsubscribed)
//! - Event channel status distribution
//! - Resync notice when the forwarder fell behind the pipeline
//!
//! Note: Only notifications are pushed. Full alert state is fetched via
//! HTTP GET /api/motion/alerts.

use crate::motion_alert::{Alert, ClearReason, PipelineEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A motion alert arrived on a subscribed device
    MotionAlert(Alert),
    /// An alert left the live set
    AlertCleared(AlertClearedMessage),
    /// Event channel opened or closed
    ChannelStatus(ChannelStatusMessage),
    /// Notifications were dropped; clients must refetch alert state
    Resync(ResyncMessage),
}

impl HubMessage {
    fn kind(&self) -> &'static str {
        match self {
            HubMessage::MotionAlert(_) => "motion_alert",
            HubMessage::AlertCleared(_) => "alert_cleared",
            HubMessage::ChannelStatus(_) => "channel_status",
            HubMessage::Resync(_) => "resync",
        }
    }
}

/// Alert cleared notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertClearedMessage {
    pub alert_id: String,
    pub device_id: String,
    pub reason: ClearReason,
}

/// Event channel status message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatusMessage {
    pub connected: bool,
    pub last_error: Option<String>,
    pub timestamp: String,
}

/// Resync notice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncMessage {
    /// Pipeline events that never reached the dashboard
    pub skipped: u64,
    pub timestamp: String,
}

impl From<PipelineEvent> for HubMessage {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::AlertArrived(alert) => HubMessage::MotionAlert(alert),
            PipelineEvent::AlertCleared {
                alert_id,
                device_id,
                reason,
            } => HubMessage::AlertCleared(AlertClearedMessage {
                alert_id,
                device_id,
                reason,
            }),
            PipelineEvent::ChannelStatus {
                connected,
                last_error,
            } => HubMessage::ChannelStatus(ChannelStatusMessage {
                connected,
                last_error,
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
        }
    }
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        tracing::debug!(message_type = %message.kind(), "Broadcasting message to clients");

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay pipeline events to dashboard clients until the pipeline goes away.
///
/// A lagged receiver has lost events for good, so clients get a `resync`
/// notice telling them to refetch alerts over HTTP.
pub async fn forward_pipeline_events(
    hub: Arc<RealtimeHub>,
    mut events: broadcast::Receiver<PipelineEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => hub.broadcast(HubMessage::from(event)).await,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, "Dashboard forwarder lagged; requesting resync");
                hub.broadcast(HubMessage::Resync(ResyncMessage {
                    skipped,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                }))
                .await;
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("Pipeline event stream closed");
}
