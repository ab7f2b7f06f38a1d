//! MotionAlert - Motion Alert Event Pipeline
//!
//! ## Responsibilities
//!
//! - ChannelManager: duplex event channel with fixed-delay reconnect
//! - AlertStore: live alert set + bounded history
//! - SubscriptionRegistry: devices this consumer watches
//! - DismissalScheduler: cooldown auto-expiry of live alerts
//! - Config/statistics calls through the control API
//!
//! ## Design Principles
//!
//! - One `MotionAlertService` per session, shared by handle
//! - Store mutations and timer arming happen under the store lock, so an
//!   expiring timer never races an arrival or acknowledgement
//! - Channel failures are absorbed and recorded; control failures are
//!   returned to the caller

mod alert_store;
mod channel;
mod dismissal;
mod protocol;
mod subscription;
mod types;
mod ws_transport;

pub use alert_store::AlertStore;
pub use channel::{
    ChannelError, ChannelHandler, ChannelLink, ChannelManager, ChannelState, EventTransport,
    FrameSink, FrameStream,
};
pub use dismissal::DismissalScheduler;
pub use protocol::{
    AcknowledgedPayload, ConfigUpdatedPayload, DecodeError, InboundMessage, OutboundMessage,
    PendingAlertsPayload, StatisticsPayload,
};
pub use subscription::SubscriptionRegistry;
pub use types::*;
pub use ws_transport::WebSocketTransport;

use crate::control_client::ControlApi;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};

/// Invoked once for every alert arrival
pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Config and statistics of the device currently in focus
#[derive(Default)]
struct DeviceCache {
    device_id: Option<String>,
    config: Option<DetectionConfig>,
    statistics: Option<DetectionStatistics>,
}

impl DeviceCache {
    /// Switch focus; cached values of another device are dropped
    fn focus(&mut self, device_id: &str) {
        if self.device_id.as_deref() != Some(device_id) {
            self.device_id = Some(device_id.to_string());
            self.config = None;
            self.statistics = None;
        }
    }

    fn is_focused(&self, device_id: &str) -> bool {
        self.device_id.as_deref() == Some(device_id)
    }
}

struct Inner {
    self_ref: Weak<Inner>,
    settings: MotionAlertSettings,
    store: RwLock<AlertStore>,
    dismissals: DismissalScheduler,
    registry: SubscriptionRegistry,
    channel: Arc<ChannelManager>,
    control: Arc<dyn ControlApi>,
    cache: RwLock<DeviceCache>,
    last_error: RwLock<Option<String>>,
    on_alert: Option<AlertCallback>,
    events: broadcast::Sender<PipelineEvent>,
}

/// Builder for [`MotionAlertService`]
pub struct MotionAlertServiceBuilder {
    transport: Arc<dyn EventTransport>,
    control: Arc<dyn ControlApi>,
    settings: MotionAlertSettings,
    on_alert: Option<AlertCallback>,
}

impl MotionAlertServiceBuilder {
    pub fn with_settings(mut self, settings: MotionAlertSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_alert_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.on_alert = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> MotionAlertService {
        let Self {
            transport,
            control,
            settings,
            on_alert,
        } = self;
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let handler: Weak<dyn ChannelHandler> = weak.clone();
            Inner {
                self_ref: weak.clone(),
                store: RwLock::new(AlertStore::new(settings.history_capacity)),
                dismissals: DismissalScheduler::new(settings.cooldown),
                registry: SubscriptionRegistry::new(),
                channel: Arc::new(ChannelManager::new(
                    transport,
                    handler,
                    settings.reconnect_delay,
                    settings.auto_reconnect,
                )),
                control,
                cache: RwLock::new(DeviceCache::default()),
                last_error: RwLock::new(None),
                on_alert,
                events,
                settings,
            }
        });

        MotionAlertService { inner }
    }
}

/// Session context of the alert pipeline
#[derive(Clone)]
pub struct MotionAlertService {
    inner: Arc<Inner>,
}

impl MotionAlertService {
    pub fn builder(
        transport: Arc<dyn EventTransport>,
        control: Arc<dyn ControlApi>,
    ) -> MotionAlertServiceBuilder {
        MotionAlertServiceBuilder {
            transport,
            control,
            settings: MotionAlertSettings::default(),
            on_alert: None,
        }
    }

    /// Lifecycle notifications (arrivals, cleared alerts, channel status)
    /// in the order the store applied them
    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    // ========================================
    // Channel
    // ========================================

    /// Open the event channel; no-op while connecting or open
    pub fn connect(&self) {
        self.inner.channel.connect();
    }

    /// Close the event channel and cancel any pending reconnect.
    /// Subscriptions are kept for the next `connect()`.
    pub async fn disconnect(&self) {
        self.inner.channel.disconnect();
        self.inner.publish(PipelineEvent::ChannelStatus {
            connected: false,
            last_error: self.last_error().await,
        });
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_open()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner.channel.state()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().await.clone()
    }

    // ========================================
    // Subscriptions
    // ========================================

    /// Watch a device. Recorded even while disconnected so the next
    /// connect replays it.
    pub async fn subscribe(&self, device_id: &str) {
        self.inner.subscribe(device_id).await;
    }

    /// Stop watching a device and drop its live alerts
    pub async fn unsubscribe(&self, device_id: &str) {
        self.inner.unsubscribe(device_id).await;
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.registry.list().await
    }

    pub async fn is_subscribed(&self, device_id: &str) -> bool {
        self.inner.registry.contains(device_id).await
    }

    // ========================================
    // Alert lifecycle
    // ========================================

    /// Handle an alert arrival as if it came from the channel
    pub async fn on_alert_arrival(&self, event: RawAlertEvent) -> Alert {
        self.inner.on_alert_arrival(event).await
    }

    /// Handle an acknowledgement reported by the backend
    pub async fn on_acknowledgement(&self, alert_id: &str, acknowledged_by: Option<&str>) {
        self.inner
            .on_acknowledgement(alert_id, acknowledged_by)
            .await;
    }

    /// Acknowledge a live alert from this consumer.
    ///
    /// Returns false when the alert is not live. The alert leaves the live
    /// set whether or not the outbound request could be sent.
    pub async fn acknowledge_locally(&self, alert_id: &str) -> bool {
        self.inner.acknowledge_locally(alert_id).await
    }

    /// Cancel every dismissal timer and empty the live set
    pub async fn clear_all(&self) {
        self.inner.clear_all().await;
    }

    pub async fn live_alerts(&self) -> Vec<Alert> {
        self.inner.store.read().await.live_alerts()
    }

    pub async fn live_alert_map(&self) -> HashMap<String, Alert> {
        self.inner.store.read().await.live_map()
    }

    pub async fn live_alert(&self, alert_id: &str) -> Option<Alert> {
        self.inner.store.read().await.live(alert_id).cloned()
    }

    pub async fn history(&self) -> Vec<Alert> {
        self.inner.store.read().await.history()
    }

    pub async fn history_len(&self) -> usize {
        self.inner.store.read().await.history_len()
    }

    pub async fn live_count(&self) -> usize {
        self.inner.store.read().await.live_count()
    }

    /// History filtered by device and/or truncated, newest first
    pub async fn query_history(&self, device_id: Option<&str>, limit: Option<usize>) -> Vec<Alert> {
        let store = self.inner.store.read().await;
        let limit = limit.unwrap_or(store.capacity());
        match device_id {
            Some(device_id) => store.history_by_device(device_id, limit),
            None => store.history_latest(limit),
        }
    }

    pub fn pending_dismissals(&self) -> usize {
        self.inner.dismissals.armed_count()
    }

    // ========================================
    // Config / statistics
    // ========================================

    /// Start detection on a device, then subscribe to it
    pub async fn start_detection(
        &self,
        device_id: &str,
        config: Option<DetectionConfig>,
    ) -> Result<()> {
        let result = self
            .inner
            .control
            .start_detection(device_id, config.as_ref())
            .await;
        self.inner.record_control("start detection", device_id, &result).await;
        result?;

        self.inner.subscribe(device_id).await;
        Ok(())
    }

    /// Stop detection on a device, then unsubscribe and drop its live alerts
    pub async fn stop_detection(&self, device_id: &str) -> Result<()> {
        let result = self.inner.control.stop_detection(device_id).await;
        self.inner.record_control("stop detection", device_id, &result).await;
        result?;

        self.inner.unsubscribe(device_id).await;
        Ok(())
    }

    /// Fetch a device's full configuration and focus the cache on it
    pub async fn fetch_config(&self, device_id: &str) -> Result<DetectionConfig> {
        let result = self.inner.control.fetch_config(device_id).await;
        self.inner.record_control("fetch config", device_id, &result).await;
        let config = result?;

        let mut cache = self.inner.cache.write().await;
        cache.focus(device_id);
        cache.config = Some(config.clone());
        Ok(config)
    }

    /// Push a partial configuration, notify other consumers over the
    /// channel, then merge it into the cached configuration
    pub async fn update_config(&self, device_id: &str, patch: DetectionConfig) -> Result<()> {
        let result = self.inner.control.update_config(device_id, &patch).await;
        self.inner.record_control("update config", device_id, &result).await;
        result?;

        self.inner.channel.send(&OutboundMessage::UpdateMotionConfig {
            device_id: device_id.to_string(),
            config: patch.clone(),
        });

        let mut cache = self.inner.cache.write().await;
        cache.focus(device_id);
        match cache.config.as_mut() {
            Some(config) => config.merge(&patch),
            None => cache.config = Some(patch),
        }
        Ok(())
    }

    /// Fetch statistics. On failure the previously cached statistics stay.
    pub async fn fetch_statistics(&self, device_id: &str) -> Result<DetectionStatistics> {
        let result = self.inner.control.fetch_statistics(device_id).await;
        self.inner.record_control("fetch statistics", device_id, &result).await;
        let statistics = result?;

        let mut cache = self.inner.cache.write().await;
        cache.focus(device_id);
        cache.statistics = Some(statistics.clone());
        Ok(statistics)
    }

    pub async fn cached_config(&self) -> Option<DetectionConfig> {
        self.inner.cache.read().await.config.clone()
    }

    pub async fn cached_statistics(&self) -> Option<DetectionStatistics> {
        self.inner.cache.read().await.statistics.clone()
    }

    /// Everything a caller renders, in one read
    pub async fn snapshot(&self) -> MotionAlertSnapshot {
        let (live_alerts, history) = {
            let store = self.inner.store.read().await;
            (store.live_map(), store.history())
        };
        let (focused_device, config, statistics) = {
            let cache = self.inner.cache.read().await;
            (
                cache.device_id.clone(),
                cache.config.clone(),
                cache.statistics.clone(),
            )
        };

        MotionAlertSnapshot {
            live_alerts,
            history,
            focused_device,
            config,
            statistics,
            connected: self.is_connected(),
            last_error: self.last_error().await,
            subscriptions: self.subscriptions().await,
        }
    }

    /// Disconnect and cancel every dismissal timer
    pub async fn shutdown(&self) {
        self.inner.channel.disconnect();
        let cancelled = self.inner.dismissals.cancel_all();
        tracing::info!(cancelled_timers = cancelled, "Motion alert pipeline shut down");
    }
}

impl Inner {
    fn publish(&self, event: PipelineEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn publish_cleared(&self, alerts: &[Alert], reason: ClearReason) {
        for alert in alerts {
            self.publish(PipelineEvent::AlertCleared {
                alert_id: alert.id.clone(),
                device_id: alert.device_id.clone(),
                reason,
            });
        }
    }

    async fn record_control<T>(&self, operation: &str, device_id: &str, result: &Result<T>) {
        if let Err(e) = result {
            tracing::error!(
                device_id = %device_id,
                operation = operation,
                error = %e,
                "Control request failed"
            );
            *self.last_error.write().await = Some(e.to_string());
        }
    }

    async fn subscribe(&self, device_id: &str) {
        if self.registry.add(device_id).await {
            tracing::info!(device_id = %device_id, "Device subscribed");
        }
        self.channel.send(&OutboundMessage::SubscribeDevice {
            device_id: device_id.to_string(),
        });
    }

    async fn unsubscribe(&self, device_id: &str) {
        if self.registry.remove(device_id).await {
            tracing::info!(device_id = %device_id, "Device unsubscribed");
        }
        self.channel.send(&OutboundMessage::UnsubscribeDevice {
            device_id: device_id.to_string(),
        });

        let mut store = self.store.write().await;
        let purged = store.purge_device(device_id);
        for alert in &purged {
            self.dismissals.cancel(&alert.id);
        }
        self.publish_cleared(&purged, ClearReason::Unsubscribed);
        drop(store);

        if !purged.is_empty() {
            tracing::debug!(
                device_id = %device_id,
                count = purged.len(),
                "Purged live alerts of unsubscribed device"
            );
        }
    }

    async fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::MotionAlert(event) => {
                self.on_alert_arrival(event).await;
            }
            InboundMessage::AlertAcknowledged(payload) => {
                self.on_acknowledgement(&payload.alert_id, payload.acknowledged_by.as_deref())
                    .await;
            }
            InboundMessage::ConfigUpdated(payload) => {
                let mut cache = self.cache.write().await;
                if cache.is_focused(&payload.device_id) {
                    match cache.config.as_mut() {
                        Some(config) => config.merge(&payload.config),
                        None => cache.config = Some(payload.config),
                    }
                    tracing::debug!(device_id = %payload.device_id, "Cached config updated from channel");
                }
            }
            InboundMessage::Statistics(payload) => {
                self.cache.write().await.statistics = Some(payload.statistics);
            }
            InboundMessage::PendingAlerts(payload) => {
                tracing::info!(count = payload.alerts.len(), "Replaying pending alerts");
                for event in payload.alerts {
                    self.on_alert_arrival(event).await;
                }
            }
            InboundMessage::Unknown(kind) => {
                tracing::warn!(kind = %kind, "Ignoring unrecognized event channel message");
            }
        }
    }

    async fn on_alert_arrival(&self, event: RawAlertEvent) -> Alert {
        let alert = Alert::from_event(event);

        let replaced = {
            let mut store = self.store.write().await;
            let replaced = store.insert(alert.clone());
            self.arm_dismissal(&alert.id);
            self.publish(PipelineEvent::AlertArrived(alert.clone()));
            replaced
        };

        tracing::info!(
            alert_id = %alert.id,
            device_id = %alert.device_id,
            level = ?alert.level,
            replaced = replaced,
            "Motion alert received"
        );

        if let Some(callback) = &self.on_alert {
            callback(&alert);
        }
        alert
    }

    fn arm_dismissal(&self, alert_id: &str) {
        let inner = self.self_ref.clone();
        self.dismissals.arm(alert_id, move |alert_id, generation| async move {
            if let Some(inner) = inner.upgrade() {
                inner.expire(&alert_id, generation).await;
            }
        });
    }

    async fn expire(&self, alert_id: &str, generation: u64) {
        let mut store = self.store.write().await;
        if !self.dismissals.complete(alert_id, generation) {
            return;
        }
        if let Some(alert) = store.remove_live(alert_id) {
            self.publish_cleared(&[alert], ClearReason::Expired);
            tracing::debug!(alert_id = %alert_id, "Alert auto-dismissed after cooldown");
        }
    }

    async fn on_acknowledgement(&self, alert_id: &str, acknowledged_by: Option<&str>) {
        let removed = {
            let mut store = self.store.write().await;
            self.dismissals.cancel(alert_id);
            let removed = store.acknowledge(alert_id, acknowledged_by, Utc::now());
            if let Some(alert) = &removed {
                self.publish_cleared(std::slice::from_ref(alert), ClearReason::Acknowledged);
            }
            removed
        };

        match removed {
            Some(_) => {
                tracing::info!(
                    alert_id = %alert_id,
                    acknowledged_by = ?acknowledged_by,
                    "Alert acknowledged"
                );
            }
            None => {
                tracing::debug!(alert_id = %alert_id, "Acknowledgement for alert not live");
            }
        }
    }

    async fn acknowledge_locally(&self, alert_id: &str) -> bool {
        let device_id = match self.store.read().await.live(alert_id) {
            Some(alert) => alert.device_id.clone(),
            None => {
                tracing::debug!(alert_id = %alert_id, "Local acknowledgement for alert not live");
                return false;
            }
        };

        let sent = self.channel.send(&OutboundMessage::AcknowledgeAlert {
            device_id: device_id.clone(),
            alert_id: alert_id.to_string(),
        });

        {
            let mut store = self.store.write().await;
            self.dismissals.cancel(alert_id);
            let removed = store.acknowledge(alert_id, Some(&self.settings.acknowledger), Utc::now());
            if let Some(alert) = &removed {
                self.publish_cleared(std::slice::from_ref(alert), ClearReason::LocalAck);
            }
        }

        tracing::info!(
            alert_id = %alert_id,
            device_id = %device_id,
            sent = sent,
            "Alert acknowledged locally"
        );
        true
    }

    async fn clear_all(&self) {
        let cleared = {
            let mut store = self.store.write().await;
            self.dismissals.cancel_all();
            let cleared = store.clear_live();
            self.publish_cleared(&cleared, ClearReason::Cleared);
            cleared
        };

        tracing::info!(count = cleared.len(), "Live alerts cleared");
    }
}

#[async_trait]
impl ChannelHandler for Inner {
    async fn replay_subscriptions(&self) -> Vec<String> {
        self.registry.list().await
    }

    async fn on_message(&self, message: InboundMessage) {
        self.dispatch(message).await;
    }

    async fn on_status(&self, connected: bool, error: Option<ChannelError>) {
        let last_error = {
            let mut last_error = self.last_error.write().await;
            if connected {
                *last_error = None;
            } else if let Some(e) = error {
                *last_error = Some(e.to_string());
            }
            last_error.clone()
        };

        self.publish(PipelineEvent::ChannelStatus {
            connected,
            last_error,
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.channel.disconnect();
    }
}
