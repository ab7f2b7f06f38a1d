//! ChannelManager - duplex event channel to the detection backend
//!
//! ## Responsibilities
//!
//! - Keep at most one session open
//! - Replay registry subscriptions after every open
//! - Decode inbound frames and hand them to the handler in arrival order
//! - Reconnect after a fixed delay when the session ends unexpectedly
//!
//! Outbound requests are fire-and-forget: they are dropped when no session
//! is open. A device is subscribed at most once per session.

use super::protocol::{InboundMessage, OutboundMessage};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Channel-level failure. Never surfaced to callers, only recorded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("channel closed by peer")]
    Closed,
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// Both halves of an open channel, carrying text frames
pub struct ChannelLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens links to the backend
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self) -> Result<ChannelLink, ChannelError>;
}

/// Receives channel lifecycle and inbound traffic
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Devices to subscribe right after a session opens, in order
    async fn replay_subscriptions(&self) -> Vec<String>;
    async fn on_message(&self, message: InboundMessage);
    /// Session opened (`connected`) or ended (`error` set on failure)
    async fn on_status(&self, connected: bool, error: Option<ChannelError>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
}

struct SessionSlots {
    state: ChannelState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    session: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    manual_disconnect: bool,
    /// Bumped on every connect/disconnect; stale sessions compare against it
    epoch: u64,
    /// Devices already subscribed on the current session
    announced: HashSet<String>,
}

pub struct ChannelManager {
    transport: Arc<dyn EventTransport>,
    handler: Weak<dyn ChannelHandler>,
    reconnect_delay: Duration,
    auto_reconnect: bool,
    slots: Mutex<SessionSlots>,
}

impl ChannelManager {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        handler: Weak<dyn ChannelHandler>,
        reconnect_delay: Duration,
        auto_reconnect: bool,
    ) -> Self {
        Self {
            transport,
            handler,
            reconnect_delay,
            auto_reconnect,
            slots: Mutex::new(SessionSlots {
                state: ChannelState::Disconnected,
                outbound: None,
                session: None,
                reconnect: None,
                manual_disconnect: false,
                epoch: 0,
                announced: HashSet::new(),
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.slots.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Open a session unless one is already connecting or open
    pub fn connect(self: &Arc<Self>) {
        let mut slots = self.slots.lock();
        if slots.state != ChannelState::Disconnected {
            tracing::debug!(state = ?slots.state, "Event channel already active, connect ignored");
            return;
        }

        if let Some(pending) = slots.reconnect.take() {
            pending.abort();
        }

        slots.manual_disconnect = false;
        slots.state = ChannelState::Connecting;
        slots.epoch += 1;
        let epoch = slots.epoch;

        let this = Arc::clone(self);
        slots.session = Some(tokio::spawn(async move {
            this.run_session(epoch).await;
        }));

        tracing::info!(epoch = epoch, "Event channel connecting");
    }

    /// Close the session and cancel any scheduled reconnect
    pub fn disconnect(&self) {
        let mut slots = self.slots.lock();
        slots.manual_disconnect = true;
        slots.epoch += 1;

        if let Some(pending) = slots.reconnect.take() {
            pending.abort();
        }
        if let Some(session) = slots.session.take() {
            session.abort();
        }
        slots.outbound = None;
        slots.announced.clear();

        if slots.state != ChannelState::Disconnected {
            tracing::info!("Event channel disconnected");
        }
        slots.state = ChannelState::Disconnected;
    }

    /// Queue a message on the open session. Returns false when dropped.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "Failed to encode outbound message");
                return false;
            }
        };

        let mut slots = self.slots.lock();
        let slots = &mut *slots;
        let tx = match (slots.state, &slots.outbound) {
            (ChannelState::Open, Some(tx)) => tx,
            _ => {
                tracing::debug!(kind = message.kind(), "Event channel not open, message dropped");
                return false;
            }
        };

        match message {
            OutboundMessage::SubscribeDevice { device_id } => {
                if !slots.announced.insert(device_id.clone()) {
                    tracing::debug!(device_id = %device_id, "Device already subscribed on this session");
                    return true;
                }
            }
            OutboundMessage::UnsubscribeDevice { device_id } => {
                slots.announced.remove(device_id);
            }
            _ => {}
        }

        if tx.send(frame).is_ok() {
            tracing::debug!(kind = message.kind(), "Outbound message queued");
            true
        } else {
            tracing::warn!(kind = message.kind(), "Event channel writer gone, message dropped");
            if let OutboundMessage::SubscribeDevice { device_id } = message {
                slots.announced.remove(device_id);
            }
            false
        }
    }

    async fn run_session(self: Arc<Self>, epoch: u64) {
        let link = match self.transport.open().await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(error = %e, "Event channel connect failed");
                self.session_ended(epoch, Some(e)).await;
                return;
            }
        };

        let ChannelLink {
            mut sink,
            mut stream,
        } = link;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        {
            let mut slots = self.slots.lock();
            if slots.epoch != epoch {
                return;
            }
            slots.state = ChannelState::Open;
            slots.outbound = Some(tx);
            slots.announced.clear();
        }
        tracing::info!(epoch = epoch, "Event channel open");

        if let Some(handler) = self.handler.upgrade() {
            handler.on_status(true, None).await;
            let devices = handler.replay_subscriptions().await;
            tracing::debug!(count = devices.len(), "Replaying device subscriptions");
            for device_id in devices {
                self.send(&OutboundMessage::SubscribeDevice { device_id });
            }
        }

        let failure = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.dispatch(&text).await,
                    Some(Err(e)) => break e,
                    None => break ChannelError::Closed,
                },
                Some(frame) = rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        break e;
                    }
                }
            }
        };

        tracing::warn!(error = %failure, "Event channel session ended");
        self.session_ended(epoch, Some(failure)).await;
    }

    async fn dispatch(&self, text: &str) {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed event channel frame");
                return;
            }
        };

        tracing::debug!(kind = message.kind(), "Inbound message");
        if let Some(handler) = self.handler.upgrade() {
            handler.on_message(message).await;
        }
    }

    async fn session_ended(self: &Arc<Self>, epoch: u64, error: Option<ChannelError>) {
        {
            let mut slots = self.slots.lock();
            if slots.epoch != epoch {
                return;
            }
            slots.state = ChannelState::Disconnected;
            slots.outbound = None;
            slots.session = None;
            slots.announced.clear();

            if self.auto_reconnect && !slots.manual_disconnect {
                let delay = self.reconnect_delay;
                let this = Arc::downgrade(self);
                slots.reconnect = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(manager) = this.upgrade() {
                        manager.reconnect_due();
                    }
                }));
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    "Event channel reconnect scheduled"
                );
            }
        }

        if let Some(handler) = self.handler.upgrade() {
            handler.on_status(false, error).await;
        }
    }

    fn reconnect_due(self: &Arc<Self>) {
        {
            let mut slots = self.slots.lock();
            if slots.manual_disconnect {
                return;
            }
            // Detach our own handle so connect() does not abort this task
            slots.reconnect = None;
        }
        tracing::info!("Event channel reconnecting");
        self.connect();
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        let slots = self.slots.get_mut();
        if let Some(pending) = slots.reconnect.take() {
            pending.abort();
        }
        if let Some(session) = slots.session.take() {
            session.abort();
        }
    }
}
