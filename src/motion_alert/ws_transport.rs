//! WebSocket transport for the event channel

use super::channel::{ChannelError, ChannelLink, EventTransport};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Opens the event channel as a WebSocket client connection
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EventTransport for WebSocketTransport {
    async fn open(&self) -> Result<ChannelLink, ChannelError> {
        let (socket, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        tracing::debug!(
            url = %self.url,
            status = %response.status(),
            "WebSocket handshake complete"
        );

        let (writer, reader) = socket.split();

        let sink = writer
            .with(|frame: String| future::ready(Ok::<_, WsError>(Message::Text(frame))))
            .sink_map_err(|e: WsError| ChannelError::Transport(e.to_string()));

        let stream = reader.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Ignoring non UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "Backend closed the event channel");
                    Some(Err(ChannelError::Closed))
                }
                // Ping/pong are answered by tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
            })
        });

        Ok(ChannelLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
