//! Transport seam for the control channel
//!
//! The client is written against the [`Transport`] trait so the link task
//! can be driven by a scripted transport in tests. Production uses
//! [`WsTransport`], a thin text-frame wrapper over `tokio-tungstenite`.
//! Reconnection policy lives with the caller, not here.

use async_trait::async_trait;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::error::LinkError;

/// Bidirectional text-frame channel to the controller
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame
    async fn send(&mut self, frame: String) -> Result<(), LinkError>;

    /// Receive the next frame; `None` means the channel closed
    async fn recv(&mut self) -> Option<Result<String, LinkError>>;

    /// Close the channel
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// WebSocket transport to the UnoQ controller
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    /// Open a WebSocket to `address`
    ///
    /// A bare `host:port` is promoted to `ws://host:port`.
    pub async fn connect(address: &str) -> Result<Self, LinkError> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("ws://{address}")
        };
        debug!("opening websocket to {}", url);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), LinkError> {
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LinkError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(_))) | None => return None,
                // Ping/pong are answered by tungstenite; binary frames are
                // not part of the control protocol.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(LinkError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        let _ = self.stream.close(None).await;
        Ok(())
    }
}
