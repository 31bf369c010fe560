//! WebSocket push transport using tokio-tungstenite.

use super::PushTransport;
use crate::error::{Error, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Connects to a WebSocket endpoint and yields its text frames.
///
/// Binary, ping and pong frames are skipped; a close frame ends the stream.
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        WebSocketTransport {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushTransport for WebSocketTransport {
    type Stream = BoxStream<'static, Result<String>>;

    async fn connect(&self) -> Result<Self::Stream> {
        let handshake = timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let (ws, response) = match handshake.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::ChannelError(format!(
                    "connect to {} timed out after {:?}",
                    self.url, self.connect_timeout
                )))
            }
        };
        debug!("WebSocket handshake with {} complete ({})", self.url, response.status());

        let frames = ws
            .take_while(|frame| futures::future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                }
            });
        Ok(frames.boxed())
    }
}
