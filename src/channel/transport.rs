use crate::channel::{PushStream, PushTransport};
use crate::error::NetworkError;
use async_trait::async_trait;
use futures::{future, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// WebSocket 推送传输
pub struct WebSocketTransport {
    /// 握手超时
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<PushStream, NetworkError> {
        debug!("🔗 Opening WebSocket: {}", url);

        let (socket, response) = match timeout(self.connect_timeout, connect_async(url)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                return Err(NetworkError::ConnectionFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
            }
            Err(_) => return Err(NetworkError::Timeout { url: url.to_string() }),
        };

        debug!("🔗 WebSocket handshake completed: status={}", response.status());

        // 只向上层交出文本帧；控制帧由 tungstenite 处理
        let frames = socket.filter_map(|message| {
            let frame = match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("Ignoring non UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket close frame received: {:?}", frame);
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(NetworkError::WebSocketError { error: e.to_string() })),
            };
            future::ready(frame)
        });

        Ok(frames.boxed())
    }
}
