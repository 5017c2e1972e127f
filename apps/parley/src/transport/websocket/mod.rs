use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use parley_proto::ConversationId;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use super::{Connector, LinkFrame, LiveLink};
use crate::error::{ChatError, ChatResult};

pub mod config;
pub use config::LiveChannelConfig;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens live channels over WebSocket.
pub struct WebSocketConnector {
    config: LiveChannelConfig,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(config: LiveChannelConfig) -> Self {
        Self {
            config,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, conversation_id: &ConversationId, token: &str) -> ChatResult<LiveLink> {
        let url = self.config.build_url(conversation_id, token)?;
        debug!(target: "parley.link", conversation = %conversation_id, host = ?url.host_str(), "connecting");

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChatError::Transport("connect timed out".into()))??;

        let (write, read) = ws_stream.split();
        let sink = write.sink_map_err(ChatError::from).with(|frame: LinkFrame| {
            future::ready(Ok::<_, ChatError>(match frame {
                LinkFrame::Text(text) => Message::Text(text),
                LinkFrame::Close => Message::Close(None),
            }))
        });
        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(Message::Text(text)) => Some(Ok(LinkFrame::Text(text))),
                // Binary frames are decoded like text; invalid UTF-8 fails JSON decoding later.
                Ok(Message::Binary(bytes)) => Some(Ok(LinkFrame::Text(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))),
                Ok(Message::Close(_)) => Some(Ok(LinkFrame::Close)),
                Ok(_) => None, // Ping, Pong, raw frames
                Err(err) => Some(Err(ChatError::from(err))),
            })
        });

        Ok(LiveLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
