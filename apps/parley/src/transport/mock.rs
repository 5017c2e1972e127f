//! In-process [`Connector`] for tests. Every successful connect hands the test
//! a [`MockPeer`] playing the server side of that connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc as channel;
use futures::{SinkExt, StreamExt};
use parley_proto::{ConversationId, SendCommand};
use tokio::sync::mpsc;

use super::{Connector, LinkFrame, LiveLink};
use crate::error::{ChatError, ChatResult};

pub struct MockPeer {
    pub conversation_id: ConversationId,
    pub token: String,
    to_client: channel::UnboundedSender<Result<LinkFrame, ChatError>>,
    from_client: channel::UnboundedReceiver<LinkFrame>,
}

impl MockPeer {
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .unbounded_send(Ok(LinkFrame::Text(text.into())))
            .is_ok()
    }

    pub fn push_json(&self, value: serde_json::Value) -> bool {
        self.push_text(value.to_string())
    }

    /// Server-initiated clean close.
    pub fn close(&self) {
        let _ = self.to_client.unbounded_send(Ok(LinkFrame::Close));
    }

    /// Transport error on the client's read side.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(ChatError::Transport(reason.to_string())));
    }

    /// Refuses further client writes; the next write fails.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    pub async fn next_frame(&mut self) -> Option<LinkFrame> {
        self.from_client.next().await
    }

    /// Next send command written by the client; `None` once the client closes.
    pub async fn next_command(&mut self) -> Option<SendCommand> {
        loop {
            match self.next_frame().await? {
                LinkFrame::Text(text) => {
                    if let Ok(command) = serde_json::from_str(&text) {
                        return Some(command);
                    }
                }
                LinkFrame::Close => return None,
            }
        }
    }
}

pub struct MockConnector {
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refusals: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            peers,
        });
        (connector, rx)
    }

    /// The next `count` connects fail.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, conversation_id: &ConversationId, token: &str) -> ChatResult<LiveLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChatError::Transport("connection refused".into()));
        }

        let (to_client, client_rx) = channel::unbounded::<Result<LinkFrame, ChatError>>();
        let (client_tx, from_client) = channel::unbounded::<LinkFrame>();
        let peer = MockPeer {
            conversation_id: conversation_id.clone(),
            token: token.to_string(),
            to_client,
            from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| ChatError::Transport("mock server gone".into()))?;

        Ok(LiveLink {
            sink: Box::pin(client_tx.sink_map_err(|_| ChatError::ChannelClosed)),
            stream: Box::pin(client_rx),
        })
    }
}
