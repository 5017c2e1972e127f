//! Live channel plumbing.
//!
//! A [`Connector`] opens one bidirectional text channel for a conversation.
//! Reconnect policy, queuing and decoding live in
//! [`ConnectionManager`](crate::connection::ConnectionManager); connectors only
//! move frames.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use parley_proto::ConversationId;

use crate::error::{ChatError, ChatResult};

pub mod mock;
pub mod websocket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    Text(String),
    /// Close handshake. From the server this is a clean shutdown.
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<LinkFrame, Error = ChatError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<LinkFrame, ChatError>> + Send>>;

/// An open channel. The stream ending without a [`LinkFrame::Close`] is an
/// unclean drop.
pub struct LiveLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, conversation_id: &ConversationId, token: &str) -> ChatResult<LiveLink>;
}
