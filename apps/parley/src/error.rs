use parley_proto::{MessageId, WireError};
use thiserror::Error;

use crate::drafts::storage::StorageError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("live channel error: {0}")]
    Transport(String),
    #[error("live channel is closed")]
    ChannelClosed,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("file upload failed: {0}")]
    Upload(String),
    #[error("message {0} is still being sent")]
    PendingMessage(MessageId),
    #[error("message {0} not found")]
    UnknownMessage(MessageId),
    #[error("no conversation is open")]
    NoConversation,
    #[error("{0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(value.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(value: std::io::Error) -> Self {
        ChatError::Upload(value.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
