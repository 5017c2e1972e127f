//! Shared types for the Parley chat client.
//!
//! Domain types (`Message`, `MessageBody`, `Conversation`, `DraftRecord`) live
//! next to the wire shapes the backend speaks, so the flat REST/WebSocket
//! payloads are turned into tagged bodies in exactly one place. Nothing in this
//! crate performs I/O.

pub mod conversation;
pub mod error;
pub mod message;
pub mod timestamp;
pub mod wire;

pub use conversation::{Conversation, ConversationId, ConversationKind, UserId};
pub use error::WireError;
pub use message::{
    DraftRecord, FileRef, Message, MessageBody, MessageId, SharedMessage, SharedPost,
    SharedProfile,
};
pub use wire::{
    decode_message, SendCommand, SendPayload, ShareKind, ShareRef, ShareRequest, UploadResponse,
    UploadedFile, WireMessage,
};
