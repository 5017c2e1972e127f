//! Backend payload shapes.
//!
//! The backend sends messages as flat objects where the kind of content is
//! implied by which optional fields are present. [`WireMessage`] mirrors that
//! shape and [`Message::try_from`] resolves it into a tagged [`MessageBody`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::{flexible_id, ConversationId, UserId};
use crate::error::WireError;
use crate::message::{
    FileRef, Message, MessageBody, MessageId, SharedMessage, SharedPost, SharedProfile,
};
use crate::timestamp::parse_server_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareKind {
    Post,
    Profile,
    Message,
}

/// Reference to something shared into a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRef {
    pub kind: ShareKind,
    pub target_id: String,
}

/// Flat message object as delivered by history pages and the live channel.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default, alias = "conversation")]
    pub chat: Option<ConversationId>,
    pub sender: UserId,
    pub created_at: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default, alias = "file_name")]
    pub filename: Option<String>,
    #[serde(default)]
    pub share_type: Option<ShareKind>,
    #[serde(default)]
    pub share_id: Option<Value>,
    #[serde(default)]
    pub sender_nickname: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
}

impl WireMessage {
    /// Converts into a [`Message`]. Payloads that omit `chat` (the live
    /// channel is already scoped to one conversation) take `conversation_id`.
    pub fn into_message(self, conversation_id: &ConversationId) -> Result<Message, WireError> {
        let created_at = parse_server_timestamp(&self.created_at)?;
        let body = resolve_body(&self)?;
        Ok(Message {
            id: MessageId::Confirmed(self.id),
            conversation_id: self.chat.unwrap_or_else(|| conversation_id.clone()),
            sender_id: self.sender,
            created_at,
            body,
            client_token: self.client_token.filter(|token| !token.is_empty()),
            sender_nickname: self.sender_nickname,
        })
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = WireError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let conversation_id = wire.chat.clone().ok_or(WireError::MissingField("chat"))?;
        wire.into_message(&conversation_id)
    }
}

/// Decodes one live-channel frame received on `conversation_id`'s channel.
pub fn decode_message(text: &str, conversation_id: &ConversationId) -> Result<Message, WireError> {
    let wire: WireMessage = serde_json::from_str(text)?;
    wire.into_message(conversation_id)
}

fn resolve_body(wire: &WireMessage) -> Result<MessageBody, WireError> {
    let share = wire.share_id.as_ref().filter(|value| !value.is_null());
    match (wire.share_type, share) {
        (Some(ShareKind::Message), Some(value)) => return shared_message(value),
        (Some(ShareKind::Profile), Some(value)) => return shared_profile(value),
        (Some(ShareKind::Post), Some(value)) => return shared_post(value),
        (Some(_), None) => return Err(WireError::MissingField("share_id")),
        (None, _) => {}
    }
    if let Some(url) = wire.file_url.as_deref().filter(|url| !url.is_empty()) {
        return Ok(MessageBody::file(url, wire.filename.clone()));
    }
    Ok(MessageBody::text(wire.text.clone().unwrap_or_default()))
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(map) => map.get("id").and_then(id_of),
        _ => None,
    }
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|field| field.as_str().map(str::to_string))
}

fn shared_message(value: &Value) -> Result<MessageBody, WireError> {
    let message_id = id_of(value).ok_or(WireError::MissingField("share_id.id"))?;
    let file = str_field(value, &["file_url"]).map(|url| FileRef {
        url,
        name: str_field(value, &["filename", "file_name"]),
    });
    Ok(MessageBody::SharedMessage(SharedMessage {
        message_id,
        text: str_field(value, &["text"]),
        file,
    }))
}

fn shared_profile(value: &Value) -> Result<MessageBody, WireError> {
    let profile_id = id_of(value).ok_or(WireError::MissingField("share_id.id"))?;
    Ok(MessageBody::SharedProfile(SharedProfile {
        profile_id,
        full_name: str_field(value, &["full_name"]),
        nickname: str_field(value, &["nickname"]),
        login: str_field(value, &["login"]),
        avatar: str_field(value, &["avatar_path", "avatar_url"]),
    }))
}

fn shared_post(value: &Value) -> Result<MessageBody, WireError> {
    let post_id = id_of(value).ok_or(WireError::MissingField("share_id.id"))?;
    let preview_image = value
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| str_field(image, &["image_path"]));
    let author_id = value.get("author_id").and_then(id_of);
    Ok(MessageBody::SharedPost(SharedPost {
        post_id,
        author: str_field(value, &["author"]),
        author_id,
        content: str_field(value, &["content"]),
        preview_image,
    }))
}

/// What the user asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPayload {
    Text(String),
    File(UploadedFile),
    Share(ShareRef),
}

/// Outbound live-channel command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_type: Option<ShareKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl SendCommand {
    pub fn new(payload: SendPayload, client_token: Option<String>) -> Self {
        let mut command = Self {
            kind: "send".to_string(),
            text: String::new(),
            file_url: None,
            filename: None,
            share_type: None,
            share_id: None,
            client_token,
        };
        match payload {
            SendPayload::Text(text) => command.text = text,
            SendPayload::File(file) => {
                command.file_url = Some(file.file_url);
                command.filename = Some(file.filename);
            }
            SendPayload::Share(share) => {
                command.share_type = Some(share.kind);
                command.share_id = Some(share.target_id);
            }
        }
        command
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One file accepted by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_url: String,
    #[serde(alias = "file_name")]
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<UploadedFile>,
}

/// REST body for sharing into another conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub share_type: ShareKind,
    pub share_id: String,
}

impl From<&ShareRef> for ShareRequest {
    fn from(share: &ShareRef) -> Self {
        Self {
            share_type: share.kind,
            share_id: share.target_id.clone(),
        }
    }
}
