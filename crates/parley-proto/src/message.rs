use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::conversation::{ConversationId, UserId};
use crate::timestamp;
use crate::wire::UploadedFile;

/// Identity of a stored message. Server ids and locally minted ids never
/// collide because they are different variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageId {
    Confirmed(String),
    Pending(Uuid),
}

impl MessageId {
    pub fn confirmed(value: impl Into<String>) -> Self {
        MessageId::Confirmed(value.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MessageId::Pending(_))
    }

    /// Server id, if the message has been confirmed.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            MessageId::Confirmed(id) => Some(id),
            MessageId::Pending(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Confirmed(id) => f.write_str(id),
            MessageId::Pending(local) => write!(f, "local-{local}"),
        }
    }
}

/// An uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FileRef {
    /// Explicit name, or the last path segment of the URL without its query.
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            return name;
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or(path)
    }

    /// Lower-cased extension of the display name.
    pub fn extension(&self) -> Option<String> {
        let name = self.display_name();
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self.extension().as_deref(),
            Some("jpg" | "jpeg" | "png" | "gif" | "webp")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPost {
    pub post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedProfile {
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedMessage {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

/// Content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    File(FileRef),
    SharedPost(SharedPost),
    SharedProfile(SharedProfile),
    SharedMessage(SharedMessage),
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        MessageBody::Text { text: text.into() }
    }

    pub fn file(url: impl Into<String>, name: Option<String>) -> Self {
        MessageBody::File(FileRef {
            url: url.into(),
            name,
        })
    }
}

/// One chat item, confirmed or optimistic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(with = "timestamp::lenient")]
    pub created_at: OffsetDateTime,
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_nickname: Option<String>,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn file_url(&self) -> Option<&str> {
        match &self.body {
            MessageBody::File(file) => Some(&file.url),
            _ => None,
        }
    }
}

/// Persisted form of an optimistic message awaiting its server echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub local_id: Uuid,
    pub correlation_key: String,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(with = "timestamp::lenient")]
    pub created_at: OffsetDateTime,
    pub body: MessageBody,
}

impl DraftRecord {
    /// Draft for a file that finished uploading; the file URL is the
    /// correlation key.
    pub fn for_upload(
        conversation_id: ConversationId,
        sender_id: UserId,
        file: &UploadedFile,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            correlation_key: file.file_url.clone(),
            conversation_id,
            sender_id,
            created_at: timestamp::now_utc(),
            body: MessageBody::file(file.file_url.clone(), Some(file.filename.clone())),
        }
    }

    pub fn message_id(&self) -> MessageId {
        MessageId::Pending(self.local_id)
    }

    /// Token sent with the outbound command so the server can echo it.
    pub fn client_token(&self) -> String {
        self.local_id.to_string()
    }

    pub fn to_message(&self) -> Message {
        Message {
            id: self.message_id(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            created_at: self.created_at,
            body: self.body.clone(),
            client_token: Some(self.client_token()),
            sender_nickname: None,
        }
    }

    /// Whether `confirmed` is the server echo of this draft. The echoed
    /// client token wins; exact file URL equality is the fallback.
    pub fn matches(&self, confirmed: &Message) -> bool {
        if confirmed.is_pending() || confirmed.conversation_id != self.conversation_id {
            return false;
        }
        if let Some(token) = confirmed.client_token.as_deref() {
            if token == self.client_token() {
                return true;
            }
        }
        confirmed.file_url() == Some(self.correlation_key.as_str())
    }
}
