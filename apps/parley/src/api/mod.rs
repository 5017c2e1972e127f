//! REST side of the chat backend: history pages, uploads, deletes and shares.

pub mod mock;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use parley_proto::{
    ConversationId, Message, ShareRef, ShareRequest, UploadResponse, UploadedFile, WireMessage,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ChatError, ChatResult};

/// A file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ChatError::Upload(format!("{} is not a file", path.display())))?;
        Ok(Self { name, bytes })
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Up to `limit` messages older than `before` (newest page when `None`),
    /// oldest first.
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: usize,
    ) -> ChatResult<Vec<Message>>;

    async fn upload_files(
        &self,
        conversation_id: &ConversationId,
        files: Vec<FileUpload>,
    ) -> ChatResult<Vec<UploadedFile>>;

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> ChatResult<()>;

    async fn share_to(&self, target: &ConversationId, share: &ShareRef) -> ChatResult<()>;

    /// Replaces the credential used by later requests.
    fn set_token(&self, _token: &str) {}
}

/// reqwest-backed [`ChatBackend`].
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: Url,
    token: Arc<RwLock<String>>,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: impl Into<String>) -> ChatResult<Self> {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(&base)?,
            token: Arc::new(RwLock::new(token.into())),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> ChatResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn token(&self) -> String {
        self.token.read().clone()
    }

    async fn expect_success(res: Response) -> ChatResult<Response> {
        if res.status().is_success() {
            Ok(res)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ChatError::UnexpectedStatus { status, body })
        }
    }

    async fn json<T: DeserializeOwned>(res: Response) -> ChatResult<T> {
        Ok(Self::expect_success(res).await?.json::<T>().await?)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: usize,
    ) -> ChatResult<Vec<Message>> {
        let mut url = self.endpoint(&format!("chats/{conversation_id}/messages/"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(before) = before {
                query.append_pair("before", before);
            }
        }
        let res = self.http.get(url).bearer_auth(self.token()).send().await?;
        let page: Vec<WireMessage> = Self::json(res).await?;

        let mut messages = Vec::with_capacity(page.len());
        for wire in page {
            let id = wire.id.clone();
            match wire.into_message(conversation_id) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    warn!(target: "parley.history", message_id = %id, error = %err, "skipping malformed history item")
                }
            }
        }
        Ok(messages)
    }

    async fn upload_files(
        &self,
        conversation_id: &ConversationId,
        files: Vec<FileUpload>,
    ) -> ChatResult<Vec<UploadedFile>> {
        let count = files.len();
        let mut form = Form::new().text("chat_id", conversation_id.to_string());
        for file in files {
            form = form.part("files", Part::bytes(file.bytes).file_name(file.name));
        }
        let res = self
            .http
            .post(self.endpoint("chats/upload-file/")?)
            .bearer_auth(self.token())
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadResponse = Self::json(res).await?;
        debug!(target: "parley.session", requested = count, accepted = uploaded.files.len(), "files uploaded");
        Ok(uploaded.files)
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> ChatResult<()> {
        let url = self.endpoint(&format!("chats/{conversation_id}/message/{message_id}/delete/"))?;
        let res = self.http.delete(url).bearer_auth(self.token()).send().await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn share_to(&self, target: &ConversationId, share: &ShareRef) -> ChatResult<()> {
        let url = self.endpoint(&format!("chats/{target}/share/"))?;
        let res = self
            .http
            .post(url)
            .bearer_auth(self.token())
            .json(&ShareRequest::from(share))
            .send()
            .await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    fn set_token(&self, token: &str) {
        *self.token.write() = token.to_string();
    }
}
