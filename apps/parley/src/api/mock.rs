//! Scripted [`ChatBackend`] for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_proto::{ConversationId, Message, ShareRef, UploadedFile};
use tokio::sync::oneshot;

use super::{ChatBackend, FileUpload};
use crate::error::{ChatError, ChatResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCall {
    pub conversation_id: ConversationId,
    pub before: Option<String>,
    pub limit: usize,
}

/// Serves pages from an in-memory history (oldest first). Individual fetches
/// can be held until released, or failed.
#[derive(Default)]
pub struct MockBackend {
    histories: Mutex<HashMap<ConversationId, Vec<Message>>>,
    gates: Mutex<HashMap<ConversationId, VecDeque<oneshot::Receiver<()>>>>,
    history_failures: AtomicUsize,
    history_calls: Mutex<Vec<HistoryCall>>,
    uploads: Mutex<VecDeque<ChatResult<Vec<UploadedFile>>>>,
    uploaded: Mutex<Vec<(ConversationId, Vec<String>)>>,
    deleted: Mutex<Vec<(ConversationId, String)>>,
    shares: Mutex<Vec<(ConversationId, ShareRef)>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_history(&self, conversation_id: impl Into<ConversationId>, messages: Vec<Message>) {
        self.histories.lock().insert(conversation_id.into(), messages);
    }

    /// The next fetch for `conversation_id` waits until the returned sender
    /// fires (or is dropped).
    pub fn hold_next_fetch(&self, conversation_id: impl Into<ConversationId>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .entry(conversation_id.into())
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.history_failures.store(count, Ordering::SeqCst);
    }

    pub fn history_calls(&self) -> Vec<HistoryCall> {
        self.history_calls.lock().clone()
    }

    pub fn push_upload_result(&self, result: ChatResult<Vec<UploadedFile>>) {
        self.uploads.lock().push_back(result);
    }

    /// File names of every upload request, per conversation.
    pub fn uploaded(&self) -> Vec<(ConversationId, Vec<String>)> {
        self.uploaded.lock().clone()
    }

    pub fn deleted(&self) -> Vec<(ConversationId, String)> {
        self.deleted.lock().clone()
    }

    pub fn shares(&self) -> Vec<(ConversationId, ShareRef)> {
        self.shares.lock().clone()
    }

    fn page(&self, conversation_id: &ConversationId, before: Option<&str>, limit: usize) -> Vec<Message> {
        let histories = self.histories.lock();
        let Some(all) = histories.get(conversation_id) else {
            return Vec::new();
        };
        let end = match before {
            Some(cursor) => all
                .iter()
                .position(|message| message.id.server_id() == Some(cursor))
                .unwrap_or(0),
            None => all.len(),
        };
        let start = end.saturating_sub(limit);
        all[start..end].to_vec()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        before: Option<&str>,
        limit: usize,
    ) -> ChatResult<Vec<Message>> {
        self.history_calls.lock().push(HistoryCall {
            conversation_id: conversation_id.clone(),
            before: before.map(str::to_string),
            limit,
        });
        let gate = self
            .gates
            .lock()
            .get_mut(conversation_id)
            .and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let failed = self
            .history_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ChatError::Other("history unavailable".into()));
        }
        Ok(self.page(conversation_id, before, limit))
    }

    async fn upload_files(
        &self,
        conversation_id: &ConversationId,
        files: Vec<FileUpload>,
    ) -> ChatResult<Vec<UploadedFile>> {
        let names: Vec<String> = files.iter().map(|file| file.name.clone()).collect();
        self.uploaded
            .lock()
            .push((conversation_id.clone(), names.clone()));
        match self.uploads.lock().pop_front() {
            Some(result) => result,
            None => Ok(names
                .into_iter()
                .map(|name| UploadedFile {
                    file_url: format!("/media/chat/{conversation_id}/{name}"),
                    filename: name,
                })
                .collect()),
        }
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> ChatResult<()> {
        self.deleted
            .lock()
            .push((conversation_id.clone(), message_id.to_string()));
        Ok(())
    }

    async fn share_to(&self, target: &ConversationId, share: &ShareRef) -> ChatResult<()> {
        self.shares.lock().push((target.clone(), share.clone()));
        Ok(())
    }
}
