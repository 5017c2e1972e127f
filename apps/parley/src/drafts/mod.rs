//! Durable optimistic drafts.
//!
//! A file send shows up in the transcript before the server has confirmed it.
//! The optimistic entry is persisted under `chat-drafts/{conversation}` so it
//! survives a restart, and is retired once the live channel (or a history page)
//! delivers the matching confirmed message.

pub mod storage;

use std::sync::Arc;

use parley_proto::{ConversationId, DraftRecord, Message};
use tracing::{debug, warn};
use uuid::Uuid;

use self::storage::{KeyValueStore, StorageError};

pub fn storage_key(conversation_id: &ConversationId) -> String {
    format!("chat-drafts/{}", conversation_id.as_str())
}

pub struct DraftReconciler {
    storage: Arc<dyn KeyValueStore>,
    conversation_id: ConversationId,
    drafts: Vec<DraftRecord>,
}

impl DraftReconciler {
    /// Reconciler with nothing loaded, used when storage could not be read.
    pub fn empty(storage: Arc<dyn KeyValueStore>, conversation_id: ConversationId) -> Self {
        Self {
            storage,
            conversation_id,
            drafts: Vec::new(),
        }
    }

    /// Reads persisted drafts. A corrupt entry is logged and treated as empty
    /// rather than failing the open; it is overwritten on the next write.
    pub async fn load(
        storage: Arc<dyn KeyValueStore>,
        conversation_id: ConversationId,
    ) -> Result<Self, StorageError> {
        let key = storage_key(&conversation_id);
        let drafts = match storage.get(&key).await? {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<DraftRecord>>(&raw) {
                Ok(records) => records
                    .into_iter()
                    .filter(|record| record.conversation_id == conversation_id)
                    .collect(),
                Err(err) => {
                    warn!(target: "parley.drafts", key = %key, error = %err, "ignoring corrupt drafts");
                    Vec::new()
                }
            },
        };
        debug!(target: "parley.drafts", key = %key, count = drafts.len(), "drafts loaded");
        Ok(Self {
            storage,
            conversation_id,
            drafts,
        })
    }

    pub fn drafts(&self) -> &[DraftRecord] {
        &self.drafts
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Optimistic entries for the message store.
    pub fn messages(&self) -> Vec<Message> {
        self.drafts.iter().map(DraftRecord::to_message).collect()
    }

    /// Adds a draft and persists the list. The in-memory list is updated even
    /// if the write fails.
    pub async fn record(&mut self, draft: DraftRecord) -> Result<(), StorageError> {
        debug!(target: "parley.drafts", local_id = %draft.local_id, key = %draft.correlation_key, "draft recorded");
        self.drafts.push(draft);
        self.persist().await
    }

    /// Removes the draft `confirmed` echoes, if any, and persists the rest.
    /// The removed draft is returned even when persisting fails.
    pub async fn retire(
        &mut self,
        confirmed: &Message,
    ) -> (Option<DraftRecord>, Result<(), StorageError>) {
        let Some(index) = self.drafts.iter().position(|draft| draft.matches(confirmed)) else {
            return (None, Ok(()));
        };
        let draft = self.drafts.remove(index);
        debug!(target: "parley.drafts", local_id = %draft.local_id, confirmed = %confirmed.id, "draft retired");
        let persisted = self.persist().await;
        (Some(draft), persisted)
    }

    /// Drops a draft the user abandoned before its echo arrived.
    pub async fn discard(&mut self, local_id: Uuid) -> Result<bool, StorageError> {
        let before = self.drafts.len();
        self.drafts.retain(|draft| draft.local_id != local_id);
        if self.drafts.len() == before {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let key = storage_key(&self.conversation_id);
        if self.drafts.is_empty() {
            return self.storage.delete(&key).await;
        }
        let encoded = serde_json::to_string(&self.drafts).map_err(|err| StorageError::Corrupt {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        self.storage.set(&key, encoded).await
    }
}
