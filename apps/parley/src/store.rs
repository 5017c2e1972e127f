//! Ordered, de-duplicated message collection for one conversation.
//!
//! Every mutation funnels through [`merge_unique`]: an id that is already
//! stored is never admitted again, whichever source (history page, live frame,
//! persisted draft) offers it.

use std::collections::HashSet;
use std::hash::Hash;

use parley_proto::{Message, MessageId};

/// Merges `incoming` into `existing`, keeping the existing entry whenever an id
/// is already present. New entries keep their relative order and are placed
/// after (`append_at_end`) or before the existing ones.
pub fn merge_unique(
    existing: Vec<Message>,
    incoming: impl IntoIterator<Item = Message>,
    append_at_end: bool,
) -> Vec<Message> {
    merge_unique_by(existing, incoming, append_at_end, |message| {
        message.id.clone()
    })
}

pub fn merge_unique_by<T, K, F>(
    existing: Vec<T>,
    incoming: impl IntoIterator<Item = T>,
    append_at_end: bool,
    key: F,
) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = existing.iter().map(&key).collect();
    let admitted: Vec<T> = incoming
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect();
    if admitted.is_empty() {
        return existing;
    }
    if append_at_end {
        let mut merged = existing;
        merged.extend(admitted);
        merged
    } else {
        let mut merged = admitted;
        merged.extend(existing);
        merged
    }
}

/// Outcome of replacing an optimistic entry with its confirmed echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// The confirmed message took the optimistic entry's slot.
    Replaced,
    /// The confirmed id was already stored; the optimistic entry was dropped.
    Dropped,
    /// No optimistic entry was stored; the confirmed message was appended.
    Appended,
}

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|message| &message.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    /// Returns how many messages were admitted.
    pub fn merge(&mut self, incoming: Vec<Message>, append_at_end: bool) -> usize {
        let before = self.messages.len();
        let existing = std::mem::take(&mut self.messages);
        self.messages = merge_unique(existing, incoming, append_at_end);
        self.messages.len() - before
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|message| &message.id == id)?;
        Some(self.messages.remove(index))
    }

    pub fn adopt_confirmed(&mut self, pending: &MessageId, confirmed: Message) -> Adoption {
        if self.contains(&confirmed.id) {
            self.remove(pending);
            return Adoption::Dropped;
        }
        match self.messages.iter_mut().find(|message| &message.id == pending) {
            Some(slot) => {
                *slot = confirmed;
                Adoption::Replaced
            }
            None => {
                self.merge(vec![confirmed], true);
                Adoption::Appended
            }
        }
    }

    /// Cursor for backward pagination.
    pub fn oldest_confirmed_id(&self) -> Option<&MessageId> {
        self.messages
            .iter()
            .map(|message| &message.id)
            .find(|id| !id.is_pending())
    }

    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|message| message.is_pending())
    }

    /// Case-insensitive substring match over text bodies. A blank query
    /// matches nothing.
    pub fn search(&self, query: &str) -> Vec<&Message> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.messages
            .iter()
            .filter(|message| {
                message
                    .text()
                    .map(|text| text.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
