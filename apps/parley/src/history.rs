//! Backward pagination over a conversation's history.

use parley_proto::{ConversationId, Message, MessageId};
use tracing::debug;

use crate::api::ChatBackend;
use crate::error::ChatResult;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Distance from the top of the transcript, in pixels, below which a scroll
/// asks for the next older page.
pub const SCROLL_TOP_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Server id of the oldest loaded message; `None` asks for the newest page.
    pub before: Option<String>,
    pub limit: usize,
}

/// Tracks whether older pages remain and keeps at most one request in flight.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    page_size: usize,
    exhausted: bool,
    in_flight: bool,
    pages_loaded: usize,
}

impl HistoryPager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            exhausted: false,
            in_flight: false,
            pages_loaded: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    /// Claims the next request, or `None` when history is exhausted or a
    /// request is already outstanding. A pending cursor is ignored; drafts
    /// have no position on the server.
    pub fn begin(&mut self, cursor: Option<&MessageId>) -> Option<PageRequest> {
        if self.exhausted || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            before: cursor.and_then(MessageId::server_id).map(str::to_string),
            limit: self.page_size,
        })
    }

    /// Records a completed request. A short or empty page means the start of
    /// the conversation was reached.
    pub fn finish(&mut self, request: &PageRequest, received: usize) {
        self.in_flight = false;
        self.pages_loaded += 1;
        if received < request.limit {
            self.exhausted = true;
        }
    }

    /// A failed request can be retried; the exhaustion flag is untouched.
    pub fn fail(&mut self) {
        self.in_flight = false;
    }

    pub fn should_load_on_scroll(&self, scroll_top: f64) -> bool {
        scroll_top < SCROLL_TOP_THRESHOLD && !self.exhausted && !self.in_flight
    }
}

impl Default for HistoryPager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Fetches one page. Messages come back oldest first and are not re-sorted.
pub async fn load_page(
    backend: &dyn ChatBackend,
    conversation_id: &ConversationId,
    request: &PageRequest,
) -> ChatResult<Vec<Message>> {
    let page = backend
        .fetch_history(conversation_id, request.before.as_deref(), request.limit)
        .await?;
    debug!(
        target: "parley.history",
        conversation = %conversation_id,
        before = ?request.before,
        received = page.len(),
        "history page loaded"
    );
    Ok(page)
}
