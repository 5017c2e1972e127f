use parley_proto::{DraftRecord, Message, MessageId, SendCommand, SendPayload, UploadedFile, UserId};
use tracing::{debug, info, warn};

use super::{SessionPhase, SessionTicket, SessionUpdate};
use crate::connection::{ConnectionManager, LinkEvent};
use crate::drafts::DraftReconciler;
use crate::error::{ChatError, ChatResult};
use crate::history::{HistoryPager, PageRequest};
use crate::store::{Adoption, MessageStore};

/// State of the one open conversation.
pub(crate) struct ChatSession {
    pub(crate) ticket: SessionTicket,
    pub(crate) user_id: UserId,
    pub(crate) phase: SessionPhase,
    pub(crate) store: MessageStore,
    pub(crate) drafts: DraftReconciler,
    pub(crate) pager: HistoryPager,
    pub(crate) connection: ConnectionManager,
    pub(crate) live_started: bool,
    pub(crate) link_generation: u64,
}

impl ChatSession {
    pub(crate) fn new(
        ticket: SessionTicket,
        user_id: UserId,
        drafts: DraftReconciler,
        pager: HistoryPager,
        connection: ConnectionManager,
    ) -> Self {
        let mut store = MessageStore::new();
        let restored = store.merge(drafts.messages(), true);
        if restored > 0 {
            debug!(target: "parley.drafts", conversation = %ticket.conversation_id, restored, "restored pending drafts");
        }
        Self {
            ticket,
            user_id,
            phase: SessionPhase::LoadingInitialPage,
            store,
            drafts,
            pager,
            connection,
            live_started: false,
            link_generation: 0,
        }
    }

    pub(crate) fn next_page_request(&mut self) -> Option<PageRequest> {
        let cursor = self.store.oldest_confirmed_id().cloned();
        self.pager.begin(cursor.as_ref())
    }

    pub(crate) async fn apply_history(
        &mut self,
        request: &PageRequest,
        result: ChatResult<Vec<Message>>,
    ) -> SessionUpdate {
        match result {
            Ok(page) => {
                self.pager.finish(request, page.len());
                for message in &page {
                    self.collapse_draft(message).await;
                }
                let admitted = self.store.merge(page, false);
                debug!(
                    target: "parley.history",
                    conversation = %self.ticket.conversation_id,
                    admitted,
                    exhausted = !self.pager.has_more(),
                    "history merged"
                );
                SessionUpdate::HistoryMerged {
                    admitted,
                    has_more: self.pager.has_more(),
                }
            }
            Err(err) => {
                self.pager.fail();
                warn!(target: "parley.history", conversation = %self.ticket.conversation_id, error = %err, "history fetch failed");
                SessionUpdate::HistoryUnavailable(err)
            }
        }
    }

    pub(crate) async fn apply_upload(
        &mut self,
        result: ChatResult<Vec<UploadedFile>>,
    ) -> SessionUpdate {
        let files = match result {
            Ok(files) => files,
            Err(err) => {
                warn!(target: "parley.session", error = %err, "upload failed");
                return SessionUpdate::SendFailed(err);
            }
        };

        let mut drafted = Vec::with_capacity(files.len());
        let mut failure = None;
        for file in files {
            let draft = DraftRecord::for_upload(
                self.ticket.conversation_id.clone(),
                self.user_id.clone(),
                &file,
            );
            let id = draft.message_id();
            let command = SendCommand::new(SendPayload::File(file), Some(draft.client_token()));
            self.store.merge(vec![draft.to_message()], true);
            if let Err(err) = self.drafts.record(draft).await {
                warn!(target: "parley.drafts", error = %err, "draft not persisted");
            }
            if let Err(err) = self.connection.send(command) {
                warn!(target: "parley.session", message_id = %id, error = %err, "file send not queued");
                failure = Some(err);
            }
            drafted.push(id);
        }

        match failure {
            Some(err) => SessionUpdate::SendFailed(err),
            None => SessionUpdate::DraftsSent(drafted),
        }
    }

    pub(crate) async fn apply_link(&mut self, event: LinkEvent) -> SessionUpdate {
        match event {
            LinkEvent::Connecting { .. } => SessionUpdate::Unchanged,
            LinkEvent::Opened => self.enter(SessionPhase::Live),
            LinkEvent::ReconnectScheduled { .. } => self.enter(SessionPhase::Reconnecting),
            LinkEvent::Closed { by_server } => {
                if by_server {
                    info!(target: "parley.session", conversation = %self.ticket.conversation_id, "live channel closed by server");
                }
                self.enter(SessionPhase::Closed)
            }
            LinkEvent::Message(message) => self.ingest_live(message).await,
        }
    }

    fn enter(&mut self, phase: SessionPhase) -> SessionUpdate {
        if self.phase == phase {
            return SessionUpdate::Unchanged;
        }
        debug!(target: "parley.session", from = ?self.phase, to = ?phase, "phase change");
        self.phase = phase;
        SessionUpdate::PhaseChanged(phase)
    }

    async fn ingest_live(&mut self, message: Message) -> SessionUpdate {
        let id = message.id.clone();
        if let Some(adoption) = self.collapse_draft(&message).await {
            return SessionUpdate::LiveMessage {
                id,
                replaced_draft: adoption == Adoption::Replaced,
            };
        }
        if self.store.merge(vec![message], true) == 0 {
            return SessionUpdate::Unchanged;
        }
        SessionUpdate::LiveMessage {
            id,
            replaced_draft: false,
        }
    }

    /// Retires the draft `confirmed` echoes and puts the confirmed message in
    /// its slot. `None` when no draft matches.
    async fn collapse_draft(&mut self, confirmed: &Message) -> Option<Adoption> {
        let (draft, persisted) = self.drafts.retire(confirmed).await;
        if let Err(err) = persisted {
            warn!(target: "parley.drafts", error = %err, "retired draft still persisted");
        }
        let draft = draft?;
        Some(self.store.adopt_confirmed(&draft.message_id(), confirmed.clone()))
    }

    /// Share reference for a stored message; pending messages cannot be shared.
    pub(crate) fn shareable_id(&self, id: &MessageId) -> ChatResult<String> {
        let message = self
            .store
            .get(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.clone()))?;
        message
            .id
            .server_id()
            .map(str::to_string)
            .ok_or_else(|| ChatError::PendingMessage(id.clone()))
    }
}
