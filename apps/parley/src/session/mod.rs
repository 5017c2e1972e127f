//! Conversation session controller.
//!
//! [`ChatClient`] owns at most one open conversation. Background work (history
//! fetches, uploads, live channel events) reports back through a single event
//! queue; the caller drives [`ChatClient::next_update`] (or pairs
//! [`ChatClient::next_event`] with [`ChatClient::apply`]) and every event is
//! applied on the caller's task. Each event carries the [`SessionTicket`] of
//! the session that started it, so results that arrive after the user switched
//! conversations are discarded instead of leaking into the new one.

mod room;

use std::sync::Arc;
use std::time::Duration;

use parley_proto::{
    ConversationId, Message, MessageId, SendCommand, SendPayload, ShareKind, ShareRef,
    UploadedFile, UserId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use self::room::ChatSession;
use crate::api::{ChatBackend, FileUpload, HttpBackend};
use crate::config::ChatConfig;
use crate::connection::{ConnectionManager, LinkEvent, LinkObserver};
use crate::drafts::storage::{FileStore, InMemoryStore, KeyValueStore};
use crate::drafts::DraftReconciler;
use crate::error::{ChatError, ChatResult};
use crate::history::{self, HistoryPager, PageRequest};
use crate::transport::websocket::{LiveChannelConfig, WebSocketConnector};
use crate::transport::Connector;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTicket {
    pub conversation_id: ConversationId,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    LoadingInitialPage,
    Live,
    Reconnecting,
    Closed,
}

#[derive(Debug)]
pub enum SessionEvent {
    HistoryPage {
        ticket: SessionTicket,
        request: PageRequest,
        result: ChatResult<Vec<Message>>,
    },
    UploadFinished {
        ticket: SessionTicket,
        result: ChatResult<Vec<UploadedFile>>,
    },
    Link {
        ticket: SessionTicket,
        /// Which live channel of the session produced the event.
        link: u64,
        event: LinkEvent,
    },
}

impl SessionEvent {
    pub fn ticket(&self) -> &SessionTicket {
        match self {
            SessionEvent::HistoryPage { ticket, .. }
            | SessionEvent::UploadFinished { ticket, .. }
            | SessionEvent::Link { ticket, .. } => ticket,
        }
    }
}

/// What changed after applying one event.
#[derive(Debug)]
pub enum SessionUpdate {
    HistoryMerged { admitted: usize, has_more: bool },
    HistoryUnavailable(ChatError),
    LiveMessage { id: MessageId, replaced_draft: bool },
    DraftsSent(Vec<MessageId>),
    SendFailed(ChatError),
    PhaseChanged(SessionPhase),
    /// The event belonged to a conversation that is no longer open.
    Stale,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_id: UserId,
    pub page_size: usize,
    pub reconnect_delay: Duration,
}

impl ClientOptions {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            page_size: history::DEFAULT_PAGE_SIZE,
            reconnect_delay: crate::connection::DEFAULT_RECONNECT_DELAY,
        }
    }
}

pub struct ChatClient {
    backend: Arc<dyn ChatBackend>,
    connector: Arc<dyn Connector>,
    storage: Arc<dyn KeyValueStore>,
    options: ClientOptions,
    token: String,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    epoch: u64,
    session: Option<ChatSession>,
    closed: bool,
}

impl ChatClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        connector: Arc<dyn Connector>,
        storage: Arc<dyn KeyValueStore>,
        options: ClientOptions,
        token: impl Into<String>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            connector,
            storage,
            options,
            token: token.into(),
            events_tx,
            events_rx,
            epoch: 0,
            session: None,
            closed: false,
        }
    }

    /// Wires the HTTP backend, WebSocket connector and file-backed drafts.
    /// Drafts stay in memory when no draft directory can be resolved.
    pub async fn from_config(config: &ChatConfig) -> ChatResult<Self> {
        let backend = Arc::new(HttpBackend::new(&config.api_url, config.token.clone())?);
        let connector = Arc::new(WebSocketConnector::new(LiveChannelConfig::new(
            config.live_base_url(),
        )));
        let storage: Arc<dyn KeyValueStore> = match config.resolved_draft_dir() {
            Some(dir) => FileStore::open(dir).await?,
            None => {
                warn!(target: "parley.drafts", "no draft directory; drafts will not survive restart");
                InMemoryStore::new()
            }
        };
        let options = ClientOptions {
            user_id: UserId::from(config.user_id.as_str()),
            page_size: config.page_size,
            reconnect_delay: config.reconnect_delay,
        };
        Ok(Self::new(backend, connector, storage, options, config.token.clone()))
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.session {
            Some(session) => session.phase,
            None if self.closed => SessionPhase::Closed,
            None => SessionPhase::Uninitialized,
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.session.as_ref().map(|session| &session.ticket.conversation_id)
    }

    pub fn ticket(&self) -> Option<&SessionTicket> {
        self.session.as_ref().map(|session| &session.ticket)
    }

    pub fn user_id(&self) -> &UserId {
        &self.options.user_id
    }

    pub fn messages(&self) -> &[Message] {
        self.session
            .as_ref()
            .map(|session| session.store.messages())
            .unwrap_or(&[])
    }

    pub fn has_more_history(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.pager.has_more())
            .unwrap_or(false)
    }

    pub fn is_loading_history(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.pager.is_in_flight())
            .unwrap_or(false)
    }

    pub fn search(&self, query: &str) -> Vec<&Message> {
        self.session
            .as_ref()
            .map(|session| session.store.search(query))
            .unwrap_or_default()
    }

    /// Opens `conversation_id`, tearing down whatever was open. Persisted
    /// drafts are shown immediately; the first history page is requested and
    /// the live channel opens once it resolves.
    pub async fn open(&mut self, conversation_id: ConversationId) {
        self.close().await;
        self.closed = false;
        self.epoch += 1;
        let ticket = SessionTicket {
            conversation_id: conversation_id.clone(),
            epoch: self.epoch,
        };
        info!(target: "parley.session", conversation = %conversation_id, epoch = self.epoch, "opening conversation");

        let drafts = match DraftReconciler::load(self.storage.clone(), conversation_id.clone()).await {
            Ok(drafts) => drafts,
            Err(err) => {
                warn!(target: "parley.drafts", conversation = %conversation_id, error = %err, "could not load drafts");
                DraftReconciler::empty(self.storage.clone(), conversation_id)
            }
        };
        let connection = ConnectionManager::new(self.connector.clone(), self.options.reconnect_delay);
        self.session = Some(ChatSession::new(
            ticket,
            self.options.user_id.clone(),
            drafts,
            HistoryPager::new(self.options.page_size),
            connection,
        ));
        self.load_older();
    }

    /// Stops the live channel and forgets the open conversation. In-flight
    /// results for it are discarded when they arrive.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.connection.close().await;
            self.closed = true;
            debug!(target: "parley.session", conversation = %session.ticket.conversation_id, "conversation closed");
        }
    }

    /// Uses `token` for later requests and reconnects the live channel with it.
    pub async fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
        self.backend.set_token(&self.token);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.live_started {
            return;
        }
        // Events the replaced channel emits while shutting down are dropped.
        session.link_generation += 1;
        let observer = link_observer(&self.events_tx, &session.ticket, session.link_generation);
        let conversation_id = session.ticket.conversation_id.clone();
        session
            .connection
            .open(conversation_id, self.token.clone(), observer)
            .await;
    }

    /// Requests the next older page. Returns false when nothing was started:
    /// no conversation, history exhausted, or a page already in flight.
    pub fn load_older(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let Some(request) = session.next_page_request() else {
            return false;
        };
        let ticket = session.ticket.clone();
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = history::load_page(backend.as_ref(), &ticket.conversation_id, &request).await;
            let _ = events.send(SessionEvent::HistoryPage {
                ticket,
                request,
                result,
            });
        });
        true
    }

    /// Scroll handler: near the top of the transcript, fetch older history.
    pub fn on_scroll(&mut self, scroll_top: f64) -> bool {
        let wanted = self
            .session
            .as_ref()
            .map(|session| !session.store.is_empty() && session.pager.should_load_on_scroll(scroll_top))
            .unwrap_or(false);
        wanted && self.load_older()
    }

    /// Sends a text message. Blank text is ignored. Text is not shown until the
    /// server echoes it.
    pub fn send_text(&mut self, text: &str) -> ChatResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let session = self.session.as_ref().ok_or(ChatError::NoConversation)?;
        session
            .connection
            .send(SendCommand::new(SendPayload::Text(text.to_string()), None))
    }

    /// Posts a share into the open conversation over the live channel.
    pub fn send_share(&mut self, share: ShareRef) -> ChatResult<()> {
        let session = self.session.as_ref().ok_or(ChatError::NoConversation)?;
        session
            .connection
            .send(SendCommand::new(SendPayload::Share(share), None))
    }

    /// Uploads files, then sends one file message per uploaded file. The
    /// outcome arrives as [`SessionUpdate::DraftsSent`] or
    /// [`SessionUpdate::SendFailed`].
    pub fn send_files(&mut self, files: Vec<FileUpload>) -> ChatResult<()> {
        let session = self.session.as_ref().ok_or(ChatError::NoConversation)?;
        if files.is_empty() {
            return Ok(());
        }
        let ticket = session.ticket.clone();
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.upload_files(&ticket.conversation_id, files).await;
            let _ = events.send(SessionEvent::UploadFinished { ticket, result });
        });
        Ok(())
    }

    /// Deletes a confirmed message on the server, then locally.
    pub async fn delete_message(&mut self, id: &MessageId) -> ChatResult<()> {
        let session = self.session.as_mut().ok_or(ChatError::NoConversation)?;
        let server_id = session.shareable_id(id)?;
        self.backend
            .delete_message(&session.ticket.conversation_id, &server_id)
            .await?;
        session.store.remove(id);
        debug!(target: "parley.session", message_id = %id, "message deleted");
        Ok(())
    }

    /// Abandons a file message that is still being sent. It leaves the
    /// transcript and is not restored when the conversation reopens.
    pub async fn discard_pending(&mut self, id: &MessageId) -> ChatResult<()> {
        let session = self.session.as_mut().ok_or(ChatError::NoConversation)?;
        let MessageId::Pending(local_id) = id else {
            return Err(ChatError::UnknownMessage(id.clone()));
        };
        if session.store.remove(id).is_none() {
            return Err(ChatError::UnknownMessage(id.clone()));
        }
        session.drafts.discard(*local_id).await?;
        debug!(target: "parley.drafts", message_id = %id, "pending message discarded");
        Ok(())
    }

    /// Shares a message of the open conversation into `target`.
    pub async fn share_message(&self, id: &MessageId, target: &ConversationId) -> ChatResult<()> {
        let session = self.session.as_ref().ok_or(ChatError::NoConversation)?;
        let share = ShareRef {
            kind: ShareKind::Message,
            target_id: session.shareable_id(id)?,
        };
        self.backend.share_to(target, &share).await
    }

    /// Shares a post or profile into `target` over REST.
    pub async fn share_to(&self, target: &ConversationId, share: &ShareRef) -> ChatResult<()> {
        self.backend.share_to(target, share).await
    }

    /// Waits for the next background event without applying it. Cancel safe,
    /// so it can sit in a `select!` next to user input.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Waits for the next background event and applies it.
    pub async fn next_update(&mut self) -> SessionUpdate {
        match self.events_rx.recv().await {
            Some(event) => self.apply(event).await,
            // The client holds a sender, so the queue never closes.
            None => SessionUpdate::Unchanged,
        }
    }

    /// Applies any events that are already queued, without waiting.
    pub async fn drain_ready(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            updates.push(self.apply(event).await);
        }
        updates
    }

    pub async fn apply(&mut self, event: SessionEvent) -> SessionUpdate {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|session| &session.ticket == event.ticket())
        else {
            debug!(target: "parley.session", ticket = ?event.ticket(), "discarding stale event");
            return SessionUpdate::Stale;
        };

        match event {
            SessionEvent::HistoryPage {
                request, result, ..
            } => {
                let update = session.apply_history(&request, result).await;
                if !session.live_started {
                    session.live_started = true;
                    let observer =
                        link_observer(&self.events_tx, &session.ticket, session.link_generation);
                    let conversation_id = session.ticket.conversation_id.clone();
                    session
                        .connection
                        .open(conversation_id, self.token.clone(), observer)
                        .await;
                }
                update
            }
            SessionEvent::UploadFinished { result, .. } => session.apply_upload(result).await,
            SessionEvent::Link { link, event, .. } if link != session.link_generation => {
                debug!(target: "parley.session", link, ?event, "dropping event from replaced live channel");
                SessionUpdate::Unchanged
            }
            SessionEvent::Link { event, .. } => session.apply_link(event).await,
        }
    }
}

/// Observer that tags link events with the session ticket and link generation.
fn link_observer(
    events: &mpsc::UnboundedSender<SessionEvent>,
    ticket: &SessionTicket,
    link: u64,
) -> Arc<dyn LinkObserver> {
    let events = events.clone();
    let ticket = ticket.clone();
    let observer = move |event: LinkEvent| {
        let _ = events.send(SessionEvent::Link {
            ticket: ticket.clone(),
            link,
            event,
        });
    };
    Arc::new(observer)
}
