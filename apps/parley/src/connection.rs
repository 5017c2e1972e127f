//! Supervised live channel for the open conversation.
//!
//! [`ConnectionManager::open`] spawns a worker that connects, pumps frames in
//! both directions and reconnects after unclean drops. Commands submitted while
//! the channel is down wait in the outbound queue; a command whose write failed
//! is retried first on the next connection. A close frame from the server ends
//! the worker without reconnecting.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_proto::{decode_message, ConversationId, Message, SendCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::transport::{Connector, FrameSink, LinkFrame, LiveLink};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connecting { attempt: u32 },
    Opened,
    Message(Message),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The worker stopped; `by_server` is true for a server close frame.
    Closed { by_server: bool },
}

pub trait LinkObserver: Send + Sync + 'static {
    fn on_event(&self, event: LinkEvent);
}

impl<F> LinkObserver for F
where
    F: Fn(LinkEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: LinkEvent) {
        (self)(event)
    }
}

struct ActiveLink {
    conversation_id: ConversationId,
    outbound: mpsc::UnboundedSender<SendCommand>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    active: Option<ActiveLink>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            reconnect_delay,
            active: None,
        }
    }

    /// Opens the channel for `conversation_id`, closing any previous one first.
    pub async fn open(
        &mut self,
        conversation_id: ConversationId,
        token: String,
        observer: Arc<dyn LinkObserver>,
    ) {
        self.close().await;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = LinkWorker {
            connector: self.connector.clone(),
            conversation_id: conversation_id.clone(),
            token,
            reconnect_delay: self.reconnect_delay,
            observer,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            pending: None,
        };
        let task = tokio::spawn(worker.run());
        self.active = Some(ActiveLink {
            conversation_id,
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            task,
        });
    }

    /// Stops the worker and waits for it. Idempotent.
    pub async fn close(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Some(shutdown) = active.shutdown.take() {
            let _ = shutdown.send(());
        }
        match tokio::time::timeout(CLOSE_GRACE, &mut active.task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_cancelled() => {}
            Ok(Err(err)) => warn!(target: "parley.link", error = %err, "link worker failed"),
            Err(_) => {
                warn!(target: "parley.link", conversation = %active.conversation_id, "link worker did not stop in time; aborting");
                active.task.abort();
            }
        }
    }

    /// Queues a command. It is written as soon as a channel is open.
    pub fn send(&self, command: SendCommand) -> ChatResult<()> {
        let active = self.active.as_ref().ok_or(ChatError::ChannelClosed)?;
        active
            .outbound
            .send(command)
            .map_err(|_| ChatError::ChannelClosed)
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.task.is_finished())
            .unwrap_or(false)
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.active.as_ref().map(|active| &active.conversation_id)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

enum LinkExit {
    Shutdown,
    ClosedByServer,
    Dropped,
}

struct LinkWorker {
    connector: Arc<dyn Connector>,
    conversation_id: ConversationId,
    token: String,
    reconnect_delay: Duration,
    observer: Arc<dyn LinkObserver>,
    outbound: mpsc::UnboundedReceiver<SendCommand>,
    shutdown: oneshot::Receiver<()>,
    pending: Option<SendCommand>,
}

impl LinkWorker {
    async fn run(mut self) {
        let mut attempt = 0u32;
        let mut reconnects = 0u32;
        loop {
            attempt += 1;
            self.observer.on_event(LinkEvent::Connecting { attempt });
            let connected = tokio::select! {
                _ = &mut self.shutdown => return self.stopped(false),
                result = self.connector.connect(&self.conversation_id, &self.token) => result,
            };

            let exit = match connected {
                Ok(link) => {
                    info!(target: "parley.link", conversation = %self.conversation_id, attempt, "live channel open");
                    self.observer.on_event(LinkEvent::Opened);
                    self.pump(link).await
                }
                Err(err) => {
                    debug!(target: "parley.link", conversation = %self.conversation_id, attempt, error = %err, "connect failed");
                    LinkExit::Dropped
                }
            };

            match exit {
                LinkExit::Shutdown => return self.stopped(false),
                LinkExit::ClosedByServer => {
                    info!(target: "parley.link", conversation = %self.conversation_id, "server closed live channel");
                    return self.stopped(true);
                }
                LinkExit::Dropped => {}
            }

            reconnects += 1;
            self.observer.on_event(LinkEvent::ReconnectScheduled {
                attempt: reconnects,
                delay: self.reconnect_delay,
            });
            debug!(target: "parley.link", conversation = %self.conversation_id, attempt = reconnects, delay_ms = self.reconnect_delay.as_millis() as u64, "reconnect scheduled");
            tokio::select! {
                _ = &mut self.shutdown => return self.stopped(false),
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    fn stopped(&self, by_server: bool) {
        self.observer.on_event(LinkEvent::Closed { by_server });
    }

    async fn pump(&mut self, link: LiveLink) -> LinkExit {
        let LiveLink {
            mut sink,
            mut stream,
        } = link;

        if let Some(command) = self.pending.take() {
            if let Err(exit) = self.write(&mut sink, command).await {
                return exit;
            }
        }

        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    close_sink(&mut sink).await;
                    return LinkExit::Shutdown;
                }
                command = self.outbound.recv() => match command {
                    Some(command) => {
                        if let Err(exit) = self.write(&mut sink, command).await {
                            return exit;
                        }
                    }
                    None => {
                        close_sink(&mut sink).await;
                        return LinkExit::Shutdown;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(LinkFrame::Text(text))) => self.deliver(&text),
                    Some(Ok(LinkFrame::Close)) => return LinkExit::ClosedByServer,
                    Some(Err(err)) => {
                        debug!(target: "parley.link", conversation = %self.conversation_id, error = %err, "live channel dropped");
                        return LinkExit::Dropped;
                    }
                    None => {
                        debug!(target: "parley.link", conversation = %self.conversation_id, "live channel ended without close");
                        return LinkExit::Dropped;
                    }
                },
            }
        }
    }

    async fn write(&mut self, sink: &mut FrameSink, command: SendCommand) -> Result<(), LinkExit> {
        let text = match command.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "parley.link", error = %err, "dropping unencodable command");
                return Ok(());
            }
        };
        if let Err(err) = sink.send(LinkFrame::Text(text)).await {
            debug!(target: "parley.link", error = %err, "write failed; command kept for next connection");
            self.pending = Some(command);
            return Err(LinkExit::Dropped);
        }
        Ok(())
    }

    fn deliver(&self, text: &str) {
        match decode_message(text, &self.conversation_id) {
            Ok(message) if message.conversation_id == self.conversation_id => {
                self.observer.on_event(LinkEvent::Message(message));
            }
            Ok(message) => {
                debug!(target: "parley.link", expected = %self.conversation_id, got = %message.conversation_id, "dropping frame for another conversation");
            }
            Err(err) => {
                debug!(target: "parley.link", error = %err, "dropping malformed frame");
            }
        }
    }
}

async fn close_sink(sink: &mut FrameSink) {
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(LinkFrame::Close)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;
    use parley_proto::SendPayload;
    use serde_json::json;

    fn observer() -> (Arc<dyn LinkObserver>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = move |event: LinkEvent| {
            let _ = tx.send(event);
        };
        (Arc::new(observer), rx)
    }

    async fn next_non_connecting(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        loop {
            match rx.recv().await.expect("event") {
                LinkEvent::Connecting { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_messages_for_the_open_conversation() {
        let (connector, mut peers) = MockConnector::new();
        let mut manager = ConnectionManager::new(connector, DEFAULT_RECONNECT_DELAY);
        let (observer, mut events) = observer();
        manager.open("5".into(), "tok".into(), observer).await;

        let peer = peers.recv().await.expect("peer");
        assert_eq!(peer.token, "tok");
        assert_eq!(next_non_connecting(&mut events).await, LinkEvent::Opened);

        peer.push_json(json!({"id": 1, "chat": 9, "sender": 1, "created_at": "2024-05-01T10:00:00Z", "text": "elsewhere"}));
        peer.push_text("garbage");
        peer.push_json(json!({"id": 2, "sender": 1, "created_at": "2024-05-01T10:00:00Z", "text": "here"}));

        match next_non_connecting(&mut events).await {
            LinkEvent::Message(message) => {
                assert_eq!(message.text(), Some("here"));
                assert_eq!(message.conversation_id.as_str(), "5");
            }
            other => panic!("unexpected event {other:?}"),
        }
        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_does_not_reconnect() {
        let (connector, mut peers) = MockConnector::new();
        let mut manager = ConnectionManager::new(connector.clone(), DEFAULT_RECONNECT_DELAY);
        let (observer, mut events) = observer();
        manager.open("5".into(), "tok".into(), observer).await;

        let peer = peers.recv().await.expect("peer");
        assert_eq!(next_non_connecting(&mut events).await, LinkEvent::Opened);
        peer.close();
        assert_eq!(
            next_non_connecting(&mut events).await,
            LinkEvent::Closed { by_server: true }
        );

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY * 3).await;
        assert_eq!(connector.attempts(), 1);
        assert!(matches!(
            manager.send(SendCommand::new(SendPayload::Text("late".into()), None)),
            Err(ChatError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_worker_and_sends_close_frame() {
        let (connector, mut peers) = MockConnector::new();
        let mut manager = ConnectionManager::new(connector, DEFAULT_RECONNECT_DELAY);
        let (observer, mut events) = observer();
        manager.open("5".into(), "tok".into(), observer).await;
        let mut peer = peers.recv().await.expect("peer");
        assert_eq!(next_non_connecting(&mut events).await, LinkEvent::Opened);

        manager.close().await;
        assert_eq!(peer.next_frame().await, Some(LinkFrame::Close));
        assert_eq!(
            next_non_connecting(&mut events).await,
            LinkEvent::Closed { by_server: false }
        );
        assert!(!manager.is_active());
        assert!(manager.conversation_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_replaces_previous_channel() {
        let (connector, mut peers) = MockConnector::new();
        let mut manager = ConnectionManager::new(connector, DEFAULT_RECONNECT_DELAY);
        let (first_observer, _first_events) = observer();
        manager.open("1".into(), "tok".into(), first_observer).await;
        let mut first = peers.recv().await.expect("first peer");

        let (second_observer, _second_events) = observer();
        manager.open("2".into(), "tok".into(), second_observer).await;
        let second = peers.recv().await.expect("second peer");

        assert_eq!(second.conversation_id.as_str(), "2");
        assert_eq!(manager.conversation_id().map(|c| c.as_str()), Some("2"));
        assert_eq!(first.next_frame().await, Some(LinkFrame::Close));
        manager.close().await;
    }
}
