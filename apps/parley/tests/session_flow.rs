use std::sync::Arc;
use std::time::Duration;

use parley_client_core::api::mock::MockBackend;
use parley_client_core::api::FileUpload;
use parley_client_core::drafts::storage::{InMemoryStore, KeyValueStore};
use parley_client_core::drafts::DraftReconciler;
use parley_client_core::transport::mock::{MockConnector, MockPeer};
use parley_client_core::{ChatClient, ChatError, ClientOptions, SessionPhase, SessionUpdate};
use parley_proto::{ConversationId, DraftRecord, Message, MessageBody, MessageId, UploadedFile};
use serde_json::json;
use time::macros::datetime;
use tokio::sync::mpsc;

struct Harness {
    client: ChatClient,
    backend: Arc<MockBackend>,
    connector: Arc<MockConnector>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
    storage: Arc<InMemoryStore>,
}

fn harness_with(storage: Arc<InMemoryStore>, page_size: usize) -> Harness {
    let backend = MockBackend::new();
    let (connector, peers) = MockConnector::new();
    let mut options = ClientOptions::new("u1");
    options.page_size = page_size;
    let client = ChatClient::new(
        backend.clone(),
        connector.clone(),
        storage.clone(),
        options,
        "tok",
    );
    Harness {
        client,
        backend,
        connector,
        peers,
        storage,
    }
}

fn harness() -> Harness {
    harness_with(InMemoryStore::new(), 20)
}

fn msg(conversation: &str, id: &str) -> Message {
    Message {
        id: MessageId::confirmed(id),
        conversation_id: conversation.into(),
        sender_id: "u2".into(),
        created_at: datetime!(2024-05-01 10:00 UTC),
        body: MessageBody::text(format!("message {id}")),
        client_token: None,
        sender_nickname: None,
    }
}

fn ids(client: &ChatClient) -> Vec<String> {
    client.messages().iter().map(|m| m.id.to_string()).collect()
}

/// Applies updates until one matches, failing after a bounded number.
async fn until<F>(client: &mut ChatClient, mut wanted: F) -> SessionUpdate
where
    F: FnMut(&SessionUpdate) -> bool,
{
    for _ in 0..32 {
        let update = tokio::time::timeout(Duration::from_secs(30), client.next_update())
            .await
            .expect("update in time");
        if wanted(&update) {
            return update;
        }
    }
    panic!("expected update never arrived");
}

async fn open_live(h: &mut Harness, conversation: &str) -> MockPeer {
    h.client.open(conversation.into()).await;
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    until(&mut h.client, |u| {
        matches!(u, SessionUpdate::PhaseChanged(SessionPhase::Live))
    })
    .await;
    h.peers.recv().await.expect("live peer")
}

#[tokio::test(start_paused = true)]
async fn initial_page_then_live_channel() {
    let mut h = harness();
    h.backend
        .set_history("7", vec![msg("7", "1"), msg("7", "2"), msg("7", "3")]);
    assert_eq!(h.client.phase(), SessionPhase::Uninitialized);

    h.client.open("7".into()).await;
    assert_eq!(h.client.phase(), SessionPhase::LoadingInitialPage);

    let update = until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert!(matches!(
        update,
        SessionUpdate::HistoryMerged {
            admitted: 3,
            has_more: false
        }
    ));
    assert_eq!(ids(&h.client), ["1", "2", "3"]);

    until(&mut h.client, |u| {
        matches!(u, SessionUpdate::PhaseChanged(SessionPhase::Live))
    })
    .await;
    let peer = h.peers.recv().await.expect("peer");
    assert_eq!(peer.conversation_id.as_str(), "7");
    assert_eq!(peer.token, "tok");

    peer.push_json(json!({"id": 4, "chat": 7, "sender": 2, "created_at": "2024-05-01T10:05:00Z", "text": "live"}));
    // Replayed frame is deduplicated.
    peer.push_json(json!({"id": 3, "chat": 7, "sender": 2, "created_at": "2024-05-01T10:00:00Z", "text": "message 3"}));
    until(&mut h.client, |u| matches!(u, SessionUpdate::LiveMessage { .. })).await;
    until(&mut h.client, |u| matches!(u, SessionUpdate::Unchanged)).await;
    assert_eq!(ids(&h.client), ["1", "2", "3", "4"]);
}

#[tokio::test(start_paused = true)]
async fn live_echo_retires_draft_and_leaves_one_message() {
    let mut h = harness();
    h.backend.set_history("7", vec![msg("7", "1")]);
    let mut peer = open_live(&mut h, "7").await;

    h.client
        .send_files(vec![FileUpload::new("a.png", b"png".to_vec())])
        .unwrap();
    let update = until(&mut h.client, |u| matches!(u, SessionUpdate::DraftsSent(_))).await;
    let SessionUpdate::DraftsSent(drafted) = update else {
        unreachable!()
    };
    assert_eq!(drafted.len(), 1);
    assert!(drafted[0].is_pending());
    assert_eq!(h.storage.keys().await, vec!["chat-drafts/7".to_string()]);
    assert_eq!(h.client.messages().len(), 2);
    assert!(h.client.messages()[1].is_pending());

    let command = peer.next_command().await.expect("send command");
    assert_eq!(command.file_url.as_deref(), Some("/media/chat/7/a.png"));
    assert_eq!(command.filename.as_deref(), Some("a.png"));
    let token = command.client_token.clone().expect("client token");

    peer.push_json(json!({
        "id": 50, "chat": 7, "sender": "u1",
        "created_at": "2024-05-01T10:06:00Z",
        "text": "", "file_url": "/media/chat/7/a.png", "filename": "a.png",
        "client_token": token
    }));
    let update = until(&mut h.client, |u| matches!(u, SessionUpdate::LiveMessage { .. })).await;
    assert!(matches!(
        update,
        SessionUpdate::LiveMessage {
            replaced_draft: true,
            ..
        }
    ));

    assert!(h.storage.keys().await.is_empty());
    let with_url: Vec<_> = h
        .client
        .messages()
        .iter()
        .filter(|m| m.file_url() == Some("/media/chat/7/a.png"))
        .collect();
    assert_eq!(with_url.len(), 1);
    assert_eq!(with_url[0].id, MessageId::confirmed("50"));
    assert_eq!(ids(&h.client), ["1", "50"]);
}

#[tokio::test(start_paused = true)]
async fn echo_without_token_matches_on_file_url() {
    let mut h = harness();
    let mut peer = open_live(&mut h, "7").await;

    h.client
        .send_files(vec![FileUpload::new("doc.pdf", b"pdf".to_vec())])
        .unwrap();
    until(&mut h.client, |u| matches!(u, SessionUpdate::DraftsSent(_))).await;
    peer.next_command().await.expect("send command");

    peer.push_json(json!({
        "id": 60, "chat": 7, "sender": "u1",
        "created_at": "2024-05-01T10:06:00Z",
        "file_url": "/media/chat/7/doc.pdf"
    }));
    until(&mut h.client, |u| matches!(u, SessionUpdate::LiveMessage { .. })).await;
    assert_eq!(ids(&h.client), ["60"]);
    assert!(h.storage.keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn switching_conversations_discards_stale_history() {
    let mut h = harness();
    h.backend.set_history("x", vec![msg("x", "x1"), msg("x", "x2")]);
    h.backend.set_history("y", vec![msg("y", "y1")]);
    let release_x = h.backend.hold_next_fetch("x");

    h.client.open("x".into()).await;
    h.client.open("y".into()).await;
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert_eq!(ids(&h.client), ["y1"]);

    release_x.send(()).unwrap();
    let mut saw_stale = false;
    for _ in 0..8 {
        match h.client.next_update().await {
            SessionUpdate::Stale => {
                saw_stale = true;
                break;
            }
            SessionUpdate::HistoryMerged { .. } | SessionUpdate::LiveMessage { .. } => {
                panic!("stale page mutated the open conversation")
            }
            _ => {}
        }
    }
    assert!(saw_stale);
    assert_eq!(ids(&h.client), ["y1"]);
    assert_eq!(h.client.conversation_id().map(|c| c.as_str()), Some("y"));

    // Only the open conversation got a live channel.
    let peer = h.peers.recv().await.expect("peer");
    assert_eq!(peer.conversation_id.as_str(), "y");
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_upload_does_not_draft_into_new_conversation() {
    let mut h = harness();
    let _peer_x = open_live(&mut h, "x").await;
    h.client
        .send_files(vec![FileUpload::new("a.png", b"png".to_vec())])
        .unwrap();
    h.client.open("y".into()).await;

    let (mut saw_stale, mut saw_page) = (false, false);
    for _ in 0..12 {
        match h.client.next_update().await {
            SessionUpdate::Stale => saw_stale = true,
            SessionUpdate::HistoryMerged { .. } => saw_page = true,
            SessionUpdate::DraftsSent(_) => panic!("upload for x drafted into y"),
            _ => {}
        }
        if saw_stale && saw_page {
            break;
        }
    }
    assert!(saw_stale && saw_page);
    assert!(h.client.messages().iter().all(|m| !m.is_pending()));
    assert!(h.storage.keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_page_stops_further_scroll_requests() {
    let mut h = harness_with(InMemoryStore::new(), 2);
    h.backend.set_history("7", vec![msg("7", "1"), msg("7", "2")]);

    h.client.open("7".into()).await;
    let first = until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert!(matches!(
        first,
        SessionUpdate::HistoryMerged {
            admitted: 2,
            has_more: true
        }
    ));
    assert!(h.client.has_more_history());

    assert!(!h.client.on_scroll(120.0));
    assert!(h.client.on_scroll(10.0));
    assert!(!h.client.on_scroll(0.0), "one request in flight at a time");
    let second = until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert!(matches!(
        second,
        SessionUpdate::HistoryMerged {
            admitted: 0,
            has_more: false
        }
    ));

    assert!(!h.client.on_scroll(0.0));
    assert!(!h.client.load_older());
    let calls = h.backend.history_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].before, None);
    assert_eq!(calls[1].before.as_deref(), Some("1"));
    assert_eq!(calls[1].limit, 2);
}

#[tokio::test(start_paused = true)]
async fn older_pages_are_prepended() {
    let mut h = harness_with(InMemoryStore::new(), 2);
    h.backend.set_history(
        "7",
        vec![msg("7", "1"), msg("7", "2"), msg("7", "3"), msg("7", "4")],
    );
    h.client.open("7".into()).await;
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert_eq!(ids(&h.client), ["3", "4"]);

    assert!(h.client.load_older());
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert_eq!(ids(&h.client), ["1", "2", "3", "4"]);
}

#[tokio::test(start_paused = true)]
async fn persisted_drafts_show_before_any_response() {
    let storage = InMemoryStore::new();
    let upload = UploadedFile {
        file_url: "/media/chat/7/old.png".into(),
        filename: "old.png".into(),
    };
    let draft = DraftRecord::for_upload("7".into(), "u1".into(), &upload);
    {
        let mut drafts = DraftReconciler::load(storage.clone(), "7".into())
            .await
            .unwrap();
        drafts.record(draft.clone()).await.unwrap();
    }

    let mut h = harness_with(storage, 20);
    h.backend.set_history("7", vec![msg("7", "1")]);
    let release = h.backend.hold_next_fetch("7");

    h.client.open("7".into()).await;
    assert_eq!(h.client.messages().len(), 1);
    assert_eq!(h.client.messages()[0].id, MessageId::Pending(draft.local_id));
    assert_eq!(h.client.phase(), SessionPhase::LoadingInitialPage);

    release.send(()).unwrap();
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    let listed = ids(&h.client);
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0], "1");
    assert!(h.client.messages()[1].is_pending());
}

#[tokio::test(start_paused = true)]
async fn history_echo_retires_persisted_draft() {
    let storage = InMemoryStore::new();
    let upload = UploadedFile {
        file_url: "/media/chat/7/old.png".into(),
        filename: "old.png".into(),
    };
    let draft = DraftRecord::for_upload("7".into(), "u1".into(), &upload);
    DraftReconciler::load(storage.clone(), "7".into())
        .await
        .unwrap()
        .record(draft)
        .await
        .unwrap();

    let mut confirmed = msg("7", "9");
    confirmed.body = MessageBody::file("/media/chat/7/old.png", Some("old.png".into()));
    let mut h = harness_with(storage.clone(), 20);
    h.backend.set_history("7", vec![msg("7", "8"), confirmed]);

    h.client.open("7".into()).await;
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert_eq!(ids(&h.client), ["8", "9"]);
    assert!(storage.get("chat-drafts/7").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn history_failure_is_reported_and_retryable() {
    let mut h = harness();
    h.backend.set_history("7", vec![msg("7", "1")]);
    h.backend.fail_next_fetches(1);

    h.client.open("7".into()).await;
    let update = until(&mut h.client, |u| {
        matches!(u, SessionUpdate::HistoryUnavailable(_))
    })
    .await;
    assert!(matches!(update, SessionUpdate::HistoryUnavailable(_)));
    assert!(h.client.has_more_history());

    // The live channel still opens.
    until(&mut h.client, |u| {
        matches!(u, SessionUpdate::PhaseChanged(SessionPhase::Live))
    })
    .await;

    assert!(h.client.load_older());
    until(&mut h.client, |u| matches!(u, SessionUpdate::HistoryMerged { .. })).await;
    assert_eq!(ids(&h.client), ["1"]);
}

#[tokio::test(start_paused = true)]
async fn failed_upload_reports_send_failure() {
    let mut h = harness();
    let _peer = open_live(&mut h, "7").await;
    h.backend
        .push_upload_result(Err(ChatError::Upload("too large".into())));

    h.client
        .send_files(vec![FileUpload::new("big.bin", vec![0; 8])])
        .unwrap();
    let update = until(&mut h.client, |u| matches!(u, SessionUpdate::SendFailed(_))).await;
    assert!(matches!(update, SessionUpdate::SendFailed(ChatError::Upload(_))));
    assert!(h.client.messages().is_empty());
    assert!(h.storage.keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn text_is_sent_but_not_drafted() {
    let mut h = harness();
    let mut peer = open_live(&mut h, "7").await;

    h.client.send_text("   ").unwrap();
    h.client.send_text("hello").unwrap();
    let command = peer.next_command().await.expect("command");
    assert_eq!(command.text, "hello");
    assert_eq!(command.client_token, None);
    assert!(h.client.messages().is_empty());
    assert!(h.storage.keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_messages_cannot_be_deleted_or_shared() {
    let mut h = harness();
    h.backend.set_history("7", vec![msg("7", "1")]);
    let _peer = open_live(&mut h, "7").await;
    h.client
        .send_files(vec![FileUpload::new("a.png", b"png".to_vec())])
        .unwrap();
    let SessionUpdate::DraftsSent(drafted) =
        until(&mut h.client, |u| matches!(u, SessionUpdate::DraftsSent(_))).await
    else {
        unreachable!()
    };
    let pending = drafted[0].clone();

    assert!(matches!(
        h.client.delete_message(&pending).await,
        Err(ChatError::PendingMessage(_))
    ));
    assert!(matches!(
        h.client.share_message(&pending, &"9".into()).await,
        Err(ChatError::PendingMessage(_))
    ));
    assert!(matches!(
        h.client.delete_message(&MessageId::confirmed("404")).await,
        Err(ChatError::UnknownMessage(_))
    ));

    h.client
        .share_message(&MessageId::confirmed("1"), &"9".into())
        .await
        .unwrap();
    h.client.delete_message(&MessageId::confirmed("1")).await.unwrap();
    assert_eq!(
        h.backend.deleted(),
        vec![(ConversationId::from("7"), "1".to_string())]
    );
    assert_eq!(h.backend.shares().len(), 1);
    assert_eq!(h.backend.shares()[0].1.target_id, "1");
    assert!(h.client.messages().iter().all(|m| m.is_pending()));
}

#[tokio::test(start_paused = true)]
async fn search_and_close() {
    let mut h = harness();
    let mut hello = msg("7", "1");
    hello.body = MessageBody::text("Hello world");
    h.backend.set_history("7", vec![hello, msg("7", "2")]);
    let _peer = open_live(&mut h, "7").await;

    let hits = h.client.search("WORLD");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, MessageId::confirmed("1"));

    h.client.close().await;
    assert_eq!(h.client.phase(), SessionPhase::Closed);
    assert!(h.client.messages().is_empty());
    assert!(matches!(
        h.client.send_text("after close"),
        Err(ChatError::NoConversation)
    ));
}

#[tokio::test(start_paused = true)]
async fn set_token_reconnects_with_new_credential() {
    let mut h = harness();
    let _first = open_live(&mut h, "7").await;

    h.client.set_token("fresh").await;
    let second = h.peers.recv().await.expect("reconnected peer");
    assert_eq!(second.token, "fresh");
    assert_eq!(h.connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn token_refresh_never_reports_closed() {
    let mut h = harness();
    let _first = open_live(&mut h, "7").await;

    h.client.set_token("fresh").await;
    let second = h.peers.recv().await.expect("reconnected peer");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let updates = h.client.drain_ready().await;
    assert!(
        !updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::PhaseChanged(SessionPhase::Closed))),
        "unexpected close: {updates:?}"
    );
    assert_eq!(h.client.phase(), SessionPhase::Live);

    // The replacement channel still feeds the session.
    assert!(second.push_json(json!({
        "id": 90, "chat": 7, "sender": 2,
        "created_at": "2024-05-01T10:05:00Z", "text": "after refresh"
    })));
    let update = until(&mut h.client, |u| matches!(u, SessionUpdate::LiveMessage { .. })).await;
    assert!(matches!(update, SessionUpdate::LiveMessage { replaced_draft: false, .. }));
    assert_eq!(ids(&h.client).last().map(String::as_str), Some("90"));
}

#[tokio::test(start_paused = true)]
async fn discarded_pending_file_is_not_restored() {
    let storage = InMemoryStore::new();
    let upload = UploadedFile {
        file_url: "/media/chat/7/stuck.png".into(),
        filename: "stuck.png".into(),
    };
    let draft = DraftRecord::for_upload("7".into(), "u1".into(), &upload);
    {
        let mut drafts = DraftReconciler::load(storage.clone(), "7".into())
            .await
            .unwrap();
        drafts.record(draft.clone()).await.unwrap();
    }

    let mut h = harness_with(storage.clone(), 20);
    h.client.open("7".into()).await;
    let pending = MessageId::Pending(draft.local_id);
    assert_eq!(h.client.messages()[0].id, pending);

    assert!(matches!(
        h.client.discard_pending(&MessageId::confirmed("1")).await,
        Err(ChatError::UnknownMessage(_))
    ));
    h.client.discard_pending(&pending).await.unwrap();
    assert!(h.client.messages().is_empty());
    assert_eq!(storage.get("chat-drafts/7").await.unwrap(), None);
    assert!(matches!(
        h.client.discard_pending(&pending).await,
        Err(ChatError::UnknownMessage(_))
    ));

    h.client.open("7".into()).await;
    assert!(h.client.messages().is_empty());
}
