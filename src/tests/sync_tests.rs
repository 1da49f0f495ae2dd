// Sync sessions: push and poll parity, fallback, teardown, visibility hooks

use crate::presence::PresenceTracker;
use crate::storage::{
    ChatStore, Message, MessageBody, MessageDraft, SqliteStore, StoreEvent,
};
use crate::sync::{
    SessionSpec, SyncConfig, SyncCoordinator, SyncEvent, handle_app_hidden, handle_app_visible,
};
use crate::tests::helpers::manual_clock;
use crate::typing::{TYPING_TTL_MS, TypingTracker};
use crate::{Result, clock::ManualClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const AMY: (&str, &str) = ("uid_amy", "amy");
const ZED: (&str, &str) = ("uid_zed", "zed");

fn text_draft(from: (&str, &str), to: (&str, &str), text: &str) -> MessageDraft {
    MessageDraft {
        conversation_id: crate::identity::conversation_id(from.0, to.0),
        sender_id: from.0.to_string(),
        sender_name: from.1.to_string(),
        recipient_id: to.0.to_string(),
        recipient_name: to.1.to_string(),
        body: MessageBody::Text {
            text: text.to_string(),
        },
        counterpart_online: false,
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(20),
        presence_interval: Duration::from_millis(25),
        typing_refresh: Duration::from_millis(15),
    }
}

struct Fixture {
    store: Arc<SqliteStore>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingTracker>,
    clock: ManualClock,
}

fn fixture(push: bool) -> Fixture {
    let (clock, shared) = manual_clock(1_000_000);
    let store = SqliteStore::new_in_memory()
        .unwrap()
        .with_clock(shared.clone());
    let store = if push { store } else { store.poll_only() };
    Fixture {
        store: Arc::new(store),
        presence: Arc::new(PresenceTracker::new(shared.clone())),
        typing: Arc::new(TypingTracker::new(shared)),
        clock,
    }
}

fn coordinator(fx: &Fixture) -> SyncCoordinator<SqliteStore> {
    SyncCoordinator::new(fx.store.clone(), fx.presence.clone(), fx.typing.clone())
        .with_config(fast_config())
}

fn zed_opens_chat_with_amy() -> SessionSpec {
    SessionSpec {
        conversation_id: crate::identity::conversation_id("uid_zed", "uid_amy"),
        local_id: "uid_zed".to_string(),
        counterpart_id: Some("uid_amy".to_string()),
    }
}

/// Wait for the next event matching `pred`, skipping the rest
async fn expect_event<F>(rx: &mut mpsc::Receiver<SyncEvent>, pred: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event stream closed while waiting"),
            }
        }
    })
    .await
    .expect("timed out waiting for sync event")
}

async fn expect_no_event<F>(rx: &mut mpsc::Receiver<SyncEvent>, pred: F)
where
    F: Fn(&SyncEvent) -> bool,
{
    let deadline = tokio::time::timeout(Duration::from_millis(150), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return,
                Some(_) => {}
                None => return,
            }
        }
    })
    .await;
    assert!(deadline.is_err(), "unexpected sync event arrived");
}

fn messages_of(event: &SyncEvent) -> &[Message] {
    match event {
        SyncEvent::Messages(messages) => messages,
        _ => panic!("expected a messages event"),
    }
}

#[tokio::test]
async fn test_push_session_streams_new_messages() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    fx.store.append(text_draft(AMY, ZED, "hi zed")).unwrap();

    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Messages(_))).await;
    let messages = messages_of(&event);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_id, "uid_amy");

    // The open conversation implies delivery and read receipts
    assert!(messages[0].delivered && messages[0].read);
    let stored = &fx.store.list_conversation(&messages[0].conversation_id).unwrap()[0];
    assert!(stored.delivered && stored.read);

    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Conversations(_))).await;
    match event {
        SyncEvent::Conversations(rows) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].counterpart_id, "uid_amy");
            assert_eq!(rows[0].unread_count, 0);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_poll_session_converges_on_the_same_state() {
    let fx = fixture(false);
    fx.store.append(text_draft(AMY, ZED, "hi zed")).unwrap();

    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Messages(_))).await;
    let messages = messages_of(&event);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].delivered && messages[0].read);
}

#[tokio::test]
async fn test_poll_session_picks_up_later_appends() {
    let fx = fixture(false);
    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    fx.store.append(text_draft(AMY, ZED, "first")).unwrap();
    expect_event(&mut rx, |e| matches!(e, SyncEvent::Messages(m) if m.len() == 1)).await;

    fx.clock.advance(10);
    fx.store.append(text_draft(AMY, ZED, "second")).unwrap();
    expect_event(&mut rx, |e| matches!(e, SyncEvent::Messages(m) if m.len() == 2)).await;
}

/// Claims a change feed but cannot produce one; forces the poll fallback
struct BrokenPushStore {
    inner: SqliteStore,
}

impl ChatStore for BrokenPushStore {
    fn append(&self, draft: MessageDraft) -> Result<Message> {
        self.inner.append(draft)
    }
    fn list_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.inner.list_conversation(conversation_id)
    }
    fn list_for_identity(&self, identity_id: &str) -> Result<Vec<Message>> {
        self.inner.list_for_identity(identity_id)
    }
    fn mark_delivered(&self, conversation_id: &str, recipient_id: &str) -> Result<usize> {
        self.inner.mark_delivered(conversation_id, recipient_id)
    }
    fn mark_read(&self, conversation_id: &str, recipient_id: &str) -> Result<usize> {
        self.inner.mark_read(conversation_id, recipient_id)
    }
    fn mark_all_delivered(&self, recipient_id: &str) -> Result<usize> {
        self.inner.mark_all_delivered(recipient_id)
    }
    fn unread_count(&self, recipient_id: &str) -> Result<usize> {
        self.inner.unread_count(recipient_id)
    }
    fn supports_push(&self) -> bool {
        true
    }
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        None
    }
}

#[tokio::test]
async fn test_push_failure_falls_back_to_polling() {
    let (_, shared) = manual_clock(1_000_000);
    let store = Arc::new(BrokenPushStore {
        inner: SqliteStore::new_in_memory()
            .unwrap()
            .with_clock(shared.clone())
            .poll_only(),
    });
    let presence = Arc::new(PresenceTracker::new(shared.clone()));
    let typing = Arc::new(TypingTracker::new(shared));

    let mut coordinator =
        SyncCoordinator::new(store.clone(), presence, typing).with_config(fast_config());
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    // The session must still deliver updates, now via polling
    store.append(text_draft(AMY, ZED, "hi")).unwrap();
    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Messages(_))).await;
    assert_eq!(messages_of(&event).len(), 1);
}

#[tokio::test]
async fn test_counterpart_typing_is_reported_and_decays() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);
    let conversation_id = crate::identity::conversation_id("uid_zed", "uid_amy");
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    fx.typing.set_typing(&conversation_id, "uid_amy", true);
    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Typing(_))).await;
    assert!(matches!(event, SyncEvent::Typing(true)));

    // A signal older than the TTL stops being shown even without a
    // "stopped" write; the refresh timer picks the decay up.
    fx.clock.advance(TYPING_TTL_MS + 1);
    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Typing(_))).await;
    assert!(matches!(event, SyncEvent::Typing(false)));
}

#[tokio::test]
async fn test_own_typing_is_not_echoed_back() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);
    let conversation_id = crate::identity::conversation_id("uid_zed", "uid_amy");
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    fx.typing.set_typing(&conversation_id, "uid_zed", true);
    expect_no_event(&mut rx, |e| matches!(e, SyncEvent::Typing(_))).await;
}

#[tokio::test]
async fn test_typing_in_another_conversation_is_not_reported() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    fx.typing.set_typing("uid_amy_uid_bob", "uid_amy", true);
    expect_no_event(&mut rx, |e| matches!(e, SyncEvent::Typing(_))).await;
}

#[tokio::test]
async fn test_presence_changes_are_reported_once() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    // First presence tick reports the initial snapshot
    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Presence(_))).await;
    match event {
        SyncEvent::Presence(snapshot) => assert!(!snapshot.online),
        _ => unreachable!(),
    }

    fx.presence.set_presence("uid_amy", true);
    let event = expect_event(&mut rx, |e| matches!(e, SyncEvent::Presence(_))).await;
    match event {
        SyncEvent::Presence(snapshot) => assert!(snapshot.online),
        _ => unreachable!(),
    }

    // Unchanged presence is not re-reported
    expect_no_event(&mut rx, |e| matches!(e, SyncEvent::Presence(_))).await;
}

#[tokio::test]
async fn test_unchanged_state_is_not_rerendered() {
    let fx = fixture(false);
    fx.store.append(text_draft(AMY, ZED, "hi")).unwrap();

    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    expect_event(&mut rx, |e| matches!(e, SyncEvent::Messages(_))).await;
    expect_event(&mut rx, |e| matches!(e, SyncEvent::Conversations(_))).await;

    // Subsequent poll ticks see an identical snapshot and stay silent
    expect_no_event(&mut rx, |e| {
        matches!(e, SyncEvent::Messages(_) | SyncEvent::Conversations(_))
    })
    .await;
}

#[tokio::test]
async fn test_open_replaces_the_previous_session() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);

    let mut first = coordinator.open(zed_opens_chat_with_amy());
    let mut second = coordinator.open(SessionSpec {
        conversation_id: crate::identity::conversation_id("uid_zed", "uid_bob"),
        local_id: "uid_zed".to_string(),
        counterpart_id: Some("uid_bob".to_string()),
    });

    // The first session's stream ends; no late event can reach it
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while first.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "first session did not shut down");

    fx.store
        .append(text_draft(("uid_bob", "bob"), ZED, "hi"))
        .unwrap();
    let event = expect_event(&mut second, |e| matches!(e, SyncEvent::Messages(_))).await;
    assert_eq!(messages_of(&event)[0].sender_id, "uid_bob");
}

#[tokio::test]
async fn test_close_tears_down_and_is_idempotent() {
    let fx = fixture(true);
    let mut coordinator = coordinator(&fx);
    let mut rx = coordinator.open(zed_opens_chat_with_amy());

    coordinator.close();
    coordinator.close();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "session did not shut down");
}

#[tokio::test]
async fn test_app_visibility_hooks() {
    let fx = fixture(true);

    // Two senders wrote to zed while the app was hidden
    fx.store.append(text_draft(AMY, ZED, "one")).unwrap();
    fx.store
        .append(text_draft(("uid_bob", "bob"), ZED, "two"))
        .unwrap();

    let updated = handle_app_visible(fx.store.as_ref(), &fx.presence, "uid_zed").unwrap();
    assert_eq!(updated, 2);
    assert!(fx.presence.get_presence("uid_zed").online);

    // Delivered everywhere, read nowhere
    for msg in fx.store.list_for_identity("uid_zed").unwrap() {
        assert!(msg.delivered);
        assert!(!msg.read);
    }

    fx.clock.advance(5_000);
    handle_app_hidden(&fx.presence, "uid_zed");
    let snapshot = fx.presence.get_presence("uid_zed");
    assert!(!snapshot.online);
    assert_eq!(snapshot.last_seen, Some(1_005_000));
}
