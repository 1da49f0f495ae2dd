//! Sync coordinator
//!
//! Drives re-rendering, delivery/read reconciliation and conversation-list
//! refresh for one open conversation. The transport is chosen once per
//! session by a backend capability probe: push mode subscribes to the
//! store's change feed and the typing feed, poll mode re-fetches on a fixed
//! interval. Both modes run the identical reconciliation sequence, so they
//! are behaviorally indistinguishable apart from latency and resource cost.
//!
//! Exactly one session is active per coordinator; opening a conversation
//! tears down the previous session before establishing the next, and no
//! late callback can reach a closed session's channel.

use crate::{
    Error, Result,
    presence::{PresenceSnapshot, PresenceTracker},
    storage::{ChatStore, ConversationSummary, Message, build_conversations},
    typing::TypingTracker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fixed re-fetch interval in poll mode
pub const POLL_INTERVAL: Duration = Duration::from_millis(1_500);
/// Counterpart presence re-fetch interval in push mode
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(10);
/// Push-mode re-check interval for typing TTL decay
const TYPING_REFRESH_INTERVAL: Duration = Duration::from_millis(1_000);

/// Capacity of a session's event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What a sync session reports to the UI layer
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Fresh snapshot of the open conversation's messages (ascending)
    Messages(Vec<Message>),
    /// Rebuilt conversation list (newest first)
    Conversations(Vec<ConversationSummary>),
    /// Counterpart's effective typing state changed
    Typing(bool),
    /// Counterpart's presence changed
    Presence(PresenceSnapshot),
}

/// Timer configuration for sync sessions
///
/// Tests shrink the intervals; production uses the defaults.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Poll-mode re-fetch interval
    pub poll_interval: Duration,
    /// Push-mode presence re-fetch interval
    pub presence_interval: Duration,
    /// Push-mode typing decay re-check interval
    pub typing_refresh: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            presence_interval: PRESENCE_INTERVAL,
            typing_refresh: TYPING_REFRESH_INTERVAL,
        }
    }
}

/// One open conversation, from the local identity's point of view
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Canonical conversation id
    pub conversation_id: String,
    /// Local identity id (the reconciliation recipient)
    pub local_id: String,
    /// Counterpart id when known; presence/typing reporting needs it
    pub counterpart_id: Option<String>,
}

struct ActiveSession {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the one active sync session per local identity
///
/// Collaborators are injected explicitly; the coordinator reaches no
/// global state.
pub struct SyncCoordinator<S: ChatStore + 'static> {
    store: Arc<S>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingTracker>,
    config: SyncConfig,
    active: Option<ActiveSession>,
}

impl<S: ChatStore + 'static> SyncCoordinator<S> {
    /// Create a coordinator over the given collaborators
    pub fn new(store: Arc<S>, presence: Arc<PresenceTracker>, typing: Arc<TypingTracker>) -> Self {
        Self {
            store,
            presence,
            typing,
            config: SyncConfig::default(),
            active: None,
        }
    }

    /// Override the timer configuration
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Open a conversation, returning its event stream
    ///
    /// Tears down the previous session first; there is never more than one
    /// subscription/timer set alive. The mode is probed once: backends with
    /// a change feed get push, the rest get polling.
    pub fn open(&mut self, spec: SessionSpec) -> mpsc::Receiver<SyncEvent> {
        self.close();

        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let session = Session {
            store: self.store.clone(),
            presence: self.presence.clone(),
            typing: self.typing.clone(),
            config: self.config.clone(),
            spec,
            events,
            stop: stop_rx,
            last_feed: Vec::new(),
            last_typing: false,
            last_presence: None,
        };
        let task = tokio::spawn(session.run());

        self.active = Some(ActiveSession {
            stop: stop_tx,
            task,
        });
        receiver
    }

    /// Tear down the active session, if any
    ///
    /// Idempotent. All subscriptions and timers of the session stop; a
    /// callback arriving after teardown is dropped with its channel.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop.send(true);
            active.task.abort();
        }
    }
}

impl<S: ChatStore + 'static> Drop for SyncCoordinator<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-message fingerprint used to suppress redundant re-renders
type FeedFingerprint = Vec<(String, bool, bool)>;

/// A running sync session for one open conversation
struct Session<S: ChatStore> {
    store: Arc<S>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingTracker>,
    config: SyncConfig,
    spec: SessionSpec,
    events: mpsc::Sender<SyncEvent>,
    stop: watch::Receiver<bool>,
    last_feed: FeedFingerprint,
    last_typing: bool,
    last_presence: Option<PresenceSnapshot>,
}

impl<S: ChatStore> Session<S> {
    /// Run the session until teardown
    ///
    /// A push session that loses its subscription falls back to polling
    /// instead of leaving the UI stale.
    async fn run(mut self) {
        let push = self.store.supports_push();
        info!(
            "Sync session for {} starting in {} mode",
            self.spec.conversation_id,
            if push { "push" } else { "poll" }
        );

        let outcome = if push {
            match self.run_push().await {
                Err(Error::Subscription(reason)) => {
                    warn!(
                        "Push subscription for {} failed: {}. Falling back to poll mode.",
                        self.spec.conversation_id, reason
                    );
                    self.run_poll().await
                }
                other => other,
            }
        } else {
            self.run_poll().await
        };

        if let Err(e) = outcome {
            warn!("Sync session for {} ended: {}", self.spec.conversation_id, e);
        }
        debug!("Sync session for {} stopped", self.spec.conversation_id);
    }

    async fn run_push(&mut self) -> Result<()> {
        let mut store_rx = self
            .store
            .subscribe()
            .ok_or_else(|| Error::Subscription("backend has no change feed".to_string()))?;
        let mut typing_rx = self.typing.subscribe();
        let mut presence_timer = tokio::time::interval(self.config.presence_interval);
        let mut typing_timer = tokio::time::interval(self.config.typing_refresh);
        let mut stop = self.stop.clone();

        // Initial snapshot; change events only cover what happens later.
        if !self.reconcile().await {
            return Ok(());
        }

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return Ok(());
                    }
                }
                event = store_rx.recv() => match event {
                    Ok(ev) if ev.conversation_id == self.spec.conversation_id => {
                        if !self.reconcile().await {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Store feed lagged by {} events; resyncing", skipped);
                        if !self.reconcile().await {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Subscription("store change feed closed".to_string()));
                    }
                },
                event = typing_rx.recv() => match event {
                    Ok(ev) if ev.conversation_id == self.spec.conversation_id
                        && ev.identity_id != self.spec.local_id =>
                    {
                        if !self.emit_typing().await {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !self.emit_typing().await {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Subscription("typing feed closed".to_string()));
                    }
                },
                // The TTL decay of a typing signal produces no event; poll it.
                _ = typing_timer.tick() => {
                    if !self.emit_typing().await {
                        return Ok(());
                    }
                }
                // The push channel does not carry presence; re-fetch it.
                _ = presence_timer.tick() => {
                    if !self.emit_presence().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_poll(&mut self) -> Result<()> {
        let mut poll_timer = tokio::time::interval(self.config.poll_interval);
        let mut presence_timer = tokio::time::interval(self.config.presence_interval);
        let mut stop = self.stop.clone();

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return Ok(());
                    }
                }
                _ = poll_timer.tick() => {
                    if !self.reconcile().await {
                        return Ok(());
                    }
                    if !self.emit_typing().await {
                        return Ok(());
                    }
                }
                _ = presence_timer.tick() => {
                    if !self.emit_presence().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One reconciliation pass: advance receipts, re-fetch, re-render
    ///
    /// Identical in both modes. A failed pass is logged and retried on the
    /// next cycle; it never crashes the sync loop. Returns `false` once the
    /// UI side dropped its receiver.
    async fn reconcile(&mut self) -> bool {
        match self.try_reconcile() {
            Ok((fingerprint, messages, conversations)) => {
                if fingerprint == self.last_feed {
                    return true;
                }
                self.last_feed = fingerprint;
                self.emit(SyncEvent::Messages(messages)).await
                    && self.emit(SyncEvent::Conversations(conversations)).await
            }
            Err(e) => {
                warn!(
                    "Sync tick for {} failed (will retry): {}",
                    self.spec.conversation_id, e
                );
                true
            }
        }
    }

    fn try_reconcile(&self) -> Result<(FeedFingerprint, Vec<Message>, Vec<ConversationSummary>)> {
        // The open conversation is visible, so everything addressed to the
        // local identity here is both delivered and read.
        self.store
            .mark_delivered(&self.spec.conversation_id, &self.spec.local_id)?;
        self.store
            .mark_read(&self.spec.conversation_id, &self.spec.local_id)?;

        let feed = self.store.list_for_identity(&self.spec.local_id)?;
        let fingerprint = feed
            .iter()
            .map(|m| (m.id.clone(), m.delivered, m.read))
            .collect();
        let messages = feed
            .iter()
            .filter(|m| m.conversation_id == self.spec.conversation_id)
            .cloned()
            .collect();
        let conversations = build_conversations(&feed, &self.spec.local_id, &self.presence);
        Ok((fingerprint, messages, conversations))
    }

    async fn emit_typing(&mut self) -> bool {
        let Some(counterpart) = self.spec.counterpart_id.clone() else {
            return true;
        };
        let effective = self
            .typing
            .is_typing(&self.spec.conversation_id, &counterpart);
        if effective == self.last_typing {
            return true;
        }
        self.last_typing = effective;
        self.emit(SyncEvent::Typing(effective)).await
    }

    async fn emit_presence(&mut self) -> bool {
        let Some(counterpart) = self.spec.counterpart_id.clone() else {
            return true;
        };
        let snapshot = self.presence.get_presence(&counterpart);
        if self.last_presence == Some(snapshot) {
            return true;
        }
        self.last_presence = Some(snapshot);
        self.emit(SyncEvent::Presence(snapshot)).await
    }

    async fn emit(&self, event: SyncEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// App-wide visibility hook: the recipient's app became visible/active
///
/// Marks everything addressed to the identity as delivered (across all
/// conversations) and flips presence online. Presence write failures are
/// never fatal here.
pub fn handle_app_visible<S: ChatStore>(
    store: &S,
    presence: &PresenceTracker,
    local_id: &str,
) -> Result<usize> {
    presence.set_presence(local_id, true);
    let updated = store.mark_all_delivered(local_id)?;
    if updated > 0 {
        debug!("Visibility: {} messages marked delivered", updated);
    }
    Ok(updated)
}

/// App-wide hide/unload hook: the identity went offline
pub fn handle_app_hidden(presence: &PresenceTracker, local_id: &str) {
    presence.set_presence(local_id, false);
}
