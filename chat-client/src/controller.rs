//! ChatController - the main interface for class chat.
//!
//! This module provides [`ChatController`], which keeps one class channel's
//! message list in sync with the remote message table while giving the UI
//! optimistic, instantly visible sends.
//!
//! # Architecture
//!
//! The controller drives the pure pieces from chat-core (store, reload
//! sequencer, lifecycle) and performs the I/O they ask for through the
//! injected collaborators.
//!
//! ```text
//! UI → ChatController → RemoteMessageGateway / ChangeFeed → Backend
//!            ↓
//!       chat-core (store, sequencer, lifecycle)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use classroom_chat_client::{ChatConfig, ChatController, MockBackend, StaticIdentity};
//!
//! let backend = MockBackend::new();
//! let identity = StaticIdentity::signed_in(UserId::new("alice"));
//! let chat = ChatController::new(backend.clone(), backend, identity, ChatConfig::default());
//!
//! chat.activate(ChannelId::new("class-1")).await?;
//! chat.send("hello").await?;
//! for bubble in chat.bubbles().await {
//!     println!("{}: {}", bubble.sender, bubble.content);
//! }
//! ```

use std::sync::{Arc, Weak};

use classroom_chat_core::{
    Action, Event, FeedStatus, FetchTicket, Lifecycle, MessageStore, ReloadSequencer,
};
use classroom_chat_types::{
    ChannelId, Message, MessageId, MessageStatus, Timestamp, UserId, ValidationError,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::ChatConfig;
use crate::gateway::{
    ChangeFeed, FeedHandle, FeedNotifier, GatewayError, IdentityProvider, InsertNotice,
    RemoteMessageGateway,
};

/// Controller errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The message was rejected before any network call.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Full-history fetch failed. The last good view is kept.
    #[error("failed to load messages: {0}")]
    Load(#[source] GatewayError),

    /// The durable write failed. The optimistic entry was rolled back.
    #[error("failed to send message: {source}")]
    Send {
        /// The text the user tried to send, for restoring the input box.
        text: String,
        /// Underlying gateway error.
        #[source]
        source: GatewayError,
    },

    /// No channel is active.
    #[error("no channel is active")]
    NotActive,
}

impl ChatError {
    /// The text of a failed send, if this is a send failure.
    pub fn failed_text(&self) -> Option<&str> {
        match self {
            Self::Send { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The rendered view changed and should be redrawn.
    ViewChanged,
    /// A reload failed.
    LoadFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// A send failed and was rolled back.
    SendFailed {
        /// The text that was not sent.
        text: String,
        /// Human-readable cause.
        reason: String,
    },
    /// The change feed could not be opened. Manual reload still works.
    FeedUnavailable {
        /// Human-readable cause.
        reason: String,
    },
    /// The change feed ended unexpectedly.
    FeedClosed,
}

/// A staged send, returned by [`ChatController::stage_send`].
///
/// Its pending entry is already visible; pass it to
/// [`ChatController::deliver`] to perform the durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Provisional id of the pending entry.
    pub id: MessageId,
    /// Channel the message goes to.
    pub channel: ChannelId,
    /// Sending user.
    pub author: UserId,
    /// Trimmed message text.
    pub text: String,
    activation: u64,
}

/// One rendered chat bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    /// Message id (provisional while pending).
    pub id: MessageId,
    /// Sender label: "You", the author's email, or "Unknown".
    pub sender: String,
    /// Message text.
    pub content: String,
    /// Whether the current user wrote it.
    pub mine: bool,
    /// Confirmation state.
    pub status: MessageStatus,
}

struct ControllerState<H> {
    lifecycle: Lifecycle,
    store: MessageStore,
    sequencer: ReloadSequencer,
    feed: Option<H>,
    listener: Option<JoinHandle<()>>,
    last_error: Option<String>,
    /// Bumped on every activation change; stale tasks compare against it.
    activation: u64,
}

struct Inner<G, F: ChangeFeed, I> {
    gateway: G,
    feed: F,
    identity: I,
    state: Mutex<ControllerState<F::Handle>>,
    events: broadcast::Sender<ChatEvent>,
}

/// Chat controller for one class channel at a time.
///
/// Cheap to clone; clones share the same store and subscription.
pub struct ChatController<G, F: ChangeFeed, I> {
    inner: Arc<Inner<G, F, I>>,
}

impl<G, F: ChangeFeed, I> Clone for ChatController<G, F, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G, F, I> ChatController<G, F, I>
where
    G: RemoteMessageGateway + 'static,
    F: ChangeFeed + 'static,
    I: IdentityProvider + 'static,
{
    /// Create a new controller with no active channel.
    pub fn new(gateway: G, feed: F, identity: I, config: ChatConfig) -> Self {
        let (events, _) = broadcast::channel(config.events.capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                gateway,
                feed,
                identity,
                state: Mutex::new(ControllerState {
                    lifecycle: Lifecycle::new(),
                    store: MessageStore::with_max_pending(config.store.max_pending),
                    sequencer: ReloadSequencer::new(),
                    feed: None,
                    listener: None,
                    last_error: None,
                    activation: 0,
                }),
                events,
            }),
        }
    }

    /// Display a channel: subscribe to its inserts, then load its history.
    ///
    /// Idempotent for the active channel. Activating a different channel
    /// tears the previous one down first. A failed feed subscription is
    /// reported as [`ChatEvent::FeedUnavailable`] and is not an error; a
    /// failed history load returns [`ChatError::Load`] while the
    /// subscription stays open.
    pub async fn activate(&self, channel: ChannelId) -> Result<(), ChatError> {
        let mut retired = None;
        let mut open = None;
        let mut reload = None;

        let activation = {
            let mut state = self.inner.state.lock().await;
            let (next, actions) = state.lifecycle.clone().on_event(Event::ActivateRequested {
                channel: channel.clone(),
            });
            state.lifecycle = next;
            if actions.is_empty() {
                return Ok(());
            }
            state.activation += 1;

            for action in actions {
                match action {
                    Action::CloseFeed => retired = Some(Self::take_feed(&mut state)),
                    Action::InvalidateReloads => state.sequencer.invalidate(),
                    Action::ResetStore => {
                        state.store.clear();
                        state.last_error = None;
                    }
                    Action::OpenFeed { channel } => open = Some(channel),
                    Action::Reload => reload = Some(state.sequencer.begin()),
                }
            }
            state.activation
        };

        tracing::info!("Activating class chat on {}", channel);
        self.emit(ChatEvent::ViewChanged);

        if let Some((handle, listener)) = retired {
            Self::release_feed(handle, listener).await;
        }
        if let Some(channel) = open {
            self.open_feed(channel, activation).await;
        }
        match reload {
            Some(ticket) => self.reload_with(channel, ticket).await,
            None => Ok(()),
        }
    }

    /// Leave the active channel.
    ///
    /// Closes the subscription, stops the feed listener and makes every
    /// in-flight reload inapplicable. The last view is kept. Safe to call
    /// repeatedly.
    pub async fn deactivate(&self) {
        let retired = {
            let mut state = self.inner.state.lock().await;
            let (next, actions) = state.lifecycle.clone().on_event(Event::DeactivateRequested);
            state.lifecycle = next;
            if actions.is_empty() {
                return;
            }
            state.activation += 1;

            let mut retired = None;
            for action in actions {
                match action {
                    Action::CloseFeed => retired = Some(Self::take_feed(&mut state)),
                    Action::InvalidateReloads => state.sequencer.invalidate(),
                    _ => {}
                }
            }
            retired
        };

        if let Some((handle, listener)) = retired {
            Self::release_feed(handle, listener).await;
        }
        tracing::info!("Class chat deactivated");
    }

    /// Send a message: [`stage_send`](Self::stage_send) then
    /// [`deliver`](Self::deliver).
    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        let outgoing = self.stage_send(text).await?;
        self.deliver(outgoing).await
    }

    /// Validate a message and insert it as pending.
    ///
    /// No network call is made. The pending entry is visible as soon as
    /// this returns.
    pub async fn stage_send(&self, text: &str) -> Result<OutgoingMessage, ChatError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        let author = self
            .inner
            .identity
            .current_user_id()
            .ok_or(ValidationError::NoIdentity)?;

        let outgoing = {
            let mut state = self.inner.state.lock().await;
            let channel = state
                .lifecycle
                .channel()
                .cloned()
                .ok_or(ChatError::NotActive)?;

            let message = Message::pending(author.clone(), text, Timestamp::now());
            let stored = state.store.add_pending(message)?;
            OutgoingMessage {
                id: stored.id,
                channel,
                author,
                text: stored.content,
                activation: state.activation,
            }
        };

        tracing::debug!("Staged {} on {}", outgoing.id, outgoing.channel);
        self.emit(ChatEvent::ViewChanged);
        Ok(outgoing)
    }

    /// Perform the durable write for a staged message.
    ///
    /// On success the pending entry is marked resolved and a reload is run;
    /// the entry is replaced by its confirmed copy once a snapshot fetched
    /// after the write is applied. A failing reload is reported through
    /// events but does not fail the send. On failure the pending entry is
    /// removed and the text is returned in [`ChatError::Send`].
    ///
    /// If the controller was deactivated or switched channel since staging,
    /// a successful write drops the pending entry without reloading, and a
    /// failed one neither sets the error banner nor emits
    /// [`ChatEvent::SendFailed`].
    pub async fn deliver(&self, outgoing: OutgoingMessage) -> Result<(), ChatError> {
        let result = self
            .inner
            .gateway
            .append(&outgoing.channel, &outgoing.author, &outgoing.text)
            .await;

        match result {
            Ok(()) => {
                let (ticket, discarded) = {
                    let mut state = self.inner.state.lock().await;
                    if state.activation == outgoing.activation && state.lifecycle.is_active() {
                        let ticket = state.sequencer.begin();
                        state.store.resolve_pending_after(&outgoing.id, ticket);
                        (Some(ticket), false)
                    } else {
                        // No snapshot will replace it; the row shows up on
                        // the next activation
                        (None, state.store.discard_pending(&outgoing.id))
                    }
                };

                tracing::debug!("Delivered {}", outgoing.id);
                if discarded {
                    self.emit(ChatEvent::ViewChanged);
                }
                if let Some(ticket) = ticket {
                    if let Err(e) = self.reload_with(outgoing.channel, ticket).await {
                        tracing::debug!("Reload after send failed: {}", e);
                    }
                }
                Ok(())
            }
            Err(source) => {
                let (removed, current) = {
                    let mut state = self.inner.state.lock().await;
                    let current = state.activation == outgoing.activation;
                    if current {
                        state.last_error = Some(format!("Message not sent: {}", source));
                    }
                    (state.store.fail_pending(&outgoing.id).is_some(), current)
                };

                tracing::warn!("Send of {} failed: {}", outgoing.id, source);
                if removed {
                    self.emit(ChatEvent::ViewChanged);
                }
                if current {
                    self.emit(ChatEvent::SendFailed {
                        text: outgoing.text.clone(),
                        reason: source.to_string(),
                    });
                }
                Err(ChatError::Send {
                    text: outgoing.text,
                    source,
                })
            }
        }
    }

    /// Re-fetch full history and apply it.
    ///
    /// Every call issues its own fetch; only the feed listener coalesces
    /// bursts of insert notices. A response that completes after a newer
    /// one was applied is discarded.
    pub async fn reload(&self) -> Result<(), ChatError> {
        let (channel, ticket) = {
            let mut state = self.inner.state.lock().await;
            let channel = state
                .lifecycle
                .channel()
                .cloned()
                .ok_or(ChatError::NotActive)?;
            (channel, state.sequencer.begin())
        };
        self.reload_with(channel, ticket).await
    }

    /// The merged view in render order.
    pub async fn view(&self) -> Vec<Message> {
        self.inner.state.lock().await.store.snapshot()
    }

    /// The view as chat bubbles for the current user.
    pub async fn bubbles(&self) -> Vec<Bubble> {
        let me = self.inner.identity.current_user_id();
        let state = self.inner.state.lock().await;
        state
            .store
            .current_view()
            .map(|message| Bubble {
                id: message.id.clone(),
                sender: message.display_label(me.as_ref()).to_string(),
                content: message.content.clone(),
                mine: message.is_from(me.as_ref()),
                status: message.status,
            })
            .collect()
    }

    /// Subscribe to UI events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// The error banner text, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.lock().await.last_error.clone()
    }

    /// Clear the error banner.
    pub async fn dismiss_error(&self) {
        self.inner.state.lock().await.last_error = None;
    }

    /// The active channel, if any.
    pub async fn channel(&self) -> Option<ChannelId> {
        self.inner.state.lock().await.lifecycle.channel().cloned()
    }

    /// Check if a channel is active.
    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.lifecycle.is_active()
    }

    /// Health of the active channel's change feed.
    pub async fn feed_status(&self) -> Option<FeedStatus> {
        self.inner.state.lock().await.lifecycle.feed_status()
    }

    async fn reload_with(&self, channel: ChannelId, ticket: FetchTicket) -> Result<(), ChatError> {
        let result = self.inner.gateway.fetch_all(&channel).await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(rows) => {
                if !state.sequencer.accept(ticket) {
                    tracing::debug!("Discarding stale snapshot {} for {}", ticket, channel);
                    return Ok(());
                }
                let messages: Vec<Message> = rows
                    .into_iter()
                    .filter_map(|row| match Message::from_row(row) {
                        Ok(message) => Some(message),
                        Err(e) => {
                            tracing::warn!("Skipping malformed row on {}: {}", channel, e);
                            None
                        }
                    })
                    .collect();
                state.store.apply_snapshot(messages, ticket);
                tracing::debug!(
                    "Applied snapshot {} for {} ({} messages, {} pending)",
                    ticket,
                    channel,
                    state.store.confirmed_count(),
                    state.store.pending_count()
                );
                drop(state);
                self.emit(ChatEvent::ViewChanged);
                Ok(())
            }
            Err(source) => {
                let current = state.sequencer.is_current(ticket);
                if current {
                    state.last_error = Some(format!("Couldn't load messages: {}", source));
                }
                drop(state);

                tracing::warn!("Reload {} for {} failed: {}", ticket, channel, source);
                if current {
                    self.emit(ChatEvent::LoadFailed {
                        reason: source.to_string(),
                    });
                }
                Err(ChatError::Load(source))
            }
        }
    }

    /// Reload on behalf of the feed listener of `activation`.
    async fn reload_for(&self, activation: u64) -> Result<(), ChatError> {
        let (channel, ticket) = {
            let mut state = self.inner.state.lock().await;
            if state.activation != activation {
                return Ok(());
            }
            match state.lifecycle.channel().cloned() {
                Some(channel) => (channel, state.sequencer.begin()),
                None => return Ok(()),
            }
        };
        self.reload_with(channel, ticket).await
    }

    async fn open_feed(&self, channel: ChannelId, activation: u64) {
        let (notifier, inserts) = FeedNotifier::channel();
        match self.inner.feed.open(&channel, notifier).await {
            Ok(handle) => {
                let mut state = self.inner.state.lock().await;
                if state.activation != activation {
                    // Deactivated or switched while subscribing
                    drop(state);
                    handle.close().await;
                    return;
                }
                let (next, _) = state.lifecycle.clone().on_event(Event::FeedOpened);
                state.lifecycle = next;
                state.feed = Some(handle);
                state.listener = Some(self.spawn_listener(inserts, activation));
                tracing::info!("Change feed open on {}", channel);
            }
            Err(e) => {
                {
                    let mut state = self.inner.state.lock().await;
                    if state.activation != activation {
                        return;
                    }
                    let (next, _) = state.lifecycle.clone().on_event(Event::FeedFailed);
                    state.lifecycle = next;
                }
                tracing::warn!("Change feed unavailable on {}: {}", channel, e);
                self.emit(ChatEvent::FeedUnavailable {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn spawn_listener(
        &self,
        mut inserts: mpsc::UnboundedReceiver<InsertNotice>,
        activation: u64,
    ) -> JoinHandle<()> {
        let weak: Weak<Inner<G, F, I>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while inserts.recv().await.is_some() {
                // Coalesce a burst of notices into one reload
                while inserts.try_recv().is_ok() {}

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let controller = ChatController { inner };
                if let Err(e) = controller.reload_for(activation).await {
                    tracing::debug!("Feed-triggered reload failed: {}", e);
                }
            }

            if let Some(inner) = weak.upgrade() {
                ChatController { inner }.feed_ended(activation).await;
            }
        })
    }

    async fn feed_ended(&self, activation: u64) {
        {
            let mut state = self.inner.state.lock().await;
            if state.activation != activation {
                return;
            }
            let (next, _) = state.lifecycle.clone().on_event(Event::FeedDropped);
            state.lifecycle = next;
            state.listener = None;
        }
        tracing::warn!("Change feed closed; new messages need a manual reload");
        self.emit(ChatEvent::FeedClosed);
    }

    fn take_feed(
        state: &mut ControllerState<F::Handle>,
    ) -> (Option<F::Handle>, Option<JoinHandle<()>>) {
        (state.feed.take(), state.listener.take())
    }

    async fn release_feed(handle: Option<F::Handle>, listener: Option<JoinHandle<()>>) {
        if let Some(listener) = listener {
            listener.abort();
        }
        if let Some(handle) = handle {
            handle.close().await;
        }
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockBackend, StaticIdentity};

    type TestController = ChatController<MockBackend, MockBackend, StaticIdentity>;

    fn class() -> ChannelId {
        ChannelId::new("class-1")
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn controller_for(backend: &MockBackend, identity: StaticIdentity) -> TestController {
        ChatController::new(
            backend.clone(),
            backend.clone(),
            identity,
            ChatConfig::default(),
        )
    }

    fn setup() -> (MockBackend, TestController) {
        let backend = MockBackend::new();
        backend.register_profile(&alice(), "alice@school.edu");
        backend.register_profile(&bob(), "bob@school.edu");
        let chat = controller_for(&backend, StaticIdentity::signed_in(alice()));
        (backend, chat)
    }

    /// Let spawned listeners run.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_held(backend: &MockBackend, count: usize) {
        for _ in 0..1000 {
            if backend.held_fetch_count() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} held fetches", count);
    }

    fn drain(events: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn contents(view: &[Message]) -> Vec<&str> {
        view.iter().map(|m| m.content.as_str()).collect()
    }

    // ===========================================
    // Activation Tests
    // ===========================================

    #[tokio::test]
    async fn activate_loads_history() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "first");
        backend.seed_row(&class(), &alice(), "second");

        chat.activate(class()).await.unwrap();

        let view = chat.view().await;
        assert_eq!(contents(&view), vec!["first", "second"]);
        assert!(view.iter().all(|m| m.status == MessageStatus::Confirmed));
        assert_eq!(chat.channel().await, Some(class()));
        assert_eq!(chat.feed_status().await, Some(FeedStatus::Open));
        assert_eq!(backend.subscriber_count(&class()), 1);
    }

    #[tokio::test]
    async fn activate_same_channel_is_idempotent() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();
        chat.activate(class()).await.unwrap();

        assert_eq!(backend.fetch_count(), 1);
        assert_eq!(backend.subscriber_count(&class()), 1);
    }

    #[tokio::test]
    async fn activate_other_channel_switches() {
        let (backend, chat) = setup();
        let other = ChannelId::new("class-2");
        backend.seed_row(&class(), &bob(), "in class 1");
        backend.seed_row(&other, &bob(), "in class 2");

        chat.activate(class()).await.unwrap();
        chat.activate(other.clone()).await.unwrap();

        assert_eq!(contents(&chat.view().await), vec!["in class 2"]);
        assert_eq!(backend.subscriber_count(&class()), 0);
        assert_eq!(backend.subscriber_count(&other), 1);
    }

    #[tokio::test]
    async fn activate_load_failure_keeps_subscription() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "hi");
        backend.fail_next_fetch(GatewayError::Network("offline".into()));
        let mut events = chat.subscribe();

        let result = chat.activate(class()).await;

        assert!(matches!(result, Err(ChatError::Load(GatewayError::Network(_)))));
        assert!(chat.is_active().await);
        assert!(chat.view().await.is_empty());
        assert!(chat.last_error().await.is_some());
        assert_eq!(backend.subscriber_count(&class()), 1);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, ChatEvent::LoadFailed { .. })));

        chat.reload().await.unwrap();
        assert_eq!(contents(&chat.view().await), vec!["hi"]);

        chat.dismiss_error().await;
        assert!(chat.last_error().await.is_none());
    }

    #[tokio::test]
    async fn feed_open_failure_is_not_fatal() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "hi");
        backend.fail_next_open("realtime unavailable");
        let mut events = chat.subscribe();

        chat.activate(class()).await.unwrap();

        assert_eq!(chat.feed_status().await, Some(FeedStatus::Unavailable));
        assert_eq!(contents(&chat.view().await), vec!["hi"]);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, ChatEvent::FeedUnavailable { .. })));
    }

    // ===========================================
    // Send Tests
    // ===========================================

    #[tokio::test]
    async fn stage_send_inserts_one_pending_entry() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();

        let outgoing = chat.stage_send("  hello  ").await.unwrap();

        let view = chat.view().await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].content, "hello");
        assert_eq!(view[0].status, MessageStatus::Pending);
        assert!(view[0].id.is_provisional());
        assert_eq!(outgoing.text, "hello");
        assert_eq!(backend.append_count(), 0);
    }

    #[tokio::test]
    async fn send_hello_is_confirmed_exactly_once() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();

        chat.send("hello").await.unwrap();

        let view = chat.view().await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].content, "hello");
        assert_eq!(view[0].status, MessageStatus::Confirmed);
        assert!(!view[0].id.is_provisional());

        // The feed echo of our own insert does not duplicate it
        settle().await;
        assert_eq!(chat.view().await.len(), 1);
        assert_eq!(backend.rows(&class()).len(), 1);
    }

    #[tokio::test]
    async fn send_failure_restores_view() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "earlier");
        chat.activate(class()).await.unwrap();
        let before = chat.view().await;
        let mut events = chat.subscribe();

        backend.fail_next_append(GatewayError::Network("offline".into()));
        let err = chat.send("hello").await.unwrap_err();

        assert_eq!(err.failed_text(), Some("hello"));
        assert!(matches!(
            err,
            ChatError::Send {
                source: GatewayError::Network(_),
                ..
            }
        ));
        assert_eq!(chat.view().await, before);
        assert!(chat.last_error().await.is_some());
        assert!(drain(&mut events).contains(&ChatEvent::SendFailed {
            text: "hello".into(),
            reason: "network error: offline".into(),
        }));
    }

    #[tokio::test]
    async fn send_failure_on_empty_channel() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();
        backend.fail_next_append(GatewayError::Network("offline".into()));

        let err = chat.send("hello").await.unwrap_err();

        assert_eq!(err.failed_text(), Some("hello"));
        assert!(chat.view().await.is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_change() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "hi");
        chat.activate(class()).await.unwrap();
        let before = chat.view().await;

        let result = chat.send("   \n").await;

        assert!(matches!(
            result,
            Err(ChatError::Validation(ValidationError::EmptyContent))
        ));
        assert_eq!(chat.view().await, before);
        assert_eq!(backend.append_count(), 0);
    }

    #[tokio::test]
    async fn send_without_identity_is_rejected() {
        let backend = MockBackend::new();
        let chat = controller_for(&backend, StaticIdentity::anonymous());
        chat.activate(class()).await.unwrap();

        let result = chat.send("hello").await;

        assert!(matches!(
            result,
            Err(ChatError::Validation(ValidationError::NoIdentity))
        ));
        assert!(chat.view().await.is_empty());
    }

    #[tokio::test]
    async fn send_while_inactive_is_rejected() {
        let (backend, chat) = setup();
        let result = chat.send("hello").await;
        assert!(matches!(result, Err(ChatError::NotActive)));
        assert_eq!(backend.append_count(), 0);
    }

    #[tokio::test]
    async fn too_many_pending_is_rejected() {
        let backend = MockBackend::new();
        let chat = ChatController::new(
            backend.clone(),
            backend.clone(),
            StaticIdentity::signed_in(alice()),
            ChatConfig::default().with_max_pending(1),
        );
        chat.activate(class()).await.unwrap();

        chat.stage_send("one").await.unwrap();
        let result = chat.stage_send("two").await;

        assert!(matches!(
            result,
            Err(ChatError::Validation(ValidationError::TooManyPending { limit: 1 }))
        ));
        assert_eq!(chat.view().await.len(), 1);
    }

    #[tokio::test]
    async fn deliver_after_switch_leaves_new_channel_alone() {
        let (backend, chat) = setup();
        let other = ChannelId::new("class-2");
        chat.activate(class()).await.unwrap();
        let outgoing = chat.stage_send("for class 1").await.unwrap();

        chat.activate(other.clone()).await.unwrap();
        chat.deliver(outgoing).await.unwrap();

        assert!(chat.view().await.is_empty());
        assert_eq!(backend.rows(&class()).len(), 1);
        assert!(backend.rows(&other).is_empty());
    }

    #[tokio::test]
    async fn failed_deliver_after_switch_does_not_touch_new_channel() {
        let (backend, chat) = setup();
        let other = ChannelId::new("class-2");
        chat.activate(class()).await.unwrap();
        let outgoing = chat.stage_send("for class 1").await.unwrap();

        chat.activate(other).await.unwrap();
        let mut events = chat.subscribe();
        backend.fail_next_append(GatewayError::Network("offline".into()));
        let err = chat.deliver(outgoing).await.unwrap_err();

        assert_eq!(err.failed_text(), Some("for class 1"));
        assert!(chat.last_error().await.is_none());
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, ChatEvent::SendFailed { .. })));
    }

    #[tokio::test]
    async fn deliver_after_deactivate_drops_pending_entry() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();
        let outgoing = chat.stage_send("hello").await.unwrap();

        chat.deactivate().await;
        chat.deliver(outgoing).await.unwrap();

        assert!(chat.view().await.is_empty());
        assert_eq!(backend.rows(&class()).len(), 1);

        chat.activate(class()).await.unwrap();
        let view = chat.view().await;
        assert_eq!(contents(&view), vec!["hello"]);
        assert_eq!(view[0].status, MessageStatus::Confirmed);
    }

    // ===========================================
    // Feed Tests
    // ===========================================

    #[tokio::test]
    async fn classmate_message_arrives_through_feed() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();

        backend.insert_row(&class(), &bob(), "hi alice");
        settle().await;

        let bubbles = chat.bubbles().await;
        assert_eq!(bubbles.len(), 1);
        assert_eq!(bubbles[0].sender, "bob@school.edu");
        assert!(!bubbles[0].mine);
    }

    #[tokio::test]
    async fn classmate_message_while_pending_keeps_both() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();

        let outgoing = chat.stage_send("mine").await.unwrap();
        backend.insert_row(&class(), &bob(), "theirs");
        settle().await;

        let view = chat.view().await;
        assert_eq!(view.len(), 2);
        assert!(view.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let theirs = view.iter().find(|m| m.content == "theirs").unwrap();
        assert_eq!(theirs.status, MessageStatus::Confirmed);
        let mine = view.iter().find(|m| m.id == outgoing.id).unwrap();
        assert_eq!(mine.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn notice_bursts_coalesce_into_one_reload() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();
        assert_eq!(backend.fetch_count(), 1);

        backend.insert_row(&class(), &bob(), "one");
        backend.insert_row(&class(), &bob(), "two");
        backend.insert_row(&class(), &bob(), "three");
        settle().await;

        assert_eq!(backend.fetch_count(), 2);
        assert_eq!(chat.view().await.len(), 3);
    }

    #[tokio::test]
    async fn feed_drop_marks_feed_unavailable() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();
        let mut events = chat.subscribe();

        backend.drop_subscriptions(&class());
        settle().await;

        assert_eq!(chat.feed_status().await, Some(FeedStatus::Unavailable));
        assert!(chat.is_active().await);
        assert!(drain(&mut events).contains(&ChatEvent::FeedClosed));

        // Manual reload still works
        backend.seed_row(&class(), &bob(), "missed");
        chat.reload().await.unwrap();
        assert_eq!(contents(&chat.view().await), vec!["missed"]);
    }

    // ===========================================
    // Reload Ordering Tests
    // ===========================================

    #[tokio::test]
    async fn out_of_order_reloads_keep_newer_snapshot() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "old");
        chat.activate(class()).await.unwrap();
        backend.hold_fetches(true);

        let a = tokio::spawn({
            let chat = chat.clone();
            async move { chat.reload().await }
        });
        wait_for_held(&backend, 1).await;

        backend.seed_row(&class(), &bob(), "new");
        let b = tokio::spawn({
            let chat = chat.clone();
            async move { chat.reload().await }
        });
        wait_for_held(&backend, 2).await;

        // B's response arrives first
        assert!(backend.release_fetch(1));
        b.await.unwrap().unwrap();
        assert!(backend.release_fetch(0));
        a.await.unwrap().unwrap();

        assert_eq!(contents(&chat.view().await), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn deactivate_discards_in_flight_reload() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "kept");
        chat.activate(class()).await.unwrap();
        // Visible to the held fetch below, never to the view
        backend.seed_row(&class(), &bob(), "late");
        backend.hold_fetches(true);

        let pending = tokio::spawn({
            let chat = chat.clone();
            async move { chat.reload().await }
        });
        wait_for_held(&backend, 1).await;

        chat.deactivate().await;
        backend.release_all_fetches();
        pending.await.unwrap().unwrap();

        assert_eq!(contents(&chat.view().await), vec!["kept"]);
    }

    // ===========================================
    // Deactivation Tests
    // ===========================================

    #[tokio::test]
    async fn deactivate_closes_feed_and_keeps_view() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &bob(), "hi");
        chat.activate(class()).await.unwrap();

        chat.deactivate().await;
        chat.deactivate().await;

        assert!(!chat.is_active().await);
        assert_eq!(backend.subscriber_count(&class()), 0);
        assert_eq!(contents(&chat.view().await), vec!["hi"]);
        assert!(matches!(chat.reload().await, Err(ChatError::NotActive)));
    }

    #[tokio::test]
    async fn inserts_after_deactivate_are_ignored() {
        let (backend, chat) = setup();
        chat.activate(class()).await.unwrap();
        chat.deactivate().await;

        backend.insert_row(&class(), &bob(), "too late");
        settle().await;

        assert!(chat.view().await.is_empty());
        assert_eq!(backend.fetch_count(), 1);
    }

    // ===========================================
    // Bubble Tests
    // ===========================================

    #[tokio::test]
    async fn bubbles_label_own_messages() {
        let (backend, chat) = setup();
        backend.seed_row(&class(), &UserId::new("ghost"), "who?");
        chat.activate(class()).await.unwrap();

        chat.send("hello").await.unwrap();

        let bubbles = chat.bubbles().await;
        assert_eq!(bubbles.len(), 2);
        assert_eq!(bubbles[0].sender, "Unknown");
        assert_eq!(bubbles[1].sender, "You");
        assert!(bubbles[1].mine);
        assert_eq!(bubbles[1].status, MessageStatus::Confirmed);
    }
}
