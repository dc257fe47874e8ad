//! In-memory backend for tests and demos.
//!
//! Plays the remote message table, the realtime feed and the profile join
//! in one process. Supports forced failures and holding fetch responses so
//! tests can control completion order.

use super::{
    ChangeFeed, FeedError, FeedHandle, FeedNotifier, GatewayError, IdentityProvider,
    RemoteMessageGateway,
};
use async_trait::async_trait;
use classroom_chat_types::{ChannelId, MessageRow, Profile, Timestamp, UserId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// In-memory gateway and change feed.
///
/// Clones share state, so one clone can be handed to a controller as its
/// gateway, another as its feed, and a third kept by the test.
#[derive(Debug, Default, Clone)]
pub struct MockBackend {
    inner: Arc<MockBackendInner>,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    /// Stored rows per channel, oldest first.
    rows: DashMap<ChannelId, Vec<MessageRow>>,
    /// Live subscriptions per channel.
    subscribers: DashMap<ChannelId, Vec<Subscriber>>,
    /// Profile emails joined onto rows.
    profiles: DashMap<UserId, String>,
    next_row_id: AtomicU64,
    next_subscription_id: AtomicU64,
    /// Last server timestamp handed out.
    clock: AtomicU64,
    fetches: AtomicU64,
    appends: AtomicU64,
    knobs: Mutex<Knobs>,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    notifier: FeedNotifier,
}

#[derive(Debug, Default)]
struct Knobs {
    fail_next_fetch: Option<GatewayError>,
    fail_next_append: Option<GatewayError>,
    fail_next_open: Option<String>,
    hold_fetches: bool,
    held: Vec<Option<oneshot::Sender<()>>>,
}

impl MockBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the email shown as the author label for `user`.
    pub fn register_profile(&self, user: &UserId, email: &str) {
        self.inner.profiles.insert(user.clone(), email.to_string());
    }

    /// Insert a row as another client would, notifying subscribers.
    pub fn insert_row(&self, channel: &ChannelId, author: &UserId, content: &str) -> MessageRow {
        let row = self.store_row(channel, author, content);
        self.notify_channel(channel);
        row
    }

    /// Insert a row without notifying anyone (history setup).
    pub fn seed_row(&self, channel: &ChannelId, author: &UserId, content: &str) -> MessageRow {
        self.store_row(channel, author, content)
    }

    /// All stored rows of a channel.
    pub fn rows(&self, channel: &ChannelId) -> Vec<MessageRow> {
        self.inner
            .rows
            .get(channel)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: GatewayError) {
        self.knobs().fail_next_fetch = Some(error);
    }

    /// Cause the next append to fail with the given error.
    pub fn fail_next_append(&self, error: GatewayError) {
        self.knobs().fail_next_append = Some(error);
    }

    /// Cause the next feed subscription to fail.
    pub fn fail_next_open(&self, error: &str) {
        self.knobs().fail_next_open = Some(error.to_string());
    }

    /// Hold every subsequent fetch response until released.
    ///
    /// A held fetch snapshots the rows when it is issued, not when it is
    /// released.
    pub fn hold_fetches(&self, hold: bool) {
        self.knobs().hold_fetches = hold;
    }

    /// Number of fetches currently held.
    pub fn held_fetch_count(&self) -> usize {
        self.knobs().held.iter().filter(|h| h.is_some()).count()
    }

    /// Release the held fetch issued `index`-th (0-based, in issue order).
    ///
    /// Returns `false` if there is no such held fetch.
    pub fn release_fetch(&self, index: usize) -> bool {
        let gate = self
            .knobs()
            .held
            .get_mut(index)
            .and_then(|slot| slot.take());
        match gate {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Release every held fetch.
    pub fn release_all_fetches(&self) {
        let gates: Vec<_> = self.knobs().held.drain(..).flatten().collect();
        for tx in gates {
            let _ = tx.send(());
        }
    }

    /// Total fetches issued.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Total successful appends.
    pub fn append_count(&self) -> u64 {
        self.inner.appends.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &ChannelId) -> usize {
        self.inner
            .subscribers
            .get(channel)
            .map(|subs| subs.iter().filter(|s| !s.notifier.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every subscription on a channel, as a realtime disconnect would.
    pub fn drop_subscriptions(&self, channel: &ChannelId) {
        self.inner.subscribers.remove(channel);
    }

    fn knobs(&self) -> MutexGuard<'_, Knobs> {
        // Knobs hold plain data, so a poisoned lock is still usable
        self.inner
            .knobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_row(&self, channel: &ChannelId, author: &UserId, content: &str) -> MessageRow {
        let id = self.inner.next_row_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = MessageRow {
            id: format!("msg-{}", id),
            content: content.to_string(),
            created_at: self.server_time(),
            user_id: author.clone(),
            profiles: self
                .inner
                .profiles
                .get(author)
                .map(|email| {
                    vec![Profile {
                        email: email.value().clone(),
                    }]
                })
                .unwrap_or_default(),
        };
        self.inner
            .rows
            .entry(channel.clone())
            .or_default()
            .push(row.clone());
        row
    }

    /// Strictly increasing server clock, anchored to wall time.
    fn server_time(&self) -> Timestamp {
        let now = Timestamp::now().as_millis();
        let mut last = self.inner.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.inner.clock.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Timestamp::from_millis(next),
                Err(current) => last = current,
            }
        }
    }

    fn notify_channel(&self, channel: &ChannelId) -> usize {
        let mut delivered = 0;
        if let Some(mut subs) = self.inner.subscribers.get_mut(channel) {
            subs.retain(|s| {
                let alive = s.notifier.notify();
                if alive {
                    delivered += 1;
                }
                alive
            });
        }
        tracing::debug!("notified {} subscriber(s) on {}", delivered, channel);
        delivered
    }

    fn unsubscribe(&self, channel: &ChannelId, id: u64) {
        if let Some(mut subs) = self.inner.subscribers.get_mut(channel) {
            subs.retain(|s| s.id != id);
        }
    }
}

#[async_trait]
impl RemoteMessageGateway for MockBackend {
    async fn fetch_all(&self, channel: &ChannelId) -> Result<Vec<MessageRow>, GatewayError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);

        let (snapshot, gate) = {
            let mut knobs = self.knobs();
            if let Some(error) = knobs.fail_next_fetch.take() {
                return Err(error);
            }
            let snapshot = self.rows(channel);
            let gate = if knobs.hold_fetches {
                let (tx, rx) = oneshot::channel();
                knobs.held.push(Some(tx));
                Some(rx)
            } else {
                None
            };
            (snapshot, gate)
        };

        if let Some(rx) = gate {
            // A dropped gate releases the fetch too
            let _ = rx.await;
        }
        Ok(snapshot)
    }

    async fn append(
        &self,
        channel: &ChannelId,
        author: &UserId,
        content: &str,
    ) -> Result<(), GatewayError> {
        if let Some(error) = self.knobs().fail_next_append.take() {
            return Err(error);
        }
        self.store_row(channel, author, content);
        self.inner.appends.fetch_add(1, Ordering::SeqCst);
        self.notify_channel(channel);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MockBackend {
    type Handle = MockFeedHandle;

    async fn open(
        &self,
        channel: &ChannelId,
        notifier: FeedNotifier,
    ) -> Result<Self::Handle, FeedError> {
        if let Some(error) = self.knobs().fail_next_open.take() {
            return Err(FeedError::SubscribeFailed(error));
        }
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .entry(channel.clone())
            .or_default()
            .push(Subscriber { id, notifier });
        Ok(MockFeedHandle {
            backend: self.clone(),
            channel: channel.clone(),
            id,
        })
    }
}

/// Subscription handle returned by [`MockBackend`].
#[derive(Debug)]
pub struct MockFeedHandle {
    backend: MockBackend,
    channel: ChannelId,
    id: u64,
}

#[async_trait]
impl FeedHandle for MockFeedHandle {
    async fn close(&self) {
        self.backend.unsubscribe(&self.channel, self.id);
    }
}

/// Fixed identity, for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    /// An identity provider for a signed-in user.
    pub fn signed_in(user: UserId) -> Self {
        Self { user: Some(user) }
    }

    /// An identity provider with nobody signed in.
    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.clone()
    }
}
