//! Collaborator contracts for class chat.
//!
//! The controller never talks to a backend directly. It is handed three
//! collaborators at construction time:
//! - [`RemoteMessageGateway`]: fetch full history, append one message
//! - [`ChangeFeed`]: subscribe to insert notifications for a channel
//! - [`IdentityProvider`]: the signed-in user, if any
//!
//! # Example
//!
//! ```ignore
//! let backend = MockBackend::new();
//! let (notifier, mut inserts) = FeedNotifier::channel();
//! let handle = backend.open(&channel, notifier).await?;
//! backend.append(&channel, &user, "hello").await?;
//! inserts.recv().await; // an insert happened
//! handle.close().await;
//! ```

mod mock;

pub use mock::{MockBackend, MockFeedHandle, StaticIdentity};

use async_trait::async_trait;
use classroom_chat_types::{ChannelId, MessageRow, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from remote message operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The backend could not be reached or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// The session is missing, expired, or lacks permission.
    #[error("auth error: {0}")]
    Auth(String),

    /// The backend refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Errors from change-feed subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The subscription could not be established.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Fetch and append against the remote message table.
#[async_trait]
pub trait RemoteMessageGateway: Send + Sync {
    /// Fetch every message of a channel, oldest first.
    async fn fetch_all(&self, channel: &ChannelId) -> Result<Vec<MessageRow>, GatewayError>;

    /// Durably store one message.
    ///
    /// On error nothing was stored, from the caller's point of view.
    async fn append(
        &self,
        channel: &ChannelId,
        author: &UserId,
        content: &str,
    ) -> Result<(), GatewayError>;
}

/// A notification that a row was inserted. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertNotice;

/// Insert callback handed to [`ChangeFeed::open`].
///
/// Dropping every clone of the notifier tells the listener that the feed
/// ended.
#[derive(Debug, Clone)]
pub struct FeedNotifier {
    tx: mpsc::UnboundedSender<InsertNotice>,
}

impl FeedNotifier {
    /// Create a notifier and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InsertNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Signal that a row was inserted.
    ///
    /// Returns `false` once the listener has gone away.
    pub fn notify(&self) -> bool {
        self.tx.send(InsertNotice).is_ok()
    }

    /// Whether the listener has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Push channel that fires when rows are inserted into a channel.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Handle that keeps the subscription alive.
    type Handle: FeedHandle + 'static;

    /// Subscribe to inserts on `channel`.
    async fn open(
        &self,
        channel: &ChannelId,
        notifier: FeedNotifier,
    ) -> Result<Self::Handle, FeedError>;
}

/// A live change-feed subscription.
#[async_trait]
pub trait FeedHandle: Send + Sync {
    /// Release the subscription. Safe to call more than once.
    async fn close(&self);
}

/// Source of the signed-in user's identity.
pub trait IdentityProvider: Send + Sync {
    /// The current user, or `None` when signed out.
    fn current_user_id(&self) -> Option<UserId>;
}
