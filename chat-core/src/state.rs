//! Channel lifecycle state machine for class chat.
//!
//! Pure and side-effect free: it takes events and returns the new state plus
//! a list of actions. `chat-client` performs the actions (opening the feed,
//! fetching history) and feeds the outcomes back in as events.

use classroom_chat_types::ChannelId;

/// Health of the change-feed subscription for the active channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Subscription requested, not yet confirmed.
    Opening,
    /// Notifications are being delivered.
    Open,
    /// Subscription failed or dropped; manual reload still works.
    Unavailable,
}

/// Lifecycle of a chat controller - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// No channel is being displayed.
    Inactive,
    /// A channel is active.
    Active {
        /// The channel being displayed.
        channel: ChannelId,
        /// State of its change feed.
        feed: FeedStatus,
    },
}

impl Lifecycle {
    /// Create a new state machine in the Inactive state.
    pub fn new() -> Self {
        Self::Inactive
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// The caller (chat-client) executes the returned actions in order.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Inactive
            (Self::Inactive, Event::ActivateRequested { channel }) => (
                Self::Active {
                    channel: channel.clone(),
                    feed: FeedStatus::Opening,
                },
                vec![
                    Action::ResetStore,
                    Action::OpenFeed { channel },
                    Action::Reload,
                ],
            ),

            // From Active
            (Self::Active { channel, feed }, Event::ActivateRequested { channel: requested })
                if channel == requested =>
            {
                (Self::Active { channel, feed }, vec![])
            }
            (Self::Active { .. }, Event::ActivateRequested { channel }) => (
                Self::Active {
                    channel: channel.clone(),
                    feed: FeedStatus::Opening,
                },
                vec![
                    Action::CloseFeed,
                    Action::InvalidateReloads,
                    Action::ResetStore,
                    Action::OpenFeed { channel },
                    Action::Reload,
                ],
            ),
            (
                Self::Active {
                    channel,
                    feed: FeedStatus::Opening,
                },
                Event::FeedOpened,
            ) => (
                Self::Active {
                    channel,
                    feed: FeedStatus::Open,
                },
                vec![],
            ),
            (
                Self::Active {
                    channel,
                    feed: FeedStatus::Opening,
                },
                Event::FeedFailed,
            )
            | (
                Self::Active {
                    channel,
                    feed: FeedStatus::Open,
                },
                Event::FeedDropped,
            ) => (
                Self::Active {
                    channel,
                    feed: FeedStatus::Unavailable,
                },
                vec![],
            ),
            (Self::Active { .. }, Event::DeactivateRequested) => (
                Self::Inactive,
                vec![Action::CloseFeed, Action::InvalidateReloads],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a channel is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// The active channel, if any.
    pub fn channel(&self) -> Option<&ChannelId> {
        match self {
            Self::Active { channel, .. } => Some(channel),
            Self::Inactive => None,
        }
    }

    /// Feed status of the active channel, if any.
    pub fn feed_status(&self) -> Option<FeedStatus> {
        match self {
            Self::Active { feed, .. } => Some(*feed),
            Self::Inactive => None,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that drive the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The UI asked to display a channel.
    ActivateRequested {
        /// Channel to display.
        channel: ChannelId,
    },
    /// The feed subscription was established.
    FeedOpened,
    /// The feed subscription could not be established.
    FeedFailed,
    /// An established feed subscription ended unexpectedly.
    FeedDropped,
    /// The UI left the channel.
    DeactivateRequested,
}

/// Actions the client must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Drop all messages held for the previous activation.
    ResetStore,
    /// Subscribe to inserts on the channel.
    OpenFeed {
        /// Channel to subscribe to.
        channel: ChannelId,
    },
    /// Release the current subscription.
    CloseFeed,
    /// Make every in-flight reload inapplicable.
    InvalidateReloads,
    /// Fetch full history.
    Reload,
}
