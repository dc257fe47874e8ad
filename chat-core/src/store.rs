//! Message store for one class chat channel.
//!
//! The store keeps two sequences:
//! - The confirmed baseline, replaced wholesale by every applied snapshot
//! - Pending entries, inserted optimistically by local sends
//!
//! The rendered view merges both by `created_at` (ties: confirmed first,
//! then pending in insertion order). A pending entry only leaves the store
//! through [`MessageStore::fail_pending`], or through a snapshot applied
//! after [`MessageStore::resolve_pending`] marked it as durably written.
//! A snapshot that does not yet contain the durable copy never drops an
//! unresolved entry.

use std::iter::Peekable;
use std::slice;

use classroom_chat_types::{Message, MessageId, MessageStatus, Timestamp, ValidationError};

use crate::sequence::FetchTicket;

/// Default cap on concurrently pending sends.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// How far a pending entry has progressed towards confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Durable write still in flight.
    Unresolved,
    /// Durable write succeeded.
    ///
    /// With `after: Some(t)` only a snapshot fetched by ticket `t` or later
    /// supersedes the entry; `None` lets the next snapshot supersede it.
    Resolved { after: Option<FetchTicket> },
}

#[derive(Debug, Clone)]
struct PendingEntry {
    message: Message,
    resolution: Resolution,
}

impl PendingEntry {
    fn superseded_by(&self, ticket: Option<FetchTicket>) -> bool {
        match (self.resolution, ticket) {
            (Resolution::Unresolved, _) => false,
            (Resolution::Resolved { after: None }, _) => true,
            (Resolution::Resolved { after: Some(_) }, None) => true,
            (Resolution::Resolved { after: Some(after) }, Some(t)) => t >= after,
        }
    }
}

/// Ordered message collection for a single channel.
#[derive(Debug, Clone)]
pub struct MessageStore {
    /// Confirmed baseline, sorted by `created_at`.
    confirmed: Vec<Message>,
    /// Optimistic entries in insertion order (non-decreasing `created_at`).
    pending: Vec<PendingEntry>,
    /// Maximum number of unresolved pending entries.
    max_pending: usize,
}

impl MessageStore {
    /// Create an empty store with the default pending capacity.
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    /// Create an empty store that accepts at most `max_pending` unresolved sends.
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            confirmed: Vec::new(),
            pending: Vec::new(),
            max_pending,
        }
    }

    /// Replace the confirmed baseline with a fresh snapshot.
    ///
    /// Unresolved pending entries are kept in their relative order; resolved
    /// ones are dropped because the snapshot supersedes them. Returns the
    /// merged view.
    pub fn replace_confirmed(&mut self, messages: Vec<Message>) -> Vec<Message> {
        self.apply(messages, None)
    }

    /// Replace the confirmed baseline with a snapshot fetched by `ticket`.
    ///
    /// Same as [`replace_confirmed`](Self::replace_confirmed), except that an
    /// entry resolved with [`resolve_pending_after`](Self::resolve_pending_after)
    /// survives snapshots whose fetch started before its confirming reload.
    pub fn apply_snapshot(&mut self, messages: Vec<Message>, ticket: FetchTicket) -> Vec<Message> {
        self.apply(messages, Some(ticket))
    }

    fn apply(&mut self, mut messages: Vec<Message>, ticket: Option<FetchTicket>) -> Vec<Message> {
        messages.retain(|m| !m.id.is_provisional());
        for message in &mut messages {
            message.status = MessageStatus::Confirmed;
        }
        // Stable: equal timestamps keep server order
        messages.sort_by_key(|m| m.created_at);

        self.confirmed = messages;
        self.pending.retain(|entry| !entry.superseded_by(ticket));
        self.snapshot()
    }

    /// Append an optimistic message to the end of the view.
    ///
    /// The message timestamp is raised to the newest visible timestamp if the
    /// local clock is behind, so the entry always lands at the end. Returns
    /// the message as stored.
    pub fn add_pending(&mut self, mut message: Message) -> Result<Message, ValidationError> {
        if !message.is_pending() || !message.id.is_provisional() {
            return Err(ValidationError::NotPending(message.id.to_string()));
        }
        if message.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if self.unresolved_count() >= self.max_pending {
            return Err(ValidationError::TooManyPending {
                limit: self.max_pending,
            });
        }

        if let Some(newest) = self.newest_timestamp() {
            if message.created_at < newest {
                message.created_at = newest;
            }
        }

        self.pending.push(PendingEntry {
            message: message.clone(),
            resolution: Resolution::Unresolved,
        });
        Ok(message)
    }

    /// Mark a pending entry as durably written.
    ///
    /// The entry stays visible until the next snapshot. Returns `false` for
    /// unknown or already resolved ids.
    pub fn resolve_pending(&mut self, id: &MessageId) -> bool {
        self.resolve(id, None)
    }

    /// Mark a pending entry as durably written, to be superseded by the
    /// snapshot of `ticket` or any later fetch.
    pub fn resolve_pending_after(&mut self, id: &MessageId, ticket: FetchTicket) -> bool {
        self.resolve(id, Some(ticket))
    }

    fn resolve(&mut self, id: &MessageId, after: Option<FetchTicket>) -> bool {
        match self
            .pending
            .iter_mut()
            .find(|e| e.message.id == *id && e.resolution == Resolution::Unresolved)
        {
            Some(entry) => {
                entry.resolution = Resolution::Resolved { after };
                true
            }
            None => false,
        }
    }

    /// Remove a pending entry whose durable write failed.
    ///
    /// Returns the removed message with status `Failed`, so the caller can
    /// restore its text.
    pub fn fail_pending(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.pending.iter().position(|e| e.message.id == *id)?;
        let mut message = self.pending.remove(index).message;
        message.status = MessageStatus::Failed;
        Some(message)
    }

    /// Remove a pending entry that no snapshot will supersede.
    ///
    /// Returns `false` if no entry has this id.
    pub fn discard_pending(&mut self, id: &MessageId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|e| e.message.id != *id);
        self.pending.len() != before
    }

    /// Lazily iterate the merged view in render order.
    ///
    /// Has no side effects; call it as often as needed.
    pub fn current_view(&self) -> View<'_> {
        View {
            confirmed: self.confirmed.iter().peekable(),
            pending: self.pending.iter().peekable(),
        }
    }

    /// Collect the merged view.
    pub fn snapshot(&self) -> Vec<Message> {
        self.current_view().cloned().collect()
    }

    /// Look up a message in the view by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.current_view().find(|m| m.id == *id)
    }

    /// Whether a pending entry with this id exists.
    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.iter().any(|e| e.message.id == *id)
    }

    /// Number of pending entries (resolved or not).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of confirmed messages.
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Total number of visible messages.
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    /// Check if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.pending.is_empty()
    }

    /// Drop all confirmed and pending messages.
    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.pending.clear();
    }

    fn unresolved_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|e| e.resolution == Resolution::Unresolved)
            .count()
    }

    fn newest_timestamp(&self) -> Option<Timestamp> {
        let confirmed = self.confirmed.last().map(|m| m.created_at);
        let pending = self.pending.last().map(|e| e.message.created_at);
        confirmed.max(pending)
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Merged, ordered iterator over a store's messages.
#[derive(Debug)]
pub struct View<'a> {
    confirmed: Peekable<slice::Iter<'a, Message>>,
    pending: Peekable<slice::Iter<'a, PendingEntry>>,
}

impl<'a> Iterator for View<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        let take_pending = match (self.confirmed.peek(), self.pending.peek()) {
            (Some(c), Some(p)) => p.message.created_at < c.created_at,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => return None,
        };
        if take_pending {
            self.pending.next().map(|e| &e.message)
        } else {
            self.confirmed.next()
        }
    }
}
