//! Reload sequencing for class chat.
//!
//! Every full-history fetch is issued a [`FetchTicket`] when it starts.
//! Tickets increase monotonically, so a response can be checked against
//! the newest snapshot already applied:
//! - Responses are applied in initiation order, never completion order
//! - A response older than the applied snapshot is discarded
//! - Invalidation (on deactivate) kills every outstanding ticket

use std::fmt;

/// Token handed to a fetch when it is initiated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FetchTicket(u64);

impl FetchTicket {
    /// Create a ticket with the given sequence number.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the sequence number.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FetchTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for FetchTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FetchTicket({})", self.0)
    }
}

/// Issues fetch tickets and decides which responses may be applied.
#[derive(Debug, Clone, Default)]
pub struct ReloadSequencer {
    /// Highest ticket handed out.
    issued: u64,
    /// Highest ticket whose response was applied.
    applied: u64,
    /// Tickets at or below this value are dead.
    floor: u64,
}

impl ReloadSequencer {
    /// Create a sequencer with no tickets issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a fetch that is about to start.
    pub fn begin(&mut self) -> FetchTicket {
        self.issued = self.issued.saturating_add(1);
        FetchTicket(self.issued)
    }

    /// Decide whether a completed fetch may be applied.
    ///
    /// Returns `true` and records the ticket as applied if it is newer than
    /// everything applied so far and was not invalidated.
    pub fn accept(&mut self, ticket: FetchTicket) -> bool {
        if ticket.0 <= self.floor || ticket.0 <= self.applied {
            return false;
        }
        self.applied = ticket.0;
        true
    }

    /// Check whether a ticket could still be applied, without recording it.
    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        ticket.0 > self.floor && ticket.0 > self.applied
    }

    /// Invalidate every ticket issued so far.
    pub fn invalidate(&mut self) {
        self.floor = self.issued;
    }

    /// The most recently applied ticket.
    pub fn last_applied(&self) -> FetchTicket {
        FetchTicket(self.applied)
    }
}
