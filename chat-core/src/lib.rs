//! # chat-core
//!
//! Pure logic for class chat sync (no I/O, instant tests).
//!
//! This crate holds the message store, the reload sequencer and the
//! channel lifecycle state machine. None of them perform network calls.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about merge and reconciliation rules
//!
//! The actual I/O (fetching history, appending messages, feed subscriptions)
//! is performed by `chat-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sequence;
pub mod state;
pub mod store;

pub use sequence::{FetchTicket, ReloadSequencer};
pub use state::{Action, Event, FeedStatus, Lifecycle};
pub use store::{MessageStore, View, DEFAULT_MAX_PENDING};
