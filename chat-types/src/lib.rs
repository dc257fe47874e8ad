//! # chat-types
//!
//! Shared model types for class chat synchronization.
//!
//! - [`ChannelId`], [`UserId`], [`MessageId`], [`Timestamp`] - identity and ordering
//! - [`Message`], [`MessageStatus`] - the rendered message model
//! - [`MessageRow`] - the remote table row a confirmed message is built from
//! - [`ValidationError`], [`TypesError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod message;

pub use error::{TypesError, ValidationError};
pub use ids::{ChannelId, MessageId, Timestamp, UserId, PROVISIONAL_PREFIX};
pub use message::{Message, MessageRow, MessageStatus, Profile, SELF_LABEL, UNKNOWN_LABEL};
