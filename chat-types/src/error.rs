//! Error types for class chat.

use thiserror::Error;

/// Errors raised while building model values from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// A server row carried an empty identifier.
    #[error("empty message id")]
    EmptyId,

    /// A server row used the provisional id namespace.
    #[error("message id {0:?} uses the reserved provisional prefix")]
    ReservedId(String),
}

/// Input rejected before any network call or state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Message text is empty after trimming surrounding whitespace.
    #[error("message is empty")]
    EmptyContent,

    /// No authenticated user is available to author the message.
    #[error("not authenticated")]
    NoIdentity,

    /// Too many sends are still awaiting acknowledgement.
    #[error("too many pending messages (limit: {limit})")]
    TooManyPending {
        /// Configured pending capacity.
        limit: usize,
    },

    /// Only messages with `Pending` status can be staged.
    #[error("message {0} is not pending")]
    NotPending(String),
}
