//! Error types for the presence and event-distribution core.
//!
//! Two layers: [`StoreError`] for coordination-store failures and
//! [`PublishError`] for the event publish boundary. Store failures are
//! advisory for callers — they degrade the instance to single-node scope,
//! they never terminate it.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Coordination store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connect refused, timeout, broken pipe).
    #[error("coordination store unreachable: {0}")]
    Unreachable(String),

    /// The store answered, but the reply violated our expectations.
    #[error("coordination store protocol error: {0}")]
    Backend(String),

    /// A stored entry could not be parsed (reverse map corruption etc).
    #[error("malformed store entry: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_io_error()
        {
            StoreError::Unreachable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Failures at the event publish boundary.
///
/// Callers must treat these as advisory: a failed analytics or presence
/// event must never fail the caller's primary business operation.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Event type is outside the closed enumeration.
    #[error("unknown event type: {0}")]
    UnknownType(String),

    /// Payload does not match the shape required by the event's category.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    /// The store rejected the publish. Delivery is best-effort; the caller
    /// logs and moves on.
    #[error(transparent)]
    Store(#[from] StoreError),
}
