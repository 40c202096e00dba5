//! Coordination store error types.
//!
//! Store operations fail closed: an unreachable store is `Unavailable`, and
//! callers must treat that as "unknown", never as "free to claim".

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Coordination store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Subscription channel closed: {channel}")]
    ChannelClosed { channel: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
