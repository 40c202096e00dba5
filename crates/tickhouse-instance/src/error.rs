//! Error types for the instance coordination runtime.
//!
//! Expected races are *not* errors here: a contested claim comes back as
//! `ClaimOutcome::Held`, and a failed heartbeat comes back as `false`. The
//! variants below are the cases a caller has to act on - and `Timeout` is
//! deliberately distinct from `CommandFailed`: a timed-out command may still
//! have completed on the dispatcher side.

use thiserror::Error;
use tickhouse_core::ConnectionState;

pub type Result<T> = std::result::Result<T, InstanceError>;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Lease for exchange {exchange_id} is gone or held by another instance")]
    LeaseLost { exchange_id: u32 },

    #[error("No response to '{command}' within {waited_ms}ms (outcome unknown)")]
    Timeout { command: String, waited_ms: u64 },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Command '{command}' is {mode}; use the matching client entry point")]
    WrongDispatchMode {
        command: String,
        mode: &'static str,
    },

    #[error("Connector error: {0}")]
    Connector(String),

    #[error("Store error: {0}")]
    Store(#[from] tickhouse_registry::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
