//! Control-Plane Wire Types
//!
//! Commands travel from an operator's `CommandClient` to the dispatcher of
//! the instance that holds (or should claim) an exchange connection. The
//! wire format is JSON over the coordination store's pub/sub channels:
//!
//! - one **command channel** per addressed identity, carrying [`Command`]
//! - one **response channel** per identity, carrying [`CommandResponse`]
//!
//! ## Dispatch Modes
//!
//! The mode is a property of the command *type*, never of the call site:
//!
//! - **Request-response** (the default): the dispatcher publishes exactly one
//!   response stamped with the request's correlation id.
//! - **Fire-and-forget** (`start`, `force-backfill` - long-running work): no
//!   response is ever published; outcome is observed through status polling.
//!
//! ## Priority
//!
//! Each command type carries a fixed priority class (lower number = processed
//! first): pause/resume = 1, reconfigure/switch-mode = 10, symbol operations
//! = 15, backfill/cache-clear = 20, everything else = 50. The dispatcher
//! pops the lowest priority number first so pause/resume are never starved
//! behind a burst of bulk work.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Priority assigned to command types without an explicit class.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Pub/sub channel carrying commands addressed to `identity`.
pub fn command_channel(identity: &str) -> String {
    format!("instance.{identity}.commands")
}

/// Pub/sub channel carrying responses from `identity`.
pub fn response_channel(identity: &str) -> String {
    format!("instance.{identity}.responses")
}

/// A runtime command, tagged by type with a type-specific payload.
///
/// Serialized as `"type"` / `"payload"` keys on the wire, e.g.
/// `{"type":"add-symbols","payload":{"symbols":["BTC-USDT"]}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum CommandKind {
    /// Suspend data handling without tearing the connection down
    Pause,
    /// Resume after a pause
    Resume,
    /// Apply new collector settings
    Reconfigure { settings: HashMap<String, String> },
    /// Switch the feed mode (e.g. trades-only vs. full book)
    SwitchMode { mode: String },
    /// Subscribe additional symbols
    AddSymbols { symbols: Vec<String> },
    /// Unsubscribe symbols
    RemoveSymbols { symbols: Vec<String> },
    /// Re-fetch history for the given symbols (long-running)
    ForceBackfill { symbols: Vec<String> },
    /// Drop cached candles/indicators for this exchange
    ClearCache,
    /// Claim the exchange lease and connect (long-running);
    /// `force` confirms takeover from another holder
    Start { force: bool },
    /// Disconnect, reset to idle and release the lease
    Stop,
}

impl CommandKind {
    /// Wire tag of this command type.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Pause => "pause",
            CommandKind::Resume => "resume",
            CommandKind::Reconfigure { .. } => "reconfigure",
            CommandKind::SwitchMode { .. } => "switch-mode",
            CommandKind::AddSymbols { .. } => "add-symbols",
            CommandKind::RemoveSymbols { .. } => "remove-symbols",
            CommandKind::ForceBackfill { .. } => "force-backfill",
            CommandKind::ClearCache => "clear-cache",
            CommandKind::Start { .. } => "start",
            CommandKind::Stop => "stop",
        }
    }

    /// Priority class for this command type (lower = processed first).
    pub fn priority(&self) -> u8 {
        match self {
            CommandKind::Pause | CommandKind::Resume => 1,
            CommandKind::Reconfigure { .. } | CommandKind::SwitchMode { .. } => 10,
            CommandKind::AddSymbols { .. } | CommandKind::RemoveSymbols { .. } => 15,
            CommandKind::ForceBackfill { .. } | CommandKind::ClearCache => 20,
            CommandKind::Start { .. } | CommandKind::Stop => DEFAULT_PRIORITY,
        }
    }

    /// Whether this command type never produces a response message.
    ///
    /// Long-running commands are fire-and-forget; their outcome is observed
    /// through the status-polling interface instead.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(
            self,
            CommandKind::Start { .. } | CommandKind::ForceBackfill { .. }
        )
    }
}

/// A command as published on a command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Opaque caller-generated id, unique per call; echoed by the response
    pub correlation_id: String,

    /// Command type and payload
    #[serde(flatten)]
    pub kind: CommandKind,

    /// Publish time (milliseconds since Unix epoch)
    pub timestamp: i64,

    /// Priority as derived from the command type at construction
    pub priority: u8,
}

impl Command {
    /// Build a command with a fresh correlation id and the type's priority.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            priority: kind.priority(),
            timestamp: Utc::now().timestamp_millis(),
            kind,
        }
    }
}

/// Outcome status of a processed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// A response as published on a response channel.
///
/// Exactly one response is published per request-response command; none for
/// fire-and-forget commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Correlation id copied from the request
    pub correlation_id: String,

    pub status: ResponseStatus,

    /// Handler result payload (success only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Failure description (error only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn success(correlation_id: impl Into<String>, data: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Success,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Error,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Acknowledgment returned locally for a fire-and-forget dispatch.
///
/// This is not a wire message; it only confirms the command was published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub correlation_id: String,
    pub accepted: bool,
}
