//! Registry Record Types
//!
//! ## Types Overview
//!
//! ### InstanceLease
//! The lock-and-status record for one exchange, stored as a single JSON value
//! under [`lease_key`] with a TTL. The key existing is the *only* signal that
//! some process believes it holds the exchange; readers treat an absent or
//! expired key as free/idle.
//!
//! ### HolderInfo
//! Identity of the machine/process/operator holding (or trying to claim) a
//! lease. Used for takeover-confirmation prompts.
//!
//! ## Design Decisions
//!
//! - Timestamps are i64 milliseconds since the Unix epoch
//! - The record is mutated only through the store's conditional primitives;
//!   there is no unconditional write path
//! - `connection_state` is only ever written by the current holder

use serde::{Deserialize, Serialize};
use tickhouse_core::ConnectionState;

/// Storage key for an exchange's instance lease.
pub fn lease_key(exchange_id: u32) -> String {
    format!("exchange:{exchange_id}:lease")
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Identity of a lease holder.
///
/// Rendered in takeover prompts ("held by `identity` on `host` since ..."),
/// and compared field-for-field by holder-checked lease updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderInfo {
    /// Machine hostname (e.g. "collector-eu-1")
    pub host: String,

    /// Reachable address of the holding process (e.g. "10.0.1.5:4510")
    pub address: String,

    /// Operator or deployment identity (e.g. "ops@collector-eu-1")
    pub identity: String,
}

/// The per-exchange lock-and-status record.
///
/// Created by the first successful claim, refreshed in place by heartbeats
/// and state transitions, destroyed by TTL expiry or an explicit release on
/// the stopped → idle reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLease {
    /// Stable numeric id of the exchange being leased
    pub exchange_id: u32,

    /// Human-readable exchange name (e.g. "binance")
    pub exchange_name: String,

    /// Hostname of the holding machine
    pub holder_host: String,

    /// Address of the holding process
    pub holder_address: String,

    /// Operator/deployment identity of the holder
    pub holder_identity: String,

    /// Lifecycle state as last persisted by the holder
    pub connection_state: ConnectionState,

    /// Number of symbols currently subscribed on this connection
    pub symbol_count: u32,

    /// When the holder claimed (refreshed when the connection goes active)
    pub connected_at: i64,

    /// Last heartbeat renewal (milliseconds since Unix epoch)
    pub last_heartbeat: i64,

    /// Last lifecycle state change (milliseconds since Unix epoch)
    pub last_state_change: i64,

    /// First registration of this lease record
    pub registered_at: i64,

    /// Most recent connection error, if any
    pub last_error: Option<String>,

    /// When `last_error` was recorded
    pub last_error_at: Option<i64>,
}

impl InstanceLease {
    /// Build a fresh `idle` lease for `holder`, all timestamps set to now.
    pub fn new(exchange_id: u32, exchange_name: impl Into<String>, holder: &HolderInfo) -> Self {
        let now = now_ms();
        Self {
            exchange_id,
            exchange_name: exchange_name.into(),
            holder_host: holder.host.clone(),
            holder_address: holder.address.clone(),
            holder_identity: holder.identity.clone(),
            connection_state: ConnectionState::Idle,
            symbol_count: 0,
            connected_at: now,
            last_heartbeat: now,
            last_state_change: now,
            registered_at: now,
            last_error: None,
            last_error_at: None,
        }
    }

    /// Whether this lease is held by `holder`.
    pub fn held_by(&self, holder: &HolderInfo) -> bool {
        self.holder_host == holder.host
            && self.holder_address == holder.address
            && self.holder_identity == holder.identity
    }

    /// The holder identity recorded on this lease.
    pub fn holder(&self) -> HolderInfo {
        HolderInfo {
            host: self.holder_host.clone(),
            address: self.holder_address.clone(),
            identity: self.holder_identity.clone(),
        }
    }
}
