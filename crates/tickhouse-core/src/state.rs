//! Connection Lifecycle States
//!
//! Every held exchange connection moves through a six-state lifecycle. The
//! holder drives transitions; everyone else only reads the persisted state
//! off the instance lease.
//!
//! ## State Transitions
//!
//! ```text
//! ┌──────┐ start ┌──────────┐ session ┌─────────┐ first data ┌────────┐
//! │ idle │ ────> │ starting │ ──────> │ warming │ ─────────> │ active │
//! └──┬───┘       └────┬─────┘         └────┬────┘            └───┬────┘
//!    ▲                │ error              │ error               │ stop
//!    │                ▼                    ▼                     ▼
//!    │           (back to idle)      (back to idle)         ┌──────────┐
//!    │                                                      │ stopping │
//!    │                              ┌─────────┐             └────┬─────┘
//!    └──────────────── reset ────── │ stopped │ <────────────────┘
//!                                   └─────────┘
//! ```
//!
//! `starting` and `warming` may also move to `stopping` directly (operator
//! stop during connection setup). `idle` is both the initial state on a fresh
//! claim and the recovery state after a failed connection attempt. `stopped`
//! is terminal until explicitly reset to `idle`.
//!
//! Readers must treat an expired or missing lease as `idle` regardless of the
//! last state that was persisted on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one exchange connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection; the lease (if held) is claimable work not yet started
    Idle,
    /// Connection attempt in progress
    Starting,
    /// Session established, subscriptions replaying, no live data yet
    Warming,
    /// Live market data flowing
    Active,
    /// Teardown in progress
    Stopping,
    /// Torn down; terminal until reset to idle
    Stopped,
}

impl ConnectionState {
    /// States this state may legally transition to.
    pub fn allowed_targets(self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Idle => &[Starting],
            Starting => &[Warming, Stopping, Idle],
            Warming => &[Active, Stopping, Idle],
            Active => &[Stopping],
            Stopping => &[Stopped],
            Stopped => &[Idle],
        }
    }

    /// Check whether `self -> to` is in the transition table.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Starting => "starting",
            ConnectionState::Warming => "warming",
            ConnectionState::Active => "active",
            ConnectionState::Stopping => "stopping",
            ConnectionState::Stopped => "stopped",
        }
    }

    /// All six states, for table-driven tests and dashboards.
    pub fn all() -> &'static [ConnectionState] {
        use ConnectionState::*;
        &[Idle, Starting, Warming, Active, Stopping, Stopped]
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
