//! Activity-log collaborator interface.
//!
//! State transitions and connection errors are reported to an external
//! activity log (the audit trail the dashboard renders). Reporting is
//! fire-and-forget: implementations MUST catch all of their own failures -
//! nothing here may propagate back into the state machine or dispatcher,
//! and a logging outage must never fail or roll back a transition.

use async_trait::async_trait;
use tickhouse_core::ConnectionState;
use tickhouse_registry::InstanceLease;
use tracing::{info, warn};

/// Audit-trail sink for lifecycle activity.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Record a completed state transition.
    async fn log_transition(&self, from: ConnectionState, to: ConnectionState, lease: &InstanceLease);

    /// Record a connection error observed in `state`.
    async fn log_error(&self, message: &str, state: ConnectionState);
}

/// Default sink that emits structured log lines.
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLog for TracingActivityLog {
    async fn log_transition(&self, from: ConnectionState, to: ConnectionState, lease: &InstanceLease) {
        info!(
            exchange_id = lease.exchange_id,
            exchange_name = %lease.exchange_name,
            holder = %lease.holder_identity,
            from = %from,
            to = %to,
            "Connection state changed"
        );
    }

    async fn log_error(&self, message: &str, state: ConnectionState) {
        warn!(state = %state, error = %message, "Connection error");
    }
}
