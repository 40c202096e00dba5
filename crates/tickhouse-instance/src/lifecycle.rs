//! Connection Lifecycle State Machine
//!
//! One `ConnectionLifecycle` exists per exchange runtime. It validates every
//! transition against the table in `tickhouse_core::state`, persists accepted
//! transitions onto the instance lease, and notifies the activity-log
//! collaborator - in that order, so a rejected or unpersisted transition
//! leaves no trace anywhere.
//!
//! ## Serialization Point
//!
//! All transition requests funnel through one write lock. Commands for an
//! identity are already serialized by the dispatcher loop, but the exchange
//! client's lifecycle callbacks arrive from its own task; taking the lock
//! here is what keeps those two writers ordered.
//!
//! ## Error Recovery
//!
//! The `starting -> idle` and `warming -> idle` edges exist for failed
//! connection attempts: `on_error` records the failure on the lease and
//! resets straight to idle rather than limping through `stopping`. An error
//! while `active` is recorded but forces no transition - only `stopping` is
//! legal from `active`, and that is an operator decision.

use crate::activity::ActivityLog;
use crate::error::{InstanceError, Result};
use crate::exchange::ExchangeEvents;
use crate::lease_manager::LeaseManager;
use async_trait::async_trait;
use std::sync::Arc;
use tickhouse_core::ConnectionState;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The six-state lifecycle driver for one held exchange connection.
pub struct ConnectionLifecycle {
    lease: Arc<LeaseManager>,
    activity: Arc<dyn ActivityLog>,
    state: RwLock<ConnectionState>,
}

impl ConnectionLifecycle {
    /// New lifecycle in the `idle` state.
    pub fn new(lease: Arc<LeaseManager>, activity: Arc<dyn ActivityLog>) -> Self {
        Self {
            lease,
            activity,
            state: RwLock::new(ConnectionState::Idle),
        }
    }

    /// Current local state.
    pub async fn current(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Apply `current -> to`.
    ///
    /// Rejects pairs outside the transition table with `InvalidTransition`,
    /// leaving state unchanged. On an accepted pair the new state and
    /// `last_state_change` are persisted onto the lease first; if that write
    /// fails (lease lost, store down) the local state is also left unchanged
    /// - no partial writes. The activity log is notified after the fact,
    /// fire-and-forget.
    pub async fn transition(&self, to: ConnectionState) -> Result<ConnectionState> {
        let mut state = self.state.write().await;
        let from = *state;

        if !from.can_transition_to(to) {
            return Err(InstanceError::InvalidTransition { from, to });
        }

        let lease = self.lease.update_state(to).await?;
        *state = to;

        info!(
            exchange_id = self.lease.exchange_id(),
            from = %from,
            to = %to,
            "Connection state transition"
        );

        self.activity.log_transition(from, to, &lease).await;

        Ok(to)
    }

    /// Reset the local state to `idle` without touching the lease.
    ///
    /// Used when the lease itself is gone (expired or taken over) and there
    /// is no record left to persist a transition onto.
    pub async fn reset_local(&self) {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Idle {
            warn!(
                exchange_id = self.lease.exchange_id(),
                from = %*state,
                "Resetting local state to idle without a lease"
            );
            *state = ConnectionState::Idle;
        }
    }
}

#[async_trait]
impl ExchangeEvents for ConnectionLifecycle {
    async fn on_warming(&self) {
        if let Err(e) = self.transition(ConnectionState::Warming).await {
            warn!(
                exchange_id = self.lease.exchange_id(),
                error = %e,
                "Ignoring warming callback"
            );
        }
    }

    async fn on_active(&self) {
        if let Err(e) = self.transition(ConnectionState::Active).await {
            warn!(
                exchange_id = self.lease.exchange_id(),
                error = %e,
                "Ignoring active callback"
            );
        }
    }

    async fn on_error(&self, message: &str) {
        let state = self.current().await;

        if let Err(e) = self.lease.record_error(message).await {
            warn!(
                exchange_id = self.lease.exchange_id(),
                error = %e,
                "Could not record connection error on lease"
            );
        }

        self.activity.log_error(message, state).await;

        // Failed connection attempts reset straight to idle.
        if matches!(state, ConnectionState::Starting | ConnectionState::Warming) {
            match self.transition(ConnectionState::Idle).await {
                Ok(_) => {}
                Err(InstanceError::LeaseLost { .. }) => self.reset_local().await,
                Err(e) => warn!(
                    exchange_id = self.lease.exchange_id(),
                    error = %e,
                    "Could not reset to idle after connection error"
                ),
            }
        }
    }
}
