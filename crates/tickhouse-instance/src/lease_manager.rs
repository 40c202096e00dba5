//! Lease Manager - Exclusive Exchange Ownership
//!
//! The LeaseManager grants and renews the exclusive lease for one exchange.
//! At most one host may hold a given exchange's connection; the lease key in
//! the coordination store is the single source of truth for who that is.
//!
//! ## How It Works
//!
//! 1. **Claim**: conditional create-if-absent with a TTL. A losing claim
//!    comes back as [`ClaimOutcome::Held`] with the current holder's record,
//!    so the operator can be shown a takeover prompt.
//! 2. **Heartbeat**: a background task refreshes the TTL every TTL/3 so one
//!    missed cycle never causes false expiry but two consecutive misses
//!    reliably do. A heartbeat that finds the key gone (or owned by someone
//!    else) reports `false` and never re-creates the key - that would
//!    silently steal the lease back from a legitimate new holder.
//! 3. **Force claim**: explicit-takeover overwrite, used only after the
//!    caller has seen the conflict and confirmed. Last confirmation wins;
//!    the deposed holder notices when its own heartbeats start failing.
//! 4. **Release**: deletes the key on the stopped → idle reset so the
//!    exchange is immediately claimable instead of waiting out the TTL.
//!
//! ## Failure Semantics
//!
//! Everything fails closed. An unreachable store makes `claim`/`force_claim`
//! error, `heartbeat` return `false`, and `inspect` report an error rather
//! than "free" - a network partition must never look like an idle exchange.

use crate::error::{InstanceError, Result};
use std::sync::Arc;
use std::time::Duration;
use tickhouse_core::ConnectionState;
use tickhouse_registry::{
    lease_key, types::now_ms, CoordinationStore, HolderInfo, InstanceLease, StoreError,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default lease TTL.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(45);

/// Attempts before a claim/force-claim gives up on a flickering key.
const CLAIM_ATTEMPTS: u32 = 3;

/// Lease timing configuration.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Time-to-live written with every lease write.
    pub ttl: Duration,

    /// Heartbeat renewal interval. Must stay strictly below `ttl`;
    /// TTL / 3 tolerates a single missed cycle.
    pub heartbeat_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_LEASE_TTL)
    }
}

impl LeaseConfig {
    /// Config with the given TTL and the standard TTL/3 heartbeat interval.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            heartbeat_interval: ttl / 3,
        }
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The lease was created for this holder.
    Granted(InstanceLease),

    /// Someone already holds the exchange; their record is returned so the
    /// caller can render a takeover-confirmation prompt (holder identity,
    /// host, address, connected-at).
    Held(InstanceLease),
}

/// Read-only lease lookup for dashboards and operator tooling.
///
/// `Ok(None)` means the exchange is free. A store failure is an error -
/// "unknown", never "free".
pub async fn inspect_exchange(
    store: &dyn CoordinationStore,
    exchange_id: u32,
) -> Result<Option<InstanceLease>> {
    match store.get(&lease_key(exchange_id)).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Manages the exclusive lease for one exchange on behalf of one holder.
pub struct LeaseManager {
    store: Arc<dyn CoordinationStore>,
    exchange_id: u32,
    exchange_name: String,
    holder: HolderInfo,
    config: LeaseConfig,
    heartbeat_handle: RwLock<Option<JoinHandle<()>>>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        exchange_id: u32,
        exchange_name: impl Into<String>,
        holder: HolderInfo,
        config: LeaseConfig,
    ) -> Self {
        Self {
            store,
            exchange_id,
            exchange_name: exchange_name.into(),
            holder,
            config,
            heartbeat_handle: RwLock::new(None),
        }
    }

    pub fn exchange_id(&self) -> u32 {
        self.exchange_id
    }

    pub fn holder(&self) -> &HolderInfo {
        &self.holder
    }

    fn key(&self) -> String {
        lease_key(self.exchange_id)
    }

    /// Attempt to claim the exchange. Never overwrites an existing holder.
    ///
    /// A key that vanishes between the failed create and the conflict read
    /// (TTL expiry racing us) is retried.
    pub async fn claim(&self) -> Result<ClaimOutcome> {
        for _ in 0..CLAIM_ATTEMPTS {
            let lease =
                InstanceLease::new(self.exchange_id, self.exchange_name.as_str(), &self.holder);
            let raw = serde_json::to_string(&lease)?;

            if self
                .store
                .set_if_absent(&self.key(), &raw, Some(self.config.ttl))
                .await?
            {
                info!(
                    exchange_id = self.exchange_id,
                    exchange_name = %self.exchange_name,
                    holder = %self.holder.identity,
                    ttl_seconds = self.config.ttl.as_secs(),
                    "Exchange lease claimed"
                );
                return Ok(ClaimOutcome::Granted(lease));
            }

            match self.store.get(&self.key()).await? {
                Some(raw) => {
                    let current: InstanceLease = serde_json::from_str(&raw)?;
                    debug!(
                        exchange_id = self.exchange_id,
                        holder_host = %current.holder_host,
                        holder = %current.holder_identity,
                        "Claim rejected, exchange already held"
                    );
                    return Ok(ClaimOutcome::Held(current));
                }
                // Expired between the create and the read; try again
                None => continue,
            }
        }

        Err(InstanceError::Store(StoreError::Unavailable {
            reason: format!(
                "lease key for exchange {} kept flickering during claim",
                self.exchange_id
            ),
        }))
    }

    /// Overwrite whatever lease exists. Only call after the operator has been
    /// shown the [`ClaimOutcome::Held`] conflict and explicitly confirmed the
    /// takeover.
    ///
    /// Composed from the conditional primitives (there is no raw write path):
    /// replace-if-present, else create-if-absent.
    pub async fn force_claim(&self) -> Result<InstanceLease> {
        for _ in 0..CLAIM_ATTEMPTS {
            let lease =
                InstanceLease::new(self.exchange_id, self.exchange_name.as_str(), &self.holder);
            let raw = serde_json::to_string(&lease)?;

            let written = self
                .store
                .set_if_present(&self.key(), &raw, Some(self.config.ttl))
                .await?
                || self
                    .store
                    .set_if_absent(&self.key(), &raw, Some(self.config.ttl))
                    .await?;

            if written {
                warn!(
                    exchange_id = self.exchange_id,
                    holder = %self.holder.identity,
                    "Exchange lease taken over by force"
                );
                return Ok(lease);
            }
        }

        Err(InstanceError::Store(StoreError::Unavailable {
            reason: format!(
                "lease key for exchange {} kept flickering during takeover",
                self.exchange_id
            ),
        }))
    }

    /// Refresh the TTL and `last_heartbeat` without touching the connection
    /// state. Returns `false` - and never errors - when the lease is gone,
    /// held by someone else, or the store is unreachable. The caller logs
    /// locally; it must NOT react by re-claiming.
    pub async fn heartbeat(&self) -> bool {
        match self.try_heartbeat().await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(
                    exchange_id = self.exchange_id,
                    error = %e,
                    "Heartbeat could not confirm lease"
                );
                false
            }
        }
    }

    async fn try_heartbeat(&self) -> Result<bool> {
        let Some(raw) = self.store.get(&self.key()).await? else {
            return Ok(false);
        };

        let mut lease: InstanceLease = serde_json::from_str(&raw)?;
        if !lease.held_by(&self.holder) {
            // A new holder took over; leave their lease alone.
            return Ok(false);
        }

        lease.last_heartbeat = now_ms();
        let raw = serde_json::to_string(&lease)?;
        Ok(self
            .store
            .set_if_present(&self.key(), &raw, Some(self.config.ttl))
            .await?)
    }

    /// Current lease record for this exchange, if any.
    pub async fn inspect(&self) -> Result<Option<InstanceLease>> {
        inspect_exchange(self.store.as_ref(), self.exchange_id).await
    }

    /// Delete the lease key. Only valid from the stopped → idle reset path -
    /// never on error, where the lease must be left to expire or be taken
    /// over explicitly.
    pub async fn release(&self) -> Result<()> {
        self.store.delete(&self.key()).await?;
        info!(
            exchange_id = self.exchange_id,
            holder = %self.holder.identity,
            "Exchange lease released"
        );
        Ok(())
    }

    /// Persist a new connection state (and `last_state_change`) onto the
    /// lease. Fails with `LeaseLost` if the lease is gone or foreign -
    /// transitions are only valid while this holder owns the lease.
    pub async fn update_state(&self, state: ConnectionState) -> Result<InstanceLease> {
        let mut lease = self.read_own().await?;

        let now = now_ms();
        lease.connection_state = state;
        lease.last_state_change = now;
        if state == ConnectionState::Active {
            lease.connected_at = now;
        }

        self.write_own(&lease).await?;
        Ok(lease)
    }

    /// Record a connection error on the lease for dashboards. Best-effort:
    /// a lost lease is logged and dropped, never an error.
    pub async fn record_error(&self, message: &str) -> Result<()> {
        match self.read_own().await {
            Ok(mut lease) => {
                lease.last_error = Some(message.to_string());
                lease.last_error_at = Some(now_ms());
                match self.write_own(&lease).await {
                    Ok(()) => Ok(()),
                    Err(InstanceError::LeaseLost { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(InstanceError::LeaseLost { .. }) => {
                debug!(
                    exchange_id = self.exchange_id,
                    "Lease gone, dropping error bookkeeping"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the current subscribed-symbol count. Best-effort like
    /// [`Self::record_error`].
    pub async fn update_symbol_count(&self, count: u32) -> Result<()> {
        match self.read_own().await {
            Ok(mut lease) => {
                lease.symbol_count = count;
                match self.write_own(&lease).await {
                    Ok(()) | Err(InstanceError::LeaseLost { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(InstanceError::LeaseLost { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_own(&self) -> Result<InstanceLease> {
        let Some(raw) = self.store.get(&self.key()).await? else {
            return Err(InstanceError::LeaseLost {
                exchange_id: self.exchange_id,
            });
        };

        let lease: InstanceLease = serde_json::from_str(&raw)?;
        if !lease.held_by(&self.holder) {
            return Err(InstanceError::LeaseLost {
                exchange_id: self.exchange_id,
            });
        }
        Ok(lease)
    }

    async fn write_own(&self, lease: &InstanceLease) -> Result<()> {
        let raw = serde_json::to_string(lease)?;
        if self
            .store
            .set_if_present(&self.key(), &raw, Some(self.config.ttl))
            .await?
        {
            Ok(())
        } else {
            Err(InstanceError::LeaseLost {
                exchange_id: self.exchange_id,
            })
        }
    }

    /// Start the background heartbeat task. Runs until stopped; renewal
    /// failures are logged and counted but never re-claim the lease.
    pub async fn start_heartbeat_task(self: &Arc<Self>) {
        let mut handle_guard = self.heartbeat_handle.write().await;
        if handle_guard.is_some() {
            return;
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.heartbeat_loop().await;
        });
        *handle_guard = Some(handle);

        info!(
            exchange_id = self.exchange_id,
            interval_seconds = self.config.heartbeat_interval.as_secs(),
            "Heartbeat task started"
        );
    }

    /// Stop the background heartbeat task. Harmless when not running.
    pub async fn stop_heartbeat_task(&self) {
        let mut handle_guard = self.heartbeat_handle.write().await;
        if let Some(handle) = handle_guard.take() {
            handle.abort();
            let _ = handle.await;

            info!(
                exchange_id = self.exchange_id,
                "Heartbeat task stopped"
            );
        }
    }

    async fn heartbeat_loop(&self) {
        let mut renewal_count: u64 = 0;
        let mut failure_count: u64 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(
                        exchange_id = self.exchange_id,
                        "Heartbeat task received shutdown signal"
                    );
                    break;
                }
            }

            if self.heartbeat().await {
                renewal_count += 1;
                failure_count = 0;
                debug!(
                    exchange_id = self.exchange_id,
                    total_renewals = renewal_count,
                    "Lease renewed"
                );
            } else {
                failure_count += 1;
                warn!(
                    exchange_id = self.exchange_id,
                    failure_count,
                    "Lease renewal not confirmed"
                );

                if failure_count >= 2 {
                    warn!(
                        exchange_id = self.exchange_id,
                        "Consecutive renewal failures - lease likely expired or taken over"
                    );
                }
            }
        }
    }
}
