//! Instance Runtime - Command Handlers and Wiring
//!
//! The InstanceRuntime is the per-exchange coordinator on a collector host.
//! It owns the LeaseManager, the ConnectionLifecycle and the progress
//! tracker, runs the CommandDispatcher for its identity, and implements the
//! handler for every command kind.
//!
//! ## Lifecycle
//!
//! 1. **Build**: `InstanceRuntime::new` with config, store, connector and
//!    activity log.
//! 2. **Start**: `start()` subscribes the dispatcher; the runtime is now
//!    addressable but holds no lease.
//! 3. **Commands**: a `start` command claims the lease (or reports the
//!    conflict), begins heartbeating and drives the connection up; other
//!    commands operate on the live connection; `stop` tears down, resets to
//!    idle and releases the lease.
//! 4. **Shutdown**: `shutdown()` stops a live connection gracefully and
//!    stops the dispatcher.

use crate::activity::ActivityLog;
use crate::dispatcher::{CommandDispatcher, CommandHandler};
use crate::error::{InstanceError, Result};
use crate::exchange::{ExchangeConnector, ExchangeEvents};
use crate::lease_manager::{ClaimOutcome, LeaseConfig, LeaseManager};
use crate::lifecycle::ConnectionLifecycle;
use crate::status::{InstanceStatus, ProgressTracker};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tickhouse_core::{CommandKind, ConnectionState};
use tickhouse_registry::{CoordinationStore, HolderInfo};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for one exchange runtime.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Exchange this runtime coordinates
    pub exchange_id: u32,

    /// Human-readable exchange name
    pub exchange_name: String,

    /// Addressed identity for the command channels (unique per runtime,
    /// e.g. "{host}-{exchange_id}")
    pub identity: String,

    /// Who this process is, for the lease record and takeover prompts
    pub holder: HolderInfo,

    /// Lease TTL / heartbeat timing
    pub lease: LeaseConfig,
}

impl InstanceConfig {
    pub fn new(
        exchange_id: u32,
        exchange_name: impl Into<String>,
        identity: impl Into<String>,
        holder: HolderInfo,
    ) -> Self {
        Self {
            exchange_id,
            exchange_name: exchange_name.into(),
            identity: identity.into(),
            holder,
            lease: LeaseConfig::default(),
        }
    }
}

/// Per-exchange coordination runtime; implements the command handlers.
pub struct InstanceRuntime {
    config: InstanceConfig,
    store: Arc<dyn CoordinationStore>,
    lease: Arc<LeaseManager>,
    lifecycle: Arc<ConnectionLifecycle>,
    connector: Arc<dyn ExchangeConnector>,
    activity: Arc<dyn ActivityLog>,
    progress: Arc<ProgressTracker>,
    dispatcher: RwLock<Option<CommandDispatcher>>,
}

impl InstanceRuntime {
    pub fn new(
        config: InstanceConfig,
        store: Arc<dyn CoordinationStore>,
        connector: Arc<dyn ExchangeConnector>,
        activity: Arc<dyn ActivityLog>,
    ) -> Arc<Self> {
        let lease = Arc::new(LeaseManager::new(
            Arc::clone(&store),
            config.exchange_id,
            config.exchange_name.clone(),
            config.holder.clone(),
            config.lease.clone(),
        ));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            Arc::clone(&lease),
            Arc::clone(&activity),
        ));

        Arc::new(Self {
            config,
            store,
            lease,
            lifecycle,
            connector,
            activity,
            progress: Arc::new(ProgressTracker::new()),
            dispatcher: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn lease_manager(&self) -> &Arc<LeaseManager> {
        &self.lease
    }

    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycle> {
        &self.lifecycle
    }

    /// Subscribe the command dispatcher. The runtime is addressable after
    /// this; it does not claim anything until a `start` command arrives.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut dispatcher_guard = self.dispatcher.write().await;
        if dispatcher_guard.is_some() {
            return Ok(());
        }

        let dispatcher = CommandDispatcher::new(
            Arc::clone(&self.store),
            self.config.identity.clone(),
            Arc::clone(self) as Arc<dyn CommandHandler>,
        );
        dispatcher.start().await?;
        *dispatcher_guard = Some(dispatcher);

        info!(
            exchange_id = self.config.exchange_id,
            identity = %self.config.identity,
            "Instance runtime started"
        );
        Ok(())
    }

    /// Graceful shutdown: tear down a live connection through the sanctioned
    /// stopping path, then stop the dispatcher.
    pub async fn shutdown(self: &Arc<Self>) -> Result<()> {
        let state = self.lifecycle.current().await;
        if state.can_transition_to(ConnectionState::Stopping) {
            if let Err(e) = self.stop_connection().await {
                warn!(
                    exchange_id = self.config.exchange_id,
                    error = %e,
                    "Connection teardown during shutdown failed; lease will expire via TTL"
                );
                self.lease.stop_heartbeat_task().await;
            }
        } else {
            self.lease.stop_heartbeat_task().await;
        }

        if let Some(dispatcher) = self.dispatcher.write().await.take() {
            dispatcher.stop().await;
        }

        info!(
            exchange_id = self.config.exchange_id,
            "Instance runtime shut down"
        );
        Ok(())
    }

    /// Current lease + local state + last long-running operation progress.
    pub async fn status(&self) -> Result<InstanceStatus> {
        Ok(InstanceStatus {
            exchange_id: self.config.exchange_id,
            connection_state: self.lifecycle.current().await,
            lease: self.lease.inspect().await?,
            progress: self.progress.snapshot().await,
        })
    }

    async fn handle_start(&self, force: bool) -> Result<Value> {
        let state = self.lifecycle.current().await;
        if state != ConnectionState::Idle {
            return Err(InstanceError::CommandFailed {
                message: format!("cannot start while {state}"),
            });
        }

        match self.lease.claim().await? {
            ClaimOutcome::Granted(_) => {}
            ClaimOutcome::Held(current) if current.held_by(&self.config.holder) => {
                // Our own lease from a previous attempt (e.g. error
                // recovery); keep it and reconnect.
            }
            ClaimOutcome::Held(current) => {
                if force {
                    self.lease.force_claim().await?;
                } else {
                    let message = format!(
                        "exchange {} ({}) already held by {} on {} ({}) since {}",
                        current.exchange_id,
                        current.exchange_name,
                        current.holder_identity,
                        current.holder_host,
                        current.holder_address,
                        current.connected_at,
                    );
                    self.activity.log_error(&message, state).await;
                    return Err(InstanceError::CommandFailed { message });
                }
            }
        }

        self.lease.start_heartbeat_task().await;
        self.lifecycle.transition(ConnectionState::Starting).await?;

        // The actual connection attempt is long-running; it reports back
        // through the lifecycle callbacks.
        let connector = Arc::clone(&self.connector);
        let events: Arc<dyn ExchangeEvents> = Arc::clone(&self.lifecycle) as _;
        tokio::spawn(async move {
            if let Err(e) = connector.connect(Arc::clone(&events)).await {
                events.on_error(&e.to_string()).await;
            }
        });

        Ok(json!({ "accepted": true }))
    }

    async fn handle_stop(&self) -> Result<Value> {
        let state = self.lifecycle.current().await;
        if !state.can_transition_to(ConnectionState::Stopping) {
            return Err(InstanceError::CommandFailed {
                message: format!("cannot stop while {state}"),
            });
        }

        self.stop_connection().await?;
        Ok(json!({ "stopped": true }))
    }

    /// stopping → stopped → idle reset → release. The only path on which the
    /// lease key is deleted.
    async fn stop_connection(&self) -> Result<()> {
        self.lifecycle.transition(ConnectionState::Stopping).await?;

        if let Err(e) = self.connector.disconnect().await {
            warn!(
                exchange_id = self.config.exchange_id,
                error = %e,
                "Connector disconnect reported an error"
            );
        }

        self.lifecycle.transition(ConnectionState::Stopped).await?;
        self.lifecycle.transition(ConnectionState::Idle).await?;

        self.lease.stop_heartbeat_task().await;
        self.lease.release().await?;
        Ok(())
    }

    async fn handle_backfill(&self, symbols: Vec<String>) -> Result<Value> {
        self.progress
            .begin("force-backfill", symbols.len() as u32)
            .await;

        let connector = Arc::clone(&self.connector);
        let progress = Arc::clone(&self.progress);
        let exchange_id = self.config.exchange_id;
        tokio::spawn(async move {
            for symbol in symbols {
                progress.working_on(&symbol).await;
                match connector.backfill_symbol(&symbol).await {
                    Ok(()) => progress.item_done().await,
                    Err(e) => {
                        warn!(
                            exchange_id,
                            symbol = %symbol,
                            error = %e,
                            "Backfill failed for symbol"
                        );
                        progress.item_failed().await;
                    }
                }
            }
            progress.finish().await;
            info!(exchange_id, "Backfill run finished");
        });

        Ok(json!({ "accepted": true }))
    }
}

#[async_trait]
impl CommandHandler for InstanceRuntime {
    async fn handle(&self, kind: CommandKind) -> Result<Value> {
        match kind {
            CommandKind::Pause => {
                self.connector.pause().await?;
                Ok(json!({ "paused": true }))
            }
            CommandKind::Resume => {
                self.connector.resume().await?;
                Ok(json!({ "paused": false }))
            }
            CommandKind::Reconfigure { settings } => {
                self.connector.apply_settings(&settings).await?;
                Ok(json!({ "applied": settings.len() }))
            }
            CommandKind::SwitchMode { mode } => {
                self.connector.switch_mode(&mode).await?;
                Ok(json!({ "mode": mode }))
            }
            CommandKind::AddSymbols { symbols } => {
                let count = self.connector.add_symbols(&symbols).await?;
                self.lease.update_symbol_count(count).await?;
                Ok(json!({ "symbolCount": count }))
            }
            CommandKind::RemoveSymbols { symbols } => {
                let count = self.connector.remove_symbols(&symbols).await?;
                self.lease.update_symbol_count(count).await?;
                Ok(json!({ "symbolCount": count }))
            }
            CommandKind::ForceBackfill { symbols } => self.handle_backfill(symbols).await,
            CommandKind::ClearCache => {
                self.connector.clear_cache().await?;
                Ok(json!({ "cleared": true }))
            }
            CommandKind::Start { force } => self.handle_start(force).await,
            CommandKind::Stop => self.handle_stop().await,
        }
    }
}
