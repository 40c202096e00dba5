//! TickHouse Instance Coordination
//!
//! This crate implements the coordination subsystem that lets multiple
//! collector hosts share one set of exchange connections without ever running
//! two live connections for the same exchange.
//!
//! ## Architecture
//!
//! Coordination happens entirely through the shared store behind
//! `tickhouse_registry::CoordinationStore`:
//!
//! - **LeaseManager**: claims and renews the per-exchange lease using
//!   conditional writes with a TTL. Holding the lease is what makes a
//!   "connected" status trustworthy.
//! - **ConnectionLifecycle**: the six-state machine the holder drives
//!   (idle → starting → warming → active → stopping → stopped → idle).
//! - **CommandDispatcher / CommandClient**: the pub/sub control plane that
//!   carries operator commands to whichever process holds the lease, with
//!   priority ordering and bounded response waits.
//! - **InstanceRuntime**: wires the three together and implements the
//!   command handlers.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tickhouse_core::CommandKind;
//! use tickhouse_instance::{CommandClient, InstanceConfig, InstanceRuntime, TracingActivityLog};
//! use tickhouse_registry::{CoordinationStore, HolderInfo, MemoryCoordinationStore};
//!
//! # async fn example(connector: Arc<dyn tickhouse_instance::ExchangeConnector>) -> tickhouse_instance::Result<()> {
//! let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
//!
//! let holder = HolderInfo {
//!     host: "collector-eu-1".to_string(),
//!     address: "10.0.1.5:4510".to_string(),
//!     identity: "ops@collector-eu-1".to_string(),
//! };
//! let config = InstanceConfig::new(7, "binance", "collector-eu-1-7", holder);
//!
//! let runtime = InstanceRuntime::new(
//!     config,
//!     Arc::clone(&store),
//!     connector,
//!     Arc::new(TracingActivityLog),
//! );
//! runtime.start().await?;
//!
//! // From any host sharing the store:
//! let client = CommandClient::new(store, "collector-eu-1-7");
//! client.dispatch(CommandKind::Start { force: false }).await?;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod lease_manager;
pub mod lifecycle;
pub mod runtime;
pub mod status;

pub use activity::{ActivityLog, TracingActivityLog};
pub use client::{CommandClient, CommandClientConfig};
pub use dispatcher::{CommandDispatcher, CommandHandler};
pub use error::{InstanceError, Result};
pub use exchange::{ExchangeConnector, ExchangeEvents};
pub use lease_manager::{inspect_exchange, ClaimOutcome, LeaseConfig, LeaseManager};
pub use lifecycle::ConnectionLifecycle;
pub use runtime::{InstanceConfig, InstanceRuntime};
pub use status::{InstanceStatus, OperationProgress, ProgressTracker};
