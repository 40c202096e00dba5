//! TickHouse Instance Registry
//!
//! This crate owns the seam between TickHouse and the shared coordination
//! store, plus the records stored through it.
//!
//! ## Purpose
//!
//! Several collector hosts share one coordination store. At most one of them
//! may hold the live connection for a given exchange; the lease record under
//! `exchange:{id}:lease` is the single source of truth for who that is. The
//! store itself is external - this crate only specifies the primitives
//! TickHouse needs from it:
//!
//! - **conditional-set-if-absent** (with TTL): lease claims
//! - **conditional-set-if-present** (with TTL): heartbeats and state updates
//! - **key expiry**: crashed holders vanish without a cleanup step
//! - **publish/subscribe**: the command control plane
//!
//! ## Backends
//!
//! [`MemoryCoordinationStore`] is the embedded backend used by tests, demos
//! and single-process deployments. Networked backends implement the same
//! [`CoordinationStore`] trait and are shared via `Arc<dyn CoordinationStore>`.
//!
//! No TickHouse component writes a lease key unconditionally; everything goes
//! through the conditional primitives so an expired lease is never resurrected
//! and a newer holder is never clobbered by accident.

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryCoordinationStore;
pub use store::{ChannelMessage, CoordinationStore, Subscription};
pub use types::{lease_key, HolderInfo, InstanceLease};
