//! Coordination Store Trait
//!
//! TickHouse assumes a shared, linearizable-per-key store reachable by every
//! collector host. This module pins down the exact primitives the rest of
//! the system is allowed to use - nothing above this trait reimplements
//! conditional writes, expiry or messaging.
//!
//! ## Required Capabilities
//!
//! - `set_if_absent` / `set_if_present`: atomic conditional writes. No two
//!   `set_if_absent` calls for the same key can both succeed.
//! - TTL on write: keys vanish on their own when a holder stops renewing.
//! - `publish` / `subscribe`: topic-based fan-out to all current subscribers
//!   of a channel.
//!
//! ## Thread Safety
//!
//! Implementations are shared as `Arc<dyn CoordinationStore>` across async
//! tasks; every method takes `&self`.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// A message delivered to a channel subscriber.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Channel the message was published on
    pub channel: String,

    /// Raw payload (JSON for all TickHouse channels)
    pub payload: String,
}

/// A live subscription to one channel.
///
/// Messages published after the subscription was created are buffered until
/// received. Dropping the subscription unsubscribes.
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl Subscription {
    /// Assemble a subscription from a receiver; used by store backends.
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<ChannelMessage>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Channel this subscription is attached to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. `None` means the channel was torn down.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Take a buffered message without waiting, if one is ready.
    pub fn try_recv(&mut self) -> Option<ChannelMessage> {
        self.rx.try_recv().ok()
    }
}

/// The store primitives TickHouse coordination is built on.
///
/// All errors are [`crate::StoreError`]; an unreachable store must surface as
/// `Unavailable`, never as a fabricated "key absent" answer.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write `value` under `key` only if the key does not currently exist
    /// (expired keys count as absent). Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Write `value` under `key` only if the key currently exists and is not
    /// expired. Returns whether the write happened.
    async fn set_if_present(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Read the live value under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deliver `payload` to every current subscriber of `channel`.
    /// Returns the number of subscribers reached.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Open a subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
