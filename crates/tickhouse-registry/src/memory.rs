//! In-Memory Coordination Store
//!
//! Embedded implementation of [`CoordinationStore`] backed by process memory.
//! Used by unit tests, the demo wiring, and single-process deployments where
//! every instance lives in one collector binary. Networked deployments point
//! the same trait at a shared external store instead.
//!
//! ## Expiry
//!
//! TTLs are enforced lazily: an expired entry reads as absent and is purged
//! on the next touch of its key. This mirrors how the external store behaves
//! from a client's point of view - nothing observes the exact eviction
//! moment, only that the key is gone.
//!
//! ## Pub/Sub
//!
//! Each channel fans out to every subscriber registered at publish time.
//! Subscribers that went away are pruned on the next publish.

use crate::error::Result;
use crate::store::{ChannelMessage, CoordinationStore, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

struct StoredEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`CoordinationStore`] backend.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<ChannelMessage>>>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(value: &str, ttl: Option<Duration>) -> StoredEntry {
        StoredEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired() => Ok(false),
            _ => {
                entries.insert(key.to_string(), Self::entry(value, ttl));
                Ok(true)
            }
        }
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired() => {
                entries.insert(key.to_string(), Self::entry(value, ttl));
                Ok(true)
            }
            Some(_) => {
                // Expired: purge and report absent
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired() => Ok(Some(existing.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match entries.remove(key) {
            Some(existing) => Ok(!existing.is_expired()),
            None => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut subscribers = self.subscribers.lock().await;
        let Some(senders) = subscribers.get_mut(channel) else {
            return Ok(0);
        };

        let message = ChannelMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };

        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(senders.len())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }
}
