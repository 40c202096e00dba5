//! Exchange client collaborator interfaces.
//!
//! The network clients that actually stream market data live outside this
//! crate. The coordination runtime only needs two seams:
//!
//! - [`ExchangeEvents`]: lifecycle callbacks the client fires as its session
//!   progresses (`on_warming` once the session is up, `on_active` on first
//!   live data, `on_error` on any failure). The state machine implements
//!   this - it is never polled.
//! - [`ExchangeConnector`]: the operations command handlers forward to the
//!   client (connect, pause, symbol changes, backfill, ...).

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle callbacks fired by an exchange client.
#[async_trait]
pub trait ExchangeEvents: Send + Sync {
    /// Session established, subscriptions replaying.
    async fn on_warming(&self);

    /// First live market data received.
    async fn on_active(&self);

    /// The connection failed or degraded.
    async fn on_error(&self, message: &str);
}

/// Control surface of an exchange network client.
///
/// Calls may be issued from command handlers at any lifecycle state; a client
/// that cannot honor a call in its current condition reports an error, which
/// the dispatcher turns into an error response.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Open the connection, reporting progress through `events`.
    ///
    /// Long-running: invoked from a background task, never from the
    /// dispatcher loop itself.
    async fn connect(&self, events: Arc<dyn ExchangeEvents>) -> Result<()>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;

    /// Suspend data handling without disconnecting.
    async fn pause(&self) -> Result<()>;

    /// Resume after a pause.
    async fn resume(&self) -> Result<()>;

    /// Switch the feed mode (e.g. trades-only vs. full order book).
    async fn switch_mode(&self, mode: &str) -> Result<()>;

    /// Apply new collector settings.
    async fn apply_settings(&self, settings: &HashMap<String, String>) -> Result<()>;

    /// Subscribe additional symbols; returns the new active symbol count.
    async fn add_symbols(&self, symbols: &[String]) -> Result<u32>;

    /// Unsubscribe symbols; returns the new active symbol count.
    async fn remove_symbols(&self, symbols: &[String]) -> Result<u32>;

    /// Re-fetch history for one symbol (driven per-symbol so the runtime can
    /// track progress).
    async fn backfill_symbol(&self, symbol: &str) -> Result<()>;

    /// Drop cached candles/indicators for this exchange.
    async fn clear_cache(&self) -> Result<()>;
}
