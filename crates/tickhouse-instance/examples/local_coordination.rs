//! Local Coordination Example
//!
//! Runs two instance runtimes ("host-a" and "host-b") against one shared
//! in-memory coordination store and walks through the full ownership story:
//! claim, conflict, confirmed takeover, a command round-trip and release.
//!
//! Run with: cargo run --example local_coordination

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickhouse_core::{CommandKind, ConnectionState};
use tickhouse_instance::{
    inspect_exchange, CommandClient, ExchangeConnector, ExchangeEvents, InstanceConfig,
    InstanceRuntime, Result, TracingActivityLog,
};
use tickhouse_registry::{CoordinationStore, HolderInfo, MemoryCoordinationStore};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Demo connector that "connects" instantly and counts symbols.
struct DemoConnector;

#[async_trait]
impl ExchangeConnector for DemoConnector {
    async fn connect(&self, events: Arc<dyn ExchangeEvents>) -> Result<()> {
        events.on_warming().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        events.on_active().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn switch_mode(&self, _mode: &str) -> Result<()> {
        Ok(())
    }

    async fn apply_settings(&self, _settings: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn add_symbols(&self, symbols: &[String]) -> Result<u32> {
        Ok(symbols.len() as u32)
    }

    async fn remove_symbols(&self, _symbols: &[String]) -> Result<u32> {
        Ok(0)
    }

    async fn backfill_symbol(&self, _symbol: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_cache(&self) -> Result<()> {
        Ok(())
    }
}

fn runtime_on(store: &Arc<dyn CoordinationStore>, host: &str) -> Arc<InstanceRuntime> {
    let config = InstanceConfig::new(
        7,
        "binance",
        format!("{host}-7"),
        HolderInfo {
            host: host.to_string(),
            address: format!("{host}:4510"),
            identity: format!("ops@{host}"),
        },
    );
    InstanceRuntime::new(
        config,
        Arc::clone(store),
        Arc::new(DemoConnector),
        Arc::new(TracingActivityLog),
    )
}

async fn wait_for_active(runtime: &Arc<InstanceRuntime>) {
    while runtime.status().await.unwrap().connection_state != ConnectionState::Active {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting local coordination example");

    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());

    let runtime_a = runtime_on(&store, "host-a");
    let runtime_b = runtime_on(&store, "host-b");
    runtime_a.start().await?;
    runtime_b.start().await?;

    // Host A claims exchange 7 and connects
    let client_a = CommandClient::new(Arc::clone(&store), "host-a-7");
    client_a.dispatch(CommandKind::Start { force: false }).await?;
    wait_for_active(&runtime_a).await;

    let lease = inspect_exchange(store.as_ref(), 7).await?.unwrap();
    info!(
        holder = %lease.holder_identity,
        state = %lease.connection_state,
        "Exchange 7 is now held"
    );

    // Host B tries the same exchange without confirmation - the lease stays put
    let client_b = CommandClient::new(Arc::clone(&store), "host-b-7");
    client_b.dispatch(CommandKind::Start { force: false }).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let lease = inspect_exchange(store.as_ref(), 7).await?.unwrap();
    info!(
        holder = %lease.holder_identity,
        "After the unconfirmed attempt the holder is unchanged"
    );

    // Operator confirms the takeover
    client_b.dispatch(CommandKind::Start { force: true }).await?;
    wait_for_active(&runtime_b).await;

    let lease = inspect_exchange(store.as_ref(), 7).await?.unwrap();
    info!(
        holder = %lease.holder_identity,
        "After the confirmed takeover"
    );

    // Command round-trip against the new holder
    let data = client_b
        .execute(CommandKind::AddSymbols {
            symbols: vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()],
        })
        .await?;
    info!(symbol_count = %data["symbolCount"], "Symbols subscribed");

    // Stop host B: reset to idle, lease released
    client_b.execute(CommandKind::Stop).await?;
    let free = inspect_exchange(store.as_ref(), 7).await?.is_none();
    info!(free, "Exchange 7 after stop");

    runtime_a.shutdown().await?;
    runtime_b.shutdown().await?;

    info!("Example finished");
    Ok(())
}
