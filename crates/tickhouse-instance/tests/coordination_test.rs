//! End-to-end coordination tests.
//!
//! Multiple instance runtimes share one in-memory coordination store, the
//! way separate collector hosts share the external store in production:
//! claim, conflict, confirmed takeover, command round-trips and status
//! polling all run through the real dispatcher/client protocol.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickhouse_core::{CommandKind, ConnectionState};
use tickhouse_instance::{
    inspect_exchange, CommandClient, CommandClientConfig, ExchangeConnector, ExchangeEvents,
    InstanceConfig, InstanceError, InstanceRuntime, LeaseConfig, Result, TracingActivityLog,
};
use tickhouse_registry::{CoordinationStore, HolderInfo, MemoryCoordinationStore};
use tokio::sync::Mutex;

/// Connector stand-in: connects instantly, tracks symbols, fails backfills
/// for symbols listed in `fail_backfill`.
struct FakeConnector {
    symbols: Mutex<Vec<String>>,
    paused: AtomicBool,
    fail_backfill: Vec<String>,
}

impl FakeConnector {
    fn new() -> Arc<Self> {
        Self::failing_backfills(&[])
    }

    fn failing_backfills(symbols: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            symbols: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            fail_backfill: symbols.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ExchangeConnector for FakeConnector {
    async fn connect(&self, events: Arc<dyn ExchangeEvents>) -> Result<()> {
        events.on_warming().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        events.on_active().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn switch_mode(&self, _mode: &str) -> Result<()> {
        Ok(())
    }

    async fn apply_settings(&self, _settings: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn add_symbols(&self, symbols: &[String]) -> Result<u32> {
        let mut current = self.symbols.lock().await;
        for symbol in symbols {
            if !current.contains(symbol) {
                current.push(symbol.clone());
            }
        }
        Ok(current.len() as u32)
    }

    async fn remove_symbols(&self, symbols: &[String]) -> Result<u32> {
        let mut current = self.symbols.lock().await;
        current.retain(|s| !symbols.contains(s));
        Ok(current.len() as u32)
    }

    async fn backfill_symbol(&self, symbol: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail_backfill.iter().any(|s| s == symbol) {
            return Err(InstanceError::Connector(format!(
                "no history for {symbol}"
            )));
        }
        Ok(())
    }

    async fn clear_cache(&self) -> Result<()> {
        Ok(())
    }
}

fn holder(host: &str) -> HolderInfo {
    HolderInfo {
        host: host.to_string(),
        address: format!("{host}:4510"),
        identity: format!("ops@{host}"),
    }
}

fn runtime_on(
    store: &Arc<dyn CoordinationStore>,
    exchange_id: u32,
    host: &str,
    connector: Arc<FakeConnector>,
) -> Arc<InstanceRuntime> {
    let mut config = InstanceConfig::new(
        exchange_id,
        "binance",
        format!("{host}-{exchange_id}"),
        holder(host),
    );
    config.lease = LeaseConfig::with_ttl(Duration::from_secs(45));

    InstanceRuntime::new(
        config,
        Arc::clone(store),
        connector,
        Arc::new(TracingActivityLog),
    )
}

fn client_for(store: &Arc<dyn CoordinationStore>, host: &str, exchange_id: u32) -> CommandClient {
    CommandClient::with_config(
        Arc::clone(store),
        format!("{host}-{exchange_id}"),
        CommandClientConfig {
            response_timeout: Duration::from_secs(2),
        },
    )
}

async fn wait_for_state(runtime: &Arc<InstanceRuntime>, expected: ConnectionState) {
    for _ in 0..100 {
        if runtime.status().await.unwrap().connection_state == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "runtime never reached {expected}, stuck at {}",
        runtime.status().await.unwrap().connection_state
    );
}

fn shared_store() -> Arc<dyn CoordinationStore> {
    Arc::new(MemoryCoordinationStore::new())
}

#[tokio::test]
async fn test_start_claims_and_connects() {
    let store = shared_store();
    let runtime = runtime_on(&store, 7, "host-a", FakeConnector::new());
    runtime.start().await.unwrap();

    let client = client_for(&store, "host-a", 7);
    let accepted = client
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    assert!(accepted.accepted);

    wait_for_state(&runtime, ConnectionState::Active).await;

    let status = runtime.status().await.unwrap();
    let lease = status.lease.expect("lease should be held");
    assert_eq!(lease.holder_host, "host-a");
    assert_eq!(lease.connection_state, ConnectionState::Active);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unforced_start_does_not_steal() {
    let store = shared_store();
    let runtime_a = runtime_on(&store, 7, "host-a", FakeConnector::new());
    let runtime_b = runtime_on(&store, 7, "host-b", FakeConnector::new());
    runtime_a.start().await.unwrap();
    runtime_b.start().await.unwrap();

    client_for(&store, "host-a", 7)
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime_a, ConnectionState::Active).await;

    // Host B tries to start the same exchange without confirmation
    client_for(&store, "host-b", 7)
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The lease is untouched and B never left idle
    let lease = inspect_exchange(store.as_ref(), 7).await.unwrap().unwrap();
    assert_eq!(lease.holder_host, "host-a");
    assert_eq!(
        runtime_b.status().await.unwrap().connection_state,
        ConnectionState::Idle
    );

    runtime_a.shutdown().await.unwrap();
    runtime_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_confirmed_takeover_wins() {
    let store = shared_store();
    let runtime_a = runtime_on(&store, 7, "host-a", FakeConnector::new());
    let runtime_b = runtime_on(&store, 7, "host-b", FakeConnector::new());
    runtime_a.start().await.unwrap();
    runtime_b.start().await.unwrap();

    client_for(&store, "host-a", 7)
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime_a, ConnectionState::Active).await;

    // Operator saw the conflict and confirmed the takeover
    client_for(&store, "host-b", 7)
        .dispatch(CommandKind::Start { force: true })
        .await
        .unwrap();
    wait_for_state(&runtime_b, ConnectionState::Active).await;

    let lease = inspect_exchange(store.as_ref(), 7).await.unwrap().unwrap();
    assert_eq!(lease.holder_host, "host-b");

    // No fencing: the deposed holder still believes it is active locally,
    // but every holder-checked write it attempts now fails.
    assert_eq!(
        runtime_a.status().await.unwrap().connection_state,
        ConnectionState::Active
    );
    assert!(!runtime_a.lease_manager().heartbeat().await);

    runtime_a.shutdown().await.unwrap();
    runtime_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pause_round_trip() {
    let store = shared_store();
    let connector = FakeConnector::new();
    let runtime = runtime_on(&store, 7, "host-a", Arc::clone(&connector));
    runtime.start().await.unwrap();

    let client = client_for(&store, "host-a", 7);
    client
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime, ConnectionState::Active).await;

    let data = client.execute(CommandKind::Pause).await.unwrap();
    assert_eq!(data, json!({ "paused": true }));
    assert!(connector.paused.load(Ordering::SeqCst));

    let data = client.execute(CommandKind::Resume).await.unwrap();
    assert_eq!(data, json!({ "paused": false }));
    assert!(!connector.paused.load(Ordering::SeqCst));

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_symbol_commands_update_lease() {
    let store = shared_store();
    let runtime = runtime_on(&store, 7, "host-a", FakeConnector::new());
    runtime.start().await.unwrap();

    let client = client_for(&store, "host-a", 7);
    client
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime, ConnectionState::Active).await;

    let data = client
        .execute(CommandKind::AddSymbols {
            symbols: vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(data["symbolCount"], 2);

    let lease = inspect_exchange(store.as_ref(), 7).await.unwrap().unwrap();
    assert_eq!(lease.symbol_count, 2);

    let data = client
        .execute(CommandKind::RemoveSymbols {
            symbols: vec!["ETH-USDT".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(data["symbolCount"], 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_releases_the_exchange() {
    let store = shared_store();
    let runtime_a = runtime_on(&store, 7, "host-a", FakeConnector::new());
    runtime_a.start().await.unwrap();

    let client = client_for(&store, "host-a", 7);
    client
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime_a, ConnectionState::Active).await;

    let data = client.execute(CommandKind::Stop).await.unwrap();
    assert_eq!(data, json!({ "stopped": true }));

    // Back to idle with the key deleted - immediately claimable elsewhere
    assert_eq!(
        runtime_a.status().await.unwrap().connection_state,
        ConnectionState::Idle
    );
    assert!(inspect_exchange(store.as_ref(), 7).await.unwrap().is_none());

    let runtime_b = runtime_on(&store, 7, "host-b", FakeConnector::new());
    runtime_b.start().await.unwrap();
    client_for(&store, "host-b", 7)
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime_b, ConnectionState::Active).await;

    runtime_a.shutdown().await.unwrap();
    runtime_b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_while_idle_fails_cleanly() {
    let store = shared_store();
    let runtime = runtime_on(&store, 7, "host-a", FakeConnector::new());
    runtime.start().await.unwrap();

    let client = client_for(&store, "host-a", 7);
    let result = client.execute(CommandKind::Stop).await;
    match result {
        Err(InstanceError::CommandFailed { message }) => {
            assert!(message.contains("cannot stop while idle"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_backfill_progress_is_observable() {
    let store = shared_store();
    let connector = FakeConnector::failing_backfills(&["DOGE-USDT"]);
    let runtime = runtime_on(&store, 7, "host-a", connector);
    runtime.start().await.unwrap();

    let client = client_for(&store, "host-a", 7);
    client
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    wait_for_state(&runtime, ConnectionState::Active).await;

    let accepted = client
        .dispatch(CommandKind::ForceBackfill {
            symbols: vec![
                "BTC-USDT".to_string(),
                "DOGE-USDT".to_string(),
                "ETH-USDT".to_string(),
            ],
        })
        .await
        .unwrap();
    assert!(accepted.accepted);

    // Poll status until the run finishes
    let progress = loop {
        let status = runtime.status().await.unwrap();
        if let Some(progress) = status.progress {
            if progress.is_finished() {
                break progress;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(progress.operation, "force-backfill");
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.percent(), 100);
    assert!(progress.current_item.is_none());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_identities_are_independent() {
    let store = shared_store();
    let runtime_a = runtime_on(&store, 7, "host-a", FakeConnector::new());
    let runtime_b = runtime_on(&store, 8, "host-b", FakeConnector::new());
    runtime_a.start().await.unwrap();
    runtime_b.start().await.unwrap();

    client_for(&store, "host-a", 7)
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();
    client_for(&store, "host-b", 8)
        .dispatch(CommandKind::Start { force: false })
        .await
        .unwrap();

    wait_for_state(&runtime_a, ConnectionState::Active).await;
    wait_for_state(&runtime_b, ConnectionState::Active).await;

    // Both exchanges are held, by their own hosts
    let lease_7 = inspect_exchange(store.as_ref(), 7).await.unwrap().unwrap();
    let lease_8 = inspect_exchange(store.as_ref(), 8).await.unwrap().unwrap();
    assert_eq!(lease_7.holder_host, "host-a");
    assert_eq!(lease_8.holder_host, "host-b");

    runtime_a.shutdown().await.unwrap();
    runtime_b.shutdown().await.unwrap();
}
