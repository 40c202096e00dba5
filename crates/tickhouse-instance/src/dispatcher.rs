//! Command Dispatcher - Control-Plane Consumer
//!
//! One dispatcher loop runs per addressed identity, as a single logical
//! consumer: commands for the same identity are never processed concurrently,
//! which is what makes the lifecycle's single-writer assumption safe without
//! extra locking in the handlers.
//!
//! ## Priority Queue
//!
//! The subscription feeds an internal priority queue. Whenever the loop is
//! idle it drains everything buffered on the subscription, then pops the
//! lowest-priority-number command and runs its handler to completion before
//! considering the next. Pause/resume (priority 1) are therefore never
//! starved behind a burst of bulk work enqueued earlier; the trade-off is
//! that arrival order is only preserved *within* a priority tier (FIFO by
//! arrival sequence).
//!
//! ## Handler Isolation
//!
//! Each handler runs in its own task. A handler error becomes an
//! `error`-status response; a handler panic is caught at the join and
//! likewise becomes an error response. Neither can kill the loop. A handler
//! that hangs stalls only its own identity's queue - the external caller has
//! its own timeout.
//!
//! ## Responses
//!
//! Request-response commands get exactly one response on the identity's
//! response channel, stamped with the request's correlation id.
//! Fire-and-forget commands never produce a response.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tickhouse_core::{command_channel, response_channel, Command, CommandKind, CommandResponse};
use tickhouse_registry::{ChannelMessage, CoordinationStore, Subscription};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handles one command at a time on behalf of a dispatcher.
///
/// The returned payload (or error) is translated into a `CommandResponse` by
/// the dispatcher; handlers never publish anything themselves.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, kind: CommandKind) -> Result<Value>;
}

/// A command waiting in the priority queue.
struct QueuedCommand {
    command: Command,
    /// Arrival sequence, used to break ties FIFO within a priority tier.
    seq: u64,
}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.command.priority == other.command.priority && self.seq == other.seq
    }
}

impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    // BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops
    // first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .command
            .priority
            .cmp(&self.command.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-ordered command consumer for one identity.
pub struct CommandDispatcher {
    store: Arc<dyn CoordinationStore>,
    identity: String,
    handler: Arc<dyn CommandHandler>,
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            store,
            identity: identity.into(),
            handler,
            handle: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Subscribe to the command channel and start the dispatch loop.
    pub async fn start(&self) -> Result<()> {
        let mut handle_guard = self.handle.write().await;
        if handle_guard.is_some() {
            return Ok(());
        }

        let subscription = self
            .store
            .subscribe(&command_channel(&self.identity))
            .await?;

        let dispatch_loop = DispatchLoop {
            store: Arc::clone(&self.store),
            identity: self.identity.clone(),
            handler: Arc::clone(&self.handler),
            subscription,
        };

        *handle_guard = Some(tokio::spawn(async move {
            dispatch_loop.run().await;
        }));

        info!(identity = %self.identity, "Command dispatcher started");
        Ok(())
    }

    /// Stop the dispatch loop. An in-flight handler is not interrupted
    /// gracefully - this is process-shutdown teardown.
    pub async fn stop(&self) {
        let mut handle_guard = self.handle.write().await;
        if let Some(handle) = handle_guard.take() {
            handle.abort();
            let _ = handle.await;
            info!(identity = %self.identity, "Command dispatcher stopped");
        }
    }
}

struct DispatchLoop {
    store: Arc<dyn CoordinationStore>,
    identity: String,
    handler: Arc<dyn CommandHandler>,
    subscription: Subscription,
}

impl DispatchLoop {
    async fn run(mut self) {
        let mut queue: BinaryHeap<QueuedCommand> = BinaryHeap::new();
        let mut seq: u64 = 0;

        loop {
            // Drain everything already buffered before picking what to run,
            // so a high-priority late arrival beats earlier bulk work.
            while let Some(message) = self.subscription.try_recv() {
                Self::enqueue(&self.identity, &mut queue, &mut seq, message);
            }

            let next = match queue.pop() {
                Some(queued) => queued,
                None => match self.subscription.recv().await {
                    Some(message) => {
                        Self::enqueue(&self.identity, &mut queue, &mut seq, message);
                        continue;
                    }
                    None => break,
                },
            };

            self.process(next.command).await;
        }

        info!(identity = %self.identity, "Command channel closed, dispatcher exiting");
    }

    fn enqueue(
        identity: &str,
        queue: &mut BinaryHeap<QueuedCommand>,
        seq: &mut u64,
        message: ChannelMessage,
    ) {
        match serde_json::from_str::<Command>(&message.payload) {
            Ok(command) => {
                debug!(
                    identity = %identity,
                    command = command.kind.name(),
                    correlation_id = %command.correlation_id,
                    priority = command.priority,
                    "Command queued"
                );
                queue.push(QueuedCommand {
                    command,
                    seq: *seq,
                });
                *seq += 1;
            }
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %e,
                    "Dropping undecodable command message"
                );
            }
        }
    }

    async fn process(&self, command: Command) {
        let name = command.kind.name();
        let fire_and_forget = command.kind.is_fire_and_forget();

        debug!(
            identity = %self.identity,
            command = name,
            correlation_id = %command.correlation_id,
            "Processing command"
        );

        // Run the handler in its own task so a panic cannot kill the loop.
        let handler = Arc::clone(&self.handler);
        let kind = command.kind.clone();
        let outcome = tokio::spawn(async move { handler.handle(kind).await }).await;

        let response = match outcome {
            Ok(Ok(data)) => CommandResponse::success(&command.correlation_id, data),
            Ok(Err(e)) => {
                warn!(
                    identity = %self.identity,
                    command = name,
                    error = %e,
                    "Command handler failed"
                );
                CommandResponse::error(&command.correlation_id, e.to_string())
            }
            Err(join_error) => {
                error!(
                    identity = %self.identity,
                    command = name,
                    error = %join_error,
                    "Command handler panicked"
                );
                CommandResponse::error(
                    &command.correlation_id,
                    format!("handler for '{name}' panicked"),
                )
            }
        };

        if fire_and_forget {
            return;
        }

        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(identity = %self.identity, error = %e, "Could not encode response");
                return;
            }
        };

        if let Err(e) = self
            .store
            .publish(&response_channel(&self.identity), &payload)
            .await
        {
            warn!(
                identity = %self.identity,
                correlation_id = %command.correlation_id,
                error = %e,
                "Could not publish command response"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tickhouse_core::ResponseStatus;
    use tickhouse_registry::MemoryCoordinationStore;
    use tokio::sync::Mutex;

    /// Handler that records execution order, optionally sleeping per command.
    struct RecordingHandler {
        delay: Duration,
        log: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                log: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandHandler for RecordingHandler {
        async fn handle(&self, kind: CommandKind) -> Result<Value> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().await.push(kind.name().to_string());

            match kind {
                CommandKind::ClearCache => {
                    Err(crate::error::InstanceError::Connector("cache is locked".to_string()))
                }
                CommandKind::SwitchMode { .. } => panic!("boom"),
                _ => Ok(json!({ "handled": kind.name() })),
            }
        }
    }

    fn store() -> Arc<dyn CoordinationStore> {
        Arc::new(MemoryCoordinationStore::new())
    }

    async fn publish_command(
        store: &Arc<dyn CoordinationStore>,
        identity: &str,
        kind: CommandKind,
    ) -> Command {
        let command = Command::new(kind);
        store
            .publish(
                &command_channel(identity),
                &serde_json::to_string(&command).unwrap(),
            )
            .await
            .unwrap();
        command
    }

    async fn next_response(sub: &mut Subscription) -> CommandResponse {
        let message = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("response in time")
            .expect("channel open");
        serde_json::from_str(&message.payload).unwrap()
    }

    #[tokio::test]
    async fn test_response_echoes_correlation_id() {
        let store = store();
        let handler = RecordingHandler::new(Duration::ZERO);
        let dispatcher = CommandDispatcher::new(Arc::clone(&store), "id-1", handler);
        dispatcher.start().await.unwrap();

        let mut responses = store.subscribe(&response_channel("id-1")).await.unwrap();
        let request = publish_command(&store, "id-1", CommandKind::Pause).await;

        let response = next_response(&mut responses).await;
        assert_eq!(response.correlation_id, request.correlation_id);
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.data.unwrap()["handled"], "pause");

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_priority_beats_arrival_order() {
        let store = store();
        let handler = RecordingHandler::new(Duration::from_millis(60));
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&store), "id-prio", Arc::clone(&handler) as _);
        dispatcher.start().await.unwrap();

        // First command occupies the handler; the rest pile up and must be
        // drained into the queue before the next pop.
        publish_command(&store, "id-prio", CommandKind::Stop).await; // 50
        tokio::time::sleep(Duration::from_millis(20)).await;
        publish_command(&store, "id-prio", CommandKind::AddSymbols { symbols: vec![] }).await; // 15
        publish_command(&store, "id-prio", CommandKind::Pause).await; // 1

        tokio::time::sleep(Duration::from_millis(400)).await;

        let log = handler.log.lock().await;
        assert_eq!(&*log, &["stop", "pause", "add-symbols"]);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_fifo_within_priority_tier() {
        let store = store();
        let handler = RecordingHandler::new(Duration::from_millis(60));
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&store), "id-fifo", Arc::clone(&handler) as _);
        dispatcher.start().await.unwrap();

        publish_command(&store, "id-fifo", CommandKind::Stop).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        publish_command(
            &store,
            "id-fifo",
            CommandKind::AddSymbols {
                symbols: vec!["BTC-USDT".to_string()],
            },
        )
        .await;
        publish_command(
            &store,
            "id-fifo",
            CommandKind::RemoveSymbols {
                symbols: vec!["ETH-USDT".to_string()],
            },
        )
        .await;

        tokio::time::sleep(Duration::from_millis(400)).await;

        let log = handler.log.lock().await;
        assert_eq!(&*log, &["stop", "add-symbols", "remove-symbols"]);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let store = store();
        let handler = RecordingHandler::new(Duration::ZERO);
        let dispatcher = CommandDispatcher::new(Arc::clone(&store), "id-err", handler);
        dispatcher.start().await.unwrap();

        let mut responses = store.subscribe(&response_channel("id-err")).await.unwrap();
        let request = publish_command(&store, "id-err", CommandKind::ClearCache).await;

        let response = next_response(&mut responses).await;
        assert_eq!(response.correlation_id, request.correlation_id);
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.unwrap().contains("cache is locked"));

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_kill_the_loop() {
        let store = store();
        let handler = RecordingHandler::new(Duration::ZERO);
        let dispatcher = CommandDispatcher::new(Arc::clone(&store), "id-panic", handler);
        dispatcher.start().await.unwrap();

        let mut responses = store.subscribe(&response_channel("id-panic")).await.unwrap();

        let panicking = publish_command(
            &store,
            "id-panic",
            CommandKind::SwitchMode {
                mode: "full".to_string(),
            },
        )
        .await;
        let response = next_response(&mut responses).await;
        assert_eq!(response.correlation_id, panicking.correlation_id);
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.unwrap().contains("panicked"));

        // The loop is still alive and processes the next command
        let request = publish_command(&store, "id-panic", CommandKind::Pause).await;
        let response = next_response(&mut responses).await;
        assert_eq!(response.correlation_id, request.correlation_id);
        assert_eq!(response.status, ResponseStatus::Success);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let store = store();
        let handler = RecordingHandler::new(Duration::ZERO);
        let dispatcher = CommandDispatcher::new(Arc::clone(&store), "id-junk", handler);
        dispatcher.start().await.unwrap();

        let mut responses = store.subscribe(&response_channel("id-junk")).await.unwrap();

        store
            .publish(&command_channel("id-junk"), "{ not json")
            .await
            .unwrap();
        let request = publish_command(&store, "id-junk", CommandKind::Resume).await;

        let response = next_response(&mut responses).await;
        assert_eq!(response.correlation_id, request.correlation_id);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_fire_and_forget_produces_no_response() {
        let store = store();
        let handler = RecordingHandler::new(Duration::ZERO);
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&store), "id-ff", Arc::clone(&handler) as _);
        dispatcher.start().await.unwrap();

        let mut responses = store.subscribe(&response_channel("id-ff")).await.unwrap();

        publish_command(
            &store,
            "id-ff",
            CommandKind::ForceBackfill { symbols: vec![] },
        )
        .await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        // The handler ran, but nothing was published on the response channel
        assert_eq!(&*handler.log.lock().await, &["force-backfill"]);
        assert!(responses.try_recv().is_none());

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store = store();
        let handler = RecordingHandler::new(Duration::ZERO);
        let dispatcher = CommandDispatcher::new(Arc::clone(&store), "id-idem", handler);

        dispatcher.start().await.unwrap();
        dispatcher.start().await.unwrap();
        dispatcher.stop().await;
        dispatcher.stop().await;
    }
}
