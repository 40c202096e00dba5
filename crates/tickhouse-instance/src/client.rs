//! Command Client - Caller Side of the Control Plane
//!
//! Two explicit entry points, chosen by the command *type* so call sites can
//! never accidentally block on a command that is designed never to respond:
//!
//! - [`CommandClient::execute`] - request-response commands. Publishes, then
//!   waits up to the configured timeout for the response whose correlation id
//!   matches. A timeout means the outcome is *unknown*: the command may still
//!   complete on the dispatcher side, its response simply goes unread.
//! - [`CommandClient::dispatch`] - fire-and-forget commands (long-running
//!   work). Publishes and returns `Accepted` immediately; progress is
//!   observed through status polling, never through this channel.

use crate::error::{InstanceError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tickhouse_core::{
    command_channel, response_channel, Accepted, Command, CommandKind, CommandResponse,
    ResponseStatus,
};
use tickhouse_registry::{CoordinationStore, StoreError};
use tracing::{debug, warn};

/// Default wait for a correlated response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CommandClientConfig {
    /// How long `execute` waits for a matching response.
    pub response_timeout: Duration,
}

impl Default for CommandClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Publishes commands to one addressed identity.
pub struct CommandClient {
    store: Arc<dyn CoordinationStore>,
    identity: String,
    config: CommandClientConfig,
}

impl CommandClient {
    pub fn new(store: Arc<dyn CoordinationStore>, identity: impl Into<String>) -> Self {
        Self::with_config(store, identity, CommandClientConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn CoordinationStore>,
        identity: impl Into<String>,
        config: CommandClientConfig,
    ) -> Self {
        Self {
            store,
            identity: identity.into(),
            config,
        }
    }

    /// Send a request-response command and wait for its result.
    ///
    /// Fails with `WrongDispatchMode` for fire-and-forget kinds, `Timeout`
    /// when no matching response arrives in time (outcome unknown - side
    /// effects are NOT rolled back), and `CommandFailed` when the handler
    /// reported an error.
    pub async fn execute(&self, kind: CommandKind) -> Result<Value> {
        if kind.is_fire_and_forget() {
            return Err(InstanceError::WrongDispatchMode {
                command: kind.name().to_string(),
                mode: "fire-and-forget",
            });
        }

        let command = Command::new(kind);

        // Subscribe before publishing so the response cannot slip past us.
        let mut responses = self
            .store
            .subscribe(&response_channel(&self.identity))
            .await?;

        self.publish(&command).await?;

        let wait = tokio::time::timeout(self.config.response_timeout, async {
            while let Some(message) = responses.recv().await {
                match serde_json::from_str::<CommandResponse>(&message.payload) {
                    Ok(response) if response.correlation_id == command.correlation_id => {
                        return Some(response);
                    }
                    Ok(_) => continue, // someone else's response
                    Err(e) => {
                        warn!(
                            identity = %self.identity,
                            error = %e,
                            "Skipping undecodable response message"
                        );
                    }
                }
            }
            None
        })
        .await;

        match wait {
            Ok(Some(response)) => match response.status {
                ResponseStatus::Success => Ok(response.data.unwrap_or(Value::Null)),
                ResponseStatus::Error => Err(InstanceError::CommandFailed {
                    message: response
                        .message
                        .unwrap_or_else(|| "unspecified handler error".to_string()),
                }),
            },
            Ok(None) => Err(InstanceError::Store(StoreError::ChannelClosed {
                channel: response_channel(&self.identity),
            })),
            Err(_) => Err(InstanceError::Timeout {
                command: command.kind.name().to_string(),
                waited_ms: self.config.response_timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a fire-and-forget command. Returns as soon as the command is
    /// published; no response message will ever exist for it.
    pub async fn dispatch(&self, kind: CommandKind) -> Result<Accepted> {
        if !kind.is_fire_and_forget() {
            return Err(InstanceError::WrongDispatchMode {
                command: kind.name().to_string(),
                mode: "request-response",
            });
        }

        let command = Command::new(kind);
        self.publish(&command).await?;

        Ok(Accepted {
            correlation_id: command.correlation_id,
            accepted: true,
        })
    }

    async fn publish(&self, command: &Command) -> Result<()> {
        let payload = serde_json::to_string(command)?;
        let delivered = self
            .store
            .publish(&command_channel(&self.identity), &payload)
            .await?;

        debug!(
            identity = %self.identity,
            command = command.kind.name(),
            correlation_id = %command.correlation_id,
            subscribers = delivered,
            "Command published"
        );

        if delivered == 0 {
            warn!(
                identity = %self.identity,
                command = command.kind.name(),
                "No dispatcher is subscribed to this identity"
            );
        }

        Ok(())
    }
}
