//! The common seam between HTTP handlers and agent backends.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emitter::EventEmitter;
use crate::error::SendError;
use crate::types::{ConversationMessage, ConversationStatus, MessageKind};

/// A conversational agent, either observed through its terminal or reached
/// over its own API.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Submit a message. Returns once the message is accepted, before the
    /// agent has replied.
    async fn send_message(&self, text: &str, kind: MessageKind) -> Result<(), SendError>;

    /// Snapshot of the conversation so far, ordered by id.
    async fn messages(&self) -> Vec<ConversationMessage>;

    async fn status(&self) -> ConversationStatus;

    /// Current screen text. Backends without a terminal return an empty string.
    async fn screen(&self) -> String;

    /// Start whatever background work keeps `messages` and `status` current.
    /// Stops when `cancel` fires.
    fn start_polling(&self, cancel: CancellationToken);
}

/// Push the agent's current state through the emitter once.
///
/// Status goes first so a subscriber sees `running` before the first chunk
/// of the reply, and `stable` before the final content.
pub async fn sync_emitter(agent: &dyn Agent, emitter: &EventEmitter) {
    emitter.update_status_and_emit_changes(agent.status().await);
    emitter.update_messages_and_emit_changes(&agent.messages().await);
    emitter.update_screen_and_emit_changes(&agent.screen().await);
}

/// Feed the emitter from the agent on a fixed interval until cancelled.
pub fn spawn_emitter_loop(
    agent: Arc<dyn Agent>,
    emitter: Arc<EventEmitter>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Emitter loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => sync_emitter(agent.as_ref(), &emitter).await,
            }
        }
        debug!(subscribers = emitter.subscriber_count(), "Emitter loop stopped");
    })
}
