//! Snapshot-diff conversation tracker.
//!
//! Polls the agent's screen on a fixed interval and turns the stream of
//! snapshots into an append-only list of user/agent messages plus a
//! stable/changing status.
//!
//! ## Turn lifecycle
//!
//! 1. `send_message` captures the screen as the *baseline*, records the user
//!    message, flips status to `Changing` and dispatches the keystrokes.
//! 2. Each poll that sees a different screen recomputes the region beyond
//!    the baseline, strips chrome, and overwrites the turn's agent message.
//! 3. Once the screen has not changed for the stability window the status
//!    returns to `Stable` and the agent message is frozen.
//!
//! Before the first send, the whole screen is the initial agent message
//! (typically the agent's welcome banner).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::diff::{DiffRegion, diff_region};
use crate::error::SendError;
use crate::format::{MessageFormatter, trailing_prompt};
use crate::screen::{Clock, ScreenSource, SystemClock};
use crate::types::{
    ConversationMessage, ConversationRole, ConversationStatus, InputPart, MessageKind, Snapshot,
};

/// Tuning for the polling loop.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// How often the screen is sampled
    pub snapshot_interval: Duration,
    /// How long the screen must stay unchanged before a turn is complete
    pub stability_window: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            // About 40 frames per second
            snapshot_interval: Duration::from_millis(25),
            stability_window: Duration::from_secs(2),
        }
    }
}

struct TrackerState {
    messages: Vec<ConversationMessage>,
    status: ConversationStatus,
    baseline: Option<Snapshot>,
    last_snapshot: Option<Snapshot>,
    last_change_at: DateTime<Utc>,
    /// Index into `messages` of the agent message still being overwritten
    live_agent: Option<usize>,
    last_user_input: String,
    /// Prompt word on the baseline's last row, if it had one
    prompt: Option<String>,
    next_id: u64,
    /// Whether the redraw fallback was already reported for this turn
    redraw_reported: bool,
}

impl TrackerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            messages: Vec::new(),
            status: ConversationStatus::Stable,
            baseline: None,
            last_snapshot: None,
            last_change_at: now,
            live_agent: None,
            last_user_input: String::new(),
            prompt: None,
            next_id: 0,
            redraw_reported: false,
        }
    }

    fn push_message(
        &mut self,
        role: ConversationRole,
        content: String,
        now: DateTime<Utc>,
    ) -> usize {
        self.messages.push(ConversationMessage {
            id: self.next_id,
            role,
            content,
            time: now,
        });
        self.next_id += 1;
        self.messages.len() - 1
    }

    fn has_user_message(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == ConversationRole::User)
    }

    fn begin_turn(&mut self, input: &str, baseline: Snapshot) {
        let now = baseline.taken_at;
        self.prompt = trailing_prompt(&baseline.screen).map(str::to_string);
        self.baseline = Some(baseline);
        self.push_message(ConversationRole::User, input.to_string(), now);
        self.last_user_input = input.to_string();
        self.status = ConversationStatus::Changing;
        self.last_change_at = now;
        self.live_agent = None;
        self.redraw_reported = false;
    }

    /// Feed one screen sample through the state machine.
    fn observe(
        &mut self,
        screen: String,
        now: DateTime<Utc>,
        formatter: &dyn MessageFormatter,
        stability_window: Duration,
    ) {
        let unchanged = self
            .last_snapshot
            .as_ref()
            .is_some_and(|s| s.screen == screen);

        if unchanged {
            let quiet_for = (now - self.last_change_at).to_std().unwrap_or_default();
            if self.status == ConversationStatus::Changing && quiet_for >= stability_window {
                debug!(
                    messages = self.messages.len(),
                    "Screen stable, turn complete"
                );
                self.status = ConversationStatus::Stable;
                self.live_agent = None;
            }
            return;
        }

        let content = match self.status {
            ConversationStatus::Changing => {
                let baseline = self.baseline.as_ref().map_or("", |b| b.screen.as_str());
                let region = diff_region(baseline, &screen);
                if matches!(region, DiffRegion::Redrawn(_)) && !self.redraw_reported {
                    warn!("Baseline no longer on screen, using whole screen for agent message");
                    self.redraw_reported = true;
                }
                Some(formatter.strip_chrome(
                    region.text(),
                    &self.last_user_input,
                    self.prompt.as_deref(),
                ))
            }
            ConversationStatus::Stable if !self.has_user_message() => {
                Some(formatter.strip_chrome(&screen, "", trailing_prompt(&screen)))
            }
            // Frozen between turns
            ConversationStatus::Stable => None,
        };

        self.last_snapshot = Some(Snapshot::new(screen, now));
        self.last_change_at = now;

        if let Some(content) = content {
            self.update_agent_message(content, now);
        }
    }

    fn update_agent_message(&mut self, content: String, now: DateTime<Utc>) {
        if content.is_empty() {
            return;
        }
        match self.live_agent {
            Some(idx) => {
                let message = &mut self.messages[idx];
                if message.content != content {
                    message.content = content;
                    message.time = now;
                }
            }
            None => {
                let idx = self.push_message(ConversationRole::Agent, content, now);
                self.live_agent = Some(idx);
            }
        }
    }

    fn record_write_failure(&mut self, err: &SendError, now: DateTime<Utc>) {
        let content = format!("Error: {}", err);
        match self.live_agent {
            Some(idx) => {
                let message = &mut self.messages[idx];
                message.content = content;
                message.time = now;
            }
            None => {
                self.push_message(ConversationRole::Agent, content, now);
            }
        }
        self.status = ConversationStatus::Stable;
        self.live_agent = None;
    }
}

struct TrackerInner {
    state: RwLock<TrackerState>,
    source: Arc<dyn ScreenSource>,
    formatter: Arc<dyn MessageFormatter>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

/// Conversation tracker over a terminal screen. Cheap to clone.
#[derive(Clone)]
pub struct ScreenTracker {
    inner: Arc<TrackerInner>,
}

impl ScreenTracker {
    pub fn new(
        source: Arc<dyn ScreenSource>,
        formatter: Arc<dyn MessageFormatter>,
        config: TrackerConfig,
    ) -> Self {
        Self::with_clock(source, formatter, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn ScreenSource>,
        formatter: Arc<dyn MessageFormatter>,
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(TrackerInner {
                state: RwLock::new(TrackerState::new(now)),
                source,
                formatter,
                clock,
                config,
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Take one snapshot and advance the state machine.
    pub async fn poll(&self) {
        let screen = self.inner.source.screen().await;
        let now = self.inner.clock.now();
        let mut state = self.inner.state.write().await;
        state.observe(
            screen,
            now,
            self.inner.formatter.as_ref(),
            self.inner.config.stability_window,
        );
    }

    async fn send_user(&self, text: &str) -> Result<(), SendError> {
        let input = text.trim();
        let parts: Vec<InputPart> = self
            .inner
            .formatter
            .format_input(input)
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();

        let screen = self.inner.source.screen().await;
        {
            let mut state = self.inner.state.write().await;
            if state.status == ConversationStatus::Changing {
                return Err(SendError::AgentBusy);
            }
            if input.is_empty() || parts.is_empty() {
                return Err(SendError::EmptyInput);
            }
            let baseline = Snapshot::new(screen, self.inner.clock.now());
            state.begin_turn(input, baseline);
            debug!(
                message_id = state.next_id - 1,
                parts = parts.len(),
                "Dispatching user message"
            );
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.write_parts(parts).await;
        });
        Ok(())
    }

    fn send_raw(&self, text: &str) -> Result<(), SendError> {
        if text.is_empty() {
            return Err(SendError::EmptyInput);
        }
        let bytes = text.as_bytes().to_vec();
        let source = self.inner.source.clone();
        tokio::spawn(async move {
            if let Err(e) = source.write(&bytes).await {
                warn!(error = %e, "Failed to write raw input");
            }
        });
        Ok(())
    }
}

impl TrackerInner {
    async fn write_parts(&self, parts: Vec<InputPart>) {
        for part in parts {
            if let Err(e) = self.source.write(&part.bytes).await {
                let err = SendError::ScreenSourceUnavailable(e.to_string());
                error!(error = %e, "Failed to write message to agent");
                let now = self.clock.now();
                self.state.write().await.record_write_failure(&err, now);
                return;
            }
            if !part.settle.is_zero() {
                tokio::time::sleep(part.settle).await;
            }
        }
    }
}

#[async_trait]
impl Agent for ScreenTracker {
    async fn send_message(&self, text: &str, kind: MessageKind) -> Result<(), SendError> {
        match kind {
            MessageKind::User => self.send_user(text).await,
            MessageKind::Raw => self.send_raw(text),
        }
    }

    async fn messages(&self) -> Vec<ConversationMessage> {
        self.inner.state.read().await.messages.clone()
    }

    async fn status(&self) -> ConversationStatus {
        self.inner.state.read().await.status
    }

    async fn screen(&self) -> String {
        self.inner
            .state
            .read()
            .await
            .last_snapshot
            .as_ref()
            .map(|s| s.screen.clone())
            .unwrap_or_default()
    }

    fn start_polling(&self, cancel: CancellationToken) {
        let tracker = self.clone();
        let interval = self.inner.config.snapshot_interval;
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Snapshot loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => tracker.poll().await,
                }
            }
            info!("Snapshot loop stopped");
        });
    }
}
