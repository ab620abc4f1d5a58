//! Delta event fan-out.
//!
//! The emitter remembers what it last broadcast (status, every message,
//! screen) and turns fresh state into events only where something actually
//! changed. Every payload is a full current value, never an increment, so a
//! subscriber that misses an event because its queue was full is corrected
//! by the next one.
//!
//! There is no event log. A new subscriber gets a replay batch synthesized
//! from the last-broadcast state.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::types::{ConversationMessage, ConversationStatus};

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub type SubscriberId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageUpdate,
    StatusChange,
    ScreenUpdate,
}

impl EventKind {
    /// Name used for the SSE `event:` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageUpdate => "message_update",
            EventKind::StatusChange => "status_change",
            EventKind::ScreenUpdate => "screen_update",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Message(ConversationMessage),
    Status { status: ConversationStatus },
    Screen { screen: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub sequence: u64,
}

impl Event {
    /// The payload as JSON, as sent in the SSE `data:` field.
    pub fn data_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}

/// Which stream a subscriber follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// Status changes and message updates
    Conversation,
    /// Raw screen updates (debug view)
    Screen,
}

impl StreamKind {
    fn accepts(&self, kind: EventKind) -> bool {
        match self {
            StreamKind::Conversation => kind != EventKind::ScreenUpdate,
            StreamKind::Screen => kind == EventKind::ScreenUpdate,
        }
    }
}

struct Subscriber {
    stream: StreamKind,
    tx: mpsc::Sender<Event>,
}

struct EmitterState {
    status: ConversationStatus,
    messages: BTreeMap<u64, ConversationMessage>,
    screen: String,
    subscribers: HashMap<SubscriberId, Subscriber>,
    next_subscriber_id: SubscriberId,
    sequence: u64,
}

impl EmitterState {
    fn broadcast(&mut self, kind: EventKind, payload: EventPayload) {
        self.sequence += 1;
        let event = Event {
            kind,
            payload,
            sequence: self.sequence,
        };

        let mut closed = Vec::new();
        for (id, subscriber) in &self.subscribers {
            if !subscriber.stream.accepts(kind) {
                continue;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(
                        subscriber_id = id,
                        sequence = event.sequence,
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            debug!(subscriber_id = id, "Subscriber went away, removing");
            self.subscribers.remove(&id);
        }
    }

    fn replay(&self, stream: StreamKind) -> Vec<Event> {
        let event = |kind, payload| Event {
            kind,
            payload,
            sequence: self.sequence,
        };
        match stream {
            StreamKind::Conversation => {
                let mut events = Vec::with_capacity(self.messages.len() + 1);
                events.push(event(
                    EventKind::StatusChange,
                    EventPayload::Status {
                        status: self.status,
                    },
                ));
                events.extend(self.messages.values().map(|m| {
                    event(EventKind::MessageUpdate, EventPayload::Message(m.clone()))
                }));
                events
            }
            StreamKind::Screen => vec![event(
                EventKind::ScreenUpdate,
                EventPayload::Screen {
                    screen: self.screen.clone(),
                },
            )],
        }
    }
}

/// Broadcasts conversation changes to any number of subscribers.
pub struct EventEmitter {
    state: Mutex<EmitterState>,
    queue_capacity: usize,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(EmitterState {
                status: ConversationStatus::Stable,
                messages: BTreeMap::new(),
                screen: String::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 1,
                sequence: 0,
            }),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber.
    ///
    /// Returns its id, its queue, and the replay batch that reconstructs the
    /// current state for `stream`. The replay is generated under the same
    /// lock that registers the queue, so no live event can slip between the
    /// two.
    pub fn subscribe(&self, stream: StreamKind) -> (SubscriberId, mpsc::Receiver<Event>, Vec<Event>) {
        let mut state = self.lock();
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        state.subscribers.insert(id, Subscriber { stream, tx });
        let replay = state.replay(stream);
        debug!(subscriber_id = id, ?stream, replay = replay.len(), "Subscriber added");
        (id, rx, replay)
    }

    /// Remove a subscriber. Its receiver sees the queue close. Safe to call
    /// more than once.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!(subscriber_id = id, "Subscriber removed");
        }
    }

    /// Drop every subscriber, ending their streams. Used on shutdown.
    pub fn unsubscribe_all(&self) {
        let mut state = self.lock();
        let count = state.subscribers.len();
        state.subscribers.clear();
        if count > 0 {
            debug!(count, "All subscribers removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn update_status_and_emit_changes(&self, status: ConversationStatus) {
        let mut state = self.lock();
        if state.status == status {
            return;
        }
        state.status = status;
        state.broadcast(EventKind::StatusChange, EventPayload::Status { status });
    }

    pub fn update_messages_and_emit_changes(&self, messages: &[ConversationMessage]) {
        let mut state = self.lock();
        for message in messages {
            if state
                .messages
                .get(&message.id)
                .is_some_and(|prev| prev.content == message.content)
            {
                continue;
            }
            state.messages.insert(message.id, message.clone());
            state.broadcast(
                EventKind::MessageUpdate,
                EventPayload::Message(message.clone()),
            );
        }
    }

    pub fn update_screen_and_emit_changes(&self, screen: &str) {
        let mut state = self.lock();
        if state.screen == screen {
            return;
        }
        state.screen = screen.to_string();
        state.broadcast(
            EventKind::ScreenUpdate,
            EventPayload::Screen {
                screen: screen.to_string(),
            },
        );
    }
}
