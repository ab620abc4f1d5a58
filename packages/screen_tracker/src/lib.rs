//! Conversation tracking for terminal agents.
//!
//! An interactive coding agent only exposes a screen. This crate samples that
//! screen, works out which part of it is the reply to the latest user message,
//! and keeps a structured conversation plus a `stable`/`running` status.
//! An [`EventEmitter`] turns changes in that state into events for any number
//! of subscribers.
//!
//! The terminal itself is abstract ([`ScreenSource`]), as are the
//! agent-specific keystroke and chrome rules ([`MessageFormatter`]).

pub mod agent;
pub mod diff;
pub mod emitter;
pub mod error;
pub mod format;
pub mod screen;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use agent::{Agent, spawn_emitter_loop, sync_emitter};
pub use emitter::{Event, EventEmitter, EventKind, EventPayload, StreamKind, SubscriberId};
pub use error::SendError;
pub use format::{MessageFormatter, PlainFormatter};
pub use screen::{Clock, ScreenSource, SystemClock};
pub use tracker::{ScreenTracker, TrackerConfig};
pub use types::{
    ConversationMessage, ConversationRole, ConversationStatus, InputPart, MessageKind, Snapshot,
};
