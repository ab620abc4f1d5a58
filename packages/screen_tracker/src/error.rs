//! Errors surfaced by agent sends.

/// Why a send was rejected.
///
/// `AgentBusy`, `EmptyInput` and `UnsupportedOperation` are returned
/// synchronously and leave the conversation untouched.
/// `ScreenSourceUnavailable` describes a failed write in the background; it
/// is recorded in-band as an agent message rather than returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("agent is currently running")]
    AgentBusy,

    #[error("message content cannot be empty")]
    EmptyInput,

    #[error("failed to write to agent: {0}")]
    ScreenSourceUnavailable(String),

    #[error("{0} is not supported by this agent")]
    UnsupportedOperation(&'static str),
}
