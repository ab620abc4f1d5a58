use std::fmt;

/// Errors from PTY operations
#[derive(Debug)]
pub enum PtyError {
    /// Failed to open the PTY or spawn the child
    CreateFailed(String),
    /// Failed to write to the PTY
    WriteFailed(String),
    /// Failed to resize the PTY
    ResizeFailed(String),
    /// Failed to signal the child process
    KillFailed(String),
    /// The child process has exited
    ProcessExited,
    /// The actor is gone or dropped a reply
    ChannelError(String),
}

impl fmt::Display for PtyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtyError::CreateFailed(msg) => write!(f, "failed to start agent: {}", msg),
            PtyError::WriteFailed(msg) => write!(f, "failed to write to terminal: {}", msg),
            PtyError::ResizeFailed(msg) => write!(f, "failed to resize terminal: {}", msg),
            PtyError::KillFailed(msg) => write!(f, "failed to signal agent: {}", msg),
            PtyError::ProcessExited => write!(f, "agent process has exited"),
            PtyError::ChannelError(msg) => write!(f, "terminal actor unavailable: {}", msg),
        }
    }
}

impl std::error::Error for PtyError {}

impl From<anyhow::Error> for PtyError {
    fn from(err: anyhow::Error) -> Self {
        PtyError::CreateFailed(format!("{:#}", err))
    }
}

impl From<PtyError> for std::io::Error {
    fn from(err: PtyError) -> Self {
        let kind = match err {
            PtyError::ProcessExited | PtyError::ChannelError(_) => std::io::ErrorKind::BrokenPipe,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
