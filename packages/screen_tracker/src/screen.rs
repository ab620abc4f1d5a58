use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The terminal the agent runs in, seen as a black box.
///
/// Implementations render escape sequences themselves; the tracker only
/// ever sees plain screen text.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    /// Write raw input bytes to the agent process.
    async fn write(&self, bytes: &[u8]) -> std::io::Result<()>;

    /// The currently rendered screen as plain text, one line per row.
    async fn screen(&self) -> String;
}

/// Time source for snapshots and the stability window.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
