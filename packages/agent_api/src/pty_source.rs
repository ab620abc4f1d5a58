use async_trait::async_trait;
use pty_manager::PtyHandle;
use screen_tracker::ScreenSource;

/// Exposes a PTY session to the conversation tracker.
#[derive(Clone)]
pub struct PtyScreenSource {
    handle: PtyHandle,
}

impl PtyScreenSource {
    pub fn new(handle: PtyHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &PtyHandle {
        &self.handle
    }
}

#[async_trait]
impl ScreenSource for PtyScreenSource {
    async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.handle.write(bytes).await?;
        Ok(())
    }

    async fn screen(&self) -> String {
        self.handle.screen_text()
    }
}
