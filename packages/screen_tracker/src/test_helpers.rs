use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};

use crate::screen::{Clock, ScreenSource};

/// In-memory terminal: tests set the screen text and inspect what was written.
#[derive(Default)]
pub struct FakeScreen {
    screen: Mutex<String>,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes: Mutex<bool>,
}

impl FakeScreen {
    pub fn new(initial: &str) -> Arc<Self> {
        let fake = Self::default();
        *fake.screen.lock().unwrap() = initial.to_string();
        Arc::new(fake)
    }

    pub fn set(&self, screen: &str) {
        *self.screen.lock().unwrap() = screen.to_string();
    }

    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScreenSource for FakeScreen {
    async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "agent process exited",
            ));
        }
        self.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    async fn screen(&self) -> String {
        self.screen.lock().unwrap().clone()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(
                DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
        })
    }

    pub fn advance_ms(&self, ms: i64) {
        *self.now.lock().unwrap() += TimeDelta::milliseconds(ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Let spawned write tasks run until `count` writes have landed.
pub async fn wait_for_writes(screen: &FakeScreen, count: usize) {
    for _ in 0..1000 {
        if screen.writes().len() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "expected {} writes, saw {}",
        count,
        screen.writes().len()
    );
}
