use anyhow::{Context, Result};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::PtyError;

/// Configuration for spawning an agent under a PTY
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    /// Tall by default so a long reply rarely scrolls the turn's baseline
    /// off the top of the screen.
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: "/bin/bash".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            rows: 1000,
            cols: 80,
        }
    }
}

/// State of a PTY session
#[derive(Clone, Debug)]
pub struct PtyState {
    pub running: bool,
    pub pid: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
    pub rows: u16,
    pub cols: u16,
}

/// Raw output chunk from the PTY
#[derive(Clone, Debug)]
pub struct PtyOutput {
    pub data: Vec<u8>,
    pub timestamp: i64,
}

/// Messages that can be sent to the PTY actor
pub(crate) enum PtyMessage {
    WriteInput {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, PtyError>>,
    },
    Resize {
        rows: u16,
        cols: u16,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    GetState {
        respond_to: oneshot::Sender<PtyState>,
    },
    Kill {
        signal: Option<String>,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
}

type SharedParser = Arc<Mutex<vt100::Parser>>;

fn lock_parser(parser: &SharedParser) -> std::sync::MutexGuard<'_, vt100::Parser> {
    parser.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to communicate with a PTY actor
#[derive(Clone)]
pub struct PtyHandle {
    sender: mpsc::Sender<PtyMessage>,
    output_tx: broadcast::Sender<PtyOutput>,
    parser: SharedParser,
    exited: watch::Receiver<bool>,
}

impl PtyHandle {
    /// Write data to the PTY
    pub async fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        if self.has_exited() {
            return Err(PtyError::ProcessExited);
        }
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::WriteInput {
                data: data.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send write message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive write response".into()))?
    }

    /// Write a string to the PTY
    pub async fn write_str(&self, text: &str) -> Result<usize, PtyError> {
        self.write(text.as_bytes()).await
    }

    /// Resize the PTY and the rendered screen
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Resize {
                rows,
                cols,
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send resize message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive resize response".into()))?
    }

    /// Get the current state of the PTY
    pub async fn state(&self) -> Result<PtyState, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send state message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive state response".into()))
    }

    /// Signal the agent process (`SIGTERM` when `signal` is `None`)
    pub async fn kill(&self, signal: Option<&str>) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Kill {
                signal: signal.map(|s| s.to_string()),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send kill message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive kill response".into()))?
    }

    /// Subscribe to raw output from the PTY
    pub fn subscribe(&self) -> broadcast::Receiver<PtyOutput> {
        self.output_tx.subscribe()
    }

    /// The rendered screen as plain text, one line per row with trailing
    /// blanks trimmed.
    pub fn screen_text(&self) -> String {
        lock_parser(&self.parser).screen().contents()
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Resolves once the PTY reaches EOF, i.e. the agent process is gone.
    pub async fn wait_for_exit(&self) {
        let mut exited = self.exited.clone();
        // Err means the reader thread is gone, which also means exited
        let _ = exited.wait_for(|done| *done).await;
    }

    /// Stop the agent: `SIGTERM`, up to `grace` to exit, then `SIGKILL` and
    /// up to `grace` again.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), PtyError> {
        if self.has_exited() {
            return Ok(());
        }
        if let Err(e) = self.kill(None).await {
            warn!(error = %e, "Failed to send SIGTERM");
        }
        if tokio::time::timeout(grace, self.wait_for_exit()).await.is_ok() {
            info!("Agent process stopped");
            return Ok(());
        }

        warn!(
            grace_ms = grace.as_millis() as u64,
            "Agent still running after SIGTERM, sending SIGKILL"
        );
        self.kill(Some("SIGKILL")).await?;
        tokio::time::timeout(grace, self.wait_for_exit())
            .await
            .map_err(|_| PtyError::KillFailed("process did not exit after SIGKILL".into()))
    }
}

/// The PTY actor that manages a single agent process
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    state: PtyState,
    parser: SharedParser,
    receiver: mpsc::Receiver<PtyMessage>,
}

impl PtyActor {
    /// Spawn the configured command under a new PTY and return a handle to it
    pub fn spawn(config: PtyConfig) -> Result<PtyHandle, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")
            .map_err(PtyError::from)?;

        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }

        if let Some(dir) = &config.working_dir {
            info!(dir = %dir, "Setting working directory");
            cmd.cwd(dir);
        }

        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        if let Ok(home) = std::env::var("HOME") {
            cmd.env("HOME", home);
        }
        if let Ok(user) = std::env::var("USER") {
            cmd.env("USER", user);
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        info!(command = %config.command, args = ?config.args, "Spawning agent");

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", config.command, e);
            PtyError::CreateFailed(e.to_string())
        })?;

        let pid = child.process_id();
        info!(?pid, "Agent process started");

        let state = PtyState {
            running: true,
            pid,
            command: config.command.clone(),
            args: config.args.clone(),
            rows: config.rows,
            cols: config.cols,
        };

        let parser: SharedParser = Arc::new(Mutex::new(vt100::Parser::new(
            config.rows,
            config.cols,
            0,
        )));
        let (output_tx, _) = broadcast::channel(1024);
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (exited_tx, exited_rx) = watch::channel(false);

        let mut actor = Self {
            master: pair.master,
            writer: None,
            child,
            state,
            parser: parser.clone(),
            receiver: msg_rx,
        };

        let output_tx_clone = output_tx.clone();
        let reader_parser = parser.clone();
        let mut reader = actor
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")
            .map_err(PtyError::from)?;

        // Blocking reader: every chunk is rendered before it is broadcast
        std::thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        info!("PTY EOF detected - agent process has exited");
                        break;
                    }
                    Ok(n) => {
                        lock_parser(&reader_parser).process(&buffer[..n]);
                        let output = PtyOutput {
                            data: buffer[..n].to_vec(),
                            timestamp: chrono::Utc::now().timestamp_millis(),
                        };
                        let _ = output_tx_clone.send(output);
                    }
                    Err(e) => {
                        // EIO on Linux once the child side closes
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
            let _ = exited_tx.send(true);
            debug!("PTY reader thread exiting");
        });

        tokio::spawn(async move {
            actor.run().await;
        });

        Ok(PtyHandle {
            sender: msg_tx,
            output_tx,
            parser,
            exited: exited_rx,
        })
    }

    async fn run(&mut self) {
        info!(command = %self.state.command, pid = ?self.state.pid, "PTY actor started");

        // Hold the writer from the start so the agent's stdin stays open
        if self.writer.is_none() {
            match self.master.take_writer() {
                Ok(writer) => self.writer = Some(writer),
                Err(e) => error!("Failed to get PTY writer: {}", e),
            }
        }

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PtyMessage::WriteInput { data, respond_to } => {
                    let result = self.handle_write_input(&data);
                    let _ = respond_to.send(result);
                }
                PtyMessage::Resize {
                    rows,
                    cols,
                    respond_to,
                } => {
                    let result = self.handle_resize(rows, cols);
                    let _ = respond_to.send(result);
                }
                PtyMessage::GetState { respond_to } => {
                    let _ = respond_to.send(self.state.clone());
                }
                PtyMessage::Kill { signal, respond_to } => {
                    let result = self.handle_kill(signal);
                    let is_ok = result.is_ok();
                    let _ = respond_to.send(result);
                    if is_ok {
                        break;
                    }
                }
            }

            if let Ok(Some(status)) = self.child.try_wait() {
                info!(?status, "Agent process exited");
                self.state.running = false;
                self.state.pid = None;
                break;
            }
        }

        info!("PTY actor shutting down");
    }

    fn handle_write_input(&mut self, data: &[u8]) -> Result<usize, PtyError> {
        if !self.state.running {
            return Err(PtyError::ProcessExited);
        }
        if self.writer.is_none() {
            self.writer = Some(
                self.master
                    .take_writer()
                    .map_err(|e| PtyError::WriteFailed(e.to_string()))?,
            );
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PtyError::WriteFailed("No PTY writer available".into()))?;

        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;

        Ok(data.len())
    }

    fn handle_resize(&mut self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        lock_parser(&self.parser).screen_mut().set_size(rows, cols);
        self.state.rows = rows;
        self.state.cols = cols;
        Ok(())
    }

    fn handle_kill(&mut self, signal: Option<String>) -> Result<(), PtyError> {
        match signal.as_deref() {
            Some("SIGTERM") | None => {
                #[cfg(unix)]
                {
                    use nix::sys::signal::{Signal, kill};
                    use nix::unistd::Pid;

                    if let Some(pid) = self.state.pid {
                        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                            .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                    }
                }
                #[cfg(not(unix))]
                {
                    self.child
                        .kill()
                        .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                }
            }
            Some("SIGKILL") => {
                self.child
                    .kill()
                    .map_err(|e| PtyError::KillFailed(e.to_string()))?;
            }
            Some("SIGINT") => {
                // Ctrl+C through the terminal, the agent keeps running
                self.handle_write_input(b"\x03")?;
                return Ok(());
            }
            Some(sig) => {
                warn!(signal = sig, "Refusing unsupported signal");
                return Err(PtyError::KillFailed(format!("Unsupported signal: {}", sig)));
            }
        }

        self.state.running = false;
        Ok(())
    }
}
