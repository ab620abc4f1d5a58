use pty_manager::PtyConfig;
use screen_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::rest_agent::RestAgentConfig;

// =============================================================================
// Unified config (figment-deserialized from defaults / agentapi.toml / env vars)
// =============================================================================
//
//   agentapi.toml:   [tracker]
//                    stability_window_ms = 3000
//
//   env var:         AGENTAPI_TRACKER__STABILITY_WINDOW_MS=3000
//
// CLI flags are applied on top of the extracted config.

pub const DEFAULT_CONFIG_FILE: &str = "agentapi.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub terminal: TerminalFileConfig,
    #[serde(default)]
    pub tracker: TrackerFileConfig,
    #[serde(default)]
    pub events: EventsFileConfig,
    #[serde(default)]
    pub opencode: OpencodeFileConfig,
}

/// `[server]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[terminal]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalFileConfig {
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
}

impl Default for TerminalFileConfig {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
        }
    }
}

/// `[tracker]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerFileConfig {
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,
}

impl Default for TrackerFileConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: default_snapshot_interval_ms(),
            stability_window_ms: default_stability_window_ms(),
        }
    }
}

/// `[events]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsFileConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventsFileConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// `[opencode]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpencodeFileConfig {
    #[serde(default = "default_opencode_url")]
    pub base_url: String,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OpencodeFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_opencode_url(),
            ready_timeout_secs: default_ready_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3284
}
fn default_rows() -> u16 {
    1000
}
fn default_cols() -> u16 {
    80
}
fn default_snapshot_interval_ms() -> u64 {
    25
}
fn default_stability_window_ms() -> u64 {
    2000
}
fn default_queue_capacity() -> usize {
    screen_tracker::emitter::DEFAULT_QUEUE_CAPACITY
}
fn default_opencode_url() -> String {
    "http://127.0.0.1:4096".to_string()
}
fn default_ready_timeout_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    300
}

/// Build a figment that layers: defaults → config file → AGENTAPI_* env vars.
///
/// Without an explicit path, `agentapi.toml` in the working directory is read
/// if present.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("AGENTAPI_").split("__"))
}

/// Values given on the command line, which beat every other layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
}

impl FileConfig {
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(rows) = overrides.rows {
            self.terminal.rows = rows;
        }
        if let Some(cols) = overrides.cols {
            self.terminal.cols = cols;
        }
    }

    /// Resolve `[server] host`/`port`; host names such as `localhost` are
    /// looked up and the first address wins.
    pub async fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        use anyhow::Context;
        let host = self.server.host.as_str();
        let port = self.server.port;
        tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?
            .next()
            .with_context(|| format!("{} resolved to no addresses", host))
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            snapshot_interval: Duration::from_millis(self.tracker.snapshot_interval_ms.max(1)),
            stability_window: Duration::from_millis(self.tracker.stability_window_ms),
        }
    }

    pub fn pty_config(&self, command: &str, args: &[String]) -> PtyConfig {
        PtyConfig {
            command: command.to_string(),
            args: args.to_vec(),
            rows: self.terminal.rows,
            cols: self.terminal.cols,
            ..Default::default()
        }
    }

    pub fn rest_agent_config(&self) -> RestAgentConfig {
        RestAgentConfig {
            base_url: self.opencode.base_url.clone(),
            request_timeout: Duration::from_secs(self.opencode.request_timeout_secs),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.opencode.ready_timeout_secs)
    }
}
