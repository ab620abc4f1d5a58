//! Supported agents and how each one is typed into and read back from.

use screen_tracker::{InputPart, MessageFormatter, format};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const PASTE_START: &str = "\x1b[200~";
const PASTE_END: &str = "\x1b[201~";

/// Time for a TUI to absorb a bracketed paste before the submit key.
const PASTE_SETTLE: Duration = Duration::from_millis(150);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Goose,
    Aider,
    Codex,
    Gemini,
    /// Driven over its REST API instead of the terminal
    Opencode,
    /// Any other line-oriented program
    Custom,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Goose => "goose",
            AgentType::Aider => "aider",
            AgentType::Codex => "codex",
            AgentType::Gemini => "gemini",
            AgentType::Opencode => "opencode",
            AgentType::Custom => "custom",
        }
    }

    /// Guess the agent from the program being launched (`/usr/bin/claude`
    /// → `Claude`). Unknown programs are `Custom`.
    pub fn from_command(command: &str) -> Self {
        let name = Path::new(command)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(command)
            .to_ascii_lowercase();
        match name.as_str() {
            "claude" => AgentType::Claude,
            "goose" => AgentType::Goose,
            "aider" => AgentType::Aider,
            "codex" => AgentType::Codex,
            "gemini" => AgentType::Gemini,
            "opencode" => AgentType::Opencode,
            _ => AgentType::Custom,
        }
    }

    /// Whether this agent is reached over HTTP rather than a terminal.
    pub fn is_rest(&self) -> bool {
        matches!(self, AgentType::Opencode)
    }

    pub fn formatter(&self) -> Arc<dyn MessageFormatter> {
        match self {
            AgentType::Claude | AgentType::Codex | AgentType::Gemini => {
                Arc::new(TuiFormatter::full_screen())
            }
            AgentType::Goose | AgentType::Aider | AgentType::Opencode | AgentType::Custom => {
                Arc::new(TuiFormatter::line_oriented())
            }
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keystroke and chrome rules for terminal agents.
#[derive(Clone, Copy, Debug)]
pub struct TuiFormatter {
    /// Paste even single-line messages
    always_paste: bool,
    /// Strip a boxed input area and the shortcut footer
    boxed_input: bool,
}

impl TuiFormatter {
    /// Full-screen TUIs with a framed input box (Claude Code, Codex, Gemini).
    pub fn full_screen() -> Self {
        Self {
            always_paste: true,
            boxed_input: true,
        }
    }

    /// REPL-style agents that read one line per submit.
    pub fn line_oriented() -> Self {
        Self {
            always_paste: false,
            boxed_input: false,
        }
    }
}

impl MessageFormatter for TuiFormatter {
    fn format_input(&self, message: &str) -> Vec<InputPart> {
        let text = message.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if self.always_paste || text.contains('\n') {
            vec![
                InputPart::text(format!("{}{}{}", PASTE_START, text, PASTE_END))
                    .with_settle(PASTE_SETTLE),
                InputPart::text("\r"),
            ]
        } else {
            vec![InputPart::text(format!("{}\r", text))]
        }
    }

    fn is_trailing_chrome(&self, line: &str) -> bool {
        if format::is_separator_line(line) {
            return true;
        }
        self.boxed_input && (is_box_frame_line(line) || is_shortcut_footer(line))
    }
}

/// Top, bottom or side rows of a rounded input box.
fn is_box_frame_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('╭')
        || trimmed.starts_with('╰')
        || (trimmed.starts_with('│') && trimmed.ends_with('│'))
}

fn is_shortcut_footer(line: &str) -> bool {
    line.trim_start().starts_with("? for shortcuts")
}
