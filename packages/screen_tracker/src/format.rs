//! Message formatting and chrome recognition.
//!
//! A [`MessageFormatter`] knows two agent-specific things: how a logical
//! message becomes literal keystrokes, and which lines of terminal output are
//! decoration rather than conversation. The tracker drives stripping; the
//! formatter supplies the rules.

use crate::types::InputPart;

/// Characters that end a shell-style prompt.
const PROMPT_MARKERS: &[char] = &['>', '$', '#', '%', '❯', '›', '»'];

/// Longest single-word prompt we still treat as chrome (e.g. `user@host:~$`).
const MAX_PROMPT_TOKEN_CHARS: usize = 48;

/// Minimum run length for a line of separators to count as a rule.
const MIN_SEPARATOR_CHARS: usize = 3;

pub trait MessageFormatter: Send + Sync {
    /// Literal writes for a user message, in order.
    fn format_input(&self, message: &str) -> Vec<InputPart>;

    /// Whether a line at the end of agent output is input-box decoration.
    ///
    /// Prompt rows are handled separately by [`strip_chrome`](Self::strip_chrome)
    /// and should not be matched here.
    fn is_trailing_chrome(&self, line: &str) -> bool {
        is_separator_line(line)
    }

    /// Reduce a raw region of screen text to the agent's message.
    ///
    /// `last_user_input` is the literal text of the most recent user message
    /// (empty before the first turn); its terminal echo is removed from the
    /// top of the region. `prompt` is the agent's prompt word as last seen
    /// on screen (see [`trailing_prompt`]). At most one trailing row that is
    /// a bare prompt marker or exactly that prompt is dropped.
    fn strip_chrome(&self, region: &str, last_user_input: &str, prompt: Option<&str>) -> String {
        let lines: Vec<&str> = region.lines().map(str::trim_end).collect();

        let start = echoed_line_count(&lines, last_user_input);
        let mut end = lines.len();
        let mut prompt_dropped = false;
        while end > start {
            let line = lines[end - 1];
            if line.trim().is_empty() || self.is_trailing_chrome(line) {
                end -= 1;
            } else if !prompt_dropped && is_prompt_row(line, prompt) {
                prompt_dropped = true;
                end -= 1;
            } else {
                break;
            }
        }

        let kept = &lines[start..end];
        let first = kept.iter().position(|l| !l.is_empty());
        let last = kept.iter().rposition(|l| !l.is_empty());
        match (first, last) {
            (Some(first), Some(last)) => kept[first..=last].join("\n"),
            _ => String::new(),
        }
    }
}

/// Types the message followed by a carriage return.
///
/// Suits line-oriented REPLs that read one line per submit.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatter;

impl MessageFormatter for PlainFormatter {
    fn format_input(&self, message: &str) -> Vec<InputPart> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        vec![InputPart::text(format!("{}\r", trimmed))]
    }
}

/// A line made only of a single prompt marker (`>`, `$`, `❯`, ...).
pub fn is_prompt_line(line: &str) -> bool {
    let mut chars = line.trim().chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if PROMPT_MARKERS.contains(&c))
}

/// The prompt word on the last non-empty row of `screen`
/// (`user@host:~$ ` → `user@host:~$`).
pub fn trailing_prompt(screen: &str) -> Option<&str> {
    let last = screen.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let head = last.split_whitespace().next()?;
    is_prompt_token(head).then_some(head)
}

fn is_prompt_row(line: &str, prompt: Option<&str>) -> bool {
    is_prompt_line(line) || prompt.is_some_and(|p| line.trim() == p)
}

fn is_prompt_token(token: &str) -> bool {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return false;
    }
    if token.chars().count() > MAX_PROMPT_TOKEN_CHARS {
        return false;
    }
    token.ends_with(PROMPT_MARKERS)
}

/// A line made only of repeated rule characters (`---`, `═══`, `───`).
pub fn is_separator_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.chars().count() < MIN_SEPARATOR_CHARS {
        return false;
    }
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    is_separator_char(first) && chars.all(|c| c == first)
}

fn is_separator_char(c: char) -> bool {
    matches!(c, '-' | '=' | '_' | '~' | '*') || ('\u{2500}'..='\u{257F}').contains(&c)
}

/// Drop a leading prompt word (`prompt> hello` → `hello`).
pub fn strip_prompt_prefix(line: &str) -> &str {
    let trimmed = line.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) if is_prompt_token(head) => rest.trim_start(),
        _ => trimmed,
    }
}

/// How many leading lines of `lines` are the terminal's echo of `user_input`.
///
/// Leading blank lines are always consumed. Echoed lines may carry a prompt
/// prefix, and a long input line may be wrapped over several rows. A partial
/// match that falls apart is rolled back to the last complete input line.
fn echoed_line_count(lines: &[&str], user_input: &str) -> usize {
    let mut idx = lines.iter().take_while(|l| l.trim().is_empty()).count();

    for expected in user_input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let committed = idx;
        let mut remaining = expected;
        loop {
            let Some(line) = lines.get(idx) else {
                return committed;
            };
            let raw = line.trim();
            let shown = strip_prompt_prefix(raw);
            if raw == remaining || shown == remaining {
                idx += 1;
                break;
            }
            if !shown.is_empty() && remaining.starts_with(shown) {
                remaining = remaining[shown.len()..].trim_start();
                idx += 1;
                continue;
            }
            return committed;
        }
    }
    idx
}
