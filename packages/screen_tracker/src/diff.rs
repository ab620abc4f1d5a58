//! Locating a turn's output on the screen.
//!
//! The agent's terminal is append-only in the common case: whatever was on
//! screen when the user's keystrokes were sent is still there, and the
//! response grows below it. The diff region is whatever lies beyond that
//! baseline.

/// Where the current turn's output sits relative to the baseline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffRegion<'a> {
    /// The baseline is still on screen; this is the text after it.
    Suffix(&'a str),
    /// The baseline is gone (scrolled off or redrawn); this is the whole
    /// current screen.
    Redrawn(&'a str),
}

impl<'a> DiffRegion<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            DiffRegion::Suffix(text) | DiffRegion::Redrawn(text) => text,
        }
    }
}

/// Compute the part of `current` that extends beyond `baseline`.
pub fn diff_region<'a>(baseline: &str, current: &'a str) -> DiffRegion<'a> {
    if let Some(rest) = current.strip_prefix(baseline) {
        return DiffRegion::Suffix(rest);
    }

    // Line-wise: emulators trim trailing blanks per row, and the last
    // baseline row is usually a prompt that the echo has since extended.
    let mut base_lines: Vec<&str> = baseline.lines().map(str::trim_end).collect();
    while base_lines.last().is_some_and(|l| l.is_empty()) {
        base_lines.pop();
    }
    if base_lines.is_empty() {
        return DiffRegion::Suffix(current);
    }

    let mut offset = 0usize;
    let mut cur_lines = current.split_inclusive('\n');
    let last = base_lines.len() - 1;
    for (i, base) in base_lines.iter().enumerate() {
        let Some(line) = cur_lines.next() else {
            return DiffRegion::Redrawn(current);
        };
        let row = line.trim_end_matches(['\n', '\r']).trim_end();
        if i < last {
            if row != *base {
                return DiffRegion::Redrawn(current);
            }
            offset += line.len();
        } else if row.starts_with(base) {
            // Resume right after the baseline text on the shared row
            return DiffRegion::Suffix(&current[offset + base.len()..]);
        } else {
            return DiffRegion::Redrawn(current);
        }
    }
    DiffRegion::Redrawn(current)
}
