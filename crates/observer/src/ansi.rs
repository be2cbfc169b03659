//! ANSI escape sequence stripping for clean text matching.
//!
//! Interactive CLIs repaint spinners with carriage returns and colour every
//! token, so both escape sequences and overwritten line prefixes are removed
//! before any pattern matching or classification.

use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
          \x1b\[[0-?]*[\x20-/]*[@-~]            # CSI
        | \x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?    # OSC, terminated by BEL or ST
        | \x1b[PX^_][^\x1b]*(?:\x1b\\)?         # DCS, SOS, PM, APC
        | \x1b[()*+][\x20-~]                    # charset designation
        | \x1b[\x20-~]                          # two byte escapes
        | \x1b                                  # dangling ESC
        | \x9b[0-?]*[\x20-/]*[@-~]              # 8-bit CSI
        | [\x00-\x08\x0b\x0c\x0e-\x1a\x1c-\x1f\x7f]
        ",
    )
    .expect("ANSI pattern is valid")
});

/// Remove escape sequences and control bytes, then resolve carriage-return
/// overwrites so each line holds only what a terminal would finally show.
pub fn strip_ansi(input: &str) -> String {
    let without_escapes = ANSI_PATTERN.replace_all(input, "");
    let normalized = without_escapes.replace("\r\n", "\n");

    normalized
        .split('\n')
        .map(|line| match line.rfind('\r') {
            Some(idx) if idx + 1 < line.len() => &line[idx + 1..],
            Some(_) => line.trim_end_matches('\r'),
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The last `max_chars` characters of `text`, always on a char boundary.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Last `count` non-blank lines, oldest first.
pub fn last_non_empty_lines(text: &str, count: usize) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(count)
        .collect();
    lines.reverse();
    lines
}
