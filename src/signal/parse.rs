//! Parsing of the model's `VALID:` / `REASON:` / `FORMAT:` response layout.

use tracing::warn;

use super::range::normalize_entry_lines;
use super::types::{FORMAT_FAILED_REASON, ValidationResult};

const VALID_MARKER: &str = "VALID:";
const REASON_MARKER: &str = "REASON:";
const FORMAT_MARKER: &str = "FORMAT:";

/// Parse a raw model response into a validation result.
///
/// Entry ranges in the format block are normalized before returning.
pub fn parse_signal_response(raw: &str) -> ValidationResult {
    let lines: Vec<&str> = raw.lines().filter(|line| !is_fence_line(line)).collect();
    if lines.iter().all(|line| line.trim().is_empty()) {
        return ValidationResult::invalid("Empty response from LLM");
    }

    let Some(valid_value) = marker_value(&lines, VALID_MARKER) else {
        warn!(response = %raw, "LLM response has no VALID marker");
        return ValidationResult::invalid("Response missing VALID marker");
    };

    if !is_true_verdict(valid_value) {
        let reason = marker_value(&lines, REASON_MARKER)
            .filter(|r| !r.is_empty())
            .unwrap_or("No reason given");
        return ValidationResult::invalid(reason);
    }

    match format_block(&lines) {
        Some(block) => ValidationResult::valid(normalize_entry_lines(&block)),
        None => ValidationResult::invalid(FORMAT_FAILED_REASON),
    }
}

/// Text after `marker` on `line`, tolerating markdown emphasis or a heading
/// around the marker (`**VALID:** true`, `## FORMAT:`).
fn after_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.trim_start()
        .trim_start_matches(['*', '_', '#'])
        .trim_start()
        .strip_prefix(marker)
        .map(|rest| rest.trim_start_matches(['*', '_']))
}

/// Trimmed value of the first line starting with `marker`.
fn marker_value<'a>(lines: &[&'a str], marker: &str) -> Option<&'a str> {
    lines
        .iter()
        .find_map(|&line| after_marker(line, marker))
        .map(str::trim)
}

/// Whether a `VALID:` value's first word is `true`, ignoring case, markdown
/// and punctuation: `true.`, `**True**`, `true (buy now)`.
fn is_true_verdict(value: &str) -> bool {
    let word = value.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let end = word
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(word.len());
    word[..end].eq_ignore_ascii_case("true")
}

/// Everything after the `FORMAT:` marker, or `None` if absent, empty, or `None`.
fn format_block(lines: &[&str]) -> Option<String> {
    let (marker_idx, inline) = lines
        .iter()
        .enumerate()
        .find_map(|(idx, &line)| after_marker(line, FORMAT_MARKER).map(|rest| (idx, rest.trim())))?;

    let mut block: Vec<&str> = Vec::with_capacity(lines.len() - marker_idx);
    if !inline.is_empty() {
        block.push(inline);
    }
    block.extend(lines[marker_idx + 1..].iter().map(|line| line.trim_end()));

    let block = block.join("\n");
    let block = block.trim();
    if block.is_empty() || block.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(block.to_string())
}

/// A markdown fence line: triple backticks plus an optional info string.
fn is_fence_line(line: &str) -> bool {
    line.trim()
        .strip_prefix("```")
        .is_some_and(|info| !info.contains('`') && !info.trim().contains(char::is_whitespace))
}
