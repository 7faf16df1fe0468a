//! Price-range normalization for formatted signals.
//!
//! The model is asked to put the lower bound first but does not always do
//! so. Every `Entry` line holding a hyphen-delimited pair of numbers is
//! rewritten deterministically as `prefix: low - high`.

use std::sync::LazyLock;

use regex::Regex;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+(?:\.\d+)?|[+-]?\.\d+").expect("valid number regex"));

/// Field label that marks an entry line.
const ENTRY_LABEL: &str = "Entry";

/// A numeric token kept together with its original text.
#[derive(Debug, Clone, PartialEq)]
struct Bound<'a> {
    text: &'a str,
    value: f64,
}

/// Two numeric bounds parsed from free text.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRange<'a> {
    low: Bound<'a>,
    high: Bound<'a>,
}

impl<'a> PriceRange<'a> {
    /// Parse a hyphen-delimited range such as `2934.88 - 2930.88`.
    ///
    /// Returns `None` unless exactly two numbers are found and a hyphen sits
    /// between them.
    pub fn parse(value: &'a str) -> Option<Self> {
        let bounds = scan_numbers(value);
        let [first, second] = bounds.as_slice() else {
            return None;
        };

        // "5 -3" scans as two numbers but has no delimiter between them.
        if !value[first.end..second.start].contains('-') {
            return None;
        }

        let (a, b) = (first.bound(), second.bound());
        let (low, high) = if b.value < a.value { (b, a) } else { (a, b) };
        Some(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low.value
    }

    pub fn high(&self) -> f64 {
        self.high.value
    }

    /// Render as `low - high` using the original number text.
    pub fn render(&self) -> String {
        format!("{} - {}", self.low.text, self.high.text)
    }
}

/// A number located in the scanned text.
struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
    value: f64,
}

impl<'a> Token<'a> {
    fn bound(&self) -> Bound<'a> {
        Bound {
            text: self.text,
            value: self.value,
        }
    }
}

/// Scan decimal numbers out of `value`.
///
/// A leading sign only belongs to the number at the start of the text or
/// after whitespace; elsewhere (`2934.88-2930.88`) it is the range delimiter.
fn scan_numbers(value: &str) -> Vec<Token<'_>> {
    NUMBER
        .find_iter(value)
        .filter_map(|m| {
            let mut start = m.start();
            let mut text = m.as_str();
            if text.starts_with(['-', '+']) {
                let preceded_by_space = value[..start]
                    .chars()
                    .next_back()
                    .is_none_or(char::is_whitespace);
                if !preceded_by_space {
                    start += 1;
                    text = &text[1..];
                }
            }
            let parsed: f64 = text.parse().ok()?;
            Some(Token {
                text,
                start,
                end: m.end(),
                value: parsed,
            })
        })
        .collect()
}

/// Rewrite a single line if it is an entry range, otherwise return it as is.
pub fn normalize_entry_line(line: &str) -> String {
    let Some((label, value)) = line.split_once(':') else {
        return line.to_string();
    };
    if !label.trim_start().starts_with(ENTRY_LABEL) {
        return line.to_string();
    }

    match PriceRange::parse(value.trim()) {
        Some(range) => format!("{label}: {}", range.render()),
        None => line.to_string(),
    }
}

/// Normalize every entry range in a multi-line formatted block.
pub fn normalize_entry_lines(block: &str) -> String {
    block
        .split('\n')
        .map(normalize_entry_line)
        .collect::<Vec<_>>()
        .join("\n")
}
