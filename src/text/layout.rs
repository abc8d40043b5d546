//! Blank-line layout capture and restoration
//!
//! Translators only send effective (non-blank) lines to the model, joined by
//! single newlines. The blank-line spacing of the source is recorded here and
//! mechanically reinserted into the model output afterwards.
//!
//! The effective-line count of the normalized output is the only structural
//! check performed on a response: if it differs from the source, the response
//! is rejected as a line mismatch and the caller retries.

use regex::Regex;
use std::sync::OnceLock;

/// Marker some chat templates leak at the end of a turn
const END_OF_TURN_MARKER: &str = "<|im_end|>";

/// Blank-line layout of a line array
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLayout {
    /// Non-blank lines in source order
    pub effective_lines: Vec<String>,

    /// `blank_counts[i]` blank lines precede `effective_lines[i]`;
    /// the last element counts trailing blank lines.
    pub blank_counts: Vec<usize>,
}

impl SourceLayout {
    /// Number of blank lines after the last effective line
    pub fn trailing_blanks(&self) -> usize {
        self.blank_counts.last().copied().unwrap_or(0)
    }

    /// Total number of lines the layout describes
    pub fn total_lines(&self) -> usize {
        self.effective_lines.len() + self.blank_counts.iter().sum::<usize>()
    }
}

/// A line is blank when it is empty after trimming whitespace
pub fn is_blank_line(line: &str) -> bool {
    line.trim().is_empty()
}

/// Record the blank-line layout of `source`
pub fn capture_layout<S: AsRef<str>>(source: &[S]) -> SourceLayout {
    let mut effective_lines = Vec::new();
    let mut blank_counts = vec![0usize];

    for line in source {
        let line = line.as_ref();
        if is_blank_line(line) {
            if let Some(last) = blank_counts.last_mut() {
                *last += 1;
            }
        } else {
            effective_lines.push(line.to_string());
            blank_counts.push(0);
        }
    }

    SourceLayout {
        effective_lines,
        blank_counts,
    }
}

/// Rebuild the source layout around a raw model response
///
/// Returns `None` on a line mismatch.
pub fn restore_layout(layout: &SourceLayout, raw: &str) -> Option<Vec<String>> {
    let translated: Vec<String> = split_translated_lines(raw)
        .into_iter()
        .filter(|line| !is_blank_line(line))
        .collect();

    if translated.len() != layout.effective_lines.len() {
        return None;
    }

    let mut aligned = Vec::with_capacity(layout.total_lines());
    for (line, blanks) in translated.into_iter().zip(layout.blank_counts.iter()) {
        aligned.extend(std::iter::repeat(String::new()).take(*blanks));
        aligned.push(line);
    }
    aligned.extend(std::iter::repeat(String::new()).take(layout.trailing_blanks()));

    Some(aligned)
}

/// First non-blank line of a normalized response, or an empty string
pub fn pick_single_line_translation(raw: &str) -> String {
    split_translated_lines(raw)
        .into_iter()
        .find(|line| !is_blank_line(line))
        .unwrap_or_default()
}

/// Normalize a response and split it into right-trimmed lines
pub fn split_translated_lines(raw: &str) -> Vec<String> {
    normalize_translated_text(raw)
        .split('\n')
        .map(|line| line.trim_end().to_string())
        .collect()
}

/// Remove reasoning markup and leading boilerplate from a response
pub fn normalize_translated_text(raw: &str) -> String {
    trim_leading_noise(&strip_think_tags(raw))
}

/// Remove `<think>` blocks and the end-of-turn marker
///
/// An unterminated `<think>` block swallows the rest of the text.
pub fn strip_think_tags(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace(END_OF_TURN_MARKER, "").replace("\r\n", "\n");

    let mut cleaned = think_closed_re().replace_all(&text, "").into_owned();
    if cleaned == text {
        cleaned = think_open_re().replace_all(&text, "").into_owned();
    }

    think_tag_re()
        .replace_all(&cleaned, "")
        .trim()
        .to_string()
}

/// Drop "translation follows" lines and anything before the first CJK line
pub fn trim_leading_noise(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let skipped = lines
        .iter()
        .take_while(|line| leading_comment_re().is_match(line))
        .count();
    let lines = &lines[skipped..];

    match lines.iter().position(|line| cjk_re().is_match(line)) {
        Some(first) if first > 0 => lines[first..].join("\n"),
        _ => lines.join("\n"),
    }
}

fn think_closed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<think>.*?</think>").expect("Invalid regex pattern"))
}

fn think_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<think>.*?(?:</think>|\z)").expect("Invalid regex pattern")
    })
}

fn think_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</?think>").expect("Invalid regex pattern"))
}

fn cjk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\x{3400}-\x{4DBF}\x{4E00}-\x{9FFF}\x{F900}-\x{FAFF}]")
            .expect("Invalid regex pattern")
    })
}

fn leading_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:翻译(?:如下|结果)?|译文(?:如下)?|以下是译文|以下翻译|输出|答案)(?:[:：]\s*)?$",
        )
        .expect("Invalid regex pattern")
    })
}
