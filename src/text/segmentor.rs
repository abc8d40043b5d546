//! Length-bounded segmentation
//!
//! Splits a chapter's filtered lines into groups small enough for a single
//! model request. Lines are never split; a line longer than the bound forms a
//! group of its own. When a prior translation of the same length is
//! available, each group carries the matching slice of it.

use serde::{Deserialize, Serialize};

/// One segment's worth of source lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentGroup {
    /// Source lines in this group
    pub source: Vec<String>,

    /// Matching lines of the prior translation, if one was supplied
    pub prior: Option<Vec<String>>,
}

/// Segmentor bounded by character length and optionally by line count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthSegmentor {
    /// Maximum summed character count of a group
    pub max_length: usize,

    /// Maximum number of lines in a group
    pub max_lines: Option<usize>,
}

impl LengthSegmentor {
    /// Create a segmentor bounded by length only
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            max_lines: None,
        }
    }

    /// Bound groups by line count as well
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = Some(max_lines);
        self
    }

    /// Split `source` into groups
    ///
    /// `prior` is attached only when it has exactly as many lines as `source`.
    pub fn segment<S: AsRef<str>>(
        &self,
        source: &[S],
        prior: Option<&[String]>,
    ) -> Vec<SegmentGroup> {
        let prior = prior.filter(|p| p.len() == source.len());
        let max_lines = self.max_lines.unwrap_or(usize::MAX).max(1);

        let mut groups = Vec::new();
        let mut start = 0;
        let mut size = 0;

        for (index, line) in source.iter().enumerate() {
            let line_size = line.as_ref().chars().count();
            let count = index - start;
            if count > 0 && (size + line_size > self.max_length || count >= max_lines) {
                groups.push(Self::group(source, prior, start, index));
                start = index;
                size = 0;
            }
            size += line_size;
        }

        if start < source.len() {
            groups.push(Self::group(source, prior, start, source.len()));
        }

        groups
    }

    fn group<S: AsRef<str>>(
        source: &[S],
        prior: Option<&[String]>,
        start: usize,
        end: usize,
    ) -> SegmentGroup {
        SegmentGroup {
            source: source[start..end]
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
            prior: prior.map(|p| p[start..end].to_vec()),
        }
    }
}
