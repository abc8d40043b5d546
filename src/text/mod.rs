//! Pure text algorithms shared by the scheduler and the translators
//!
//! Nothing in this module performs I/O or holds state:
//!
//! - [`segmentor`] - Splits a chapter's lines into length-bounded segments
//! - [`layout`] - Captures and restores blank-line layout around model calls
//! - [`paragraph`] - Chapter-level blank/placeholder filtering and its inverse

pub mod layout;
pub mod paragraph;
pub mod segmentor;

use thiserror::Error;

pub use layout::{capture_layout, is_blank_line, restore_layout, SourceLayout};
pub use paragraph::{filter_empty_lines, is_placeholder_line, recover_empty_lines};
pub use segmentor::{LengthSegmentor, SegmentGroup};

/// Errors raised while re-aligning translated text with its source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    /// Translated line count differs from the number of translatable source lines
    #[error("Translated line count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}
