//! Chapter-level paragraph filtering
//!
//! Chapter sources hand over raw paragraph arrays that may contain blank
//! lines and image placeholders. Only the remaining lines are segmented and
//! translated; [`recover_empty_lines`] walks the original array to put the
//! skipped lines back.

use super::AlignmentError;

/// Prefix chapter sources use for inline image placeholders
pub const IMAGE_PLACEHOLDER: &str = "<图片>";

/// Remove embedded line breaks from a paragraph
fn strip_line_breaks(line: &str) -> String {
    line.replace(['\r', '\n'], "")
}

/// Whether a paragraph is a placeholder that must be copied through verbatim
pub fn is_placeholder_line(line: &str) -> bool {
    let line = strip_line_breaks(line);
    line.trim().is_empty() || line.starts_with(IMAGE_PLACEHOLDER)
}

/// Keep only translatable paragraphs, with embedded line breaks removed
pub fn filter_empty_lines<S: AsRef<str>>(paragraphs: &[S]) -> Vec<String> {
    paragraphs
        .iter()
        .map(|p| strip_line_breaks(p.as_ref()))
        .filter(|line| !(line.trim().is_empty() || line.starts_with(IMAGE_PLACEHOLDER)))
        .collect()
}

/// Merge translated lines back into the original paragraph array
///
/// Placeholder paragraphs are copied verbatim; every other paragraph takes
/// the next translated line.
pub fn recover_empty_lines<S: AsRef<str>>(
    paragraphs: &[S],
    translated: &[String],
) -> Result<Vec<String>, AlignmentError> {
    let expected = paragraphs
        .iter()
        .filter(|p| !is_placeholder_line(p.as_ref()))
        .count();
    if expected != translated.len() {
        return Err(AlignmentError::CountMismatch {
            expected,
            actual: translated.len(),
        });
    }

    let mut next = translated.iter();
    let recovered = paragraphs
        .iter()
        .map(|p| {
            let p = p.as_ref();
            if is_placeholder_line(p) {
                p.to_string()
            } else {
                next.next().cloned().unwrap_or_default()
            }
        })
        .collect();

    Ok(recovered)
}
