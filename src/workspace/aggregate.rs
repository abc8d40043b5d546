//! Reassembly and upload of finished chapters

use crate::models::{BackendId, Task, UploadContext};
use crate::source::{ChapterSources, ChapterTranslationUpdate};
use crate::text::{recover_empty_lines, AlignmentError};

use super::WorkspaceResult;

/// Full translated paragraph array of a task
///
/// Segment outputs are concatenated in order and merged back into the
/// unfiltered source paragraphs.
pub fn assemble(task: &Task) -> Result<Vec<String>, AlignmentError> {
    let translated: Vec<String> = task.segs.iter().flat_map(|s| s.dst.iter().cloned()).collect();
    recover_empty_lines(&task.paragraphs, &translated)
}

/// Upload a task's translation through its chapter source
pub async fn upload_task(
    sources: &ChapterSources,
    backend: BackendId,
    task: &Task,
) -> WorkspaceResult<()> {
    let paragraphs = assemble(task)?;
    let glossary = match &task.upload_context {
        UploadContext::Local { glossary, .. } => Some(glossary.clone()),
        UploadContext::Web { .. } | UploadContext::Wenku { .. } => None,
    };

    let update = ChapterTranslationUpdate {
        glossary_id: task.upload_context.glossary_id().to_string(),
        glossary,
        paragraphs,
    };
    sources
        .update_chapter_translation(&task.upload_context, backend, update)
        .await?;

    tracing::info!(task = %task.label, backend = %backend, "Uploaded chapter translation");
    Ok(())
}
