//! Task population and lazy loading
//!
//! [`build_tasks`] turns a table of contents into pending tasks under a job's
//! scope. [`load_task`] later fetches one chapter, filters it and cuts it
//! into segments; it runs outside the registry lock on a task the registry
//! has marked `loading`.

use crate::models::{BackendId, Segment, Task, TaskState, UploadContext};
use crate::source::{ChapterSources, ChapterToc, TocEntry};
use crate::text::{filter_empty_lines, LengthSegmentor};

use super::aggregate::upload_task;
use super::descriptor::{JobDescriptor, TaskParams, TaskSource, TranslateLevel};

/// Chapters of `toc` a job with `params` should translate
///
/// The range applies to table-of-contents order; the selected ids are then
/// sorted lexicographically.
pub fn select_chapters<'a>(toc: &'a ChapterToc, params: &TaskParams) -> Vec<&'a TocEntry> {
    let end = params.end_index.min(toc.toc.len());
    let start = params.start_index.min(end);

    let mut chapters: Vec<&TocEntry> = toc.toc[start..end]
        .iter()
        .filter(|entry| match params.level {
            TranslateLevel::Normal => !entry.is_translated(),
            TranslateLevel::Expire => entry
                .glossary_id
                .as_deref()
                .map_or(true, |id| id != toc.glossary_id),
            TranslateLevel::All | TranslateLevel::Sync => true,
        })
        .collect();

    chapters.sort_by(|a, b| a.chapter_id.cmp(&b.chapter_id));
    chapters
}

fn upload_context(source: &TaskSource, chapter_id: &str, toc: &ChapterToc, sync: bool) -> UploadContext {
    let chapter_id = chapter_id.to_string();
    let glossary_id = toc.glossary_id.clone();
    match source {
        TaskSource::Local { volume_id } => UploadContext::Local {
            volume_id: volume_id.clone(),
            chapter_id,
            glossary_id,
            glossary: toc.glossary.clone(),
        },
        TaskSource::Web {
            provider_id,
            novel_id,
        } => UploadContext::Web {
            provider_id: provider_id.clone(),
            novel_id: novel_id.clone(),
            chapter_id,
            glossary_id,
            sync_from_provider: sync,
        },
        TaskSource::Wenku {
            novel_id,
            volume_id,
        } => UploadContext::Wenku {
            novel_id: novel_id.clone(),
            volume_id: volume_id.clone(),
            chapter_id,
            glossary_id,
        },
    }
}

/// Pending tasks for every selected chapter
pub fn build_tasks(descriptor: &JobDescriptor, toc: &ChapterToc) -> Vec<Task> {
    let level = descriptor.params.level;
    let force = level == TranslateLevel::All;
    let sync = level == TranslateLevel::Sync;
    let prefix = descriptor.source.label_prefix();

    select_chapters(toc, &descriptor.params)
        .into_iter()
        .map(|entry| {
            Task::new(
                entry.chapter_id.clone(),
                format!("{prefix}/{}", entry.chapter_id),
                toc.glossary.clone(),
                force,
                upload_context(&descriptor.source, &entry.chapter_id, toc, sync),
            )
        })
        .collect()
}

/// Cut a loaded task's filtered paragraphs into pending segments
pub fn build_segments(task: &mut Task, segmentor: &LengthSegmentor) {
    task.segs = segmentor
        .segment(&task.filtered_paragraphs, task.old_paragraphs.as_deref())
        .into_iter()
        .map(|group| Segment::new(group.source))
        .collect();
}

/// Fetch a chapter and cut it with `segmentor`
///
/// Leaves the task `processing`, or terminal when it has nothing to
/// translate (an empty translation is uploaded so the chapter still counts as
/// translated) or when loading fails.
pub async fn load_task(
    sources: &ChapterSources,
    backend: BackendId,
    segmentor: &LengthSegmentor,
    task: &mut Task,
) {
    if !task.segs.is_empty() {
        return;
    }
    task.state = TaskState::Loading;

    let chapter = match sources
        .get_chapter_translate_task(&task.upload_context, backend)
        .await
    {
        Ok(chapter) => chapter,
        Err(e) => {
            tracing::error!(task = %task.label, error = %e, "Failed to load chapter");
            task.state = TaskState::Failed;
            return;
        }
    };

    task.filtered_paragraphs = filter_empty_lines(&chapter.paragraphs);
    task.paragraphs = chapter.paragraphs;
    task.glossary = chapter.glossary;
    task.old_glossary = chapter.old_glossary;
    task.old_paragraphs = chapter.old_paragraphs.map(|p| filter_empty_lines(&p));
    task.upload_context.set_glossary_id(chapter.glossary_id);
    build_segments(task, segmentor);

    if !task.segs.is_empty() {
        tracing::debug!(task = %task.label, segments = task.segs.len(), "Task loaded");
        task.state = TaskState::Processing;
        return;
    }

    tracing::info!(task = %task.label, "No translatable lines, uploading empty translation");
    task.state = match upload_task(sources, backend, task).await {
        Ok(()) => TaskState::Success,
        Err(e) => {
            tracing::error!(task = %task.label, error = %e, "Upload failed");
            TaskState::Failed
        }
    };
}
