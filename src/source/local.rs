//! Filesystem-backed local volumes
//!
//! Each volume is a directory under the store root:
//!
//! ```text
//! {root}/{volume_id}/volume.json           glossary + table of contents
//! {root}/{volume_id}/chapters/{id}.json    source paragraphs + translations
//! ```
//!
//! Translations are keyed by backend id, so the same volume can carry a
//! `sakura` and a `gpt` translation side by side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{
    ChapterSource, ChapterToc, ChapterTranslateTask, ChapterTranslationUpdate, SourceError,
    SourceResult, TocEntry,
};
use crate::models::{BackendId, Glossary, UploadContext};
use crate::workspace::descriptor::TaskSource;

const VOLUME_FILE: &str = "volume.json";
const CHAPTER_DIR: &str = "chapters";

/// Volume metadata file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeMetadata {
    pub glossary_id: String,
    #[serde(default)]
    pub glossary: Glossary,
    pub toc: Vec<VolumeTocEntry>,
}

/// TOC entry with the glossary id of each backend's translation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeTocEntry {
    pub chapter_id: String,
    #[serde(default)]
    pub translations: HashMap<BackendId, String>,
}

/// Chapter file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalChapter {
    pub paragraphs: Vec<String>,
    #[serde(default)]
    pub translations: HashMap<BackendId, ChapterTranslation>,
}

/// A stored translation of one chapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterTranslation {
    pub glossary_id: String,
    #[serde(default)]
    pub glossary: Glossary,
    pub paragraphs: Vec<String>,
}

/// Local volume store rooted at a directory
pub struct LocalVolumeStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on volume metadata
    write_lock: Mutex<()>,
}

impl LocalVolumeStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn volume_dir(&self, volume_id: &str) -> SourceResult<PathBuf> {
        check_component(volume_id)?;
        Ok(self.root.join(volume_id))
    }

    fn chapter_path(&self, volume_id: &str, chapter_id: &str) -> SourceResult<PathBuf> {
        check_component(chapter_id)?;
        Ok(self
            .volume_dir(volume_id)?
            .join(CHAPTER_DIR)
            .join(format!("{chapter_id}.json")))
    }

    /// Load a volume's metadata
    pub async fn get_volume(&self, volume_id: &str) -> SourceResult<VolumeMetadata> {
        let path = self.volume_dir(volume_id)?.join(VOLUME_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::VolumeNotFound(volume_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load a chapter
    pub async fn get_chapter(&self, volume_id: &str, chapter_id: &str) -> SourceResult<LocalChapter> {
        let path = self.chapter_path(volume_id, chapter_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SourceError::ChapterNotFound(
                format!("{volume_id}/{chapter_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a volume from raw chapters, replacing any existing metadata
    pub async fn create_volume(
        &self,
        volume_id: &str,
        glossary_id: &str,
        glossary: Glossary,
        chapters: Vec<(String, Vec<String>)>,
    ) -> SourceResult<()> {
        let _guard = self.write_lock.lock().await;
        let dir = self.volume_dir(volume_id)?;
        tokio::fs::create_dir_all(dir.join(CHAPTER_DIR)).await?;

        let mut toc = Vec::with_capacity(chapters.len());
        for (chapter_id, paragraphs) in chapters {
            let chapter = LocalChapter {
                paragraphs,
                translations: HashMap::new(),
            };
            write_json(&self.chapter_path(volume_id, &chapter_id)?, &chapter).await?;
            toc.push(VolumeTocEntry {
                chapter_id,
                translations: HashMap::new(),
            });
        }

        let metadata = VolumeMetadata {
            glossary_id: glossary_id.to_string(),
            glossary,
            toc,
        };
        write_json(&dir.join(VOLUME_FILE), &metadata).await?;

        tracing::info!(volume_id = %volume_id, chapters = metadata.toc.len(), "Local volume created");
        Ok(())
    }
}

/// Reject ids that would escape the store directory
fn check_component(id: &str) -> SourceResult<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(SourceError::Request(format!("Invalid identifier: {id:?}")));
    }
    Ok(())
}

/// Write JSON through a temporary file so readers never see a partial file
async fn write_json<T: Serialize>(path: &Path, value: &T) -> SourceResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn expect_local(ctx: &UploadContext) -> SourceResult<(&str, &str)> {
    match ctx {
        UploadContext::Local {
            volume_id,
            chapter_id,
            ..
        } => Ok((volume_id, chapter_id)),
        other => Err(SourceError::Request(format!(
            "Local store cannot serve {} chapters",
            other.kind()
        ))),
    }
}

#[async_trait]
impl ChapterSource for LocalVolumeStore {
    async fn list_chapters(
        &self,
        source: &TaskSource,
        backend: BackendId,
    ) -> SourceResult<ChapterToc> {
        let TaskSource::Local { volume_id } = source else {
            return Err(SourceError::Request(format!(
                "Local store cannot list {} sources",
                source.kind()
            )));
        };

        let metadata = self.get_volume(volume_id).await?;
        let toc = metadata
            .toc
            .into_iter()
            .map(|entry| TocEntry {
                glossary_id: entry.translations.get(&backend).cloned(),
                chapter_id: entry.chapter_id,
            })
            .collect();

        Ok(ChapterToc {
            glossary_id: metadata.glossary_id,
            glossary: metadata.glossary,
            toc,
        })
    }

    async fn get_chapter_translate_task(
        &self,
        ctx: &UploadContext,
        backend: BackendId,
    ) -> SourceResult<ChapterTranslateTask> {
        let (volume_id, chapter_id) = expect_local(ctx)?;
        let metadata = self.get_volume(volume_id).await?;
        let mut chapter = self.get_chapter(volume_id, chapter_id).await?;
        let old = chapter.translations.remove(&backend);

        tracing::debug!(
            volume_id = %volume_id,
            chapter_id = %chapter_id,
            paragraphs = chapter.paragraphs.len(),
            has_old = old.is_some(),
            "Loaded local chapter"
        );

        Ok(ChapterTranslateTask {
            paragraphs: chapter.paragraphs,
            glossary: metadata.glossary,
            glossary_id: metadata.glossary_id,
            old_glossary: old.as_ref().map(|t| t.glossary.clone()),
            old_paragraphs: old.map(|t| t.paragraphs),
        })
    }

    async fn update_chapter_translation(
        &self,
        ctx: &UploadContext,
        backend: BackendId,
        update: ChapterTranslationUpdate,
    ) -> SourceResult<()> {
        let (volume_id, chapter_id) = expect_local(ctx)?;
        let _guard = self.write_lock.lock().await;

        let mut chapter = self.get_chapter(volume_id, chapter_id).await?;
        chapter.translations.insert(
            backend,
            ChapterTranslation {
                glossary_id: update.glossary_id.clone(),
                glossary: update.glossary.unwrap_or_default(),
                paragraphs: update.paragraphs,
            },
        );
        write_json(&self.chapter_path(volume_id, chapter_id)?, &chapter).await?;

        let mut metadata = self.get_volume(volume_id).await?;
        if let Some(entry) = metadata.toc.iter_mut().find(|e| e.chapter_id == chapter_id) {
            entry.translations.insert(backend, update.glossary_id);
        }
        write_json(&self.volume_dir(volume_id)?.join(VOLUME_FILE), &metadata).await?;

        tracing::info!(
            volume_id = %volume_id,
            chapter_id = %chapter_id,
            backend = %backend,
            "Local chapter translation updated"
        );
        Ok(())
    }
}
