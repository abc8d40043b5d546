//! Chapter sources
//!
//! The scheduler never reads or writes chapters itself. Everything it needs
//! from a novel store goes through the [`ChapterSource`] trait:
//!
//! - `list_chapters` - table of contents plus the store's current glossary
//! - `get_chapter_translate_task` - source paragraphs and any prior translation
//! - `update_chapter_translation` - persist a finished chapter
//!
//! [`ChapterSources`] holds one implementation per [`SourceKind`] and picks the
//! right one by matching on the task source or upload context.
//!
//! # Usage
//!
//! ```rust,ignore
//! use novel_relay::source::{ChapterSources, LocalVolumeStore};
//!
//! let sources = ChapterSources::new().with_local(Arc::new(LocalVolumeStore::new("volumes")));
//! ```

pub mod local;

pub use local::LocalVolumeStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{BackendId, Glossary, SourceKind, UploadContext};
use crate::workspace::descriptor::TaskSource;

/// Result type for chapter source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by chapter sources
#[derive(Error, Debug)]
pub enum SourceError {
    /// No source registered for this kind
    #[error("No chapter source configured for '{0}'")]
    Unavailable(SourceKind),

    /// Volume or novel does not exist
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    /// Chapter does not exist
    #[error("Chapter not found: {0}")]
    ChapterNotFound(String),

    /// Store rejected or failed the request
    #[error("Chapter source request failed: {0}")]
    Request(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Io(_))
    }
}

/// One entry of a volume's table of contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub chapter_id: String,
    /// Glossary id of the existing translation by the requested backend
    #[serde(default)]
    pub glossary_id: Option<String>,
}

impl TocEntry {
    pub fn is_translated(&self) -> bool {
        self.glossary_id.is_some()
    }
}

/// Table of contents plus the store's current glossary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterToc {
    pub glossary_id: String,
    #[serde(default)]
    pub glossary: Glossary,
    pub toc: Vec<TocEntry>,
}

/// Everything needed to translate one chapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterTranslateTask {
    pub paragraphs: Vec<String>,
    #[serde(default)]
    pub glossary: Glossary,
    pub glossary_id: String,
    #[serde(default)]
    pub old_glossary: Option<Glossary>,
    #[serde(default)]
    pub old_paragraphs: Option<Vec<String>>,
}

/// A finished chapter to persist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterTranslationUpdate {
    pub glossary_id: String,
    /// Only local volumes keep the glossary alongside the translation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary: Option<Glossary>,
    pub paragraphs: Vec<String>,
}

/// A novel store the scheduler can read chapters from and write results to
#[async_trait]
pub trait ChapterSource: Send + Sync {
    /// Table of contents of a volume/novel as seen by `backend`
    async fn list_chapters(&self, source: &TaskSource, backend: BackendId)
        -> SourceResult<ChapterToc>;

    /// Source text and prior translation of one chapter
    async fn get_chapter_translate_task(
        &self,
        ctx: &UploadContext,
        backend: BackendId,
    ) -> SourceResult<ChapterTranslateTask>;

    /// Persist a translated chapter
    async fn update_chapter_translation(
        &self,
        ctx: &UploadContext,
        backend: BackendId,
        update: ChapterTranslationUpdate,
    ) -> SourceResult<()>;
}

/// One optional chapter source per source kind
#[derive(Clone, Default)]
pub struct ChapterSources {
    local: Option<Arc<dyn ChapterSource>>,
    web: Option<Arc<dyn ChapterSource>>,
    wenku: Option<Arc<dyn ChapterSource>>,
}

impl ChapterSources {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local volume source
    pub fn with_local(mut self, source: Arc<dyn ChapterSource>) -> Self {
        self.local = Some(source);
        self
    }

    /// Set the web novel source
    pub fn with_web(mut self, source: Arc<dyn ChapterSource>) -> Self {
        self.web = Some(source);
        self
    }

    /// Set the wenku novel source
    pub fn with_wenku(mut self, source: Arc<dyn ChapterSource>) -> Self {
        self.wenku = Some(source);
        self
    }

    /// Source registered for `kind`
    pub fn get(&self, kind: SourceKind) -> SourceResult<Arc<dyn ChapterSource>> {
        let source = match kind {
            SourceKind::Local => &self.local,
            SourceKind::Web => &self.web,
            SourceKind::Wenku => &self.wenku,
        };
        source.clone().ok_or(SourceError::Unavailable(kind))
    }

    pub async fn list_chapters(
        &self,
        source: &TaskSource,
        backend: BackendId,
    ) -> SourceResult<ChapterToc> {
        self.get(source.kind())?
            .list_chapters(source, backend)
            .await
    }

    pub async fn get_chapter_translate_task(
        &self,
        ctx: &UploadContext,
        backend: BackendId,
    ) -> SourceResult<ChapterTranslateTask> {
        self.get(ctx.kind())?
            .get_chapter_translate_task(ctx, backend)
            .await
    }

    pub async fn update_chapter_translation(
        &self,
        ctx: &UploadContext,
        backend: BackendId,
        update: ChapterTranslationUpdate,
    ) -> SourceResult<()> {
        self.get(ctx.kind())?
            .update_chapter_translation(ctx, backend, update)
            .await
    }
}
