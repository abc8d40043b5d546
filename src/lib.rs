//! novel-relay - Cooperative segment-level novel translation
//!
//! Splits novel chapters into segments, hands them to a pool of LLM-backed
//! workers and reassembles the translations with the original layout intact.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`text`] - Layout capture/restore, paragraph filtering and segmentation
//! - [`translator`] - OpenAI-compatible backends and the segment translator
//! - [`source`] - Chapter stores (local volumes and remote novel services)
//! - [`workspace`] - Job registry, claim protocol and worker loop
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use novel_relay::config::Config;
//! use novel_relay::source::{ChapterSources, LocalVolumeStore};
//! use novel_relay::workspace::WorkspaceRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = LocalVolumeStore::new(&config.workspace.volumes_dir);
//!     let registry = WorkspaceRegistry::new(ChapterSources::new().with_local(Arc::new(store)));
//!     registry.add_job("sakura/local/vol".parse()?, "vol").await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod source;
pub mod text;
pub mod translator;
pub mod utils;
pub mod workspace;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, RelayErrorTrait, Result};
    pub use crate::models::{BackendId, Glossary, Job, JobStats, SegRequest, SegResult};
    pub use crate::source::{ChapterSource, ChapterSources, LocalVolumeStore};
    pub use crate::translator::{ChatBackend, OpenAiBackend, SegmentTranslator};
    pub use crate::workspace::{JobDescriptor, Worker, WorkspaceRegistry};
}

// Direct re-exports for convenience
pub use models::{BackendId, Glossary, JobState, SegmentState, TaskState};
