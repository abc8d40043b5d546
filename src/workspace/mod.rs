//! Translation workspace
//!
//! Schedules segment-level translation of whole volumes across many workers.
//!
//! - [`descriptor`] - job descriptors, the registry's idempotency keys
//! - [`populate`] - chapter selection and lazy task loading
//! - [`aggregate`] - reassembly and upload of finished chapters
//! - [`registry`] - active jobs and the claim protocol
//! - [`worker`] - the pull loop driving a translator
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = WorkspaceRegistry::new(sources);
//! registry.add_job("sakura/local/vol?level=normal".parse()?, "vol").await;
//!
//! let worker = Worker::new("worker-1", translator, registry.clone());
//! worker.run(CancellationToken::new()).await?;
//! ```

pub mod aggregate;
pub mod descriptor;
pub mod populate;
pub mod registry;
pub mod worker;

pub use descriptor::{JobDescriptor, TaskParams, TaskSource, TranslateLevel};
pub use registry::WorkspaceRegistry;
pub use worker::{Worker, WorkerReport};

use thiserror::Error;

use crate::source::SourceError;
use crate::text::AlignmentError;
use crate::translator::TranslatorError;

/// Result type for workspace operations
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Errors raised by the workspace
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Task {task_index} not found in job {job}")]
    TaskNotFound { job: String, task_index: usize },

    #[error("Segment {seg_index} of task {task_index} not found in job {job}")]
    SegmentNotFound {
        job: String,
        task_index: usize,
        seg_index: usize,
    },

    /// Result posted for a segment nobody holds
    #[error("Segment {seg_index} of task {task_index} in job {job} is not being processed")]
    SegmentNotLeased {
        job: String,
        task_index: usize,
        seg_index: usize,
    },

    #[error("Upload blocked: {0}")]
    UploadBlocked(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Translator(#[from] TranslatorError),
}

impl WorkspaceError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_recoverable(),
            Self::Translator(e) => e.is_recoverable(),
            _ => false,
        }
    }
}
