// Core data structures for the translation workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::text::LengthSegmentor;
use crate::workspace::descriptor::JobDescriptor;

/// Term-substitution table handed to the backend (source term -> target term)
pub type Glossary = BTreeMap<String, String>;

/// Translation backend identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Sakura,
    Gpt,
    Murasaki,
}

impl BackendId {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sakura => "sakura",
            Self::Gpt => "gpt",
            Self::Murasaki => "murasaki",
        }
    }

    /// Create from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sakura" => Some(Self::Sakura),
            "gpt" => Some(Self::Gpt),
            "murasaki" => Some(Self::Murasaki),
            _ => None,
        }
    }

    /// Segmentation profile used by the scheduler for this backend
    pub fn segmentor(&self) -> LengthSegmentor {
        match self {
            Self::Sakura => LengthSegmentor::new(500),
            Self::Gpt => LengthSegmentor::new(1500).with_max_lines(30),
            Self::Murasaki => LengthSegmentor::new(1000),
        }
    }

    /// Get all backends
    pub fn all() -> Vec<Self> {
        vec![Self::Sakura, Self::Gpt, Self::Murasaki]
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of chapter source a job reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Web,
    Wenku,
}

impl SourceKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Web => "web",
            Self::Wenku => "wenku",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// States
// ============================================================================

/// Segment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentState {
    Pending,
    Processing,
    Success,
    Failed,
}

impl SegmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Task (chapter) lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Loading,
    Processing,
    Success,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Loading,
    Processing,
    Finished,
}

// ============================================================================
// Upload Context
// ============================================================================

/// Where a finished chapter is persisted, one payload shape per source kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadContext {
    Local {
        volume_id: String,
        chapter_id: String,
        glossary_id: String,
        glossary: Glossary,
    },
    Web {
        provider_id: String,
        novel_id: String,
        chapter_id: String,
        glossary_id: String,
        sync_from_provider: bool,
    },
    Wenku {
        novel_id: String,
        volume_id: String,
        chapter_id: String,
        glossary_id: String,
    },
}

impl UploadContext {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Local { .. } => SourceKind::Local,
            Self::Web { .. } => SourceKind::Web,
            Self::Wenku { .. } => SourceKind::Wenku,
        }
    }

    pub fn chapter_id(&self) -> &str {
        match self {
            Self::Local { chapter_id, .. }
            | Self::Web { chapter_id, .. }
            | Self::Wenku { chapter_id, .. } => chapter_id,
        }
    }

    pub fn glossary_id(&self) -> &str {
        match self {
            Self::Local { glossary_id, .. }
            | Self::Web { glossary_id, .. }
            | Self::Wenku { glossary_id, .. } => glossary_id,
        }
    }

    /// Replace the glossary id with the one reported for the chapter itself
    pub fn set_glossary_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        match self {
            Self::Local { glossary_id, .. }
            | Self::Web { glossary_id, .. }
            | Self::Wenku { glossary_id, .. } => *glossary_id = id,
        }
    }
}

// ============================================================================
// Segment / Task / Job
// ============================================================================

/// One bounded chunk of a chapter's filtered lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub state: SegmentState,
    pub src: Vec<String>,
    pub dst: Vec<String>,
    pub log: Vec<String>,
    /// Whole-segment requests spent on this segment since the last reset
    pub retry_count: u32,
}

impl Segment {
    /// Create a pending segment
    pub fn new(src: Vec<String>) -> Self {
        Self {
            state: SegmentState::Pending,
            src,
            dst: Vec::new(),
            log: Vec::new(),
            retry_count: 0,
        }
    }

    /// Put a failed segment back in the queue
    pub fn reset(&mut self) {
        self.state = SegmentState::Pending;
        self.dst.clear();
        self.log.clear();
        self.retry_count = 0;
    }
}

/// One chapter within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub state: TaskState,
    pub chapter_id: String,
    pub label: String,
    pub segs: Vec<Segment>,
    pub glossary: Glossary,
    pub old_glossary: Option<Glossary>,
    /// Source paragraphs exactly as the chapter source returned them
    pub paragraphs: Vec<String>,
    /// Paragraphs with blanks and placeholders removed
    pub filtered_paragraphs: Vec<String>,
    /// Filtered paragraphs of the previous translation
    pub old_paragraphs: Option<Vec<String>>,
    pub force: bool,
    pub upload_context: UploadContext,
}

impl Task {
    /// Create a pending task with no content loaded yet
    pub fn new(
        chapter_id: impl Into<String>,
        label: impl Into<String>,
        glossary: Glossary,
        force: bool,
        upload_context: UploadContext,
    ) -> Self {
        Self {
            state: TaskState::Pending,
            chapter_id: chapter_id.into(),
            label: label.into(),
            segs: Vec::new(),
            glossary,
            old_glossary: None,
            paragraphs: Vec::new(),
            filtered_paragraphs: Vec::new(),
            old_paragraphs: None,
            force,
            upload_context,
        }
    }

    /// Whether some segment is leased to a worker
    pub fn has_processing_segment(&self) -> bool {
        self.segs.iter().any(|s| s.state == SegmentState::Processing)
    }

    /// Whether every segment reached a terminal state
    pub fn all_segments_terminal(&self) -> bool {
        self.segs.iter().all(|s| s.state.is_terminal())
    }

    pub fn any_segment_failed(&self) -> bool {
        self.segs.iter().any(|s| s.state == SegmentState::Failed)
    }
}

/// One translation run over a set of chapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub state: JobState,
    pub name: String,
    pub descriptor: JobDescriptor,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub error: Option<String>,
}

impl Job {
    /// Create a pending job
    pub fn new(descriptor: JobDescriptor, name: impl Into<String>) -> Self {
        Self {
            state: JobState::Pending,
            name: name.into(),
            descriptor,
            created_at: Utc::now(),
            tasks: Vec::new(),
            error: None,
        }
    }

    /// Canonical descriptor string, the key for claims and lookups
    pub fn key(&self) -> String {
        self.descriptor.to_string()
    }

    pub fn backend(&self) -> BackendId {
        self.descriptor.backend
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_terminal())
    }

    /// Task and segment counters
    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for task in &self.tasks {
            stats.total_tasks += 1;
            match task.state {
                TaskState::Success => stats.success_tasks += 1,
                TaskState::Failed => stats.failed_tasks += 1,
                _ => {}
            }
            for seg in &task.segs {
                stats.total_segments += 1;
                match seg.state {
                    SegmentState::Success => stats.success_segments += 1,
                    SegmentState::Failed => stats.failed_segments += 1,
                    _ => {}
                }
            }
        }
        stats
    }
}

/// Progress counters of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_tasks: usize,
    pub success_tasks: usize,
    pub failed_tasks: usize,
    pub total_segments: usize,
    pub success_segments: usize,
    pub failed_segments: usize,
}

/// Archive entry written when a job finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub descriptor: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub finished: usize,
    pub failed: usize,
    pub total: usize,
    pub error: Option<String>,
}

// ============================================================================
// Worker exchange
// ============================================================================

/// A segment leased to a worker
///
/// Everything here is a copy; the registry keeps ownership of its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegRequest {
    pub job_key: String,
    pub backend: BackendId,
    pub task_index: usize,
    pub seg_index: usize,
    pub src: Vec<String>,
    pub glossary: Glossary,
    /// Destination lines of preceding completed segments, in order
    pub prev_segs: Vec<Vec<String>>,
}

/// Terminal outcome reported for a leased segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegOutcome {
    Success,
    Failed,
}

/// Result posted back by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegResult {
    pub outcome: SegOutcome,
    pub dst: Vec<String>,
    pub log: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl SegResult {
    pub fn success(dst: Vec<String>, log: Vec<String>) -> Self {
        Self {
            outcome: SegOutcome::Success,
            dst,
            log,
            attempts: 0,
        }
    }

    pub fn failed(log: Vec<String>) -> Self {
        Self {
            outcome: SegOutcome::Failed,
            dst: Vec::new(),
            log,
            attempts: 0,
        }
    }

    /// Record how many whole-segment requests produced this result
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
