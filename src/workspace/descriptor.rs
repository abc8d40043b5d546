//! Job descriptors
//!
//! A descriptor names one translation run: the backend, the chapter source
//! and the scope. Its canonical string form is the idempotency key of the
//! registry, so two requests for the same run always collapse into one job.
//!
//! ```text
//! sakura/local/{volume_id}?level=normal&start=0&end=65536
//! gpt/web/{provider_id}/{novel_id}?level=sync&start=0&end=100
//! sakura/wenku/{novel_id}/{volume_id}?level=expire&start=0&end=65536
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::{BackendId, SourceKind};

/// Default exclusive end of the chapter range
pub const DEFAULT_END_INDEX: usize = 65536;

/// Errors raised while parsing a descriptor string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Unknown source kind: {0}")]
    UnknownSource(String),

    #[error("Malformed descriptor path: {0}")]
    MalformedPath(String),

    #[error("Invalid parameter '{key}': {value}")]
    InvalidParam { key: String, value: String },

    #[error("Level '{level}' is not supported for {source_kind} sources")]
    UnsupportedLevel {
        level: TranslateLevel,
        source_kind: SourceKind,
    },
}

/// Which chapters of the range a job picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslateLevel {
    /// Only chapters never translated by this backend
    #[default]
    Normal,
    /// Untranslated chapters plus those translated under an older glossary
    Expire,
    /// Every chapter, retranslated from scratch
    All,
    /// Every chapter, with source text re-pulled from the origin site
    Sync,
}

impl TranslateLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Expire => "expire",
            Self::All => "all",
            Self::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "expire" => Some(Self::Expire),
            "all" => Some(Self::All),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }
}

impl fmt::Display for TranslateLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The chapter source a job reads from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskSource {
    Local { volume_id: String },
    Web { provider_id: String, novel_id: String },
    Wenku { novel_id: String, volume_id: String },
}

impl TaskSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Local { .. } => SourceKind::Local,
            Self::Web { .. } => SourceKind::Web,
            Self::Wenku { .. } => SourceKind::Wenku,
        }
    }

    /// Human readable prefix for task labels
    pub fn label_prefix(&self) -> String {
        match self {
            Self::Local { volume_id } => volume_id.clone(),
            Self::Web {
                provider_id,
                novel_id,
            } => format!("{provider_id}/{novel_id}"),
            Self::Wenku { novel_id, .. } => format!("wenku/{novel_id}"),
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { volume_id } => write!(f, "local/{volume_id}"),
            Self::Web {
                provider_id,
                novel_id,
            } => write!(f, "web/{provider_id}/{novel_id}"),
            Self::Wenku {
                novel_id,
                volume_id,
            } => write!(f, "wenku/{novel_id}/{volume_id}"),
        }
    }
}

/// Scope parameters of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskParams {
    pub level: TranslateLevel,
    /// Inclusive start index into the table of contents
    pub start_index: usize,
    /// Exclusive end index into the table of contents
    pub end_index: usize,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            level: TranslateLevel::Normal,
            start_index: 0,
            end_index: DEFAULT_END_INDEX,
        }
    }
}

/// Fully parsed job descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub backend: BackendId,
    pub source: TaskSource,
    pub params: TaskParams,
}

impl JobDescriptor {
    /// Create a descriptor, rejecting levels the source kind cannot serve
    pub fn new(
        backend: BackendId,
        source: TaskSource,
        params: TaskParams,
    ) -> Result<Self, DescriptorError> {
        if params.level == TranslateLevel::Sync && source.kind() != SourceKind::Web {
            return Err(DescriptorError::UnsupportedLevel {
                level: params.level,
                source_kind: source.kind(),
            });
        }
        Ok(Self {
            backend,
            source,
            params,
        })
    }
}

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}?level={}&start={}&end={}",
            self.backend,
            self.source,
            self.params.level,
            self.params.start_index,
            self.params.end_index
        )
    }
}

fn check_segment(segment: &str, path: &str) -> Result<String, DescriptorError> {
    if segment.is_empty() {
        return Err(DescriptorError::MalformedPath(path.to_string()));
    }
    Ok(segment.to_string())
}

fn parse_index(key: &str, value: &str) -> Result<usize, DescriptorError> {
    value.parse().map_err(|_| DescriptorError::InvalidParam {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl FromStr for JobDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, query) = s.split_once('?').unwrap_or((s, ""));
        let parts: Vec<&str> = path.split('/').collect();

        let backend = BackendId::parse(parts[0])
            .ok_or_else(|| DescriptorError::UnknownBackend(parts[0].to_string()))?;

        let source = match parts.get(1).copied() {
            Some("local") if parts.len() == 3 => TaskSource::Local {
                volume_id: check_segment(parts[2], path)?,
            },
            Some("web") if parts.len() == 4 => TaskSource::Web {
                provider_id: check_segment(parts[2], path)?,
                novel_id: check_segment(parts[3], path)?,
            },
            Some("wenku") if parts.len() == 4 => TaskSource::Wenku {
                novel_id: check_segment(parts[2], path)?,
                volume_id: check_segment(parts[3], path)?,
            },
            Some("local" | "web" | "wenku") | None => {
                return Err(DescriptorError::MalformedPath(path.to_string()))
            }
            Some(other) => return Err(DescriptorError::UnknownSource(other.to_string())),
        };

        let mut params = TaskParams::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "level" => {
                    params.level = TranslateLevel::parse(&value).ok_or_else(|| {
                        DescriptorError::InvalidParam {
                            key: key.to_string(),
                            value: value.to_string(),
                        }
                    })?
                }
                "start" => params.start_index = parse_index(&key, &value)?,
                "end" => params.end_index = parse_index(&key, &value)?,
                _ => {}
            }
        }

        JobDescriptor::new(backend, source, params)
    }
}
