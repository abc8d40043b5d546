//! Unified error handling for the novel-relay crate
//!
//! Each domain keeps its own error enum; this module folds them into a single
//! [`Error`] for use across module boundaries and at the binary's edge.
//!
//! # Architecture
//!
//! - [`RelayErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use novel_relay::error::{Error, RelayErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error ({}): {err}", err.category());
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::source::SourceError;
pub use crate::text::AlignmentError;
pub use crate::translator::TranslatorError;
pub use crate::workspace::descriptor::DescriptorError;
pub use crate::workspace::WorkspaceError;

/// Common trait for novel-relay error types
pub trait RelayErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// Parsing and data extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Translation backend errors
    Llm,
    /// Configuration and validation errors
    Config,
    /// Job and segment scheduling errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Llm => "llm",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the novel-relay crate
#[derive(Error, Debug)]
pub enum Error {
    /// Translation backend errors
    #[error("Translator error: {0}")]
    Translator(#[from] TranslatorError),

    /// Chapter source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Job descriptor parse errors
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Registry and worker errors
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Translation/source line alignment errors
    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignmentError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RelayErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Translator(e) => e.is_recoverable(),
            Self::Source(e) => e.is_recoverable(),
            Self::Workspace(e) => e.is_recoverable(),
            Self::Descriptor(_) | Self::Alignment(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Translator(e) => match e {
                TranslatorError::Http(_) | TranslatorError::Status { .. } => ErrorCategory::Network,
                _ => ErrorCategory::Llm,
            },
            Self::Source(e) => match e {
                SourceError::Json(_) => ErrorCategory::Parsing,
                _ => ErrorCategory::Storage,
            },
            Self::Workspace(e) => match e {
                WorkspaceError::Source(_) => ErrorCategory::Storage,
                WorkspaceError::Translator(_) | WorkspaceError::UploadBlocked(_) => {
                    ErrorCategory::Llm
                }
                WorkspaceError::Alignment(_) => ErrorCategory::Parsing,
                _ => ErrorCategory::Scheduler,
            },
            Self::Descriptor(_) | Self::Alignment(_) | Self::Json(_) => ErrorCategory::Parsing,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Http(_) => ErrorCategory::Network,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
