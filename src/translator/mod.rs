//! Translator adapter
//!
//! Wraps one LLM backend behind [`ChatBackend`] and turns it into a
//! segment translator with whole-segment retry, degradation detection and a
//! per-line fallback.
//!
//! # Architecture
//!
//! - [`ChatBackend`] - chat-completion transport (see [`openai`])
//! - [`prompt`] - system prompts and message construction
//! - [`policy`] - model allow-list and the upload gate
//! - [`segment::SegmentTranslator`] - the retry/degradation state machine

pub mod openai;
pub mod policy;
pub mod prompt;
pub mod segment;

pub use openai::{OpenAiBackend, OpenAiConfig};
pub use policy::{UploadDecision, UploadPolicy};
pub use segment::{SegmentContext, SegmentTranslation, SegmentTranslator, TranslatorSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result type for translator operations
pub type TranslatorResult<T> = Result<T, TranslatorError>;

/// Errors raised by the translator adapter
#[derive(Error, Debug)]
pub enum TranslatorError {
    /// Transport failure talking to the backend
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend answered with something that is not a usable completion
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// Caller cancelled the in-flight call
    #[error("Translation cancelled")]
    Cancelled,

    /// Too many degraded lines in per-line mode
    #[error("Backend malfunction: {0}")]
    BackendMalfunction(String),
}

impl TranslatorError {
    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::Cancelled | Self::BackendMalfunction(_) => false,
        }
    }

    /// Whether the translator instance must stop taking work
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendMalfunction(_))
    }
}

// ============================================================================
// Chat types
// ============================================================================

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters of a completion request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    /// Completion token cap; reaching it marks the output as degraded
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.95,
            frequency_penalty: 0.0,
            max_tokens: 4096,
        }
    }
}

/// A chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
    /// Per-request timeout override; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Completion text plus usage accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub text: String,
    pub completion_tokens: u32,
}

impl ChatCompletion {
    /// Output was cut off by the token cap
    pub fn is_degraded(&self, max_tokens: u32) -> bool {
        self.completion_tokens >= max_tokens
    }
}

/// A model reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Chat-completion transport
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Models served by the backend
    async fn list_models(&self) -> TranslatorResult<Vec<ModelInfo>>;

    /// Run one completion, aborting when `cancel` fires
    async fn create_chat_completion(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> TranslatorResult<ChatCompletion>;
}
