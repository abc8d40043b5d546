//! Configuration management for novel-relay
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::BackendId;
use crate::text::LengthSegmentor;
use crate::translator::{OpenAiConfig, SamplingParams, TranslatorSettings, UploadPolicy};
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Translator backend configuration
    pub translator: TranslatorConfig,

    /// Transport retry policy for backend calls
    pub retry: RetryConfig,

    /// Upload gate override; the backend's own policy when absent
    pub upload_policy: Option<UploadPolicy>,

    /// Workspace configuration
    pub workspace: WorkspaceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Translator backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Backend identity (sakura, gpt, murasaki)
    pub backend: BackendId,

    /// Server base URL
    pub endpoint: String,

    /// Bearer token (optional)
    pub api_key: Option<String>,

    /// Model name sent with each completion
    pub model: String,

    /// Per-request timeout in seconds; unset waits indefinitely
    pub request_timeout_secs: Option<u64>,

    /// Segment length override; the backend profile when unset
    pub seg_length: Option<usize>,

    /// Lines per segment override; the backend profile when unset
    pub max_lines: Option<usize>,

    /// Characters of preceding translation sent as context; murasaki
    /// defaults to none, the other backends to 500
    pub prev_seg_length: Option<usize>,

    /// Whole-segment attempts before per-line fallback
    pub segment_retry_limit: u32,

    /// Degraded lines tolerated in per-line mode
    pub per_line_degradation_limit: u32,

    /// Sampling parameters
    pub sampling: SamplingParams,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        let settings = TranslatorSettings::default();
        Self {
            backend: BackendId::Sakura,
            endpoint: OpenAiConfig::default().endpoint,
            api_key: None,
            model: OpenAiConfig::default().model,
            request_timeout_secs: None,
            seg_length: None,
            max_lines: None,
            prev_seg_length: None,
            segment_retry_limit: settings.segment_retry_limit,
            per_line_degradation_limit: settings.per_line_degradation_limit,
            sampling: settings.sampling,
        }
    }
}

impl TranslatorConfig {
    /// HTTP client configuration
    pub fn http(&self) -> OpenAiConfig {
        OpenAiConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            ..Default::default()
        }
    }

    /// Segmentor the registry cuts chapters with
    pub fn segmentor(&self) -> LengthSegmentor {
        let mut segmentor = self.backend.segmentor();
        if let Some(seg_length) = self.seg_length {
            segmentor.max_length = seg_length;
        }
        if let Some(max_lines) = self.max_lines {
            segmentor.max_lines = Some(max_lines);
        }
        segmentor
    }

    /// Translator settings; the segment length matches [`Self::segmentor`]
    pub fn settings(&self) -> TranslatorSettings {
        TranslatorSettings {
            seg_length: self.segmentor().max_length,
            prev_seg_length: self.prev_seg_length.unwrap_or(match self.backend {
                BackendId::Murasaki => 0,
                BackendId::Sakura | BackendId::Gpt => 500,
            }),
            segment_retry_limit: self.segment_retry_limit,
            per_line_degradation_limit: self.per_line_degradation_limit,
            sampling: self.sampling,
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory of local volumes
    pub volumes_dir: PathBuf,

    /// Number of concurrent workers
    pub workers: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            volumes_dir: PathBuf::from("data/volumes"),
            workers: 1,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        let translator = &mut config.translator;

        if let Ok(backend) = std::env::var("RELAY_BACKEND") {
            translator.backend = BackendId::parse(&backend)
                .with_context(|| format!("Unknown backend in RELAY_BACKEND: {backend}"))?;
        }
        if let Ok(endpoint) = std::env::var("RELAY_ENDPOINT") {
            translator.endpoint = endpoint;
        }
        translator.api_key = std::env::var("RELAY_API_KEY").ok();
        if let Ok(model) = std::env::var("RELAY_MODEL") {
            translator.model = model;
        }
        translator.request_timeout_secs = env_parse("RELAY_REQUEST_TIMEOUT");
        translator.seg_length = env_parse("RELAY_SEG_LENGTH");
        translator.max_lines = env_parse("RELAY_MAX_LINES");
        translator.prev_seg_length = env_parse("RELAY_PREV_SEG_LENGTH");
        if let Some(v) = env_parse("RELAY_SEGMENT_RETRY_LIMIT") {
            translator.segment_retry_limit = v;
        }
        if let Some(v) = env_parse("RELAY_PER_LINE_DEGRADATION_LIMIT") {
            translator.per_line_degradation_limit = v;
        }
        if let Some(v) = env_parse("RELAY_MAX_TOKENS") {
            translator.sampling.max_tokens = v;
        }

        if let Some(v) = env_parse("RELAY_MAX_RETRIES") {
            config.retry.max_retries = v;
        }

        if let Ok(dir) = std::env::var("RELAY_VOLUMES_DIR") {
            config.workspace.volumes_dir = dir.into();
        }
        if let Some(v) = env_parse("RELAY_WORKERS") {
            config.workspace.workers = v;
        }

        if let Ok(level) = std::env::var("RELAY_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("RELAY_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.translator.endpoint)
            .with_context(|| format!("Invalid endpoint: {}", self.translator.endpoint))?;

        if self.translator.seg_length == Some(0) {
            anyhow::bail!("seg_length must be greater than 0");
        }

        if self.translator.max_lines == Some(0) {
            anyhow::bail!("max_lines must be greater than 0");
        }

        if self.translator.segment_retry_limit == 0 {
            anyhow::bail!("segment_retry_limit must be greater than 0");
        }

        if self.translator.per_line_degradation_limit == 0 {
            anyhow::bail!("per_line_degradation_limit must be greater than 0");
        }

        if self.translator.sampling.max_tokens == 0 {
            anyhow::bail!("max_tokens must be greater than 0");
        }

        if self.workspace.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Upload policy in effect for the configured backend
    #[must_use]
    pub fn upload_policy(&self) -> UploadPolicy {
        self.upload_policy
            .clone()
            .unwrap_or_else(|| UploadPolicy::for_backend(self.translator.backend))
    }
}
