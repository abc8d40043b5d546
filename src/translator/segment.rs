//! Segment translation with retry and per-line fallback
//!
//! A segment is sent as its effective lines joined by `\n`. The response is
//! checked in two steps: usage accounting first (a completion that hit the
//! token cap is degraded and discarded unread), then the line count through
//! [`restore_layout`]. Either failure retries the whole segment, up to
//! `segment_retry_limit` attempts.
//!
//! When every attempt fails, the segment is translated line by line. Each
//! line sees the cross-segment context plus the lines already translated in
//! this segment. A degraded line keeps its source text; hitting
//! `per_line_degradation_limit` degraded lines means the backend itself is
//! broken and raises [`TranslatorError::BackendMalfunction`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::policy::{DetectedModel, UploadDecision, UploadPolicy};
use super::prompt::build_messages;
use super::{ChatBackend, ChatCompletion, ChatRequest, SamplingParams, TranslatorError, TranslatorResult};
use crate::models::Glossary;
use crate::text::layout::{capture_layout, is_blank_line, pick_single_line_translation, restore_layout};

/// Tunables of the segment translator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorSettings {
    /// Segment length the scheduler was configured with
    pub seg_length: usize,

    /// Characters of preceding translation to send as context; 0 disables
    pub prev_seg_length: usize,

    /// Whole-segment attempts before falling back to per-line mode
    pub segment_retry_limit: u32,

    /// Degraded lines tolerated in per-line mode before giving up
    pub per_line_degradation_limit: u32,

    pub sampling: SamplingParams,

    /// Per-request timeout in seconds; `None` waits indefinitely
    pub request_timeout_secs: Option<u64>,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            seg_length: 500,
            prev_seg_length: 500,
            segment_retry_limit: 3,
            per_line_degradation_limit: 2,
            sampling: SamplingParams::default(),
            request_timeout_secs: None,
        }
    }
}

impl TranslatorSettings {
    /// Number of trailing completed segments sent as context
    pub fn prev_seg_count(&self) -> usize {
        if self.prev_seg_length == 0 || self.seg_length == 0 {
            0
        } else {
            self.prev_seg_length.div_ceil(self.seg_length)
        }
    }
}

/// Per-call inputs of [`SegmentTranslator::translate`]
#[derive(Debug, Clone, Copy)]
pub struct SegmentContext<'a> {
    pub glossary: &'a Glossary,
    /// Destination lines of the preceding completed segments, in order
    pub prev_segs: &'a [Vec<String>],
    pub cancel: &'a CancellationToken,
}

/// Translated lines plus the human-readable log of how they were obtained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentTranslation {
    /// One entry per source line, blanks preserved
    pub lines: Vec<String>,
    pub log: Vec<String>,
    /// Whole-segment requests made before the result was settled
    pub attempts: u32,
}

/// One LLM backend turned into a segment translator
pub struct SegmentTranslator {
    backend: Arc<dyn ChatBackend>,
    settings: TranslatorSettings,
    policy: UploadPolicy,
    model: Option<DetectedModel>,
}

impl SegmentTranslator {
    /// Create a translator with an open upload policy
    pub fn new(backend: Arc<dyn ChatBackend>, settings: TranslatorSettings) -> Self {
        Self {
            backend,
            settings,
            policy: UploadPolicy::default(),
            model: None,
        }
    }

    /// Gate uploads with `policy`
    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &TranslatorSettings {
        &self.settings
    }

    /// Model detected by [`init`](Self::init), if any
    pub fn model(&self) -> Option<&DetectedModel> {
        self.model.as_ref()
    }

    /// Detect the backend model; listing failures leave it unknown
    pub async fn init(&mut self) -> Option<&DetectedModel> {
        self.model = self.detect_model().await;
        self.model.as_ref()
    }

    async fn detect_model(&self) -> Option<DetectedModel> {
        match self.backend.list_models().await {
            Ok(models) => {
                let model = models.into_iter().next().map(DetectedModel::from_info);
                match &model {
                    Some(m) => tracing::info!(
                        model = %m.id,
                        version = %m.version,
                        "Detected backend model"
                    ),
                    None => tracing::warn!("Backend reported no models"),
                }
                model
            }
            Err(e) => {
                tracing::warn!(error = %e, "获取模型数据失败：{e}");
                None
            }
        }
    }

    /// Whether results of this translator may be uploaded
    pub fn allow_upload(&self) -> UploadDecision {
        let decision = self.policy.allow_upload(
            self.settings.seg_length,
            self.settings.prev_seg_length,
            self.model.as_ref(),
        );
        if decision.allowed {
            tracing::info!(reason = %decision.reason, "Upload allowed");
        } else {
            tracing::warn!(reason = %decision.reason, "Upload blocked");
        }
        decision
    }

    /// Translate one segment
    ///
    /// The result has exactly one line per source line. Errors other than
    /// degradation and line mismatch (transport, cancellation) are returned
    /// as-is; [`TranslatorError::BackendMalfunction`] is fatal for this
    /// translator.
    pub async fn translate(
        &self,
        seg: &[String],
        ctx: SegmentContext<'_>,
    ) -> TranslatorResult<SegmentTranslation> {
        let mut log = Vec::new();
        let layout = capture_layout(seg);
        if layout.effective_lines.is_empty() {
            return Ok(SegmentTranslation {
                lines: vec![String::new(); seg.len()],
                log,
                attempts: 0,
            });
        }

        let prev_text = self.context_text(ctx.prev_segs);
        let text = layout.effective_lines.join("\n");
        let max_tokens = self.settings.sampling.max_tokens;

        for attempt in 1..=self.settings.segment_retry_limit {
            let completion = self.complete(&text, &prev_text, ctx).await?;

            if completion.is_degraded(max_tokens) {
                tracing::warn!(
                    attempt,
                    completion_tokens = completion.completion_tokens,
                    "Segment output degraded"
                );
                log.push(format!("第{attempt}次，退化"));
                continue;
            }

            match restore_layout(&layout, &completion.text) {
                Some(lines) => {
                    log.push(format!("第{attempt}次，成功"));
                    return Ok(SegmentTranslation {
                        lines,
                        log,
                        attempts: attempt,
                    });
                }
                None => {
                    tracing::warn!(attempt, "Segment line count mismatch");
                    log.push(format!("第{attempt}次，行数不匹配"));
                }
            }
        }

        log.push("逐行翻译".to_string());
        let lines = self.translate_per_line(seg, &prev_text, ctx, &mut log).await?;
        Ok(SegmentTranslation {
            lines,
            log,
            attempts: self.settings.segment_retry_limit,
        })
    }

    async fn translate_per_line(
        &self,
        seg: &[String],
        prev_text: &str,
        ctx: SegmentContext<'_>,
        log: &mut Vec<String>,
    ) -> TranslatorResult<Vec<String>> {
        let max_tokens = self.settings.sampling.max_tokens;
        let mut degraded = 0;
        let mut result: Vec<String> = Vec::with_capacity(seg.len());

        for line in seg {
            if is_blank_line(line) {
                result.push(String::new());
                continue;
            }

            let context = std::iter::once(prev_text)
                .chain(result.iter().map(String::as_str))
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            let completion = self.complete(line, &context, ctx).await?;

            if completion.is_degraded(max_tokens) {
                degraded += 1;
                tracing::warn!(degraded, "Single line output degraded");
                log.push(format!("单行退化{degraded}次"));
                if degraded >= self.settings.per_line_degradation_limit {
                    return Err(TranslatorError::BackendMalfunction(
                        "单个分段退化次数过多，翻译器可能存在异常".to_string(),
                    ));
                }
                result.push(line.clone());
            } else {
                result.push(pick_single_line_translation(&completion.text));
            }
        }

        Ok(result)
    }

    /// Trailing completed segments flattened into one context string
    fn context_text(&self, prev_segs: &[Vec<String>]) -> String {
        let count = self.settings.prev_seg_count().min(prev_segs.len());
        prev_segs[prev_segs.len() - count..]
            .iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn complete(
        &self,
        text: &str,
        prev_text: &str,
        ctx: SegmentContext<'_>,
    ) -> TranslatorResult<ChatCompletion> {
        let request = ChatRequest {
            messages: build_messages(text, prev_text, ctx.glossary),
            sampling: self.settings.sampling,
            timeout: self.settings.request_timeout_secs.map(Duration::from_secs),
        };
        self.backend.create_chat_completion(request, ctx.cancel).await
    }
}
