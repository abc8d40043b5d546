//! Worker pull loop
//!
//! A worker owns one translator and repeatedly leases a segment from the
//! registry, translates it and posts the result. It parks on the registry
//! while there is nothing to do and stops when cancelled or when its
//! translator reports a backend malfunction.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::models::{SegRequest, SegResult};
use crate::translator::{SegmentContext, SegmentTranslator, TranslatorError};

use super::registry::WorkspaceRegistry;
use super::{WorkspaceError, WorkspaceResult};

/// Counters of a finished worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub translated: usize,
    pub failed: usize,
}

/// One translator attached to the registry
pub struct Worker {
    id: String,
    translator: SegmentTranslator,
    registry: WorkspaceRegistry,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        translator: SegmentTranslator,
        registry: WorkspaceRegistry,
    ) -> Self {
        Self {
            id: id.into(),
            translator,
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `cancel` fires
    ///
    /// Refuses to start when the translator's upload gate is closed. A
    /// backend malfunction fails the current segment, releases this
    /// worker's claims and ends the run with the error.
    pub async fn run(&self, cancel: CancellationToken) -> WorkspaceResult<WorkerReport> {
        let decision = self.translator.allow_upload();
        if !decision.allowed {
            return Err(WorkspaceError::UploadBlocked(decision.reason));
        }

        tracing::info!(worker = %self.id, "Worker started");
        let mut report = WorkerReport::default();

        let outcome = loop {
            let Some(request) = self.registry.next_segment(&self.id, &cancel).await else {
                break Ok(());
            };

            match self.process(&request, &cancel).await {
                Ok(result) => {
                    report.translated += 1;
                    self.post(&request, result).await;
                }
                Err(e) => {
                    report.failed += 1;
                    self.post(&request, SegResult::failed(vec![e.to_string()]))
                        .await;

                    if matches!(e, TranslatorError::Cancelled) {
                        break Ok(());
                    }
                    if e.is_fatal() {
                        tracing::error!(worker = %self.id, error = %e, "Translator malfunction, stopping worker");
                        break Err(WorkspaceError::Translator(e));
                    }
                    tracing::warn!(worker = %self.id, error = %e, "Segment failed");
                }
            }
        };

        self.registry.release_worker_claims(&self.id).await;
        tracing::info!(
            worker = %self.id,
            translated = report.translated,
            failed = report.failed,
            "Worker stopped"
        );
        outcome.map(|()| report)
    }

    async fn process(
        &self,
        request: &SegRequest,
        cancel: &CancellationToken,
    ) -> Result<SegResult, TranslatorError> {
        let ctx = SegmentContext {
            glossary: &request.glossary,
            prev_segs: &request.prev_segs,
            cancel,
        };
        let translation = self.translator.translate(&request.src, ctx).await?;
        Ok(SegResult::success(translation.lines, translation.log)
            .with_attempts(translation.attempts))
    }

    async fn post(&self, request: &SegRequest, result: SegResult) {
        if let Err(e) = self
            .registry
            .post_seg(&request.job_key, request.task_index, request.seg_index, result)
            .await
        {
            // The job may have been deleted while the segment was in flight
            tracing::debug!(worker = %self.id, error = %e, "Result discarded");
        }
    }
}
