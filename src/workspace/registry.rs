//! Workspace registry and claim protocol
//!
//! All active jobs live in one [`RegistryState`] behind a mutex. Every
//! mutation is a short synchronous critical section; chapter fetches and
//! uploads run with the lock released while the affected task sits in the
//! `loading` state, which scanners treat as in flight.
//!
//! Claim rules:
//! - a worker holds at most one job, and a job is held by at most one worker
//! - a task has at most one segment in `processing` at a time
//! - a worker only sees destination lines of strictly preceding completed
//!   segments as context

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::models::{
    BackendId, Job, JobRecord, JobState, JobStats, SegOutcome, SegRequest, SegResult,
    SegmentState, SourceKind, Task, TaskState,
};
use crate::source::ChapterSources;
use crate::text::LengthSegmentor;

use super::aggregate::upload_task;
use super::descriptor::JobDescriptor;
use super::populate::{build_tasks, load_task};
use super::{WorkspaceError, WorkspaceResult};

// ============================================================================
// Registry State
// ============================================================================

/// What a worker gets from one scan
enum Claim {
    Lease(SegRequest),
    /// A pending task was marked `loading` and must be loaded off-lock
    Load {
        job_key: String,
        task_index: usize,
        backend: BackendId,
        task: Task,
    },
    /// Nothing to hand out; `archived` is set when the scan finished a job
    Idle { archived: bool },
}

/// What a posted result requires next
enum PostAction {
    Done,
    Upload { backend: BackendId, task: Task },
}

/// Active jobs, claims and the archive
#[derive(Debug, Default)]
pub struct RegistryState {
    jobs: Vec<Job>,
    /// Job key -> worker id
    claims: HashMap<String, String>,
    records: Vec<JobRecord>,
    #[cfg(test)]
    scans: usize,
}

impl RegistryState {
    fn job_index(&self, key: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.key() == key)
    }

    fn job_mut(&mut self, key: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.key() == key)
    }

    /// Job already claimed by `worker_id`, else the first unclaimed one
    fn claim_job(&mut self, worker_id: &str) -> Option<usize> {
        let owned = self.jobs.iter().position(|j| {
            j.state == JobState::Processing
                && self.claims.get(&j.key()).is_some_and(|w| w == worker_id)
        });
        if owned.is_some() {
            return owned;
        }

        let index = self.jobs.iter().position(|j| {
            j.state == JobState::Processing && !self.claims.contains_key(&j.key())
        })?;
        let key = self.jobs[index].key();
        tracing::debug!(job = %key, worker = %worker_id, "Job claimed");
        self.claims.insert(key, worker_id.to_string());
        Some(index)
    }

    fn next_claim(&mut self, worker_id: &str) -> Claim {
        #[cfg(test)]
        {
            self.scans += 1;
        }
        let Some(index) = self.claim_job(worker_id) else {
            return Claim::Idle { archived: false };
        };

        let job = &mut self.jobs[index];
        let job_key = job.key();
        let backend = job.backend();
        let mut has_pending_work = false;

        for (task_index, task) in job.tasks.iter_mut().enumerate() {
            match task.state {
                TaskState::Success | TaskState::Failed => continue,
                TaskState::Loading => {
                    has_pending_work = true;
                    continue;
                }
                TaskState::Pending => {
                    task.state = TaskState::Loading;
                    return Claim::Load {
                        job_key,
                        task_index,
                        backend,
                        task: task.clone(),
                    };
                }
                TaskState::Processing => {}
            }

            if task.has_processing_segment() {
                has_pending_work = true;
                continue;
            }

            if let Some(seg_index) = task
                .segs
                .iter()
                .position(|s| s.state == SegmentState::Pending)
            {
                task.segs[seg_index].state = SegmentState::Processing;
                let prev_segs = task.segs[..seg_index]
                    .iter()
                    .filter(|s| s.state == SegmentState::Success)
                    .map(|s| s.dst.clone())
                    .collect();

                tracing::debug!(
                    job = %job_key,
                    task = %task.label,
                    seg_index,
                    worker = %worker_id,
                    "Segment leased"
                );
                return Claim::Lease(SegRequest {
                    job_key,
                    backend,
                    task_index,
                    seg_index,
                    src: task.segs[seg_index].src.clone(),
                    glossary: task.glossary.clone(),
                    prev_segs,
                });
            }
        }

        let mut archived = false;
        if !has_pending_work {
            self.claims.remove(&job_key);
            archived = self.complete_if_done(&job_key);
        }
        Claim::Idle { archived }
    }

    /// Write back a task loaded off-lock
    fn store_loaded(&mut self, job_key: &str, task_index: usize, task: Task) {
        let Some(slot) = self
            .job_mut(job_key)
            .and_then(|job| job.tasks.get_mut(task_index))
        else {
            return;
        };
        if slot.state == TaskState::Loading {
            *slot = task;
        }
    }

    fn apply_result(
        &mut self,
        job_key: &str,
        task_index: usize,
        seg_index: usize,
        result: SegResult,
    ) -> WorkspaceResult<PostAction> {
        let job = self
            .job_mut(job_key)
            .ok_or_else(|| WorkspaceError::JobNotFound(job_key.to_string()))?;
        let backend = job.backend();
        let task = job
            .tasks
            .get_mut(task_index)
            .ok_or_else(|| WorkspaceError::TaskNotFound {
                job: job_key.to_string(),
                task_index,
            })?;
        let seg = task
            .segs
            .get_mut(seg_index)
            .ok_or_else(|| WorkspaceError::SegmentNotFound {
                job: job_key.to_string(),
                task_index,
                seg_index,
            })?;

        if seg.state != SegmentState::Processing {
            return Err(WorkspaceError::SegmentNotLeased {
                job: job_key.to_string(),
                task_index,
                seg_index,
            });
        }

        seg.state = match result.outcome {
            SegOutcome::Success => SegmentState::Success,
            SegOutcome::Failed => SegmentState::Failed,
        };
        seg.dst = result.dst;
        seg.log.extend(result.log);
        seg.retry_count += result.attempts;

        if !task.all_segments_terminal() {
            return Ok(PostAction::Done);
        }

        if task.any_segment_failed() {
            tracing::warn!(task = %task.label, "Task failed");
            task.state = TaskState::Failed;
            self.complete_if_done(job_key);
            return Ok(PostAction::Done);
        }

        task.state = TaskState::Loading;
        Ok(PostAction::Upload {
            backend,
            task: task.clone(),
        })
    }

    fn finish_upload(&mut self, job_key: &str, task_index: usize, uploaded: bool) {
        let Some(task) = self
            .job_mut(job_key)
            .and_then(|job| job.tasks.get_mut(task_index))
        else {
            return;
        };
        if task.state == TaskState::Loading {
            task.state = if uploaded {
                TaskState::Success
            } else {
                TaskState::Failed
            };
        }
        self.complete_if_done(job_key);
    }

    /// Archive the job when every task is terminal
    fn complete_if_done(&mut self, job_key: &str) -> bool {
        let Some(index) = self.job_index(job_key) else {
            return false;
        };
        if !self.jobs[index].all_tasks_terminal() {
            return false;
        }

        let mut job = self.jobs.remove(index);
        job.state = JobState::Finished;
        self.claims.remove(job_key);
        self.archive(&job);
        true
    }

    fn archive(&mut self, job: &Job) {
        let stats = job.stats();
        tracing::info!(
            job = %job.key(),
            finished = stats.success_tasks,
            failed = stats.failed_tasks,
            total = stats.total_tasks,
            "Job finished"
        );
        self.records.push(JobRecord {
            descriptor: job.key(),
            description: job.name.clone(),
            created_at: job.created_at,
            finished_at: Utc::now(),
            finished: stats.success_tasks,
            failed: stats.failed_tasks,
            total: stats.total_tasks,
            error: job.error.clone(),
        });
    }

    fn retry_failed(&mut self, job_key: &str, task_index: usize) -> WorkspaceResult<usize> {
        let job = self
            .job_mut(job_key)
            .ok_or_else(|| WorkspaceError::JobNotFound(job_key.to_string()))?;
        let task = job
            .tasks
            .get_mut(task_index)
            .ok_or_else(|| WorkspaceError::TaskNotFound {
                job: job_key.to_string(),
                task_index,
            })?;

        // Loading failed before any segment existed: load again
        if task.state == TaskState::Failed && task.segs.is_empty() {
            task.state = TaskState::Pending;
            return Ok(0);
        }

        let mut reset = 0;
        for seg in task.segs.iter_mut().filter(|s| s.state == SegmentState::Failed) {
            seg.reset();
            reset += 1;
        }
        if reset > 0 {
            task.state = TaskState::Processing;
        }
        Ok(reset)
    }
}

// ============================================================================
// Workspace Registry
// ============================================================================

/// Shared handle to the registry
#[derive(Clone)]
pub struct WorkspaceRegistry {
    state: Arc<Mutex<RegistryState>>,
    sources: ChapterSources,
    /// Per-backend overrides of [`BackendId::segmentor`]
    segmentors: Arc<HashMap<BackendId, LengthSegmentor>>,
    notify: Arc<Notify>,
}

impl WorkspaceRegistry {
    /// Create an empty registry
    pub fn new(sources: ChapterSources) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            sources,
            segmentors: Arc::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Cut chapters of `backend` jobs with `segmentor` instead of the
    /// backend's default profile
    #[must_use]
    pub fn with_segmentor(mut self, backend: BackendId, segmentor: LengthSegmentor) -> Self {
        Arc::make_mut(&mut self.segmentors).insert(backend, segmentor);
        self
    }

    pub fn sources(&self) -> &ChapterSources {
        &self.sources
    }

    /// Segmentor applied to chapters of `backend` jobs
    pub fn segmentor(&self, backend: BackendId) -> LengthSegmentor {
        self.segmentors
            .get(&backend)
            .copied()
            .unwrap_or_else(|| backend.segmentor())
    }

    fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Add a job and populate it
    ///
    /// Returns `false` when a job with the same descriptor is already active.
    pub async fn add_job(&self, descriptor: JobDescriptor, name: impl Into<String>) -> bool {
        let key = descriptor.to_string();
        {
            let mut state = self.state.lock().await;
            if state.job_index(&key).is_some() {
                tracing::debug!(job = %key, "Job already queued");
                return false;
            }
            state.jobs.push(Job::new(descriptor, name));
        }
        tracing::info!(job = %key, "Job added");

        self.populate(&key).await;
        true
    }

    async fn populate(&self, job_key: &str) {
        let descriptor = {
            let mut state = self.state.lock().await;
            let Some(job) = state.job_mut(job_key) else {
                return;
            };
            job.state = JobState::Loading;
            job.descriptor.clone()
        };

        let result = self.build_job_tasks(&descriptor).await;

        let mut state = self.state.lock().await;
        let Some(index) = state.job_index(job_key) else {
            return;
        };
        match result {
            Ok(tasks) if tasks.is_empty() => {
                tracing::info!(job = %job_key, "No chapters to translate, dropping job");
                state.jobs.remove(index);
                state.claims.remove(job_key);
            }
            Ok(tasks) => {
                tracing::info!(job = %job_key, tasks = tasks.len(), "Job populated");
                let job = &mut state.jobs[index];
                job.tasks = tasks;
                job.state = JobState::Processing;
                state.complete_if_done(job_key);
            }
            Err(e) => {
                tracing::error!(job = %job_key, error = %e, "Failed to populate job");
                let mut job = state.jobs.remove(index);
                job.error = Some(e.to_string());
                job.state = JobState::Finished;
                state.claims.remove(job_key);
                state.archive(&job);
            }
        }
        drop(state);
        self.wake();
    }

    async fn build_job_tasks(&self, descriptor: &JobDescriptor) -> WorkspaceResult<Vec<Task>> {
        let toc = self
            .sources
            .list_chapters(&descriptor.source, descriptor.backend)
            .await?;
        let mut tasks = build_tasks(descriptor, &toc);

        // Local reads are cheap; remote sources load lazily on first claim
        if descriptor.source.kind() == SourceKind::Local {
            let backend = descriptor.backend;
            let segmentor = self.segmentor(backend);
            futures::future::join_all(
                tasks
                    .iter_mut()
                    .map(|task| load_task(&self.sources, backend, &segmentor, task)),
            )
            .await;
        }
        Ok(tasks)
    }

    /// Remove a job and its claim; in-flight calls are not aborted
    pub async fn delete_job(&self, job_key: &str) -> bool {
        let mut state = self.state.lock().await;
        state.claims.remove(job_key);
        let removed = match state.job_index(job_key) {
            Some(index) => {
                state.jobs.remove(index);
                true
            }
            None => false,
        };
        drop(state);
        if removed {
            tracing::info!(job = %job_key, "Job deleted");
            self.wake();
        }
        removed
    }

    /// Move a job to the front of the queue
    pub async fn top_job(&self, job_key: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.job_index(job_key) else {
            return false;
        };
        let job = state.jobs.remove(index);
        state.jobs.insert(0, job);
        true
    }

    /// Move a job to the back of the queue
    pub async fn bottom_job(&self, job_key: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.job_index(job_key) else {
            return false;
        };
        let job = state.jobs.remove(index);
        state.jobs.push(job);
        true
    }

    /// Lease the next pending segment to `worker_id`
    ///
    /// Returns `None` when there is nothing to hand out right now.
    pub async fn request_seg(&self, worker_id: &str) -> Option<SegRequest> {
        loop {
            let claim = self.state.lock().await.next_claim(worker_id);
            match claim {
                Claim::Lease(request) => return Some(request),
                Claim::Idle { archived } => {
                    // Only a finished job changes what other waiters see
                    if archived {
                        self.wake();
                    }
                    return None;
                }
                Claim::Load {
                    job_key,
                    task_index,
                    backend,
                    mut task,
                } => {
                    let segmentor = self.segmentor(backend);
                    load_task(&self.sources, backend, &segmentor, &mut task).await;
                    self.state
                        .lock()
                        .await
                        .store_loaded(&job_key, task_index, task);
                }
            }
        }
    }

    /// Like [`request_seg`](Self::request_seg), but parks until work shows up
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn next_segment(
        &self,
        worker_id: &str,
        cancel: &CancellationToken,
    ) -> Option<SegRequest> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return None;
            }
            if let Some(request) = self.request_seg(worker_id).await {
                return Some(request);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Record a worker's result for a leased segment
    ///
    /// Completing the last segment of a task uploads it; completing the last
    /// task of a job archives the job.
    pub async fn post_seg(
        &self,
        job_key: &str,
        task_index: usize,
        seg_index: usize,
        result: SegResult,
    ) -> WorkspaceResult<()> {
        let action = self
            .state
            .lock()
            .await
            .apply_result(job_key, task_index, seg_index, result);
        self.wake();

        let PostAction::Upload { backend, task } = action? else {
            return Ok(());
        };

        let uploaded = match upload_task(&self.sources, backend, &task).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(task = %task.label, error = %e, "Upload failed");
                false
            }
        };

        self.state
            .lock()
            .await
            .finish_upload(job_key, task_index, uploaded);
        self.wake();
        Ok(())
    }

    /// Put a task's failed segments back in the queue
    ///
    /// Returns the number of segments reset.
    pub async fn retry_failed_segments(
        &self,
        job_key: &str,
        task_index: usize,
    ) -> WorkspaceResult<usize> {
        let reset = self
            .state
            .lock()
            .await
            .retry_failed(job_key, task_index)?;
        tracing::info!(job = %job_key, task_index, reset, "Retrying failed segments");
        self.wake();
        Ok(reset)
    }

    /// Drop every claim held by `worker_id`
    ///
    /// Segments the worker left in `processing` stay there until retried.
    pub async fn release_worker_claims(&self, worker_id: &str) -> usize {
        let mut state = self.state.lock().await;
        let before = state.claims.len();
        state.claims.retain(|_, w| w != worker_id);
        let released = before - state.claims.len();
        drop(state);

        if released > 0 {
            tracing::debug!(worker = %worker_id, released, "Released worker claims");
            self.wake();
        }
        released
    }

    pub async fn job_stats(&self, job_key: &str) -> Option<JobStats> {
        let state = self.state.lock().await;
        state.jobs.iter().find(|j| j.key() == job_key).map(Job::stats)
    }

    /// Snapshot of one active job
    pub async fn job(&self, job_key: &str) -> Option<Job> {
        let state = self.state.lock().await;
        state.jobs.iter().find(|j| j.key() == job_key).cloned()
    }

    /// Snapshot of all active jobs in queue order
    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    /// Archive of finished jobs, oldest first
    pub async fn records(&self) -> Vec<JobRecord> {
        self.state.lock().await.records.clone()
    }

    /// Worker currently holding a job
    pub async fn claimant(&self, job_key: &str) -> Option<String> {
        self.state.lock().await.claims.get(job_key).cloned()
    }

    /// Wait until no active jobs remain, or `cancel` fires
    pub async fn wait_until_idle(&self, cancel: &CancellationToken) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().await.jobs.is_empty() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut notified => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Glossary, UploadContext};
    use crate::source::{
        ChapterSource, ChapterToc, ChapterTranslateTask, ChapterTranslationUpdate, SourceError,
        SourceResult, TocEntry,
    };
    use crate::workspace::descriptor::TaskSource;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// In-memory wenku-style source
    #[derive(Default)]
    struct MemorySource {
        chapters: Vec<(String, Vec<String>, Option<String>)>,
        fail_listing: bool,
        /// Chapter whose upload is rejected
        fail_upload: Option<&'static str>,
        uploads: StdMutex<Vec<(String, Vec<String>)>>,
    }

    impl MemorySource {
        fn with_chapters(chapters: &[(&str, &[&str])]) -> Self {
            Self {
                chapters: chapters
                    .iter()
                    .map(|(id, lines)| {
                        (
                            id.to_string(),
                            lines.iter().map(|s| s.to_string()).collect(),
                            None,
                        )
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChapterSource for MemorySource {
        async fn list_chapters(&self, _: &TaskSource, _: BackendId) -> SourceResult<ChapterToc> {
            if self.fail_listing {
                return Err(SourceError::Request("offline".to_string()));
            }
            Ok(ChapterToc {
                glossary_id: "g1".to_string(),
                glossary: Glossary::new(),
                toc: self
                    .chapters
                    .iter()
                    .map(|(id, _, g)| TocEntry {
                        chapter_id: id.clone(),
                        glossary_id: g.clone(),
                    })
                    .collect(),
            })
        }

        async fn get_chapter_translate_task(
            &self,
            ctx: &UploadContext,
            _: BackendId,
        ) -> SourceResult<ChapterTranslateTask> {
            let (_, paragraphs, _) = self
                .chapters
                .iter()
                .find(|(id, _, _)| id == ctx.chapter_id())
                .ok_or_else(|| SourceError::ChapterNotFound(ctx.chapter_id().to_string()))?;
            Ok(ChapterTranslateTask {
                paragraphs: paragraphs.clone(),
                glossary_id: "g1".to_string(),
                ..Default::default()
            })
        }

        async fn update_chapter_translation(
            &self,
            ctx: &UploadContext,
            _: BackendId,
            update: ChapterTranslationUpdate,
        ) -> SourceResult<()> {
            if self.fail_upload == Some(ctx.chapter_id()) {
                return Err(SourceError::Request("upload rejected".to_string()));
            }
            self.uploads
                .lock()
                .unwrap()
                .push((ctx.chapter_id().to_string(), update.paragraphs));
            Ok(())
        }
    }

    fn registry(source: MemorySource) -> (WorkspaceRegistry, Arc<MemorySource>) {
        let source = Arc::new(source);
        let sources = ChapterSources::new().with_wenku(source.clone());
        (WorkspaceRegistry::new(sources), source)
    }

    fn descriptor() -> JobDescriptor {
        "sakura/wenku/n/v?level=all".parse().unwrap()
    }

    fn ok(req: &SegRequest) -> SegResult {
        SegResult::success(req.src.iter().map(|s| format!("译{s}")).collect(), vec![])
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let (registry, _) = registry(MemorySource::with_chapters(&[("c1", &["一"])]));
        assert!(registry.add_job(descriptor(), "vol").await);
        assert!(!registry.add_job(descriptor(), "vol").await);
        assert_eq!(registry.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_one_worker_per_job() {
        let (registry, _) = registry(MemorySource::with_chapters(&[
            ("c1", &["一"]),
            ("c2", &["二"]),
        ]));
        registry.add_job(descriptor(), "vol").await;

        let first = registry.request_seg("w1").await.unwrap();
        assert_eq!(first.task_index, 0);
        assert!(registry.request_seg("w2").await.is_none());

        let second = registry.request_seg("w1").await.unwrap();
        assert_eq!(second.task_index, 1);
        assert_eq!(registry.claimant(&first.job_key).await.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_one_segment_in_flight_per_task() {
        // 600 chars splits into two sakura segments
        let long = "あ".repeat(300);
        let (registry, _) = registry(MemorySource::with_chapters(&[(
            "c1",
            &[long.as_str(), long.as_str()],
        )]));
        registry.add_job(descriptor(), "vol").await;

        let first = registry.request_seg("w1").await.unwrap();
        assert_eq!(first.seg_index, 0);
        assert!(registry.request_seg("w1").await.is_none());

        registry
            .post_seg(&first.job_key, 0, 0, ok(&first))
            .await
            .unwrap();
        let second = registry.request_seg("w1").await.unwrap();
        assert_eq!(second.seg_index, 1);
        assert_eq!(second.prev_segs, vec![first.src.iter().map(|s| format!("译{s}")).collect::<Vec<_>>()]);
    }

    #[tokio::test]
    async fn test_segmentor_override() {
        let (registry, _) =
            registry(MemorySource::with_chapters(&[("c1", &["一二", "三四", "五六"])]));
        let registry = registry.with_segmentor(BackendId::Sakura, LengthSegmentor::new(4));
        assert_eq!(registry.segmentor(BackendId::Sakura).max_length, 4);
        assert_eq!(registry.segmentor(BackendId::Gpt), BackendId::Gpt.segmentor());

        registry.add_job(descriptor(), "vol").await;
        let req = registry.request_seg("w1").await.unwrap();
        assert_eq!(req.src, vec!["一二", "三四"]);

        let job = registry.job(&req.job_key).await.unwrap();
        assert_eq!(job.tasks[0].segs.len(), 2);
    }

    #[tokio::test]
    async fn test_completion_uploads_and_archives() {
        let (registry, source) =
            registry(MemorySource::with_chapters(&[("c1", &["一", "", "二"])]));
        registry.add_job(descriptor(), "vol").await;

        let req = registry.request_seg("w1").await.unwrap();
        registry.post_seg(&req.job_key, 0, 0, ok(&req)).await.unwrap();

        assert!(registry.jobs().await.is_empty());
        let records = registry.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].finished, records[0].failed, records[0].total), (1, 0, 1));

        let uploads = source.uploads.lock().unwrap();
        assert_eq!(uploads[0].1, vec!["译一", "", "译二"]);
        assert!(registry.claimant(&req.job_key).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_segment_fails_task_without_upload() {
        let (registry, source) = registry(MemorySource::with_chapters(&[("c1", &["一"])]));
        registry.add_job(descriptor(), "vol").await;

        let req = registry.request_seg("w1").await.unwrap();
        registry
            .post_seg(&req.job_key, 0, 0, SegResult::failed(vec!["boom".into()]))
            .await
            .unwrap();

        let records = registry.records().await;
        assert_eq!((records[0].finished, records[0].failed), (0, 1));
        assert!(source.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_fails_only_its_task() {
        let (registry, source) = registry(MemorySource {
            fail_upload: Some("c1"),
            ..MemorySource::with_chapters(&[("c1", &["一"]), ("c2", &["二"])])
        });
        registry.add_job(descriptor(), "vol").await;

        let first = registry.request_seg("w1").await.unwrap();
        registry
            .post_seg(&first.job_key, 0, 0, ok(&first))
            .await
            .unwrap();

        let job = registry.job(&first.job_key).await.unwrap();
        assert_eq!(job.tasks[0].state, TaskState::Failed);
        assert_eq!(job.tasks[1].state, TaskState::Pending);

        let second = registry.request_seg("w1").await.unwrap();
        assert_eq!(second.task_index, 1);
        registry
            .post_seg(&second.job_key, 1, 0, ok(&second))
            .await
            .unwrap();

        let records = registry.records().await;
        assert_eq!((records[0].finished, records[0].failed, records[0].total), (1, 1, 2));
        let uploads = source.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "c2");
    }

    #[tokio::test]
    async fn test_retry_failed_segments() {
        let (registry, _) = registry(MemorySource::with_chapters(&[
            ("c1", &["一"]),
            ("c2", &["二"]),
        ]));
        registry.add_job(descriptor(), "vol").await;

        let req = registry.request_seg("w1").await.unwrap();
        registry
            .post_seg(
                &req.job_key,
                0,
                0,
                SegResult::failed(vec!["boom".into()]).with_attempts(3),
            )
            .await
            .unwrap();
        let job = registry.job(&req.job_key).await.unwrap();
        assert_eq!(job.tasks[0].segs[0].retry_count, 3);

        let reset = registry.retry_failed_segments(&req.job_key, 0).await.unwrap();
        assert_eq!(reset, 1);

        let job = registry.job(&req.job_key).await.unwrap();
        assert_eq!(job.tasks[0].state, TaskState::Processing);
        assert!(job.tasks[0].segs[0].log.is_empty());
        assert_eq!(job.tasks[0].segs[0].retry_count, 0);

        let again = registry.request_seg("w1").await.unwrap();
        assert_eq!((again.task_index, again.seg_index), (0, 0));
    }

    #[tokio::test]
    async fn test_post_for_unleased_segment_rejected() {
        let (registry, _) = registry(MemorySource::with_chapters(&[
            ("c1", &["一"]),
            ("c2", &["二"]),
        ]));
        registry.add_job(descriptor(), "vol").await;

        let req = registry.request_seg("w1").await.unwrap();
        registry.post_seg(&req.job_key, 0, 0, ok(&req)).await.unwrap();

        let err = registry.post_seg(&req.job_key, 0, 0, ok(&req)).await;
        assert!(matches!(err, Err(WorkspaceError::SegmentNotLeased { .. })));

        let err = registry.post_seg("nope", 0, 0, SegResult::failed(vec![])).await;
        assert!(matches!(err, Err(WorkspaceError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_job_discarded_without_record() {
        let (registry, _) = registry(MemorySource::default());
        assert!(registry.add_job(descriptor(), "vol").await);
        assert!(registry.jobs().await.is_empty());
        assert!(registry.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_populate_failure_archived() {
        let (registry, _) = registry(MemorySource {
            fail_listing: true,
            ..Default::default()
        });
        registry.add_job(descriptor(), "vol").await;

        let records = registry.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].error.as_deref().unwrap().contains("offline"));
        assert_eq!(records[0].total, 0);
    }

    #[tokio::test]
    async fn test_blank_chapter_uploaded_empty() {
        let (registry, source) = registry(MemorySource::with_chapters(&[
            ("c1", &["", "<图片>a.png"]),
            ("c2", &["二"]),
        ]));
        registry.add_job(descriptor(), "vol").await;

        let req = registry.request_seg("w1").await.unwrap();
        assert_eq!(req.task_index, 1);

        let job = registry.job(&req.job_key).await.unwrap();
        assert_eq!(job.tasks[0].state, TaskState::Success);
        assert_eq!(source.uploads.lock().unwrap()[0].1, vec!["", "<图片>a.png"]);
    }

    #[tokio::test]
    async fn test_top_and_bottom_job() {
        let (registry, _) = registry(MemorySource::with_chapters(&[("c1", &["一"])]));
        let a: JobDescriptor = "sakura/wenku/n/v?level=all".parse().unwrap();
        let b: JobDescriptor = "gpt/wenku/n/v?level=all".parse().unwrap();
        registry.add_job(a.clone(), "a").await;
        registry.add_job(b.clone(), "b").await;

        assert!(registry.top_job(&b.to_string()).await);
        assert_eq!(registry.jobs().await[0].name, "b");
        let req = registry.request_seg("w1").await.unwrap();
        assert_eq!(req.backend, BackendId::Gpt);

        assert!(registry.bottom_job(&b.to_string()).await);
        assert_eq!(registry.jobs().await[1].name, "b");
        assert!(!registry.top_job("missing").await);
    }

    #[tokio::test]
    async fn test_release_claims_lets_other_worker_in() {
        let (registry, _) = registry(MemorySource::with_chapters(&[
            ("c1", &["一"]),
            ("c2", &["二"]),
        ]));
        registry.add_job(descriptor(), "vol").await;

        registry.request_seg("w1").await.unwrap();
        assert!(registry.request_seg("w2").await.is_none());

        assert_eq!(registry.release_worker_claims("w1").await, 1);
        let req = registry.request_seg("w2").await.unwrap();
        // The first task's segment is stuck in processing; w2 moves on
        assert_eq!(req.task_index, 1);
    }

    #[tokio::test]
    async fn test_delete_job() {
        let (registry, _) = registry(MemorySource::with_chapters(&[("c1", &["一"])]));
        registry.add_job(descriptor(), "vol").await;
        let req = registry.request_seg("w1").await.unwrap();

        assert!(registry.delete_job(&req.job_key).await);
        assert!(registry.claimant(&req.job_key).await.is_none());
        assert!(registry.post_seg(&req.job_key, 0, 0, ok(&req)).await.is_err());
        assert!(registry.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_next_segment_cancelled() {
        let (registry, _) = registry(MemorySource::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(registry.next_segment("w1", &cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_idle_next_segment_stays_parked() {
        let (registry, _) = registry(MemorySource::default());
        let cancel = CancellationToken::new();

        let waiter = {
            let registry = registry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.next_segment("w1", &cancel).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(!waiter.is_finished());
        assert_eq!(registry.state.lock().await.scans, 1);

        cancel.cancel();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_segment_wakes_on_new_job() {
        let (registry, _) = registry(MemorySource::with_chapters(&[("c1", &["一"])]));
        let cancel = CancellationToken::new();

        let waiter = {
            let registry = registry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.next_segment("w1", &cancel).await })
        };
        tokio::task::yield_now().await;
        registry.add_job(descriptor(), "vol").await;

        let req = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(req.is_some());
    }
}
