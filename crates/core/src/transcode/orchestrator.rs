//! Transcode orchestrator.
//!
//! Runs the per-video pipeline: download, probe, moderation sampling,
//! cover, normalize, ladder encode, upload, persist. Each run holds a slot
//! in a bounded worker pool and owns a scratch directory that is removed
//! when the run ends.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventPublisher, ModerationRequest, ModerationSubject, VideoEvent};
use crate::media::{sample_timestamps, MediaTool};
use crate::metrics;
use crate::storage::StorageGateway;
use crate::video::{
    Rendition, TranscodeCompletion, TranscodeStatus, Video, VideoStore, VideoStoreError,
};

use super::config::TranscodeConfig;
use super::error::{StepCause, StepError, TranscodeError, TranscodeStep};
use super::ladder::{fit_dimensions, select_rungs, ResolutionRung};
use super::scratch::{ScratchDir, ScratchFile};
use super::types::{OrchestratorStatus, RunHandle, SoftFailure, TranscodeReport};

/// Worker pool statistics.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

/// Shared state for every run.
struct Pipeline {
    config: TranscodeConfig,
    videos: Arc<dyn VideoStore>,
    storage: Arc<dyn StorageGateway>,
    tool: Arc<dyn MediaTool>,
    events: Arc<dyn EventPublisher>,
    semaphore: Arc<Semaphore>,
    stats: PoolStats,
    shutdown: CancellationToken,
    /// Videos with a run in this process.
    local_claims: Mutex<HashSet<String>>,
}

/// Marks a video as running in this process until dropped.
struct LocalClaim {
    pipeline: Arc<Pipeline>,
    video_id: String,
}

impl LocalClaim {
    fn acquire(pipeline: &Arc<Pipeline>, video_id: &str) -> Option<Self> {
        if !pipeline.local_claims().insert(video_id.to_string()) {
            return None;
        }
        Some(Self {
            pipeline: Arc::clone(pipeline),
            video_id: video_id.to_string(),
        })
    }
}

impl Drop for LocalClaim {
    fn drop(&mut self) {
        self.pipeline.local_claims().remove(&self.video_id);
    }
}

/// Starts and tracks transcode runs.
pub struct TranscodeOrchestrator {
    pipeline: Arc<Pipeline>,
}

impl TranscodeOrchestrator {
    pub fn new(
        config: TranscodeConfig,
        videos: Arc<dyn VideoStore>,
        storage: Arc<dyn StorageGateway>,
        tool: Arc<dyn MediaTool>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Self {
            pipeline: Arc::new(Pipeline {
                config,
                videos,
                storage,
                tool,
                events,
                semaphore,
                stats: PoolStats::default(),
                shutdown: CancellationToken::new(),
                local_claims: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.pipeline.config
    }

    /// Claim the video under a fresh claim id and spawn its run.
    pub fn start(&self, video_id: &str) -> Result<RunHandle, TranscodeError> {
        self.start_claimed(video_id, &uuid::Uuid::new_v4().to_string())
    }

    /// Claim the video for `claimant` and spawn its run.
    ///
    /// The claim is an atomic `pending|failed -> processing` transition, so
    /// a second trigger for a video that is already processing (or done)
    /// fails with [`TranscodeError::AlreadyProcessing`] and starts nothing.
    /// A `processing` claim left by the same claimant is taken over unless
    /// its run is still alive in this process.
    pub fn start_claimed(&self, video_id: &str, claimant: &str) -> Result<RunHandle, TranscodeError> {
        let pipeline = &self.pipeline;
        if pipeline.shutdown.is_cancelled() {
            return Err(TranscodeError::ShuttingDown(video_id.to_string()));
        }

        let video = pipeline
            .videos
            .get(video_id)
            .map_err(TranscodeError::Database)?
            .ok_or_else(|| TranscodeError::VideoNotFound(video_id.to_string()))?;

        let Some(local) = LocalClaim::acquire(pipeline, video_id) else {
            debug!(video_id = %video_id, "Transcode already running in this process");
            return Err(TranscodeError::AlreadyProcessing(video_id.to_string()));
        };

        match pipeline.videos.try_begin_processing(video_id, claimant) {
            Ok(true) => {}
            Ok(false) => {
                debug!(video_id = %video_id, status = %video.transcode_status, claimed_by = ?video.claimed_by, "Transcode not started");
                return Err(TranscodeError::AlreadyProcessing(video_id.to_string()));
            }
            Err(VideoStoreError::NotFound(_)) => {
                return Err(TranscodeError::VideoNotFound(video_id.to_string()));
            }
            Err(e) => return Err(TranscodeError::Database(e)),
        }

        if video.transcode_status == TranscodeStatus::Processing {
            warn!(video_id = %video_id, claimant = %claimant, "Taking over an abandoned transcode claim");
        }
        info!(video_id = %video_id, tenant_id = %video.tenant_id, claimant = %claimant, "Transcode run claimed");

        let cancel = pipeline.shutdown.child_token();
        let run_cancel = cancel.clone();
        let pipeline = Arc::clone(pipeline);
        let claimant = claimant.to_string();
        pipeline.stats.queued.fetch_add(1, Ordering::Relaxed);
        let join = tokio::spawn(async move {
            let _local = local;
            pipeline.execute(video, &claimant, run_cancel).await
        });

        Ok(RunHandle::new(video_id.to_string(), cancel, join))
    }

    /// Claim the video and wait for its run to finish.
    pub async fn run(&self, video_id: &str) -> Result<TranscodeReport, TranscodeError> {
        self.start(video_id)?.wait().await
    }

    /// Claim the video for `claimant` and wait for its run to finish.
    pub async fn run_claimed(
        &self,
        video_id: &str,
        claimant: &str,
    ) -> Result<TranscodeReport, TranscodeError> {
        self.start_claimed(video_id, claimant)?.wait().await
    }

    /// Whether a run for the video is alive in this process.
    pub fn is_running(&self, video_id: &str) -> bool {
        self.pipeline.local_claims().contains(video_id)
    }

    /// Cancel every in-flight and waiting run. Their claims go back to
    /// `pending` and no new run starts afterwards.
    pub fn shutdown(&self) {
        info!("Cancelling transcode runs");
        self.pipeline.shutdown.cancel();
    }

    pub fn status(&self) -> OrchestratorStatus {
        let stats = &self.pipeline.stats;
        OrchestratorStatus {
            max_concurrent_runs: self.pipeline.config.max_concurrent_runs.max(1),
            active_runs: stats.active.load(Ordering::Relaxed),
            queued_runs: stats.queued.load(Ordering::Relaxed),
            total_completed: stats.total_completed.load(Ordering::Relaxed),
            total_failed: stats.total_failed.load(Ordering::Relaxed),
        }
    }
}

impl Pipeline {
    fn local_claims(&self) -> MutexGuard<'_, HashSet<String>> {
        self.local_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(
        &self,
        video: Video,
        claimant: &str,
        cancel: CancellationToken,
    ) -> Result<TranscodeReport, TranscodeError> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };
        self.stats.queued.fetch_sub(1, Ordering::Relaxed);

        let Some(_permit) = permit else {
            let err = StepError::new(&video.id, TranscodeStep::Start, StepCause::Cancelled);
            return Err(self.fail_run(&video, claimant, err, 0.0).await);
        };

        self.stats.active.fetch_add(1, Ordering::Relaxed);
        metrics::TRANSCODE_ACTIVE_RUNS.inc();
        let started = Instant::now();

        info!(video_id = %video.id, source_key = %video.source_key, "Transcode run started");
        let result = self.run_steps(&video, &cancel, started).await;

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        metrics::TRANSCODE_ACTIVE_RUNS.dec();
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(report) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                metrics::TRANSCODE_RUNS.with_label_values(&["completed"]).inc();
                metrics::TRANSCODE_DURATION
                    .with_label_values(&["completed"])
                    .observe(elapsed);
                info!(
                    video_id = %video.id,
                    renditions = report.renditions.len(),
                    soft_failures = report.soft_failures.len(),
                    elapsed_ms = report.elapsed_ms,
                    "Transcode run completed"
                );
                Ok(report)
            }
            Err(err) => Err(self.fail_run(&video, claimant, err, elapsed).await),
        }
    }

    /// Mark the video failed after a hard failure or cancellation.
    ///
    /// A run cut short by shutdown is not a failure: its claim goes back to
    /// `pending` for the redelivered task.
    async fn fail_run(
        &self,
        video: &Video,
        claimant: &str,
        err: StepError,
        elapsed: f64,
    ) -> TranscodeError {
        let cancelled = err.is_cancelled();
        if cancelled && self.shutdown.is_cancelled() {
            return self.interrupt_run(video, claimant, err.step, elapsed);
        }

        let message = if cancelled {
            "cancelled".to_string()
        } else {
            err.to_string()
        };

        if cancelled {
            warn!(video_id = %video.id, step = %err.step, "Transcode run cancelled");
        } else {
            error!(video_id = %video.id, step = %err.step, error = %err.cause, "Transcode run failed");
            metrics::TRANSCODE_STEP_FAILURES
                .with_label_values(&[err.step.as_str(), "hard"])
                .inc();
        }

        if let Err(e) = self.videos.fail_transcode(&video.id, &message) {
            error!(video_id = %video.id, error = %e, "Failed to record transcode failure");
        }

        if let Err(e) = self
            .events
            .publish_video_event(&VideoEvent::failed(&video.id, &video.tenant_id))
            .await
        {
            warn!(video_id = %video.id, error = %e, "Failed to publish failure event");
        }

        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        metrics::TRANSCODE_RUNS.with_label_values(&["failed"]).inc();
        metrics::TRANSCODE_DURATION
            .with_label_values(&["failed"])
            .observe(elapsed);

        if cancelled {
            TranscodeError::Cancelled(video.id.clone())
        } else {
            TranscodeError::Step(err)
        }
    }

    fn interrupt_run(
        &self,
        video: &Video,
        claimant: &str,
        step: TranscodeStep,
        elapsed: f64,
    ) -> TranscodeError {
        match self.videos.release_claim(&video.id, claimant) {
            Ok(true) => {
                warn!(video_id = %video.id, step = %step, "Transcode run interrupted by shutdown, claim released");
            }
            Ok(false) => {
                warn!(video_id = %video.id, step = %step, "Transcode run interrupted by shutdown, claim already gone");
            }
            Err(e) => {
                error!(video_id = %video.id, error = %e, "Failed to release transcode claim");
            }
        }

        metrics::TRANSCODE_RUNS.with_label_values(&["interrupted"]).inc();
        metrics::TRANSCODE_DURATION
            .with_label_values(&["interrupted"])
            .observe(elapsed);
        TranscodeError::ShuttingDown(video.id.clone())
    }

    async fn run_steps(
        &self,
        video: &Video,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<TranscodeReport, StepError> {
        let id = video.id.as_str();
        let mut soft = SoftFailures::new(id);

        if let Err(e) = self
            .events
            .publish_video_event(&VideoEvent::processing(id, &video.tenant_id))
            .await
        {
            soft.record(TranscodeStep::Start, e.into());
        }

        let scratch = ScratchDir::create(&self.config.scratch_dir, id)
            .map_err(|e| StepError::new(id, TranscodeStep::Download, e))?;

        // Download
        check_cancelled(id, TranscodeStep::Download, cancel)?;
        let source = scratch.file("source");
        let downloaded = self
            .download(&video.source_key, source.path(), cancel)
            .await
            .map_err(|e| StepError::new(id, TranscodeStep::Download, e))?;
        debug!(video_id = %id, bytes = downloaded, "Source downloaded");

        // Probe
        check_cancelled(id, TranscodeStep::Probe, cancel)?;
        let probe = self
            .tool
            .probe(source.path(), cancel)
            .await
            .map_err(|e| StepError::new(id, TranscodeStep::Probe, e))?;
        info!(
            video_id = %id,
            width = probe.width,
            height = probe.height,
            duration_secs = probe.duration_secs,
            "Source probed"
        );

        // Moderation samples
        check_cancelled(id, TranscodeStep::Moderation, cancel)?;
        if let Err(e) = self
            .moderate_source(video, &scratch, source.path(), probe.duration_secs, cancel)
            .await
        {
            soft.record(TranscodeStep::Moderation, e);
        }

        // Cover
        check_cancelled(id, TranscodeStep::Cover, cancel)?;
        let cover_key = match self.extract_cover(id, &scratch, source.path(), cancel).await {
            Ok(key) => Some(key),
            Err(e) => {
                soft.record(TranscodeStep::Cover, e);
                None
            }
        };
        if let Some(key) = &cover_key {
            let request = ModerationRequest::new(
                id,
                &video.tenant_id,
                ModerationSubject::Cover,
                vec![self.storage.get_url(key)],
            );
            if let Err(e) = self.events.request_moderation(&request).await {
                soft.record(TranscodeStep::Moderation, e.into());
            }
        }

        // Normalize, falling back to the original source
        check_cancelled(id, TranscodeStep::Normalize, cancel)?;
        let normalized = scratch.file("normalized.mp4");
        let master: &Path = match self
            .tool
            .normalize(source.path(), normalized.path(), cancel)
            .await
        {
            Ok(()) => normalized.path(),
            Err(e) if e.is_cancelled() => {
                return Err(StepError::new(id, TranscodeStep::Normalize, e));
            }
            Err(e) => {
                soft.record(TranscodeStep::Normalize, e.into());
                source.path()
            }
        };

        // Encode
        let rungs = select_rungs(&self.config.ladder, probe.width, probe.height);
        debug!(
            video_id = %id,
            rungs = ?rungs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "Selected ladder rungs"
        );

        let mut encoded: Vec<(ResolutionRung, u32, u32, ScratchFile)> = Vec::new();
        for rung in rungs {
            check_cancelled(id, TranscodeStep::Encode, cancel)?;
            let (width, height) = fit_dimensions(probe.width, probe.height, rung.width, rung.height);
            let output = scratch.file(&format!("rendition{}.mp4", rung.suffix));

            match self
                .tool
                .encode_rendition(master, output.path(), width, height, cancel)
                .await
            {
                Ok(()) => {
                    debug!(video_id = %id, rendition = %rung.name, width, height, "Rendition encoded");
                    encoded.push((rung, width, height, output));
                }
                Err(e) if e.is_cancelled() => {
                    return Err(StepError::new(id, TranscodeStep::Encode, e));
                }
                Err(e) => soft.record(TranscodeStep::Encode, e.into()),
            }
        }

        // Upload; each file is removed right after its upload attempt
        let mut renditions = Vec::new();
        for (rung, width, height, file) in encoded {
            check_cancelled(id, TranscodeStep::Upload, cancel)?;
            let key = self.config.rendition_key(id, &rung);
            match self.storage.upload_file(file.path(), &key, "video/mp4").await {
                Ok(size_bytes) => {
                    metrics::RENDITIONS_PRODUCED
                        .with_label_values(&[rung.name.as_str()])
                        .inc();
                    renditions.push(Rendition {
                        name: rung.name,
                        storage_key: key,
                        width,
                        height,
                        size_bytes,
                    });
                }
                Err(e) => soft.record(TranscodeStep::Upload, e.into()),
            }
            drop(file);
        }

        check_cancelled(id, TranscodeStep::Complete, cancel)?;
        let Some(main) = renditions.first().cloned() else {
            return Err(StepError::new(id, TranscodeStep::Complete, StepCause::NoRenditions));
        };

        // Persist and notify. The uploads are done, so failures here are
        // logged rather than failing the run.
        let completion = TranscodeCompletion {
            duration_secs: probe.duration_secs,
            width: main.width,
            height: main.height,
            size_bytes: main.size_bytes,
            renditions: renditions.clone(),
        };
        if let Err(e) = self.videos.complete_transcode(id, &completion) {
            error!(video_id = %id, error = %e, "Failed to persist transcode result");
            soft.record(TranscodeStep::Persist, e.into());
        }

        let event = VideoEvent::completed(
            id,
            &video.tenant_id,
            probe.duration_secs,
            main.width,
            main.height,
        );
        if let Err(e) = self.events.publish_video_event(&event).await {
            soft.record(TranscodeStep::Notify, e.into());
        }

        Ok(TranscodeReport {
            video_id: id.to_string(),
            duration_secs: probe.duration_secs,
            renditions,
            cover_key,
            soft_failures: soft.into_inner(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Stream the source object into a local file.
    async fn download(
        &self,
        key: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StepCause> {
        let copy = async {
            let mut reader = self.storage.get(key).await?;
            let mut file = tokio::fs::File::create(path).await?;
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, StepCause>(bytes)
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(StepCause::Cancelled),
            result = copy => result,
        }
    }

    /// Sample frames across the source, upload them, and request a
    /// moderation check on them.
    ///
    /// A frame that cannot be extracted or uploaded is skipped. The step
    /// fails only if every frame does.
    async fn moderate_source(
        &self,
        video: &Video,
        scratch: &ScratchDir,
        source: &Path,
        duration_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<(), StepCause> {
        let timestamps = sample_timestamps(duration_secs, self.config.sample_frames);
        let mut urls = Vec::with_capacity(timestamps.len());
        let mut last_error = None;

        for (i, at) in timestamps.into_iter().enumerate() {
            let n = i + 1;
            let frame = scratch.file(&format!("frame_{}.jpg", n));

            if let Err(e) = self.tool.extract_frame(source, at, frame.path(), cancel).await {
                debug!(video_id = %video.id, frame = n, error = %e, "Sample frame extraction failed");
                last_error = Some(StepCause::from(e));
                continue;
            }

            let key = self.config.sample_key(&video.id, n);
            match self.storage.upload_file(frame.path(), &key, "image/jpeg").await {
                Ok(_) => urls.push(self.storage.get_url(&key)),
                Err(e) => {
                    debug!(video_id = %video.id, frame = n, error = %e, "Sample frame upload failed");
                    last_error = Some(StepCause::from(e));
                }
            }
        }

        if urls.is_empty() {
            return match last_error {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }

        debug!(video_id = %video.id, frames = urls.len(), "Requesting source moderation");
        let request = ModerationRequest::new(
            &video.id,
            &video.tenant_id,
            ModerationSubject::SourceFrames,
            urls,
        );
        self.events.request_moderation(&request).await?;
        Ok(())
    }

    /// Extract, upload and record the cover image. Returns its key.
    async fn extract_cover(
        &self,
        video_id: &str,
        scratch: &ScratchDir,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, StepCause> {
        let cover = scratch.file("cover.jpg");
        self.tool.extract_cover(source, cover.path(), cancel).await?;

        let key = self.config.cover_key(video_id);
        self.storage
            .upload_file(cover.path(), &key, "image/jpeg")
            .await?;
        self.videos.set_cover_key(video_id, &key)?;

        debug!(video_id = %video_id, cover_key = %key, "Cover stored");
        Ok(key)
    }
}

fn check_cancelled(
    video_id: &str,
    step: TranscodeStep,
    cancel: &CancellationToken,
) -> Result<(), StepError> {
    if cancel.is_cancelled() {
        return Err(StepError::new(video_id, step, StepCause::Cancelled));
    }
    Ok(())
}

/// Collects soft step failures for the run report.
struct SoftFailures<'a> {
    video_id: &'a str,
    failures: Vec<SoftFailure>,
}

impl<'a> SoftFailures<'a> {
    fn new(video_id: &'a str) -> Self {
        Self {
            video_id,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, step: TranscodeStep, cause: StepCause) {
        warn!(video_id = %self.video_id, step = %step, error = %cause, "Transcode step failed, continuing");
        metrics::TRANSCODE_STEP_FAILURES
            .with_label_values(&[step.as_str(), "soft"])
            .inc();
        self.failures.push(SoftFailure {
            step,
            message: cause.to_string(),
        });
    }

    fn into_inner(self) -> Vec<SoftFailure> {
        self.failures
    }
}
