//! Job orchestration.
//!
//! `submit` validates a request, registers a `queued` job and spawns its
//! pipeline; callers poll `status` until the job is terminal. The pipeline
//! runs planning, then the synthesis fan-out, then assembly, recording
//! progress in the store after every stage and every slide attempt.

use crate::assembly::{AssemblyStage, DocumentAssembler};
use crate::config::PipelineConfig;
use crate::error::{JobError, Result, SlideError};
use crate::job::{JobId, JobResult, JobState, JobStatus, JobSummary, PipelineStage};
use crate::job_store::JobStore;
use crate::planning::{ContentPlanningStage, PlanningModel};
use crate::synthesis::{
    ImageModel, ImageSynthesisStage, RetryPolicy, SynthesisEvent, SynthesisSettings,
};
use dashmap::DashMap;
use slide_common::{GenerationRequest, SlideSpec};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::AbortHandle;

const PLANNING_STARTED: u8 = 5;
const PLANNING_DONE: u8 = 15;
const SYNTHESIS_SPAN: usize = 75;
const ASSEMBLY_STARTED: u8 = 92;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelAck {
    Cancelled,
    /// The job had already reached this terminal state; nothing changed.
    AlreadyFinished(JobState),
}

struct Pipeline {
    store: Arc<JobStore>,
    planning: ContentPlanningStage,
    synthesis: ImageSynthesisStage,
    assembly: Arc<AssemblyStage>,
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    running: Arc<DashMap<JobId, AbortHandle>>,
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<JobStore>,
        planner: Arc<dyn PlanningModel>,
        images: Arc<dyn ImageModel>,
        assembler: Arc<dyn DocumentAssembler>,
    ) -> Self {
        let planning =
            ContentPlanningStage::new(planner, config.max_slides, config.planning_timeout());
        let mut synthesis = ImageSynthesisStage::new(
            images,
            SynthesisSettings {
                retry: RetryPolicy {
                    max_attempts: config.max_attempts,
                    base_delay: config.backoff_base(),
                    max_delay: config.backoff_max(),
                },
                call_timeout: config.image_call_timeout(),
                concurrency_cap: config.concurrency_cap,
                stage_timeout: config.synthesis_stage_timeout(),
            },
        );
        if let Some(cap) = config.global_concurrency_cap {
            synthesis = synthesis.with_global_limit(Arc::new(Semaphore::new(cap.max(1))));
        }
        let assembly = Arc::new(AssemblyStage::new(assembler, config.max_missing_ratio));

        Self {
            pipeline: Arc::new(Pipeline {
                store,
                planning,
                synthesis,
                assembly,
            }),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.pipeline.store
    }

    /// Validates the request, creates a `queued` job and launches its pipeline.
    /// Returns without waiting for any pipeline work.
    pub fn submit(&self, request: GenerationRequest) -> Result<JobId> {
        self.pipeline
            .planning
            .validate(&request.text, request.num_slides)
            .map_err(|e| SlideError::invalid_request(e.to_string()))?;

        let job = self.pipeline.store.create(request);
        let id = job.id.clone();
        tracing::info!(
            job_id = %id,
            num_slides = job.request.num_slides,
            language = %job.request.language,
            style = %job.request.style,
            "job submitted"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let request = Arc::clone(&job.request);
        let run_id = id.clone();
        let handle = tokio::spawn(async move { pipeline.run(run_id, request).await });
        self.running.insert(id.clone(), handle.abort_handle());

        // Watches the pipeline task so a panic still settles the job.
        let store = Arc::clone(&self.pipeline.store);
        let running = Arc::clone(&self.running);
        let watch_id = id.clone();
        tokio::spawn(async move {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::error!(job_id = %watch_id, "pipeline task panicked");
                    let _ = store
                        .update(&watch_id, |job| {
                            job.fail(JobError::internal("pipeline task panicked"))
                        })
                        .await;
                }
            }
            running.remove(&watch_id);
        });

        Ok(id)
    }

    pub async fn status(&self, id: &JobId) -> Result<JobStatus> {
        self.pipeline.store.read(id, |job| job.status()).await
    }

    /// The result of a completed job; `NotReady` for any other state.
    pub async fn result(&self, id: &JobId) -> Result<JobResult> {
        self.pipeline
            .store
            .read(id, |job| match (&job.state, &job.result) {
                (JobState::Completed, Some(result)) => Ok(result.clone()),
                (state, _) => Err(SlideError::NotReady {
                    id: id.clone(),
                    state: *state,
                }),
            })
            .await?
    }

    /// Best-effort cancel: the job settles into `failed{Cancelled}` and its
    /// in-flight collaborator calls are abandoned.
    pub async fn cancel(&self, id: &JobId) -> Result<CancelAck> {
        let ack = self
            .pipeline
            .store
            .update(id, |job| {
                if job.fail(JobError::cancelled()) {
                    CancelAck::Cancelled
                } else {
                    CancelAck::AlreadyFinished(job.state)
                }
            })
            .await?;

        if ack == CancelAck::Cancelled {
            if let Some((_, handle)) = self.running.remove(id) {
                handle.abort();
            }
            tracing::info!(job_id = %id, "job cancelled");
        }
        Ok(ack)
    }

    pub async fn list(&self) -> Vec<JobSummary> {
        self.pipeline.store.list().await
    }

    /// Number of pipelines still running.
    pub fn active(&self) -> usize {
        self.running.len()
    }
}

impl Pipeline {
    async fn run(&self, id: JobId, request: Arc<GenerationRequest>) {
        match self.store.update(&id, |job| job.start_processing()).await {
            Ok(true) => {}
            // Cancelled (or evicted) before it started.
            _ => return,
        }

        let outcome = self.execute(&id, &request).await;
        let settled = self
            .store
            .update(&id, |job| match outcome {
                Ok(result) => job.complete(result),
                Err(err) => {
                    tracing::warn!(job_id = %id, kind = ?err.kind, error = %err, "job failed");
                    job.fail(err)
                }
            })
            .await;

        match settled {
            Ok(true) => tracing::info!(job_id = %id, "job settled"),
            Ok(false) => tracing::debug!(job_id = %id, "job already terminal; outcome discarded"),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "job vanished before settling"),
        }
    }

    async fn progress(&self, id: &JobId, stage: PipelineStage, message: String, percent: u8) {
        let _ = self
            .store
            .update(id, |job| job.advance(stage, message, percent))
            .await;
    }

    async fn execute(
        &self,
        id: &JobId,
        request: &GenerationRequest,
    ) -> std::result::Result<JobResult, JobError> {
        self.progress(
            id,
            PipelineStage::Planning,
            "Analyzing content structure".to_string(),
            PLANNING_STARTED,
        )
        .await;
        let specs: Vec<Arc<SlideSpec>> = self
            .planning
            .plan(&request.text, request.num_slides, request.language, request.style)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();
        let total = specs.len();

        let attached = self
            .store
            .update(id, |job| {
                let attached = job.attach_slides(&specs);
                job.advance(
                    PipelineStage::Synthesizing,
                    format!("Planned {total} slides; generating images"),
                    PLANNING_DONE,
                );
                attached
            })
            .await
            .map_err(|e| JobError::internal(e.to_string()))?;
        if !attached {
            return Err(JobError::internal("job left processing during planning"));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fan_out = self
            .synthesis
            .synthesize_all(&specs, request.aspect_ratio, tx);
        let track = async {
            let mut finalized = 0usize;
            while let Some(event) = rx.recv().await {
                self.apply_event(id, event, &mut finalized, total).await;
            }
        };
        let (rendered, ()) = tokio::join!(fan_out, track);

        self.progress(
            id,
            PipelineStage::Assembling,
            "Creating presentation file".to_string(),
            ASSEMBLY_STARTED,
        )
        .await;
        let assembly = Arc::clone(&self.assembly);
        let owned_request = request.clone();
        let file_stem = format!("presentation_{id}");
        let deck = tokio::task::spawn_blocking(move || {
            assembly.assemble(&rendered, &owned_request, &file_stem)
        })
        .await
        .map_err(|e| JobError::internal(format!("assembly task failed: {e}")))??;

        tracing::info!(
            job_id = %id,
            requested = deck.requested,
            included = deck.included,
            bytes = deck.artifact.len(),
            "deck assembled"
        );
        Ok(JobResult::new(deck, &specs))
    }

    async fn apply_event(
        &self,
        id: &JobId,
        event: SynthesisEvent,
        finalized: &mut usize,
        total: usize,
    ) {
        let percent = |done: usize| -> u8 {
            let span = SYNTHESIS_SPAN * done / total.max(1);
            PLANNING_DONE.saturating_add(u8::try_from(span).unwrap_or(u8::MAX))
        };
        match event {
            SynthesisEvent::AttemptStarted { index, attempt } => {
                let done = *finalized;
                let message = if attempt == 1 {
                    format!("Generating image for slide {}/{total}", index + 1)
                } else {
                    format!(
                        "Generating image for slide {}/{total} (attempt {attempt})",
                        index + 1
                    )
                };
                let _ = self
                    .store
                    .update(id, |job| {
                        job.record_attempt(index, attempt);
                        job.advance(PipelineStage::Synthesizing, message, percent(done));
                    })
                    .await;
            }
            SynthesisEvent::AttemptFailed {
                index,
                attempt,
                reason,
                will_retry,
            } => {
                tracing::debug!(job_id = %id, slide = index + 1, attempt, will_retry, %reason, "image attempt failed");
                if will_retry {
                    let message = format!("Slide {} attempt {attempt} failed; retrying", index + 1);
                    self.progress(id, PipelineStage::Synthesizing, message, percent(*finalized))
                        .await;
                }
            }
            SynthesisEvent::Finalized(slide) => {
                *finalized += 1;
                let done = *finalized;
                let message = match &slide.failure_reason {
                    None => format!("Slide {} image ready ({done}/{total})", slide.index() + 1),
                    Some(reason) => format!(
                        "Slide {} image failed: {reason} ({done}/{total})",
                        slide.index() + 1
                    ),
                };
                let _ = self
                    .store
                    .update(id, |job| {
                        job.finalize_slide(slide);
                        job.advance(PipelineStage::Synthesizing, message, percent(done));
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use crate::deck::HtmlDeckAssembler;
    use crate::mock::{MockImageModel, MockPlanningModel};
    use std::time::Duration;

    fn orchestrator(images: MockImageModel) -> Orchestrator {
        let config = PipelineConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..PipelineConfig::default()
        };
        Orchestrator::new(
            &config,
            JobStore::new(RetentionConfig::default()),
            Arc::new(MockPlanningModel::new()),
            Arc::new(images),
            Arc::new(HtmlDeckAssembler::new()),
        )
    }

    async fn wait_terminal(orch: &Orchestrator, id: &JobId) -> JobStatus {
        for _ in 0..500 {
            let status = orch.status(id).await.unwrap();
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let orch = orchestrator(MockImageModel::new());
        let id = orch
            .submit(GenerationRequest::new("Rust at scale. Ownership. Async.", 3))
            .unwrap();

        let status = wait_terminal(&orch, &id).await;
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress.percent, 100);
        assert!(status.slides.iter().all(|s| s.attempts == 1));

        let result = orch.result(&id).await.unwrap();
        assert_eq!(result.included, 3);
        assert!(result.artifact.file_name.ends_with(".html"));
    }

    #[tokio::test]
    async fn test_result_before_completion_is_not_ready() {
        let orch = orchestrator(MockImageModel::new().with_delay(Duration::from_millis(200)));
        let id = orch.submit(GenerationRequest::new("text", 2)).unwrap();
        let err = orch.result(&id).await.unwrap_err();
        assert!(matches!(err, SlideError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_cancel_settles_job_and_stops_pipeline() {
        let images = Arc::new(MockImageModel::new().with_delay(Duration::from_secs(5)));
        let orch = Orchestrator::new(
            &PipelineConfig::default(),
            JobStore::new(RetentionConfig::default()),
            Arc::new(MockPlanningModel::new()),
            images.clone(),
            Arc::new(HtmlDeckAssembler::new()),
        );
        let id = orch.submit(GenerationRequest::new("text", 3)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(orch.cancel(&id).await.unwrap(), CancelAck::Cancelled);
        let status = orch.status(&id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(
            status.error.map(|e| e.kind),
            Some(crate::error::JobErrorKind::Cancelled)
        );

        assert_eq!(
            orch.cancel(&id).await.unwrap(),
            CancelAck::AlreadyFinished(JobState::Failed)
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orch.active(), 0);
        assert_eq!(orch.status(&id).await.unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let orch = orchestrator(MockImageModel::new());
        let id = JobId::from("nope");
        assert!(matches!(
            orch.status(&id).await,
            Err(SlideError::NotFound { .. })
        ));
        assert!(matches!(
            orch.cancel(&id).await,
            Err(SlideError::NotFound { .. })
        ));
    }
}
