//! Job records and their lifecycle.
//!
//! A job moves `queued -> processing -> {completed, failed}`. Every mutating
//! method checks the current state and refuses transitions out of a terminal
//! state, so a late pipeline write after cancellation is a no-op.

use crate::assembly::{Artifact, AssembledDeck};
use crate::error::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slide_common::{GenerationRequest, Language, RenderedSlide, SlideSpec, Style};
use std::fmt;
use std::sync::Arc;

/// Opaque job identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Queued,
    Planning,
    Synthesizing,
    Assembling,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: PipelineStage,
    pub message: String,
    /// 0..=100, never decreases while the job is processing.
    pub percent: u8,
}

impl Progress {
    fn queued() -> Self {
        Self {
            stage: PipelineStage::Queued,
            message: "Waiting to start".to_string(),
            percent: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlideSummary {
    pub index: usize,
    pub title: String,
    pub body_outline: Vec<String>,
    /// False when the slide was dropped for lack of an image.
    pub included: bool,
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub artifact: Artifact,
    pub requested: usize,
    pub included: usize,
    pub dropped_indices: Vec<usize>,
    pub slides: Vec<SlideSummary>,
}

impl JobResult {
    pub fn new(deck: AssembledDeck, specs: &[Arc<SlideSpec>]) -> Self {
        let slides = specs
            .iter()
            .map(|spec| SlideSummary {
                index: spec.index,
                title: spec.title.clone(),
                body_outline: spec.body_outline.clone(),
                included: !deck.dropped_indices.contains(&spec.index),
            })
            .collect();
        Self {
            artifact: deck.artifact,
            requested: deck.requested,
            included: deck.included,
            dropped_indices: deck.dropped_indices,
            slides,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub request: Arc<GenerationRequest>,
    pub progress: Progress,
    pub slides: Vec<RenderedSlide>,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, request: GenerationRequest) -> Self {
        Self {
            id,
            state: JobState::Queued,
            request: Arc::new(request),
            progress: Progress::queued(),
            slides: Vec::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `queued -> processing`. Returns false if the job already left `queued`.
    pub fn start_processing(&mut self) -> bool {
        if self.state != JobState::Queued {
            return false;
        }
        self.state = JobState::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// Updates progress while processing; the percentage never moves backwards.
    pub fn advance(&mut self, stage: PipelineStage, message: impl Into<String>, percent: u8) {
        if self.state != JobState::Processing {
            return;
        }
        self.progress.stage = self.progress.stage.max(stage);
        self.progress.message = message.into();
        self.progress.percent = self.progress.percent.max(percent.min(100));
    }

    /// Fixes the slide list once planning succeeds.
    pub fn attach_slides(&mut self, specs: &[Arc<SlideSpec>]) -> bool {
        if self.state != JobState::Processing || !self.slides.is_empty() {
            return false;
        }
        self.slides = specs.iter().cloned().map(RenderedSlide::pending).collect();
        true
    }

    pub fn record_attempt(&mut self, index: usize, attempt: u32) {
        if self.state != JobState::Processing {
            return;
        }
        if let Some(slide) = self.slides.get_mut(index) {
            if !slide.is_finalized() {
                slide.attempts = slide.attempts.max(attempt);
            }
        }
    }

    /// Stores a slide's final outcome. A finalized slide is never overwritten.
    pub fn finalize_slide(&mut self, outcome: RenderedSlide) -> bool {
        if self.state != JobState::Processing {
            return false;
        }
        match self.slides.get_mut(outcome.index()) {
            Some(slot) if !slot.is_finalized() => {
                *slot = outcome;
                true
            }
            _ => false,
        }
    }

    pub fn finalized_slides(&self) -> usize {
        self.slides.iter().filter(|s| s.is_finalized()).count()
    }

    /// `processing -> completed`.
    pub fn complete(&mut self, result: JobResult) -> bool {
        if self.state != JobState::Processing {
            return false;
        }
        let message = if result.included == result.requested {
            format!("Presentation ready ({} slides)", result.included)
        } else {
            format!(
                "Presentation ready ({} of {} slides)",
                result.included, result.requested
            )
        };
        self.state = JobState::Completed;
        self.progress = Progress {
            stage: PipelineStage::Done,
            message,
            percent: 100,
        };
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// `queued | processing -> failed`. Progress keeps its last value.
    pub fn fail(&mut self, error: JobError) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = JobState::Failed;
        self.progress.stage = PipelineStage::Done;
        self.progress.message = error.message.clone();
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id.clone(),
            state: self.state,
            progress: self.progress.clone(),
            slides: self.slides.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            state: self.state,
            percent: self.progress.percent,
            message: self.progress.message.clone(),
            num_slides: self.request.num_slides,
            language: self.request.language,
            style: self.request.style,
            text_preview: self.request.text.chars().take(100).collect(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Read-only snapshot returned by status polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub progress: Progress,
    pub slides: Vec<RenderedSlide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub state: JobState,
    pub percent: u8,
    pub message: String,
    pub num_slides: u32,
    pub language: Language,
    pub style: Style,
    pub text_preview: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
