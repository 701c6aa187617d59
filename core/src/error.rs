use crate::config::ConfigError;
use crate::job::{JobId, JobState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the orchestrator's public operations.
#[derive(Error, Debug)]
pub enum SlideError {
    /// Request rejected synchronously at submit; no job was created
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Unknown id, or the job was evicted after its retention window
    #[error("Job not found: {id}")]
    NotFound { id: JobId },

    #[error("Job {id} has no result (state: {state})")]
    NotReady { id: JobId, state: JobState },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SlideError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        SlideError::InvalidRequest {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SlideError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Invalid planning input: {reason}")]
    InvalidInput { reason: String },

    #[error("Malformed planning response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Planning service unavailable: {reason}")]
    UpstreamUnavailable { reason: String },
}

impl PlanningError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        PlanningError::MalformedResponse {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        PlanningError::UpstreamUnavailable {
            reason: reason.into(),
        }
    }
}

/// Failure of a single image call. Never fails a job on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Image call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Rate limiting, 5xx, dropped connections
    #[error("Transient image failure: {reason}")]
    Transient { reason: String },

    #[error("Image request rejected: {reason}")]
    Rejected { reason: String },
}

impl SynthesisError {
    pub fn timeout(after: Duration) -> Self {
        SynthesisError::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        SynthesisError::Transient {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        SynthesisError::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SynthesisError::Timeout { .. } | SynthesisError::Transient { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("Insufficient content: {included} of {requested} slides rendered")]
    InsufficientContent { requested: usize, included: usize },

    #[error("Assembly failed: {reason}")]
    InternalFault { reason: String },
}

impl AssemblyError {
    pub fn internal(reason: impl Into<String>) -> Self {
        AssemblyError::InternalFault {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningErrorKind {
    MalformedResponse,
    UpstreamUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyErrorKind {
    InsufficientContent,
    InternalFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Planning(PlanningErrorKind),
    Assembly(AssemblyErrorKind),
    Cancelled,
    InternalFault,
}

/// Terminal error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(JobErrorKind::Cancelled, "cancelled by caller")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InternalFault, message)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<PlanningError> for JobError {
    fn from(err: PlanningError) -> Self {
        let kind = match &err {
            PlanningError::MalformedResponse { .. } => {
                JobErrorKind::Planning(PlanningErrorKind::MalformedResponse)
            }
            PlanningError::UpstreamUnavailable { .. } => {
                JobErrorKind::Planning(PlanningErrorKind::UpstreamUnavailable)
            }
            // Submit validates first, so bad input here is a bug.
            PlanningError::InvalidInput { .. } => JobErrorKind::InternalFault,
        };
        JobError::new(kind, err.to_string())
    }
}

impl From<AssemblyError> for JobError {
    fn from(err: AssemblyError) -> Self {
        let kind = match &err {
            AssemblyError::InsufficientContent { .. } => {
                JobErrorKind::Assembly(AssemblyErrorKind::InsufficientContent)
            }
            AssemblyError::InternalFault { .. } => {
                JobErrorKind::Assembly(AssemblyErrorKind::InternalFault)
            }
        };
        JobError::new(kind, err.to_string())
    }
}
