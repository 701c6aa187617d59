//! Text-to-deck job pipeline: planning, per-slide image synthesis and
//! assembly, driven as pollable background jobs.

pub mod assembly;
pub mod client;
pub mod config;
pub mod deck;
pub mod error;
pub mod job;
pub mod job_store;
pub mod mock;
pub mod orchestrator;
pub mod planning;
pub mod pptx;
pub mod synthesis;
pub mod util;

pub use assembly::{Artifact, AssemblyStage, DeckFormat, DocumentAssembler};
pub use config::{Config, ConfigError, PipelineConfig, RetentionConfig};
pub use deck::HtmlDeckAssembler;
pub use error::{JobError, JobErrorKind, Result, SlideError};
pub use job::{JobId, JobResult, JobState, JobStatus, JobSummary};
pub use job_store::JobStore;
pub use orchestrator::{CancelAck, Orchestrator};
pub use planning::{ContentPlanningStage, PlanningModel};
pub use pptx::PptxDeckAssembler;
pub use synthesis::{ImageModel, ImageSynthesisStage};
