//! Image synthesis: one background image per planned slide.
//!
//! Slides are rendered concurrently up to a per-job cap (and optionally a
//! cap shared across jobs). Every call is bounded by its own timeout, the
//! whole fan-out by a stage deadline. A slide that cannot be rendered is
//! finalized as a failure; it never fails the job by itself.

use crate::error::SynthesisError;
use crate::util::{backoff_with_jitter, truncate_middle};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use slide_common::{AspectRatio, ImageBytes, RenderedSlide, SlideSpec};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

pub const STAGE_DEADLINE_REASON: &str = "synthesis stage deadline exceeded";

/// Text-to-image collaborator.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn render(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<ImageBytes, SynthesisError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `next_attempt` (2 for the first retry).
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        backoff_with_jitter(next_attempt.saturating_sub(2), self.base_delay, self.max_delay)
    }
}

/// Per-slide progress reported while the fan-out runs.
#[derive(Debug, Clone)]
pub enum SynthesisEvent {
    AttemptStarted {
        index: usize,
        attempt: u32,
    },
    AttemptFailed {
        index: usize,
        attempt: u32,
        reason: String,
        will_retry: bool,
    },
    Finalized(RenderedSlide),
}

pub type EventSender = mpsc::UnboundedSender<SynthesisEvent>;

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub concurrency_cap: usize,
    pub stage_timeout: Duration,
}

pub struct ImageSynthesisStage {
    model: Arc<dyn ImageModel>,
    settings: SynthesisSettings,
    global_limit: Option<Arc<Semaphore>>,
}

impl ImageSynthesisStage {
    pub fn new(model: Arc<dyn ImageModel>, settings: SynthesisSettings) -> Self {
        Self {
            model,
            settings,
            global_limit: None,
        }
    }

    /// Shares a cap on in-flight calls with every other job using the same semaphore.
    pub fn with_global_limit(mut self, limit: Arc<Semaphore>) -> Self {
        self.global_limit = Some(limit);
        self
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Renders one slide, retrying transient failures.
    pub async fn synthesize(
        &self,
        spec: Arc<SlideSpec>,
        aspect_ratio: AspectRatio,
        events: &EventSender,
    ) -> RenderedSlide {
        let attempts = AtomicU32::new(0);
        self.synthesize_tracked(spec, aspect_ratio, events, &attempts)
            .await
    }

    async fn synthesize_tracked(
        &self,
        spec: Arc<SlideSpec>,
        aspect_ratio: AspectRatio,
        events: &EventSender,
        attempts: &AtomicU32,
    ) -> RenderedSlide {
        let index = spec.index;
        let outcome = self.attempt_loop(spec, aspect_ratio, events, attempts).await;
        match &outcome.failure_reason {
            None => tracing::info!(slide = index + 1, attempts = outcome.attempts, "slide image ready"),
            Some(reason) => tracing::warn!(
                slide = index + 1,
                attempts = outcome.attempts,
                %reason,
                "slide image failed"
            ),
        }
        let _ = events.send(SynthesisEvent::Finalized(outcome.clone()));
        outcome
    }

    async fn attempt_loop(
        &self,
        spec: Arc<SlideSpec>,
        aspect_ratio: AspectRatio,
        events: &EventSender,
        attempts: &AtomicU32,
    ) -> RenderedSlide {
        let index = spec.index;
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            attempts.store(attempt, Ordering::SeqCst);
            let _ = events.send(SynthesisEvent::AttemptStarted { index, attempt });
            tracing::debug!(
                slide = index + 1,
                attempt,
                prompt = %truncate_middle(&spec.image_prompt, 100),
                "requesting slide image"
            );

            // A blank prompt is rejected locally; it still counts as the one attempt made.
            let result = if spec.image_prompt.trim().is_empty() {
                Err(SynthesisError::rejected("empty image prompt"))
            } else {
                let call = self.model.render(&spec.image_prompt, aspect_ratio);
                match tokio::time::timeout(self.settings.call_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(SynthesisError::timeout(self.settings.call_timeout)),
                }
            };

            let err = match result {
                Ok(image) if !image.is_empty() => {
                    return RenderedSlide::succeeded(spec, image, attempt);
                }
                Ok(_) => SynthesisError::rejected("model returned an empty image"),
                Err(err) => err,
            };

            let will_retry = err.is_transient() && attempt < max_attempts;
            let _ = events.send(SynthesisEvent::AttemptFailed {
                index,
                attempt,
                reason: err.to_string(),
                will_retry,
            });
            if !will_retry {
                return RenderedSlide::failed(spec, err.to_string(), attempt);
            }

            let delay = self.settings.retry.delay_before(attempt + 1);
            tracing::debug!(slide = index + 1, attempt, ?delay, error = %err, "retrying slide image");
            tokio::time::sleep(delay).await;
        }
    }

    /// Renders every slide and returns the outcomes ordered by `index`.
    ///
    /// Returns only once every slide is finalized. Slides still pending at the
    /// stage deadline are abandoned and finalized as failures.
    pub async fn synthesize_all(
        &self,
        specs: &[Arc<SlideSpec>],
        aspect_ratio: AspectRatio,
        events: EventSender,
    ) -> Vec<RenderedSlide> {
        let local_limit = Arc::new(Semaphore::new(self.settings.concurrency_cap.max(1)));
        let attempts: Vec<AtomicU32> = specs.iter().map(|_| AtomicU32::new(0)).collect();
        let mut outcomes: Vec<Option<RenderedSlide>> = vec![None; specs.len()];

        {
            let mut pending: FuturesUnordered<_> = specs
                .iter()
                .enumerate()
                .map(|(pos, spec)| {
                    let local_limit = Arc::clone(&local_limit);
                    let spec = Arc::clone(spec);
                    let attempts = &attempts[pos];
                    let events = &events;
                    async move {
                        // Permits are held across retries and backoff.
                        let _local = local_limit.acquire_owned().await.ok();
                        let _global = match &self.global_limit {
                            Some(global) => Arc::clone(global).acquire_owned().await.ok(),
                            None => None,
                        };
                        let outcome = self
                            .synthesize_tracked(spec, aspect_ratio, events, attempts)
                            .await;
                        (pos, outcome)
                    }
                })
                .collect();

            let deadline = Instant::now() + self.settings.stage_timeout;
            loop {
                let next = tokio::time::timeout_at(deadline, pending.next()).await;
                match next {
                    Ok(Some((pos, outcome))) => outcomes[pos] = Some(outcome),
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(
                            unfinished = pending.len(),
                            timeout = ?self.settings.stage_timeout,
                            "synthesis stage deadline reached; abandoning pending slides"
                        );
                        break;
                    }
                }
            }
            // Dropping the set cancels every call still in flight.
        }

        specs
            .iter()
            .zip(outcomes)
            .zip(&attempts)
            .map(|((spec, outcome), attempts)| {
                outcome.unwrap_or_else(|| {
                    let abandoned = RenderedSlide::failed(
                        Arc::clone(spec),
                        STAGE_DEADLINE_REASON,
                        attempts.load(Ordering::SeqCst),
                    );
                    let _ = events.send(SynthesisEvent::Finalized(abandoned.clone()));
                    abandoned
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockImageModel;

    fn specs(n: usize) -> Vec<Arc<SlideSpec>> {
        (0..n)
            .map(|index| {
                Arc::new(SlideSpec {
                    index,
                    title: format!("Slide {}", index + 1),
                    body_outline: vec![],
                    image_prompt: MockImageModel::prompt_for(index),
                })
            })
            .collect()
    }

    fn settings(cap: usize) -> SynthesisSettings {
        SynthesisSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            call_timeout: Duration::from_secs(2),
            concurrency_cap: cap,
            stage_timeout: Duration::from_secs(10),
        }
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<SynthesisEvent>) -> Vec<SynthesisEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let model = Arc::new(MockImageModel::new().fail_transiently(0, 2));
        let stage = ImageSynthesisStage::new(model.clone(), settings(3));
        let (tx, rx) = mpsc::unbounded_channel();

        let slide = stage
            .synthesize(specs(1)[0].clone(), AspectRatio::Widescreen, &tx)
            .await;

        assert!(slide.is_success());
        assert_eq!(slide.attempts, 3);
        assert_eq!(model.calls_for(0), 3);
        let events = drain(rx);
        let retries = events
            .iter()
            .filter(|e| matches!(e, SynthesisEvent::AttemptFailed { will_retry: true, .. }))
            .count();
        assert_eq!(retries, 2);
        assert!(matches!(events.last(), Some(SynthesisEvent::Finalized(_))));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let model = Arc::new(MockImageModel::new().fail_permanently(0));
        let stage = ImageSynthesisStage::new(model.clone(), settings(3));
        let (tx, _rx) = mpsc::unbounded_channel();

        let slide = stage
            .synthesize(specs(1)[0].clone(), AspectRatio::Widescreen, &tx)
            .await;

        assert!(!slide.is_success());
        assert_eq!(slide.attempts, 1);
        assert!(slide.failure_reason.is_some());
        assert_eq!(model.calls_for(0), 1);
    }

    #[tokio::test]
    async fn test_blank_prompt_fails_after_one_attempt_without_calling_model() {
        let model = Arc::new(MockImageModel::new());
        let stage = ImageSynthesisStage::new(model.clone(), settings(3));
        let (tx, rx) = mpsc::unbounded_channel();
        let spec = Arc::new(SlideSpec {
            index: 0,
            title: "Blank".to_string(),
            body_outline: vec![],
            image_prompt: "   ".to_string(),
        });

        let slide = stage.synthesize(spec, AspectRatio::Widescreen, &tx).await;

        assert!(!slide.is_success());
        assert_eq!(slide.attempts, 1);
        assert!(slide.failure_reason.unwrap().contains("empty image prompt"));
        assert_eq!(model.total_calls(), 0);
        let events = drain(rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SynthesisEvent::AttemptFailed { will_retry: false, .. })));
    }

    #[tokio::test]
    async fn test_exhausted_retries_finalize_after_max_attempts() {
        let model = Arc::new(MockImageModel::new().fail_transiently(0, u32::MAX));
        let stage = ImageSynthesisStage::new(model.clone(), settings(3));
        let (tx, _rx) = mpsc::unbounded_channel();

        let slide = stage
            .synthesize(specs(1)[0].clone(), AspectRatio::Widescreen, &tx)
            .await;

        assert_eq!(slide.attempts, 3);
        assert_eq!(model.calls_for(0), 3);
        assert!(slide.image.is_none());
    }

    #[tokio::test]
    async fn test_call_timeout_counts_as_transient() {
        let model = Arc::new(MockImageModel::new().delay_slide(0, Duration::from_millis(500)));
        let mut settings = settings(1);
        settings.call_timeout = Duration::from_millis(20);
        settings.retry.max_attempts = 2;
        let stage = ImageSynthesisStage::new(model.clone(), settings);
        let (tx, _rx) = mpsc::unbounded_channel();

        let slide = stage
            .synthesize(specs(1)[0].clone(), AspectRatio::Widescreen, &tx)
            .await;

        assert_eq!(slide.attempts, 2);
        assert!(slide
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("timed out")));
    }

    #[tokio::test]
    async fn test_fan_out_respects_cap_and_returns_in_index_order() {
        let model = Arc::new(
            MockImageModel::new()
                .with_delay(Duration::from_millis(20))
                .delay_slide(0, Duration::from_millis(80)),
        );
        let stage = ImageSynthesisStage::new(model.clone(), settings(2));
        let (tx, _rx) = mpsc::unbounded_channel();

        let slides = stage
            .synthesize_all(&specs(6), AspectRatio::Widescreen, tx)
            .await;

        assert_eq!(slides.len(), 6);
        assert!(slides.iter().enumerate().all(|(i, s)| s.index() == i));
        assert!(slides.iter().all(|s| s.is_success()));
        assert!(model.max_in_flight() <= 2);
        assert_eq!(model.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_global_limit_is_shared() {
        let model = Arc::new(MockImageModel::new().with_delay(Duration::from_millis(20)));
        let global = Arc::new(Semaphore::new(1));
        let a = ImageSynthesisStage::new(model.clone(), settings(3)).with_global_limit(global.clone());
        let b = ImageSynthesisStage::new(model.clone(), settings(3)).with_global_limit(global);
        let (tx, _rx) = mpsc::unbounded_channel();

        let specs = specs(3);
        let (left, right) = tokio::join!(
            a.synthesize_all(&specs, AspectRatio::Square, tx.clone()),
            b.synthesize_all(&specs, AspectRatio::Square, tx.clone()),
        );

        assert!(left.iter().chain(right.iter()).all(|s| s.is_success()));
        assert_eq!(model.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_stage_deadline_fails_pending_slides() {
        let model = Arc::new(MockImageModel::new().delay_slide(1, Duration::from_secs(5)));
        let mut settings = settings(1);
        settings.stage_timeout = Duration::from_millis(100);
        let stage = ImageSynthesisStage::new(model, settings);
        let (tx, rx) = mpsc::unbounded_channel();

        let slides = stage
            .synthesize_all(&specs(3), AspectRatio::Widescreen, tx)
            .await;

        assert!(slides[0].is_success());
        assert_eq!(slides[1].failure_reason.as_deref(), Some(STAGE_DEADLINE_REASON));
        assert_eq!(slides[1].attempts, 1);
        assert_eq!(slides[2].failure_reason.as_deref(), Some(STAGE_DEADLINE_REASON));
        assert_eq!(slides[2].attempts, 0);

        let finalized = drain(rx)
            .into_iter()
            .filter(|e| matches!(e, SynthesisEvent::Finalized(_)))
            .count();
        assert_eq!(finalized, 3);
    }
}
