//! Offline collaborators.
//!
//! `MockPlanningModel` derives a plan from the source text and
//! `MockImageModel` returns a tiny PNG, both without network calls. Each can
//! be scripted with delays and failures so the pipeline's retry, timeout and
//! partial-failure paths can be exercised deterministically.

use crate::error::{PlanningError, SynthesisError};
use crate::planning::{PlanningModel, PlanningPrompt, NO_TEXT_SUFFIX};
use crate::synthesis::ImageModel;
use async_trait::async_trait;
use dashmap::DashMap;
use slide_common::{AspectRatio, ImageBytes, Language};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 1x1 transparent PNG.
pub const PLACEHOLDER_PNG: [u8; 67] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

const PALETTES: [&str; 5] = [
    "deep blue and violet",
    "teal and emerald",
    "warm amber and coral",
    "slate grey and silver",
    "midnight navy and cyan",
];

#[derive(Default)]
pub struct MockPlanningModel {
    delay: Duration,
    reply: Option<String>,
    failure: Option<PlanningError>,
    calls: AtomicUsize,
}

impl MockPlanningModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns `reply` verbatim instead of a generated plan.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn failing(mut self, error: PlanningError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fragments(text: &str) -> Vec<String> {
    text.split(['\n', '。', '.', '!', '?', '！', '？'])
        .map(|f| f.trim().trim_start_matches(['-', '•', '*']).trim())
        .filter(|f| !f.is_empty())
        .map(|f| f.chars().take(40).collect())
        .collect()
}

fn closing_title(language: Language) -> &'static str {
    match language {
        Language::Chinese => "谢谢",
        Language::English => "Thank you",
        Language::Japanese => "ありがとうございました",
    }
}

/// Deterministic plan for `prompt`, in the reply format the live model uses.
pub fn offline_plan(prompt: &PlanningPrompt) -> String {
    let n = prompt.num_slides as usize;
    let mut parts = fragments(&prompt.text);
    if parts.is_empty() {
        parts.push(prompt.text.trim().chars().take(40).collect());
    }

    let slides: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            let title = if n > 1 && i + 1 == n {
                closing_title(prompt.language).to_string()
            } else {
                parts[i % parts.len()].clone()
            };
            let content: Vec<&str> = parts
                .iter()
                .cycle()
                .skip(i + 1)
                .take(parts.len().clamp(1, 3))
                .map(String::as_str)
                .collect();
            serde_json::json!({
                "slide_number": i + 1,
                "title": title,
                "content": content.join("; "),
                "image_prompt": MockImageModel::prompt_for(i),
            })
        })
        .collect();
    serde_json::Value::Array(slides).to_string()
}

#[async_trait]
impl PlanningModel for MockPlanningModel {
    async fn complete(&self, prompt: &PlanningPrompt) -> Result<String, PlanningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(match &self.reply {
            Some(reply) => reply.clone(),
            None => offline_plan(prompt),
        })
    }
}

/// Decrements the in-flight counter even when the call is abandoned.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Image model keyed by the `[slide:N]` marker in the prompt.
#[derive(Default)]
pub struct MockImageModel {
    delay: Duration,
    slide_delays: HashMap<usize, Duration>,
    transient: HashMap<usize, u32>,
    permanent: HashSet<usize>,
    calls: DashMap<usize, u32>,
    total_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockImageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A background prompt tagged so the mock can tell slides apart.
    pub fn prompt_for(index: usize) -> String {
        format!(
            "Abstract layered gradient background [slide:{index}], {} tones, soft light, \
             subtle geometric shapes, {NO_TEXT_SUFFIX}",
            PALETTES[index % PALETTES.len()]
        )
    }

    pub fn slide_of(prompt: &str) -> Option<usize> {
        let start = prompt.find("[slide:")? + "[slide:".len();
        let end = prompt[start..].find(']')? + start;
        prompt[start..end].parse().ok()
    }

    /// Delay applied to every call without a slide-specific delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_slide(mut self, index: usize, delay: Duration) -> Self {
        self.slide_delays.insert(index, delay);
        self
    }

    /// The first `times` calls for the slide fail with a retryable error.
    pub fn fail_transiently(mut self, index: usize, times: u32) -> Self {
        self.transient.insert(index, times);
        self
    }

    /// Every call for the slide is rejected.
    pub fn fail_permanently(mut self, index: usize) -> Self {
        self.permanent.insert(index);
        self
    }

    pub fn calls_for(&self, index: usize) -> u32 {
        self.calls.get(&index).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageModel for MockImageModel {
    async fn render(
        &self,
        prompt: &str,
        _aspect_ratio: AspectRatio,
    ) -> Result<ImageBytes, SynthesisError> {
        let slide = Self::slide_of(prompt);
        let call_no = match slide {
            Some(index) => {
                let mut count = self.calls.entry(index).or_insert(0);
                *count += 1;
                *count
            }
            None => 1,
        };
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = slide
            .and_then(|i| self.slide_delays.get(&i).copied())
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(index) = slide {
            if self.permanent.contains(&index) {
                return Err(SynthesisError::rejected(format!(
                    "prompt for slide {} rejected by content filter",
                    index + 1
                )));
            }
            if self.transient.get(&index).is_some_and(|times| call_no <= *times) {
                return Err(SynthesisError::transient("HTTP 503: service busy"));
            }
        }
        Ok(ImageBytes::new(PLACEHOLDER_PNG.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::{build_prompt, parse_slide_specs};
    use slide_common::{ImageFormat, Style};

    #[test]
    fn test_slide_marker_round_trip() {
        let prompt = format!("{}, business design style", MockImageModel::prompt_for(12));
        assert_eq!(MockImageModel::slide_of(&prompt), Some(12));
        assert_eq!(MockImageModel::slide_of("plain prompt"), None);
    }

    #[test]
    fn test_offline_plan_parses() {
        let prompt = build_prompt(
            "人工智能在医疗领域的应用。疾病诊断辅助。药物研发加速。",
            4,
            Language::Chinese,
        );
        let specs = parse_slide_specs(&offline_plan(&prompt), 4, Style::Business).unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].title, "人工智能在医疗领域的应用");
        assert_eq!(specs[3].title, "谢谢");
        assert!(!specs[1].body_outline.is_empty());
        assert_eq!(MockImageModel::slide_of(&specs[2].image_prompt), Some(2));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let model = MockImageModel::new()
            .fail_transiently(0, 1)
            .fail_permanently(1);
        let p0 = MockImageModel::prompt_for(0);
        let p1 = MockImageModel::prompt_for(1);

        let first = model.render(&p0, AspectRatio::Widescreen).await.unwrap_err();
        assert!(first.is_transient());
        let second = model.render(&p0, AspectRatio::Widescreen).await.unwrap();
        assert_eq!(second.format, ImageFormat::Png);

        let err = model.render(&p1, AspectRatio::Widescreen).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(model.calls_for(0), 2);
        assert_eq!(model.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_planner_counts_calls_and_fails_on_request() {
        let model = MockPlanningModel::new().failing(PlanningError::unavailable("down"));
        let prompt = build_prompt("text", 2, Language::English);
        assert!(model.complete(&prompt).await.is_err());
        assert_eq!(model.calls(), 1);
    }
}
