//! Content planning: raw text to an ordered list of slide specs.

use crate::error::PlanningError;
use crate::util::truncate_middle;
use async_trait::async_trait;
use serde::Deserialize;
use slide_common::{Language, SlideSpec, Style};
use std::sync::Arc;
use std::time::Duration;

/// Suffix every background prompt must carry.
pub const NO_TEXT_SUFFIX: &str = "no text no letters no words";

/// Prompt handed to the planning model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanningPrompt {
    pub system: String,
    pub user: String,
    /// The source text embedded in `user`.
    pub text: String,
    pub num_slides: u32,
    pub language: Language,
}

/// Content-structuring collaborator. Returns the model's raw text reply.
#[async_trait]
pub trait PlanningModel: Send + Sync {
    async fn complete(&self, prompt: &PlanningPrompt) -> Result<String, PlanningError>;
}

fn language_instruction(language: Language) -> &'static str {
    match language {
        Language::Chinese => {
            "Language requirements:\n\
             - write every title in Simplified Chinese (中文)\n\
             - write every content point in Simplified Chinese (中文)\n\
             - keep image_prompt in English and work in an English rendering of the title"
        }
        Language::English => {
            "Language requirements:\n\
             - write every title in English\n\
             - write every content point in English\n\
             - image_prompt must be English and may reflect the title's theme"
        }
        Language::Japanese => {
            "Language requirements:\n\
             - write every title in Japanese (日本語)\n\
             - write every content point in Japanese (日本語)\n\
             - keep image_prompt in English and work in an English rendering of the title"
        }
    }
}

pub fn build_prompt(raw_text: &str, num_slides: u32, language: Language) -> PlanningPrompt {
    let system = format!(
        "You are a presentation planner and an expert at writing text-to-image prompts.\n\
         Turn the user's text into structured data for a slide deck.\n\
         \n\
         {lang}\n\
         \n\
         For every slide produce:\n\
         1. title: a short, punchy heading in the requested language\n\
         2. content: 2-4 key points in the requested language, separated by semicolons\n\
         3. image_prompt: an English prompt for the slide's background image\n\
         \n\
         Rules for image_prompt:\n\
         - English only\n\
         - describe a purely visual background: gradients, textures, geometric shapes, light effects, abstract patterns\n\
         - never ask for text, titles, letters, digits, people or concrete objects\n\
         - keep enough contrast for dark or light text to be laid over it\n\
         - professional, modern and designed\n\
         - end every image_prompt with \"{suffix}\"\n\
         \n\
         Background guidance: the cover gets a bold gradient or light effect, content slides get a calm \
         background that keeps text readable, the final slide gets a warm closing background.\n\
         \n\
         Structure: slide 1 is the cover, the middle slides carry the main content, the last slide \
         is a summary or thank-you slide. Keep the narrative coherent.\n\
         \n\
         Output a valid JSON array and nothing else:\n\
         [\n  {{\"slide_number\": 1, \"title\": \"...\", \"content\": \"point 1; point 2; point 3\", \
         \"image_prompt\": \"Abstract modern gradient background, blue and purple blending smoothly, \
         subtle geometric shapes, soft lighting, clean and minimal, 4K, {suffix}\"}}\n]",
        lang = language_instruction(language),
        suffix = NO_TEXT_SUFFIX,
    );
    let user = format!(
        "Create a {num_slides}-slide deck from the following text:\n\n{raw_text}\n\n\
         Reply with the JSON array only, without Markdown code fences."
    );
    PlanningPrompt {
        system,
        user,
        text: raw_text.to_string(),
        num_slides,
        language,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Points(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawSlide {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    image_prompt: Option<String>,
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.split_once('\n') {
        Some((_, rest)) => rest,
        None => return "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn split_points(content: Option<RawContent>) -> Vec<String> {
    let points = match content {
        None => Vec::new(),
        Some(RawContent::Points(points)) => points,
        Some(RawContent::Text(text)) => text
            .split([';', '；', '\n'])
            .map(str::to_string)
            .collect(),
    };
    points
        .into_iter()
        .map(|p| p.trim().trim_start_matches(['-', '•', '*']).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn styled_prompt(prompt: &str, title: &str, style: Style) -> String {
    let base = prompt.trim();
    let base = if base.is_empty() {
        format!(
            "Abstract modern gradient background for a presentation slide about {title}, \
             soft lighting, clean professional composition, 4K, {NO_TEXT_SUFFIX}"
        )
    } else {
        base.to_string()
    };
    format!("{base}, {} design style", style.prompt_descriptor())
}

/// Parses a planning reply into exactly `num_slides` specs.
///
/// Extra entries are dropped by position; too few entries is a malformed
/// response. Each image prompt gets the style descriptor appended.
pub fn parse_slide_specs(
    response: &str,
    num_slides: u32,
    style: Style,
) -> Result<Vec<SlideSpec>, PlanningError> {
    let body = strip_code_fence(response);
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PlanningError::malformed(format!("reply is not JSON: {e}")))?;

    // Some models wrap the array in an object.
    let array = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("slides") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Err(PlanningError::malformed("expected a JSON array of slides")),
        },
        _ => return Err(PlanningError::malformed("expected a JSON array of slides")),
    };

    let wanted = num_slides as usize;
    if array.len() < wanted {
        return Err(PlanningError::malformed(format!(
            "expected {wanted} slides, model returned {}",
            array.len()
        )));
    }
    if array.len() > wanted {
        tracing::debug!(
            returned = array.len(),
            wanted,
            "planning reply has extra slides; truncating"
        );
    }

    array
        .into_iter()
        .take(wanted)
        .enumerate()
        .map(|(index, item)| {
            let raw: RawSlide = serde_json::from_value(item).map_err(|e| {
                PlanningError::malformed(format!("slide {}: {e}", index + 1))
            })?;
            let title = raw
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Slide {}", index + 1));
            let image_prompt = styled_prompt(raw.image_prompt.as_deref().unwrap_or(""), &title, style);
            Ok(SlideSpec {
                index,
                title,
                body_outline: split_points(raw.content),
                image_prompt,
            })
        })
        .collect()
}

/// Wraps the planning collaborator with input validation, a timeout and
/// response parsing. Never retries.
pub struct ContentPlanningStage {
    model: Arc<dyn PlanningModel>,
    max_slides: u32,
    timeout: Duration,
}

impl ContentPlanningStage {
    pub fn new(model: Arc<dyn PlanningModel>, max_slides: u32, timeout: Duration) -> Self {
        Self {
            model,
            max_slides,
            timeout,
        }
    }

    pub fn max_slides(&self) -> u32 {
        self.max_slides
    }

    pub fn validate(&self, raw_text: &str, num_slides: u32) -> Result<(), PlanningError> {
        if raw_text.trim().is_empty() {
            return Err(PlanningError::InvalidInput {
                reason: "text must not be empty".to_string(),
            });
        }
        if num_slides == 0 || num_slides > self.max_slides {
            return Err(PlanningError::InvalidInput {
                reason: format!(
                    "num_slides must be between 1 and {}, got {num_slides}",
                    self.max_slides
                ),
            });
        }
        Ok(())
    }

    pub async fn plan(
        &self,
        raw_text: &str,
        num_slides: u32,
        language: Language,
        style: Style,
    ) -> Result<Vec<SlideSpec>, PlanningError> {
        self.validate(raw_text, num_slides)?;
        let prompt = build_prompt(raw_text.trim(), num_slides, language);
        tracing::debug!(
            num_slides,
            %language,
            text = %truncate_middle(raw_text.trim(), 80),
            "requesting slide plan"
        );

        let reply = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(PlanningError::unavailable(format!(
                    "planning timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let specs = match parse_slide_specs(&reply, num_slides, style) {
            Ok(specs) => specs,
            Err(e) => {
                tracing::warn!(error = %e, reply = %truncate_middle(&reply, 200), "unusable planning reply");
                return Err(e);
            }
        };
        tracing::info!(slides = specs.len(), "slide plan ready");
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlanningModel;

    const REPLY: &str = r#"[
        {"slide_number": 1, "title": "AI in Health", "content": "Diagnosis；Drug discovery", "image_prompt": "Blue gradient, no text no letters no words"},
        {"slide_number": 2, "title": "Imaging", "content": ["Faster reads", " - Fewer misses "], "image_prompt": "Soft waves"},
        {"slide_number": 3, "title": "Thanks", "content": "", "image_prompt": ""}
    ]"#;

    #[test]
    fn test_parse_reply_in_order() {
        let specs = parse_slide_specs(REPLY, 3, Style::Technology).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].index, 0);
        assert_eq!(specs[0].title, "AI in Health");
        assert_eq!(specs[0].body_outline, vec!["Diagnosis", "Drug discovery"]);
        assert_eq!(specs[1].body_outline, vec!["Faster reads", "Fewer misses"]);
        assert!(specs[2].body_outline.is_empty());
        assert_eq!(
            specs[0].image_prompt,
            "Blue gradient, no text no letters no words, technology design style"
        );
    }

    #[test]
    fn test_empty_image_prompt_gets_fallback() {
        let specs = parse_slide_specs(REPLY, 3, Style::Business).unwrap();
        assert!(specs[2].image_prompt.contains("about Thanks"));
        assert!(specs[2].image_prompt.contains(NO_TEXT_SUFFIX));
        assert!(specs[2].image_prompt.ends_with("business design style"));
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let fenced = format!("```json\n{REPLY}\n```");
        assert_eq!(parse_slide_specs(&fenced, 3, Style::Minimal).unwrap().len(), 3);
        let unterminated = format!("```\n{REPLY}");
        assert_eq!(parse_slide_specs(&unterminated, 3, Style::Minimal).unwrap().len(), 3);
    }

    #[test]
    fn test_extra_slides_are_truncated() {
        let specs = parse_slide_specs(REPLY, 2, Style::Minimal).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].title, "Imaging");
    }

    #[test]
    fn test_missing_slides_is_malformed() {
        let err = parse_slide_specs(REPLY, 5, Style::Minimal).unwrap_err();
        assert!(matches!(err, PlanningError::MalformedResponse { .. }));
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = parse_slide_specs("Sure! Here is your deck.", 1, Style::Minimal).unwrap_err();
        assert!(matches!(err, PlanningError::MalformedResponse { .. }));
        let err = parse_slide_specs(r#"{"title": "x"}"#, 1, Style::Minimal).unwrap_err();
        assert!(matches!(err, PlanningError::MalformedResponse { .. }));
    }

    #[test]
    fn test_wrapped_array_is_accepted() {
        let wrapped = format!(r#"{{"slides": {REPLY}}}"#);
        assert_eq!(parse_slide_specs(&wrapped, 3, Style::Minimal).unwrap().len(), 3);
    }

    #[test]
    fn test_prompt_carries_language_and_count() {
        let prompt = build_prompt("quarterly results", 7, Language::Japanese);
        assert!(prompt.system.contains("日本語"));
        assert!(prompt.system.contains(NO_TEXT_SUFFIX));
        assert!(prompt.user.contains("7-slide"));
        assert!(prompt.user.contains("quarterly results"));
    }

    #[tokio::test]
    async fn test_plan_rejects_bad_input_without_calling_model() {
        let model = Arc::new(MockPlanningModel::new());
        let stage = ContentPlanningStage::new(model.clone(), 20, Duration::from_secs(1));

        for (text, n) in [("   ", 5), ("text", 0), ("text", 21)] {
            let err = stage
                .plan(text, n, Language::English, Style::Business)
                .await
                .unwrap_err();
            assert!(matches!(err, PlanningError::InvalidInput { .. }));
        }
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_plan_times_out_as_upstream_unavailable() {
        let model = Arc::new(MockPlanningModel::new().with_delay(Duration::from_millis(200)));
        let stage = ContentPlanningStage::new(model, 20, Duration::from_millis(20));
        let err = stage
            .plan("text", 3, Language::English, Style::Business)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_plan_with_mock_model() {
        let model = Arc::new(MockPlanningModel::new());
        let stage = ContentPlanningStage::new(model.clone(), 20, Duration::from_secs(1));
        let specs = stage
            .plan("Rust in production", 4, Language::English, Style::Creative)
            .await
            .unwrap();
        assert_eq!(specs.len(), 4);
        assert!(specs.iter().enumerate().all(|(i, s)| s.index == i));
        assert!(specs
            .iter()
            .all(|s| s.image_prompt.ends_with("creative design style")));
        assert_eq!(model.calls(), 1);
    }
}
