//! Assembly: ordered rendered slides to a single deck artifact.

use crate::deck::HtmlDeckAssembler;
use crate::error::AssemblyError;
use crate::pptx::PptxDeckAssembler;
use bytes::Bytes;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use slide_common::{AspectRatio, GenerationRequest, ImageBytes, Language, RenderedSlide, SlideSpec};
use std::str::FromStr;
use std::sync::Arc;

/// Layout role, decided by the slide's position in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideRole {
    Cover,
    Content,
    Ending,
}

impl SlideRole {
    pub fn for_index(index: usize, planned: usize) -> Self {
        if index == 0 {
            SlideRole::Cover
        } else if planned > 1 && index + 1 == planned {
            SlideRole::Ending
        } else {
            SlideRole::Content
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayoutHints {
    pub aspect_ratio: AspectRatio,
    pub language: Language,
    /// Deck title, taken from the first planned slide.
    pub title: String,
}

/// One slide as handed to the document assembler.
#[derive(Debug, Clone, Copy)]
pub struct DeckSlide<'a> {
    pub spec: &'a SlideSpec,
    pub image: &'a ImageBytes,
    pub role: SlideRole,
}

/// Deterministic document writer: same inputs, same bytes.
pub trait DocumentAssembler: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn assemble(&self, slides: &[DeckSlide<'_>], layout: &LayoutHints)
        -> Result<Vec<u8>, AssemblyError>;
}

/// Output document kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckFormat {
    #[default]
    Pptx,
    Html,
}

impl DeckFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeckFormat::Pptx => "pptx",
            DeckFormat::Html => "html",
        }
    }

    pub fn assembler(self) -> Arc<dyn DocumentAssembler> {
        match self {
            DeckFormat::Pptx => Arc::new(PptxDeckAssembler::new()),
            DeckFormat::Html => Arc::new(HtmlDeckAssembler::new()),
        }
    }
}

impl std::fmt::Display for DeckFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeckFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pptx" | "powerpoint" => Ok(DeckFormat::Pptx),
            "html" => Ok(DeckFormat::Html),
            other => Err(format!("unknown deck format '{other}' (expected pptx or html)")),
        }
    }
}

/// Final document bytes. Cheap to clone; clones share one buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Serialize for Artifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Artifact", 3)?;
        s.serialize_field("file_name", &self.file_name)?;
        s.serialize_field("content_type", &self.content_type)?;
        s.serialize_field("size", &self.bytes.len())?;
        s.end()
    }
}

#[derive(Debug, Clone)]
pub struct AssembledDeck {
    pub artifact: Artifact,
    pub requested: usize,
    pub included: usize,
    pub dropped_indices: Vec<usize>,
}

pub struct AssemblyStage {
    assembler: Arc<dyn DocumentAssembler>,
    max_missing_ratio: f64,
}

impl AssemblyStage {
    pub fn new(assembler: Arc<dyn DocumentAssembler>, max_missing_ratio: f64) -> Self {
        Self {
            assembler,
            max_missing_ratio,
        }
    }

    /// Drops slides without an image, keeping relative order, and fails when
    /// more than `max_missing_ratio` of the requested slides are missing.
    pub fn assemble(
        &self,
        slides: &[RenderedSlide],
        request: &GenerationRequest,
        file_stem: &str,
    ) -> Result<AssembledDeck, AssemblyError> {
        if slides.is_empty() {
            return Err(AssemblyError::internal("no slides to assemble"));
        }
        if let Some((pos, slide)) = slides
            .iter()
            .enumerate()
            .find(|(pos, slide)| slide.index() != *pos)
        {
            return Err(AssemblyError::internal(format!(
                "slide order broken at position {pos} (index {})",
                slide.index()
            )));
        }
        if let Some(slide) = slides.iter().find(|s| !s.is_finalized()) {
            return Err(AssemblyError::internal(format!(
                "slide {} was never finalized",
                slide.index()
            )));
        }

        let planned = slides.len();
        let requested = (request.num_slides as usize).max(planned);
        let deck: Vec<DeckSlide<'_>> = slides
            .iter()
            .filter_map(|slide| {
                slide.image.as_ref().map(|image| DeckSlide {
                    spec: &slide.spec,
                    image,
                    role: SlideRole::for_index(slide.index(), planned),
                })
            })
            .collect();
        let included = deck.len();
        let missing = requested - included;
        let dropped_indices: Vec<usize> = slides
            .iter()
            .filter(|s| !s.is_success())
            .map(|s| s.index())
            .collect();

        if included == 0 || missing as f64 > requested as f64 * self.max_missing_ratio {
            tracing::warn!(requested, included, "too few slides rendered");
            return Err(AssemblyError::InsufficientContent {
                requested,
                included,
            });
        }
        if missing > 0 {
            tracing::info!(?dropped_indices, "dropping slides without images");
        }

        let layout = LayoutHints {
            aspect_ratio: request.aspect_ratio,
            language: request.language,
            title: slides[0].spec.title.clone(),
        };
        let bytes = self.assembler.assemble(&deck, &layout)?;
        if bytes.is_empty() {
            return Err(AssemblyError::internal("assembler produced no output"));
        }

        Ok(AssembledDeck {
            artifact: Artifact {
                file_name: format!("{file_stem}.{}", self.assembler.file_extension()),
                content_type: self.assembler.content_type().to_string(),
                bytes: Bytes::from(bytes),
            },
            requested,
            included,
            dropped_indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes one line per slide: `index:role`.
    struct ListingAssembler;

    impl DocumentAssembler for ListingAssembler {
        fn content_type(&self) -> &'static str {
            "text/plain"
        }

        fn file_extension(&self) -> &'static str {
            "txt"
        }

        fn assemble(
            &self,
            slides: &[DeckSlide<'_>],
            _layout: &LayoutHints,
        ) -> Result<Vec<u8>, AssemblyError> {
            let lines: Vec<String> = slides
                .iter()
                .map(|s| format!("{}:{:?}", s.spec.index, s.role))
                .collect();
            Ok(lines.join("\n").into_bytes())
        }
    }

    fn slides(n: usize, failed: &[usize]) -> Vec<RenderedSlide> {
        (0..n)
            .map(|index| {
                let spec = Arc::new(SlideSpec {
                    index,
                    title: format!("Slide {}", index + 1),
                    body_outline: vec![],
                    image_prompt: "gradient".to_string(),
                });
                if failed.contains(&index) {
                    RenderedSlide::failed(spec, "rejected", 1)
                } else {
                    RenderedSlide::succeeded(spec, ImageBytes::new(vec![0x89, b'P']), 1)
                }
            })
            .collect()
    }

    fn stage() -> AssemblyStage {
        AssemblyStage::new(Arc::new(ListingAssembler), 0.5)
    }

    #[test]
    fn test_all_slides_in_order_with_roles() {
        let request = GenerationRequest::new("text", 4);
        let deck = stage().assemble(&slides(4, &[]), &request, "deck").unwrap();
        assert_eq!(deck.included, 4);
        assert_eq!(deck.artifact.file_name, "deck.txt");
        assert_eq!(
            std::str::from_utf8(&deck.artifact.bytes).unwrap(),
            "0:Cover\n1:Content\n2:Content\n3:Ending"
        );
    }

    #[test]
    fn test_failed_slides_are_dropped_preserving_order() {
        let request = GenerationRequest::new("text", 5);
        let deck = stage().assemble(&slides(5, &[2]), &request, "deck").unwrap();
        assert_eq!(deck.requested, 5);
        assert_eq!(deck.included, 4);
        assert_eq!(deck.dropped_indices, vec![2]);
        assert_eq!(
            std::str::from_utf8(&deck.artifact.bytes).unwrap(),
            "0:Cover\n1:Content\n3:Content\n4:Ending"
        );
    }

    #[test]
    fn test_half_missing_is_still_accepted() {
        let request = GenerationRequest::new("text", 4);
        let deck = stage().assemble(&slides(4, &[1, 2]), &request, "deck").unwrap();
        assert_eq!(deck.included, 2);
    }

    #[test]
    fn test_more_than_half_missing_is_insufficient() {
        let request = GenerationRequest::new("text", 5);
        let err = stage()
            .assemble(&slides(5, &[0, 1, 2]), &request, "deck")
            .unwrap_err();
        assert_eq!(
            err,
            AssemblyError::InsufficientContent {
                requested: 5,
                included: 2
            }
        );
    }

    #[test]
    fn test_gaps_are_rejected() {
        let request = GenerationRequest::new("text", 3);
        let mut input = slides(3, &[]);
        input.remove(1);
        let err = stage().assemble(&input, &request, "deck").unwrap_err();
        assert!(matches!(err, AssemblyError::InternalFault { .. }));
    }

    #[test]
    fn test_single_slide_is_a_cover() {
        assert_eq!(SlideRole::for_index(0, 1), SlideRole::Cover);
        assert_eq!(SlideRole::for_index(1, 2), SlideRole::Ending);
    }

    #[test]
    fn test_artifact_serializes_metadata_only() {
        let request = GenerationRequest::new("text", 2);
        let deck = stage().assemble(&slides(2, &[]), &request, "deck").unwrap();
        let value = serde_json::to_value(&deck.artifact).unwrap();
        assert_eq!(value["content_type"], "text/plain");
        assert_eq!(value["size"], deck.artifact.len());
        assert!(value.get("bytes").is_none());
    }

    #[test]
    fn test_deck_format_selects_assembler() {
        assert_eq!(DeckFormat::default(), DeckFormat::Pptx);
        assert_eq!("PPTX".parse::<DeckFormat>().unwrap(), DeckFormat::Pptx);
        assert_eq!(" html ".parse::<DeckFormat>().unwrap(), DeckFormat::Html);
        assert!("pdf".parse::<DeckFormat>().is_err());
        assert_eq!(DeckFormat::Pptx.assembler().file_extension(), "pptx");
        assert_eq!(DeckFormat::Html.assembler().file_extension(), "html");
    }

    #[test]
    fn test_artifact_clones_share_bytes() {
        let request = GenerationRequest::new("text", 3);
        let deck = stage().assemble(&slides(3, &[]), &request, "deck").unwrap();
        let copy = deck.artifact.clone();
        let body = copy.bytes.clone();
        assert_eq!(body.as_ptr(), deck.artifact.bytes.as_ptr());
        assert_eq!(body.len(), deck.artifact.len());
    }
}
