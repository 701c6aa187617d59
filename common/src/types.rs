use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Output language for slide titles and bullets. Image prompts are always English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Language {
    #[serde(rename = "中文")]
    Chinese,
    #[serde(rename = "English")]
    English,
    #[serde(rename = "日本語")]
    Japanese,
}

impl Language {
    pub fn label(&self) -> &'static str {
        match self {
            Language::Chinese => "中文",
            Language::English => "English",
            Language::Japanese => "日本語",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Chinese
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Language {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "中文" | "zh" | "chinese" => Ok(Language::Chinese),
            "english" | "en" => Ok(Language::English),
            "日本語" | "ja" | "japanese" => Ok(Language::Japanese),
            _ => Err(ParseEnumError {
                kind: "language",
                value: s.to_string(),
            }),
        }
    }
}

/// Visual style of the generated backgrounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Business,
    Technology,
    Minimal,
    Creative,
    Academic,
}

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Business,
        Style::Technology,
        Style::Minimal,
        Style::Creative,
        Style::Academic,
    ];

    /// English descriptor appended to image prompts.
    pub fn prompt_descriptor(&self) -> &'static str {
        match self {
            Style::Business => "business",
            Style::Technology => "technology",
            Style::Minimal => "minimalist",
            Style::Creative => "creative",
            Style::Academic => "academic",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Style::Business => "business",
            Style::Technology => "technology",
            Style::Minimal => "minimal",
            Style::Creative => "creative",
            Style::Academic => "academic",
        }
    }
}

impl Default for Style {
    fn default() -> Self {
        Style::Business
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Style {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "business" | "商务" => Ok(Style::Business),
            "technology" | "tech" | "科技" => Ok(Style::Technology),
            "minimal" | "简约" => Ok(Style::Minimal),
            "creative" | "创意" => Ok(Style::Creative),
            "academic" | "学术" => Ok(Style::Academic),
            _ => Err(ParseEnumError {
                kind: "style",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    /// Pixel size requested from the image model.
    pub fn image_size(&self) -> &'static str {
        match self {
            AspectRatio::Widescreen => "2560x1440",
            AspectRatio::Standard => "2304x1728",
            AspectRatio::Square => "2048x2048",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Standard => "4:3",
            AspectRatio::Square => "1:1",
        }
    }

    /// Width over height, used for the deck page geometry.
    pub fn ratio(&self) -> (u32, u32) {
        match self {
            AspectRatio::Widescreen => (16, 9),
            AspectRatio::Standard => (4, 3),
            AspectRatio::Square => (1, 1),
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::Widescreen
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "16:9" | "widescreen" => Ok(AspectRatio::Widescreen),
            "4:3" | "standard" => Ok(AspectRatio::Standard),
            "1:1" | "square" => Ok(AspectRatio::Square),
            _ => Err(ParseEnumError {
                kind: "aspect ratio",
                value: s.to_string(),
            }),
        }
    }
}

// Wire values go through `FromStr`, so JSON and TOML accept the same
// spellings as the command line, case-insensitively.
macro_rules! deserialize_from_str {
    ($($ty:ty),*) => {$(
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    )*};
}

deserialize_from_str!(Language, Style, AspectRatio);

/// Parameters of one text-to-deck request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub text: String,
    pub num_slides: u32,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>, num_slides: u32) -> Self {
        Self {
            text: text.into(),
            num_slides,
            language: Language::default(),
            style: Style::default(),
            aspect_ratio: AspectRatio::default(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }
}

/// One planned slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideSpec {
    /// 0-based position; defines render and assembly order.
    pub index: usize,
    pub title: String,
    #[serde(default)]
    pub body_outline: Vec<String>,
    pub image_prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Sniffs the format from magic bytes, defaulting to PNG.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Png
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// Encoded image returned by the image model. Cheap to clone.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub format: ImageFormat,
    pub data: Arc<[u8]>,
}

impl ImageBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            format: ImageFormat::detect(&data),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBytes")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

// Status payloads carry image metadata only, never the pixels.
impl Serialize for ImageBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ImageBytes", 2)?;
        s.serialize_field("format", &self.format)?;
        s.serialize_field("size", &self.data.len())?;
        s.end()
    }
}

/// A planned slide together with its synthesis outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedSlide {
    pub spec: Arc<SlideSpec>,
    pub image: Option<ImageBytes>,
    /// Attempts made, a locally rejected prompt included. 0 only while
    /// pending, or when the stage deadline hit before the first attempt.
    pub attempts: u32,
    pub failure_reason: Option<String>,
}

impl RenderedSlide {
    pub fn pending(spec: Arc<SlideSpec>) -> Self {
        Self {
            spec,
            image: None,
            attempts: 0,
            failure_reason: None,
        }
    }

    pub fn succeeded(spec: Arc<SlideSpec>, image: ImageBytes, attempts: u32) -> Self {
        Self {
            spec,
            image: Some(image),
            attempts,
            failure_reason: None,
        }
    }

    pub fn failed(spec: Arc<SlideSpec>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            spec,
            image: None,
            attempts,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn index(&self) -> usize {
        self.spec.index
    }

    pub fn is_finalized(&self) -> bool {
        self.image.is_some() || self.failure_reason.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing_accepts_labels_and_codes() {
        assert_eq!("中文".parse::<Language>().unwrap(), Language::Chinese);
        assert_eq!("en".parse::<Language>().unwrap(), Language::English);
        assert_eq!("日本語".parse::<Language>().unwrap(), Language::Japanese);
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn test_request_deserializes_original_labels() {
        let json = r#"{"text":"hello","num_slides":5,"language":"中文","style":"商务"}"#;
        let req: GenerationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.language, Language::Chinese);
        assert_eq!(req.style, Style::Business);
        assert_eq!(req.aspect_ratio, AspectRatio::Widescreen);
    }

    #[test]
    fn test_request_deserializes_any_case() {
        let json = r#"{"text":"hello","num_slides":3,"language":"EN","style":"Tech","aspect_ratio":"Square"}"#;
        let req: GenerationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.language, Language::English);
        assert_eq!(req.style, Style::Technology);
        assert_eq!(req.aspect_ratio, AspectRatio::Square);

        let back: GenerationRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_unknown_language_names_the_value() {
        let json = r#"{"text":"hello","num_slides":3,"language":"klingon"}"#;
        let err = serde_json::from_str::<GenerationRequest>(json).unwrap_err();
        assert!(err.to_string().contains("unknown language: 'klingon'"));
    }

    #[test]
    fn test_unknown_style_is_rejected_by_serde() {
        let json = r#"{"text":"hello","num_slides":5,"style":"baroque"}"#;
        assert!(serde_json::from_str::<GenerationRequest>(json).is_err());
    }

    #[test]
    fn test_image_format_detection() {
        assert_eq!(ImageFormat::detect(&[0xff, 0xd8, 0xff, 0xe0]), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::detect(b"\x89PNG\r\n"), ImageFormat::Png);
    }

    #[test]
    fn test_rendered_slide_serializes_image_metadata_only() {
        let spec = Arc::new(SlideSpec {
            index: 0,
            title: "Cover".to_string(),
            body_outline: vec![],
            image_prompt: "gradient".to_string(),
        });
        let slide = RenderedSlide::succeeded(spec, ImageBytes::new(vec![1, 2, 3]), 1);
        let value = serde_json::to_value(&slide).unwrap();
        assert_eq!(value["image"]["size"], 3);
        assert_eq!(value["image"]["format"], "png");
        assert!(slide.is_finalized());
    }
}
