//! Single-file HTML deck writer.

use crate::assembly::{DeckSlide, DocumentAssembler, LayoutHints, SlideRole};
use crate::error::AssemblyError;
use base64::Engine;
use slide_common::Language;
use std::fmt::Write;

const STYLE: &str = "\
*{box-sizing:border-box;margin:0;padding:0}\
body{background:#111;font-family:\"Helvetica Neue\",Arial,\"PingFang SC\",\"Hiragino Sans\",\"Microsoft YaHei\",sans-serif;color:#fff}\
.deck{display:flex;flex-direction:column;align-items:center;gap:24px;padding:24px 0}\
.slide{position:relative;width:min(100vw,1280px);overflow:hidden;background-size:cover;background-position:center;page-break-after:always}\
.band{position:absolute;left:0;right:0;top:33%;padding:4% 6%;background:rgba(0,0,0,.55);text-align:center}\
.band h1{font-size:3.4vw;font-weight:700}\
.band p{margin-top:1.2vw;font-size:1.6vw;color:#c8c8c8}\
.ending .band{top:40%}\
.bar{position:absolute;left:0;right:0;top:0;padding:2.2% 4.5%;background:rgba(0,0,0,.65)}\
.bar h2{font-size:2.6vw;font-weight:700}\
.points{position:absolute;left:4%;right:4%;top:24%;bottom:7%;padding:3% 4%;border-radius:12px;background:rgba(0,0,0,.45);list-style:none}\
.points li{font-size:1.6vw;line-height:1.6;margin-bottom:.9vw}\
.points li::before{content:\"\\2022\";margin-right:.8vw;color:#6cb4ff}\
@media print{body{background:none}.deck{gap:0;padding:0}}";

/// Writes every slide as a section with its image as full-bleed background
/// and the text laid over it. Output depends only on the inputs.
#[derive(Debug, Clone, Default)]
pub struct HtmlDeckAssembler;

impl HtmlDeckAssembler {
    pub fn new() -> Self {
        Self
    }
}

fn lang_tag(language: Language) -> &'static str {
    match language {
        Language::Chinese => "zh",
        Language::English => "en",
        Language::Japanese => "ja",
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn write_slide(out: &mut String, number: usize, slide: &DeckSlide<'_>, ratio: (u32, u32)) {
    let spec = slide.spec;
    let data = base64::engine::general_purpose::STANDARD.encode(&slide.image.data);
    let (class, body) = match slide.role {
        SlideRole::Cover => {
            let mut body = format!("<div class=\"band\"><h1>{}</h1>", escape_html(&spec.title));
            if !spec.body_outline.is_empty() {
                let subtitle = spec.body_outline.join(" · ");
                let _ = write!(body, "<p>{}</p>", escape_html(&subtitle));
            }
            body.push_str("</div>");
            ("cover", body)
        }
        SlideRole::Ending => (
            "ending",
            format!("<div class=\"band\"><h1>{}</h1></div>", escape_html(&spec.title)),
        ),
        SlideRole::Content => {
            let mut body = format!("<div class=\"bar\"><h2>{}</h2></div>", escape_html(&spec.title));
            if !spec.body_outline.is_empty() {
                body.push_str("<ul class=\"points\">");
                for point in &spec.body_outline {
                    let _ = write!(body, "<li>{}</li>", escape_html(point));
                }
                body.push_str("</ul>");
            }
            ("content", body)
        }
    };
    let _ = write!(
        out,
        "<section class=\"slide {class}\" id=\"slide-{number}\" data-index=\"{index}\" \
         style=\"aspect-ratio:{w}/{h};background-image:url(data:{mime};base64,{data})\">{body}</section>\n",
        index = spec.index,
        w = ratio.0,
        h = ratio.1,
        mime = slide.image.format.mime_type(),
    );
}

impl DocumentAssembler for HtmlDeckAssembler {
    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "html"
    }

    fn assemble(
        &self,
        slides: &[DeckSlide<'_>],
        layout: &LayoutHints,
    ) -> Result<Vec<u8>, AssemblyError> {
        if slides.is_empty() {
            return Err(AssemblyError::internal("deck has no slides"));
        }
        let mut out = String::new();
        let _ = write!(
            out,
            "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<main class=\"deck\">\n",
            lang = lang_tag(layout.language),
            title = escape_html(&layout.title),
        );
        let ratio = layout.aspect_ratio.ratio();
        for (pos, slide) in slides.iter().enumerate() {
            write_slide(&mut out, pos + 1, slide, ratio);
        }
        out.push_str("</main>\n</body>\n</html>\n");
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slide_common::{AspectRatio, ImageBytes, SlideSpec};

    fn spec(index: usize, title: &str, points: &[&str]) -> SlideSpec {
        SlideSpec {
            index,
            title: title.to_string(),
            body_outline: points.iter().map(|p| p.to_string()).collect(),
            image_prompt: "gradient".to_string(),
        }
    }

    fn layout() -> LayoutHints {
        LayoutHints {
            aspect_ratio: AspectRatio::Widescreen,
            language: Language::Chinese,
            title: "人工智能".to_string(),
        }
    }

    #[test]
    fn test_roles_render_expected_markup() {
        let image = ImageBytes::new(vec![0xff, 0xd8, 0xff, 0xe0]);
        let specs = [
            spec(0, "人工智能", &["诊断", "药物"]),
            spec(1, "Imaging", &["Faster <reads>"]),
            spec(2, "谢谢", &["ignored"]),
        ];
        let slides = [
            DeckSlide { spec: &specs[0], image: &image, role: SlideRole::Cover },
            DeckSlide { spec: &specs[1], image: &image, role: SlideRole::Content },
            DeckSlide { spec: &specs[2], image: &image, role: SlideRole::Ending },
        ];
        let html = String::from_utf8(HtmlDeckAssembler.assemble(&slides, &layout()).unwrap()).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<html lang=\"zh\">"));
        assert!(html.contains("<p>诊断 · 药物</p>"));
        assert!(html.contains("<li>Faster &lt;reads&gt;</li>"));
        assert!(!html.contains("ignored"));
        assert!(html.contains("data:image/jpeg;base64,/9j/4A=="));
        assert!(html.contains("aspect-ratio:16/9"));
        assert_eq!(html.matches("<section").count(), 3);
    }

    #[test]
    fn test_output_is_deterministic() {
        let image = ImageBytes::new(vec![0x89, b'P', b'N', b'G']);
        let specs = [spec(0, "Cover", &[]), spec(3, "End", &[])];
        let slides = [
            DeckSlide { spec: &specs[0], image: &image, role: SlideRole::Cover },
            DeckSlide { spec: &specs[1], image: &image, role: SlideRole::Ending },
        ];
        let a = HtmlDeckAssembler.assemble(&slides, &layout()).unwrap();
        let b = HtmlDeckAssembler.assemble(&slides, &layout()).unwrap();
        assert_eq!(a, b);
        let html = String::from_utf8(a).unwrap();
        assert!(html.contains("id=\"slide-2\" data-index=\"3\""));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a & \"b\" <c>"), "a &amp; &quot;b&quot; &lt;c&gt;");
    }
}
