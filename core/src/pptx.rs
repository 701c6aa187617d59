//! PowerPoint (PresentationML) deck writer.
//!
//! Every slide uses a blank layout: the rendered image is stretched over the
//! whole page and the text sits on translucent black panels above it.

use crate::assembly::{DeckSlide, DocumentAssembler, LayoutHints, SlideRole};
use crate::error::AssemblyError;
use slide_common::{AspectRatio, Language};
use std::fmt::Write as _;
use std::io::{Cursor, Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const EMU_PER_INCH: f64 = 914_400.0;
const PAGE_HEIGHT_IN: f64 = 7.5;

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const NS_PKG_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const CORE_PROPS_REL: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";
const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

const WHITE: &str = "FFFFFF";
const SUBTLE: &str = "C8C8C8";

#[derive(Debug, Clone, Default)]
pub struct PptxDeckAssembler;

impl PptxDeckAssembler {
    pub fn new() -> Self {
        Self
    }
}

fn emu(inches: f64) -> i64 {
    (inches * EMU_PER_INCH).round() as i64
}

/// Page size in inches. Height is fixed; width follows the ratio.
fn page_inches(aspect: AspectRatio) -> (f64, f64) {
    let (w, h) = aspect.ratio();
    (PAGE_HEIGHT_IN * f64::from(w) / f64::from(h), PAGE_HEIGHT_IN)
}

fn lang_tag(language: Language) -> &'static str {
    match language {
        Language::Chinese => "zh-CN",
        Language::English => "en-US",
        Language::Japanese => "ja-JP",
    }
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters are not allowed in XML 1.0.
            c if c.is_control() && !matches!(c, '\t' | '\n' | '\r') => {}
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Rect {
    fn xfrm(&self) -> String {
        format!(
            "<a:xfrm><a:off x=\"{}\" y=\"{}\"/><a:ext cx=\"{}\" cy=\"{}\"/></a:xfrm>",
            emu(self.x),
            emu(self.y),
            emu(self.w),
            emu(self.h)
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    size_pt: u32,
    bold: bool,
    color: &'static str,
    centered: bool,
    space_before_pt: u32,
    space_after_pt: u32,
}

impl TextStyle {
    fn heading(size_pt: u32) -> Self {
        Self {
            size_pt,
            bold: true,
            color: WHITE,
            centered: false,
            space_before_pt: 0,
            space_after_pt: 0,
        }
    }

    fn centered(mut self) -> Self {
        self.centered = true;
        self
    }
}

/// Shape tree of one slide. Shape ids start at 2; 1 is the tree itself.
struct ShapeTree<'a> {
    xml: String,
    next_id: u32,
    lang: &'a str,
}

impl<'a> ShapeTree<'a> {
    fn new(lang: &'a str) -> Self {
        Self {
            xml: String::new(),
            next_id: 2,
            lang,
        }
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn picture(&mut self, rel_id: &str, area: Rect) {
        let id = self.take_id();
        let _ = write!(
            self.xml,
            "<p:pic><p:nvPicPr><p:cNvPr id=\"{id}\" name=\"Picture {id}\"/>\
             <p:cNvPicPr><a:picLocks noChangeAspect=\"1\"/></p:cNvPicPr><p:nvPr/></p:nvPicPr>\
             <p:blipFill><a:blip r:embed=\"{rel_id}\"/><a:stretch><a:fillRect/></a:stretch></p:blipFill>\
             <p:spPr>{xfrm}<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></p:spPr></p:pic>",
            xfrm = area.xfrm(),
        );
    }

    /// Black panel; `opacity` in percent.
    fn panel(&mut self, area: Rect, opacity: u32, rounded: bool) {
        let id = self.take_id();
        let geometry = if rounded { "roundRect" } else { "rect" };
        let _ = write!(
            self.xml,
            "<p:sp><p:nvSpPr><p:cNvPr id=\"{id}\" name=\"Panel {id}\"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr>\
             <p:spPr>{xfrm}<a:prstGeom prst=\"{geometry}\"><a:avLst/></a:prstGeom>\
             <a:solidFill><a:srgbClr val=\"000000\"><a:alpha val=\"{alpha}\"/></a:srgbClr></a:solidFill>\
             <a:ln><a:noFill/></a:ln></p:spPr></p:sp>",
            xfrm = area.xfrm(),
            alpha = opacity * 1000,
        );
    }

    fn text_box<S: AsRef<str>>(&mut self, area: Rect, paragraphs: &[S], style: TextStyle) {
        let id = self.take_id();
        let _ = write!(
            self.xml,
            "<p:sp><p:nvSpPr><p:cNvPr id=\"{id}\" name=\"TextBox {id}\"/><p:cNvSpPr txBox=\"1\"/><p:nvPr/></p:nvSpPr>\
             <p:spPr>{xfrm}<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom><a:noFill/></p:spPr>\
             <p:txBody><a:bodyPr wrap=\"square\" rtlCol=\"0\"><a:normAutofit/></a:bodyPr><a:lstStyle/>",
            xfrm = area.xfrm(),
        );
        for text in paragraphs {
            self.paragraph(text.as_ref(), style);
        }
        self.xml.push_str("</p:txBody></p:sp>");
    }

    fn paragraph(&mut self, text: &str, style: TextStyle) {
        self.xml.push_str("<a:p><a:pPr");
        if style.centered {
            self.xml.push_str(" algn=\"ctr\"");
        }
        self.xml.push('>');
        if style.space_before_pt > 0 {
            let _ = write!(
                self.xml,
                "<a:spcBef><a:spcPts val=\"{}\"/></a:spcBef>",
                style.space_before_pt * 100
            );
        }
        if style.space_after_pt > 0 {
            let _ = write!(
                self.xml,
                "<a:spcAft><a:spcPts val=\"{}\"/></a:spcAft>",
                style.space_after_pt * 100
            );
        }
        let _ = write!(
            self.xml,
            "</a:pPr><a:r><a:rPr lang=\"{lang}\" sz=\"{size}\" b=\"{bold}\" dirty=\"0\">\
             <a:solidFill><a:srgbClr val=\"{color}\"/></a:solidFill></a:rPr>\
             <a:t>{text}</a:t></a:r></a:p>",
            lang = self.lang,
            size = style.size_pt * 100,
            bold = u8::from(style.bold),
            color = style.color,
            text = escape_xml(text),
        );
    }
}

const GROUP_HEADER: &str = "<p:nvGrpSpPr><p:cNvPr id=\"1\" name=\"\"/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr>\
<p:grpSpPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"0\" cy=\"0\"/>\
<a:chOff x=\"0\" y=\"0\"/><a:chExt cx=\"0\" cy=\"0\"/></a:xfrm></p:grpSpPr>";

fn slide_xml(slide: &DeckSlide<'_>, page: (f64, f64), lang: &str) -> String {
    let (width, height) = page;
    let spec = slide.spec;
    let mut tree = ShapeTree::new(lang);
    tree.picture(
        "rId2",
        Rect {
            x: 0.0,
            y: 0.0,
            w: width,
            h: height,
        },
    );

    match slide.role {
        SlideRole::Cover => {
            tree.panel(Rect { x: 0.0, y: 2.5, w: width, h: 3.0 }, 50, false);
            tree.text_box(
                Rect { x: 0.5, y: 2.8, w: width - 1.0, h: 1.5 },
                &[spec.title.as_str()],
                TextStyle::heading(54).centered(),
            );
            if !spec.body_outline.is_empty() {
                let subtitle = spec.body_outline.join(" · ");
                let style = TextStyle {
                    size_pt: 24,
                    bold: false,
                    color: SUBTLE,
                    centered: true,
                    space_before_pt: 0,
                    space_after_pt: 0,
                };
                tree.text_box(
                    Rect { x: 0.5, y: 4.2, w: width - 1.0, h: 0.8 },
                    &[subtitle],
                    style,
                );
            }
        }
        SlideRole::Content => {
            tree.panel(Rect { x: 0.0, y: 0.0, w: width, h: 1.4 }, 65, false);
            tree.text_box(
                Rect { x: 0.6, y: 0.35, w: width - 1.2, h: 0.9 },
                &[spec.title.as_str()],
                TextStyle::heading(40),
            );
            if !spec.body_outline.is_empty() {
                tree.panel(Rect { x: 0.5, y: 1.8, w: width - 1.0, h: 4.8 }, 45, true);
                let points: Vec<String> =
                    spec.body_outline.iter().map(|p| format!("• {p}")).collect();
                let style = TextStyle {
                    size_pt: 28,
                    bold: false,
                    color: WHITE,
                    centered: false,
                    space_before_pt: 12,
                    space_after_pt: 8,
                };
                tree.text_box(
                    Rect { x: 0.8, y: 2.0, w: width - 1.6, h: 4.4 },
                    points.as_slice(),
                    style,
                );
            }
        }
        SlideRole::Ending => {
            tree.panel(Rect { x: 0.0, y: 2.8, w: width, h: 2.5 }, 55, false);
            tree.text_box(
                Rect { x: 0.5, y: 3.2, w: width - 1.0, h: 1.5 },
                &[spec.title.as_str()],
                TextStyle::heading(60).centered(),
            );
        }
    }

    format!(
        "{XML_DECL}<p:sld xmlns:a=\"{NS_A}\" xmlns:r=\"{NS_R}\" xmlns:p=\"{NS_P}\">\
         <p:cSld><p:spTree>{GROUP_HEADER}{shapes}</p:spTree></p:cSld>\
         <p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>",
        shapes = tree.xml,
    )
}

struct Rel {
    id: String,
    kind: String,
    target: String,
}

fn rel(id: usize, kind: &str, target: impl Into<String>) -> Rel {
    Rel {
        id: format!("rId{id}"),
        kind: kind.to_string(),
        target: target.into(),
    }
}

fn relationships(entries: &[Rel]) -> String {
    let mut xml = format!("{XML_DECL}<Relationships xmlns=\"{NS_PKG_RELS}\">");
    for Rel { id, kind, target } in entries {
        let _ = write!(
            xml,
            "<Relationship Id=\"{id}\" Type=\"{kind}\" Target=\"{target}\"/>"
        );
    }
    xml.push_str("</Relationships>");
    xml
}

fn content_types(slide_count: usize) -> String {
    let mut xml = format!(
        "{XML_DECL}<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Default Extension=\"png\" ContentType=\"image/png\"/>\
         <Default Extension=\"jpg\" ContentType=\"image/jpeg\"/>\
         <Override PartName=\"/ppt/presentation.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml\"/>\
         <Override PartName=\"/ppt/slideMasters/slideMaster1.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml\"/>\
         <Override PartName=\"/ppt/slideLayouts/slideLayout1.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml\"/>\
         <Override PartName=\"/ppt/theme/theme1.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.theme+xml\"/>\
         <Override PartName=\"/docProps/core.xml\" \
         ContentType=\"application/vnd.openxmlformats-package.core-properties+xml\"/>\
         <Override PartName=\"/docProps/app.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.extended-properties+xml\"/>"
    );
    for n in 1..=slide_count {
        let _ = write!(
            xml,
            "<Override PartName=\"/ppt/slides/slide{n}.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.presentationml.slide+xml\"/>"
        );
    }
    xml.push_str("</Types>");
    xml
}

fn presentation_xml(slide_count: usize, page: (f64, f64)) -> String {
    let mut ids = String::new();
    for n in 0..slide_count {
        let _ = write!(ids, "<p:sldId id=\"{}\" r:id=\"rId{}\"/>", 256 + n, n + 3);
    }
    format!(
        "{XML_DECL}<p:presentation xmlns:a=\"{NS_A}\" xmlns:r=\"{NS_R}\" xmlns:p=\"{NS_P}\" saveSubsetFonts=\"1\">\
         <p:sldMasterIdLst><p:sldMasterId id=\"2147483648\" r:id=\"rId1\"/></p:sldMasterIdLst>\
         <p:sldIdLst>{ids}</p:sldIdLst>\
         <p:sldSz cx=\"{cx}\" cy=\"{cy}\"/><p:notesSz cx=\"6858000\" cy=\"9144000\"/>\
         </p:presentation>",
        cx = emu(page.0),
        cy = emu(page.1),
    )
}

fn slide_master_xml() -> String {
    format!(
        "{XML_DECL}<p:sldMaster xmlns:a=\"{NS_A}\" xmlns:r=\"{NS_R}\" xmlns:p=\"{NS_P}\">\
         <p:cSld><p:bg><p:bgRef idx=\"1001\"><a:schemeClr val=\"bg1\"/></p:bgRef></p:bg>\
         <p:spTree>{GROUP_HEADER}</p:spTree></p:cSld>\
         <p:clrMap bg1=\"lt1\" tx1=\"dk1\" bg2=\"lt2\" tx2=\"dk2\" accent1=\"accent1\" accent2=\"accent2\" \
         accent3=\"accent3\" accent4=\"accent4\" accent5=\"accent5\" accent6=\"accent6\" hlink=\"hlink\" \
         folHlink=\"folHlink\"/>\
         <p:sldLayoutIdLst><p:sldLayoutId id=\"2147483649\" r:id=\"rId1\"/></p:sldLayoutIdLst>\
         <p:txStyles><p:titleStyle><a:lvl1pPr><a:defRPr sz=\"4400\"/></a:lvl1pPr></p:titleStyle>\
         <p:bodyStyle><a:lvl1pPr><a:defRPr sz=\"2800\"/></a:lvl1pPr></p:bodyStyle>\
         <p:otherStyle><a:lvl1pPr><a:defRPr sz=\"1800\"/></a:lvl1pPr></p:otherStyle></p:txStyles>\
         </p:sldMaster>"
    )
}

fn slide_layout_xml() -> String {
    format!(
        "{XML_DECL}<p:sldLayout xmlns:a=\"{NS_A}\" xmlns:r=\"{NS_R}\" xmlns:p=\"{NS_P}\" type=\"blank\" preserve=\"1\">\
         <p:cSld name=\"Blank\"><p:spTree>{GROUP_HEADER}</p:spTree></p:cSld>\
         <p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"
    )
}

fn theme_xml() -> String {
    let solid = "<a:solidFill><a:schemeClr val=\"phClr\"/></a:solidFill>";
    let line = format!("<a:ln w=\"6350\">{solid}</a:ln>");
    let effect = "<a:effectStyle><a:effectLst/></a:effectStyle>";
    let font = "<a:latin typeface=\"Arial\"/><a:ea typeface=\"\"/><a:cs typeface=\"\"/>";
    let colors = [
        ("dk1", "000000"),
        ("lt1", "FFFFFF"),
        ("dk2", "1F2937"),
        ("lt2", "F3F4F6"),
        ("accent1", "2563EB"),
        ("accent2", "059669"),
        ("accent3", "D97706"),
        ("accent4", "DC2626"),
        ("accent5", "7C3AED"),
        ("accent6", "0891B2"),
        ("hlink", "2563EB"),
        ("folHlink", "7C3AED"),
    ];
    let mut scheme = String::new();
    for (name, value) in colors {
        let _ = write!(scheme, "<a:{name}><a:srgbClr val=\"{value}\"/></a:{name}>");
    }
    format!(
        "{XML_DECL}<a:theme xmlns:a=\"{NS_A}\" name=\"Slide\"><a:themeElements>\
         <a:clrScheme name=\"Slide\">{scheme}</a:clrScheme>\
         <a:fontScheme name=\"Slide\"><a:majorFont>{font}</a:majorFont><a:minorFont>{font}</a:minorFont></a:fontScheme>\
         <a:fmtScheme name=\"Slide\">\
         <a:fillStyleLst>{solid}{solid}{solid}</a:fillStyleLst>\
         <a:lnStyleLst>{line}{line}{line}</a:lnStyleLst>\
         <a:effectStyleLst>{effect}{effect}{effect}</a:effectStyleLst>\
         <a:bgFillStyleLst>{solid}{solid}{solid}</a:bgFillStyleLst>\
         </a:fmtScheme></a:themeElements></a:theme>"
    )
}

fn core_props_xml(title: &str) -> String {
    format!(
        "{XML_DECL}<cp:coreProperties \
         xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\
         <dc:title>{title}</dc:title><dc:creator>slide</dc:creator></cp:coreProperties>",
        title = escape_xml(title),
    )
}

fn app_props_xml(slide_count: usize) -> String {
    format!(
        "{XML_DECL}<Properties \
         xmlns=\"http://schemas.openxmlformats.org/officeDocument/2006/extended-properties\">\
         <Application>slide</Application><Slides>{slide_count}</Slides></Properties>"
    )
}

struct Package<W: Write + Seek> {
    zip: ZipWriter<W>,
}

impl<W: Write + Seek> Package<W> {
    fn put(
        &mut self,
        name: &str,
        data: &[u8],
        method: CompressionMethod,
    ) -> Result<(), AssemblyError> {
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(zip::DateTime::default());
        self.zip
            .start_file(name, options)
            .map_err(|e| AssemblyError::internal(format!("failed to start {name}: {e}")))?;
        self.zip
            .write_all(data)
            .map_err(|e| AssemblyError::internal(format!("failed to write {name}: {e}")))
    }

    fn put_xml(&mut self, name: &str, xml: &str) -> Result<(), AssemblyError> {
        self.put(name, xml.as_bytes(), CompressionMethod::Deflated)
    }
}

impl DocumentAssembler for PptxDeckAssembler {
    fn content_type(&self) -> &'static str {
        "application/vnd.openxmlformats-officedocument.presentationml.presentation"
    }

    fn file_extension(&self) -> &'static str {
        "pptx"
    }

    fn assemble(
        &self,
        slides: &[DeckSlide<'_>],
        layout: &LayoutHints,
    ) -> Result<Vec<u8>, AssemblyError> {
        if slides.is_empty() {
            return Err(AssemblyError::internal("deck has no slides"));
        }
        let page = page_inches(layout.aspect_ratio);
        let lang = lang_tag(layout.language);
        let count = slides.len();
        let mut package = Package {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
        };

        let slide_rel = format!("{REL}/slide");
        let master_rel = format!("{REL}/slideMaster");
        let layout_rel = format!("{REL}/slideLayout");
        let theme_rel = format!("{REL}/theme");
        let image_rel = format!("{REL}/image");

        package.put_xml("[Content_Types].xml", &content_types(count))?;
        package.put_xml(
            "_rels/.rels",
            &relationships(&[
                rel(1, &format!("{REL}/officeDocument"), "ppt/presentation.xml"),
                rel(2, CORE_PROPS_REL, "docProps/core.xml"),
                rel(3, &format!("{REL}/extended-properties"), "docProps/app.xml"),
            ]),
        )?;
        package.put_xml("docProps/core.xml", &core_props_xml(&layout.title))?;
        package.put_xml("docProps/app.xml", &app_props_xml(count))?;

        // rId1 master, rId2 theme, rId3.. slides in deck order.
        let mut presentation_rels = vec![
            rel(1, &master_rel, "slideMasters/slideMaster1.xml"),
            rel(2, &theme_rel, "theme/theme1.xml"),
        ];
        presentation_rels
            .extend((1..=count).map(|n| rel(n + 2, &slide_rel, format!("slides/slide{n}.xml"))));
        package.put_xml("ppt/presentation.xml", &presentation_xml(count, page))?;
        package.put_xml(
            "ppt/_rels/presentation.xml.rels",
            &relationships(&presentation_rels),
        )?;

        package.put_xml("ppt/slideMasters/slideMaster1.xml", &slide_master_xml())?;
        package.put_xml(
            "ppt/slideMasters/_rels/slideMaster1.xml.rels",
            &relationships(&[
                rel(1, &layout_rel, "../slideLayouts/slideLayout1.xml"),
                rel(2, &theme_rel, "../theme/theme1.xml"),
            ]),
        )?;
        package.put_xml("ppt/slideLayouts/slideLayout1.xml", &slide_layout_xml())?;
        package.put_xml(
            "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
            &relationships(&[rel(1, &master_rel, "../slideMasters/slideMaster1.xml")]),
        )?;
        package.put_xml("ppt/theme/theme1.xml", &theme_xml())?;

        for (pos, slide) in slides.iter().enumerate() {
            let n = pos + 1;
            let media = format!("image{n}.{}", slide.image.format.extension());
            package.put_xml(&format!("ppt/slides/slide{n}.xml"), &slide_xml(slide, page, lang))?;
            package.put_xml(
                &format!("ppt/slides/_rels/slide{n}.xml.rels"),
                &relationships(&[
                    rel(1, &layout_rel, "../slideLayouts/slideLayout1.xml"),
                    rel(2, &image_rel, format!("../media/{media}")),
                ]),
            )?;
            // Images are already compressed.
            package.put(
                &format!("ppt/media/{media}"),
                &slide.image.data,
                CompressionMethod::Stored,
            )?;
        }

        let cursor = package
            .zip
            .finish()
            .map_err(|e| AssemblyError::internal(format!("failed to finish package: {e}")))?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slide_common::{ImageBytes, SlideSpec};
    use std::io::Read;
    use zip::ZipArchive;

    fn spec(index: usize, title: &str, points: &[&str]) -> SlideSpec {
        SlideSpec {
            index,
            title: title.to_string(),
            body_outline: points.iter().map(|p| p.to_string()).collect(),
            image_prompt: "gradient".to_string(),
        }
    }

    fn layout(aspect_ratio: AspectRatio) -> LayoutHints {
        LayoutHints {
            aspect_ratio,
            language: Language::English,
            title: "Renewable energy".to_string(),
        }
    }

    fn read_part(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut text = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    fn slide_parts(archive: &ZipArchive<Cursor<Vec<u8>>>) -> usize {
        archive
            .file_names()
            .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
            .count()
    }

    #[test]
    fn test_package_has_one_part_per_slide_in_order() {
        let png = ImageBytes::new(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a]);
        let jpeg = ImageBytes::new(vec![0xff, 0xd8, 0xff, 0xe0]);
        let specs = [
            spec(0, "Renewable energy", &["Solar", "Wind"]),
            spec(1, "Solar <power>", &["Panels on roofs", "Cheaper every year"]),
            spec(3, "Storage", &[]),
            spec(4, "Thank you", &["ignored"]),
        ];
        let slides = [
            DeckSlide { spec: &specs[0], image: &png, role: SlideRole::Cover },
            DeckSlide { spec: &specs[1], image: &jpeg, role: SlideRole::Content },
            DeckSlide { spec: &specs[2], image: &png, role: SlideRole::Content },
            DeckSlide { spec: &specs[3], image: &png, role: SlideRole::Ending },
        ];
        let bytes = PptxDeckAssembler
            .assemble(&slides, &layout(AspectRatio::Widescreen))
            .unwrap();
        assert!(bytes.starts_with(b"PK"));

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(slide_parts(&archive), 4);

        let presentation = read_part(&mut archive, "ppt/presentation.xml");
        assert_eq!(presentation.matches("<p:sldId ").count(), 4);
        assert!(presentation.contains("<p:sldSz cx=\"12192000\" cy=\"6858000\"/>"));

        let titles = ["Renewable energy", "Solar &lt;power&gt;", "Storage", "Thank you"];
        for (pos, title) in titles.iter().enumerate() {
            let xml = read_part(&mut archive, &format!("ppt/slides/slide{}.xml", pos + 1));
            assert!(xml.contains(&format!("<a:t>{title}</a:t>")), "slide {pos}: {xml}");
            assert!(xml.contains("r:embed=\"rId2\""));
        }

        let cover = read_part(&mut archive, "ppt/slides/slide1.xml");
        assert!(cover.contains("<a:t>Solar · Wind</a:t>"));
        assert!(cover.contains("sz=\"5400\" b=\"1\""));

        let content = read_part(&mut archive, "ppt/slides/slide2.xml");
        assert!(content.contains("<a:t>• Panels on roofs</a:t>"));
        assert!(content.contains("prst=\"roundRect\""));
        let bare = read_part(&mut archive, "ppt/slides/slide3.xml");
        assert!(!bare.contains("roundRect"));
        let ending = read_part(&mut archive, "ppt/slides/slide4.xml");
        assert!(!ending.contains("ignored"));
        assert!(ending.contains("sz=\"6000\""));

        let rels = read_part(&mut archive, "ppt/slides/_rels/slide2.xml.rels");
        assert!(rels.contains("Target=\"../media/image2.jpg\""));
        let mut media = Vec::new();
        archive
            .by_name("ppt/media/image2.jpg")
            .unwrap()
            .read_to_end(&mut media)
            .unwrap();
        assert_eq!(media, vec![0xff, 0xd8, 0xff, 0xe0]);
    }

    #[test]
    fn test_page_size_follows_aspect_ratio() {
        let image = ImageBytes::new(vec![0x89, b'P']);
        let specs = [spec(0, "Only", &[])];
        let slides = [DeckSlide { spec: &specs[0], image: &image, role: SlideRole::Cover }];
        for (aspect, cx) in [
            (AspectRatio::Standard, 9_144_000),
            (AspectRatio::Square, 6_858_000),
        ] {
            let bytes = PptxDeckAssembler.assemble(&slides, &layout(aspect)).unwrap();
            let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
            let presentation = read_part(&mut archive, "ppt/presentation.xml");
            assert!(presentation.contains(&format!("<p:sldSz cx=\"{cx}\" cy=\"6858000\"/>")));
        }
    }

    #[test]
    fn test_output_is_deterministic() {
        let image = ImageBytes::new(vec![0x89, b'P', b'N', b'G']);
        let specs = [spec(0, "Cover", &[]), spec(1, "End", &[])];
        let slides = [
            DeckSlide { spec: &specs[0], image: &image, role: SlideRole::Cover },
            DeckSlide { spec: &specs[1], image: &image, role: SlideRole::Ending },
        ];
        let a = PptxDeckAssembler.assemble(&slides, &layout(AspectRatio::Widescreen)).unwrap();
        let b = PptxDeckAssembler.assemble(&slides, &layout(AspectRatio::Widescreen)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_deck_is_rejected() {
        let err = PptxDeckAssembler
            .assemble(&[], &layout(AspectRatio::Widescreen))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::InternalFault { .. }));
    }

    #[test]
    fn test_escape_xml_drops_control_characters() {
        assert_eq!(escape_xml("a\u{1}&'b'"), "a&amp;&apos;b&apos;");
    }
}
