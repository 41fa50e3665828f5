//! hOCR to text zones.
//!
//! The scanner walks the parsed document from `<body>` down and rebuilds the
//! zone hierarchy from hOCR classes and `bbox` title properties. Real-world
//! engine output is loose: lines without boxes, boxes for whitespace, words
//! that are not words. The handful of engine quirks that are worth
//! correcting are handled locally; everything else is malformed input.
//!
//! # Example
//!
//! ```rust
//! use ocrodjvu::core::config::ExtractSettings;
//! use ocrodjvu::hocr::extract_text_str;
//!
//! let markup = r#"<html><head><meta name="ocr-system" content="example"/></head><body>
//! <div class="ocr_page" title="bbox 0 0 100 40">
//! <span class="ocrx_word" title="bbox 10 10 50 30">hi</span>
//! </div></body></html>"#;
//!
//! let zones = extract_text_str(markup, &ExtractSettings::default())?;
//! assert_eq!(zones[0].to_string(), r#"(page 0 0 100 40 (word 10 10 50 30 "hi"))"#);
//! # Ok::<(), ocrodjvu::OcrodjvuError>(())
//! ```

use super::document::{EmbeddedBoxes, EngineQuirks, HocrDocument};
use crate::core::config::{Details, ExtractSettings};
use crate::error::{OcrodjvuError, Result};
use crate::text_zones::{BBox, Zone, ZoneChild, ZoneType, group_words};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Node};

static BBOX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bbox\s+(-?\d+)\s+(-?\d+)\s+(-?\d+)\s+(-?\d+)").expect("bbox regex is valid"));

static BBOXES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bboxes\s+((?:-?\d+\s+-?\d+\s+-?\d+\s+-?\d+)(?:,?\s*(?:-?\d+\s+-?\d+\s+-?\d+\s+-?\d+))*)")
        .expect("bboxes regex is valid")
});

static TESSERACT_RSTRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s+$").expect("rstrip regex is valid"));

/// Box used by Cuneiform for characters it has no geometry for.
const CUNEIFORM_NO_BOX: (i32, i32, i32, i32) = (-1, -1, -1, -1);

/// Extract text zones from raw hOCR.
///
/// Returns the top-level zones found in `<body>`, rotated according to
/// `settings.rotation`. Usually that is a single PAGE zone.
pub fn extract_text(markup: &[u8], settings: &ExtractSettings) -> Result<Vec<Zone>> {
    settings.validate()?;
    let document = HocrDocument::parse(markup, settings.fix_utf8)?;
    scan_document(&document, settings)
}

/// Like [`extract_text`], for markup that is already a string.
pub fn extract_text_str(markup: &str, settings: &ExtractSettings) -> Result<Vec<Zone>> {
    settings.validate()?;
    scan_document(&HocrDocument::parse_str(markup), settings)
}

/// Extract text zones from an already parsed document.
pub fn scan_document(document: &HocrDocument, settings: &ExtractSettings) -> Result<Vec<Zone>> {
    let mut quirks = document.quirks();
    let mut boxes = None;
    let wants_characters = settings.details < Details::Words
        || (settings.segmentation.is_uax29() && settings.details <= Details::Words);
    if wants_characters && let Some(embedded) = document.embedded_boxes()? {
        tracing::debug!("using {} embedded character boxes", embedded.remaining());
        quirks.tesseract = true;
        boxes = Some(embedded);
    }

    let Some(body) = document.body() else {
        return Ok(Vec::new());
    };
    let mut scanner = Scanner {
        settings,
        quirks,
        boxes,
    };
    let mut result = Vec::new();
    for child in scanner.scan(body, settings.page_size)? {
        match child {
            ZoneChild::Text(text) if is_blank(&text) => {}
            ZoneChild::Text(_) => {
                return Err(OcrodjvuError::malformed_hocr(
                    "plain text intermixed with structural elements",
                ));
            }
            ZoneChild::Zone(mut zone) => {
                zone.rotate(settings.rotation)?;
                result.push(zone);
            }
        }
    }
    Ok(result)
}

/// Outcome of matching a text run against its character boxes.
enum Reconciled {
    /// No finer detail needed, or no boxes known: keep the text as is.
    Merged(String),
    Words(Vec<Zone>),
    Characters(Vec<Zone>),
    /// Nothing worth keeping (Tesseract's blank "words").
    Nothing,
}

impl Reconciled {
    fn into_children(self) -> Vec<ZoneChild> {
        match self {
            Reconciled::Merged(text) => vec![ZoneChild::Text(text)],
            Reconciled::Words(zones) | Reconciled::Characters(zones) => {
                zones.into_iter().map(ZoneChild::Zone).collect()
            }
            Reconciled::Nothing => Vec::new(),
        }
    }
}

/// Where character boxes for a text run come from.
enum BoxSource<'a> {
    Title(&'a str),
    Embedded(&'a mut EmbeddedBoxes),
}

struct Scanner<'s> {
    settings: &'s ExtractSettings,
    quirks: EngineQuirks,
    boxes: Option<EmbeddedBoxes>,
}

impl Scanner<'_> {
    fn scan_children(&mut self, node: ElementRef<'_>, page_size: Option<(i32, i32)>) -> Result<Vec<ZoneChild>> {
        let mut result: Vec<ZoneChild> = Vec::new();
        for child in node.children() {
            match child.value() {
                Node::Text(text) => {
                    let run: &str = text;
                    if let Some(ZoneChild::Text(last)) = result.last_mut() {
                        last.push_str(run);
                    } else {
                        result.push(ZoneChild::Text(run.to_string()));
                    }
                }
                Node::Element(_) => {
                    if let Some(element) = ElementRef::wrap(child) {
                        result.extend(self.scan(element, page_size)?);
                    }
                }
                _ => {}
            }
        }
        Ok(result)
    }

    fn classify(&self, node: ElementRef<'_>, bbox: &BBox) -> Option<ZoneType> {
        let element = node.value();
        if self.quirks.uses_cuneiform_tags() {
            return ZoneType::from_cuneiform_tag(element.name());
        }
        for class in element.classes() {
            // Some Tesseract releases use box-less ocrx_word spans for their own purposes.
            if self.quirks.tesseract && class == "ocrx_word" && !bbox.is_complete() {
                continue;
            }
            if let Some(zone_type) = ZoneType::from_hocr_class(class) {
                return Some(zone_type);
            }
        }
        // Cuneiform 0.9 does not mark paragraphs.
        if element.name() == "p" {
            return Some(ZoneType::Paragraph);
        }
        None
    }

    fn scan(&mut self, node: ElementRef<'_>, page_size: Option<(i32, i32)>) -> Result<Vec<ZoneChild>> {
        let element = node.value();
        if element.name() == "script" {
            return Ok(Vec::new());
        }
        let title = element.attr("title").unwrap_or("");
        let mut bbox = parse_bbox(title);

        let Some(zone_type) = self.classify(node, &bbox) else {
            return self.scan_children(node, page_size);
        };

        let page_size = if zone_type == ZoneType::Page {
            match bbox.coordinates() {
                None => {
                    let (width, height) = self.settings.page_size.ok_or_else(|| {
                        OcrodjvuError::malformed_hocr("page without bounding box information")
                    })?;
                    bbox = BBox::new(0, 0, width, height);
                    (width, height)
                }
                Some((0, 0, x1, y1)) => (x1, y1),
                Some(_) => {
                    return Err(OcrodjvuError::malformed_hocr(
                        "page's bounding box should start with (0, 0)",
                    ));
                }
            }
        } else {
            page_size.ok_or_else(|| OcrodjvuError::malformed_hocr("unable to determine page size"))?
        };

        let mut children = self.scan_children(node, Some(page_size))?;
        let empty = if zone_type == ZoneType::Page {
            vec![ZoneChild::Zone(Zone::new(zone_type, bbox, Vec::new()))]
        } else {
            Vec::new()
        };
        if children.is_empty() {
            return Ok(empty);
        }

        let mut has_string = false;
        let mut has_nonblank_string = false;
        let mut has_char_zone = false;
        let mut has_nonchar_zone = false;
        for child in &children {
            match child {
                ZoneChild::Text(text) => {
                    has_string = true;
                    has_nonblank_string |= !is_blank(text);
                }
                ZoneChild::Zone(zone) if zone.zone_type == ZoneType::Character => has_char_zone = true,
                ZoneChild::Zone(_) => has_nonchar_zone = true,
            }
        }
        let mut has_zone = has_char_zone || has_nonchar_zone;

        if has_zone {
            if has_nonblank_string {
                return Err(OcrodjvuError::malformed_hocr(
                    "plain text intermixed with structural elements",
                ));
            }
            if has_char_zone && has_nonchar_zone {
                return Err(OcrodjvuError::malformed_hocr(
                    "character zones intermixed with non-character zones",
                ));
            }
            // The page box is fixed by the page size, not by its contents.
            if zone_type != ZoneType::Page {
                for zone in children.iter().filter_map(ZoneChild::as_zone) {
                    bbox.update(&zone.bbox);
                }
            }
            if zone_type >= ZoneType::Line
                && let Some(ZoneChild::Text(text)) = children.last()
                && is_space(text)
            {
                children.pop();
            }
        }

        if zone_type <= ZoneType::Word {
            if has_zone {
                return Ok(children);
            }
            if !bbox.is_complete() {
                return Err(OcrodjvuError::malformed_hocr("zone without bounding box information"));
            }
            let text = concat_text(&children);
            return Ok(match self.reconcile(zone_type, title, &text, page_size)? {
                // Reported as a character zone even for hOCR words; words get regrouped by the parent.
                Reconciled::Merged(text) => vec![ZoneChild::Zone(Zone::with_text(ZoneType::Character, bbox, text))],
                other => other.into_children(),
            });
        }

        if !has_zone {
            let title = match self.quirks.cuneiform {
                Some((0, 9)) => cuneiform_cinfo_title(node).unwrap_or(title),
                _ => title,
            };
            let text = concat_text(&children);
            match self.reconcile(zone_type, title, &text, page_size)? {
                Reconciled::Nothing => return Ok(empty),
                Reconciled::Merged(text) => {
                    children = vec![ZoneChild::Text(text.trim_end().to_string())];
                    has_string = true;
                    has_zone = false;
                    has_char_zone = false;
                }
                reconciled @ (Reconciled::Words(_) | Reconciled::Characters(_)) => {
                    children = reconciled.into_children();
                    if children.is_empty() {
                        return Ok(empty);
                    }
                    has_zone = true;
                    has_string = false;
                    has_char_zone = false;
                }
            }
        }

        if has_char_zone {
            children = group_words(&children, self.settings.details, &self.settings.segmentation)?;
            has_string = false;
            if children.is_empty() {
                return Ok(empty);
            }
        }

        if has_zone && has_string {
            children.retain(|child| matches!(child, ZoneChild::Zone(_)));
            if children.is_empty() {
                return Ok(empty);
            }
        }

        if !bbox.is_complete() {
            // OCRopus 0.2 emits such placeholder elements.
            if node.children().all(|child| !child.value().is_element()) {
                return Ok(Vec::new());
            }
            if let [ZoneChild::Text(text)] = children.as_slice()
                && (text.is_empty() || is_space(text))
            {
                return Ok(Vec::new());
            }
            return Err(OcrodjvuError::malformed_hocr("text zone without bounding box information"));
        }

        Ok(vec![ZoneChild::Zone(Zone::new(zone_type, bbox, children))])
    }

    /// Match `text` against its character boxes and split it as deep as needed.
    fn reconcile(&mut self, zone_type: ZoneType, title: &str, text: &str, page_size: (i32, i32)) -> Result<Reconciled> {
        let embedded_eol = zone_type <= ZoneType::Line && text.ends_with('\n');
        let stripped = if self.quirks.tesseract {
            // Tesseract uses spaces for unrecognized characters; only strip trailing line breaks.
            TESSERACT_RSTRIP.replace(text, "").into_owned()
        } else {
            text.trim_end().to_string()
        };
        let trailing_whitespace = text.chars().count() - stripped.chars().count();
        let chars: Vec<char> = stripped.chars().collect();

        if self.settings.effective_details().merges(zone_type) {
            return Ok(Reconciled::Merged(stripped));
        }
        if self.quirks.tesseract && zone_type > ZoneType::Word && is_space(&stripped) {
            return Ok(Reconciled::Nothing);
        }

        let source = match self.boxes.as_mut() {
            Some(boxes) => BoxSource::Embedded(boxes),
            None => BoxSource::Title(title),
        };
        let mut coordinates = match source {
            BoxSource::Title(title) => match parse_bboxes(title) {
                Some(coordinates) => coordinates,
                None => return Ok(Reconciled::Merged(stripped)),
            },
            BoxSource::Embedded(boxes) => {
                let mut coordinates = Vec::with_capacity(chars.len());
                for (ch, char_box) in chars.iter().zip(boxes.by_ref()) {
                    if let Some(expected) = char_box.ch
                        && expected != *ch
                    {
                        return Err(OcrodjvuError::malformed_ocr_output(
                            "hOCR text and \"makebox\" output do not match",
                        ));
                    }
                    coordinates.push(char_box.top_down(page_size.1));
                }
                coordinates
            }
        };

        let length = chars.len();
        if coordinates.len() == length {
        } else if coordinates.len() > length && coordinates.len() - length <= trailing_whitespace {
            // Cuneiform 0.9 provides boxes for some whitespace characters.
            coordinates.truncate(length);
        } else if self.quirks.cuneiform.is_none() && !embedded_eol && coordinates.len() == length + 1 {
            // OCRopus adds a box when a line ends with a hyphen.
            coordinates.pop();
        } else {
            return Err(OcrodjvuError::malformed_hocr(format!(
                "number of bboxes doesn't match text length ({} bboxes, {} characters)",
                coordinates.len(),
                length
            )));
        }

        let char_zone = |k: usize| {
            let (x0, y0, x1, y1) = coordinates[k];
            Zone::with_text(ZoneType::Character, BBox::new(x0, y0, x1, y1), chars[k].to_string())
        };

        if zone_type <= ZoneType::Word {
            return Ok(Reconciled::Characters((0..length).map(char_zone).collect()));
        }

        let mut words = Vec::new();
        let mut start = 0;
        for end in self.settings.segmentation.boundaries(&stripped) {
            if chars[start..end].iter().all(|c| c.is_whitespace()) {
                start = end;
                continue;
            }
            let mut bbox = BBox::empty();
            for &(x0, y0, x1, y1) in &coordinates[start..end] {
                if self.quirks.cuneiform.is_some() && (x0, y0, x1, y1) == CUNEIFORM_NO_BOX {
                    return Err(OcrodjvuError::malformed_hocr("missing bbox for non-whitespace character"));
                }
                bbox.update(&BBox::new(x0, y0, x1, y1));
            }
            let children = if self.settings.details > Details::Characters {
                vec![ZoneChild::Text(chars[start..end].iter().collect())]
            } else {
                (start..end).map(|k| ZoneChild::Zone(char_zone(k))).collect()
            };
            words.push(Zone::new(ZoneType::Word, bbox, children));
            start = end;
        }
        Ok(Reconciled::Words(words))
    }
}

/// `title` of a Cuneiform 0.9 `ocr_cinfo` span, which holds the boxes of its parent.
fn cuneiform_cinfo_title<'a>(node: ElementRef<'a>) -> Option<&'a str> {
    let cinfo = node.children().filter_map(ElementRef::wrap).find(|child| {
        child.value().name() == "span" && child.value().attr("class") == Some("ocr_cinfo")
    })?;
    if cinfo.children().any(|child| child.value().is_element() || child.value().is_text()) {
        return None;
    }
    Some(cinfo.value().attr("title").unwrap_or(""))
}

fn parse_bbox(title: &str) -> BBox {
    let Some(captures) = BBOX_RE.captures(title) else {
        return BBox::empty();
    };
    let coordinate = |i: usize| captures.get(i).and_then(|m| m.as_str().parse::<i32>().ok());
    match (coordinate(1), coordinate(2), coordinate(3), coordinate(4)) {
        (Some(x0), Some(y0), Some(x1), Some(y1)) => BBox::new(x0, y0, x1, y1),
        _ => BBox::empty(),
    }
}

fn parse_bboxes(title: &str) -> Option<Vec<(i32, i32, i32, i32)>> {
    let captures = BBOXES_RE.captures(title)?;
    let numbers: Vec<i32> = captures
        .get(1)?
        .as_str()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    Some(
        numbers
            .chunks_exact(4)
            .map(|chunk| (chunk[0], chunk[1], chunk[2], chunk[3]))
            .collect(),
    )
}

fn concat_text(children: &[ZoneChild]) -> String {
    children.iter().filter_map(ZoneChild::as_text).collect()
}

/// Non-empty and whitespace only.
fn is_space(text: &str) -> bool {
    !text.is_empty() && text.chars().all(char::is_whitespace)
}

/// Empty or whitespace only.
fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hocr::document::embed_makebox;
    use crate::segmentation::WordSegmentation;

    const HEAD: &str = r#"<html><head><meta name="ocr-system" content="unit-test"/></head>"#;

    fn document(body: &str) -> String {
        format!("{}<body>{}</body></html>", HEAD, body)
    }

    fn settings(details: Details) -> ExtractSettings {
        ExtractSettings {
            details,
            ..Default::default()
        }
    }

    fn sexprs(zones: &[Zone]) -> Vec<String> {
        zones.iter().map(Zone::to_string).collect()
    }

    #[test]
    fn test_single_word_page() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 40"><span class="ocrx_word" title="bbox 10 10 50 30">hi</span></div>"#,
        );
        let mut settings = settings(Details::Words);
        settings.page_size = Some((100, 40));
        let zones = extract_text_str(&markup, &settings).unwrap();
        assert_eq!(sexprs(&zones), vec![r#"(page 0 0 100 40 (word 10 10 50 30 "hi"))"#]);
    }

    #[test]
    fn test_line_with_words() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 200 100">
<span class="ocr_line" title="bbox 10 10 110 30"><span class="ocrx_word" title="bbox 10 10 50 30">foo</span> <span class="ocrx_word" title="bbox 60 12 110 30">bar</span>
</span>
</div>"#,
        );
        let zones = extract_text_str(&markup, &settings(Details::Words)).unwrap();
        assert_eq!(
            sexprs(&zones),
            vec![r#"(page 0 0 200 100 (line 10 70 110 90 (word 10 70 50 90 "foo") (word 60 70 110 88 "bar")))"#]
        );
    }

    #[test]
    fn test_line_detail_merges_words() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 200 100"><span class="ocr_line" title="bbox 10 10 110 30"><span class="ocrx_word" title="bbox 10 10 50 30">foo</span> <span class="ocrx_word" title="bbox 60 12 110 30">bar</span></span></div>"#,
        );
        let zones = extract_text_str(&markup, &settings(Details::Lines)).unwrap();
        assert_eq!(sexprs(&zones), vec![r#"(page 0 0 200 100 (line 10 70 110 90 "foo bar"))"#]);
    }

    #[test]
    fn test_bboxes_property_splits_line() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 40 10; bboxes 0 0 10 10, 10 0 20 10, 20 0 30 10, 30 0 40 10">ab c</span></div>"#,
        );
        let zones = extract_text_str(&markup, &settings(Details::Characters)).unwrap();
        assert_eq!(
            sexprs(&zones),
            vec![
                r#"(page 0 0 100 50 (line 0 40 40 50 (word 0 40 20 50 (char 0 40 10 50 "a") (char 10 40 20 50 "b")) (word 30 40 40 50 (char 30 40 40 50 "c"))))"#
            ]
        );
    }

    #[test]
    fn test_bboxes_count_mismatch_is_malformed() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 40 10; bboxes 0 0 10 10, 10 0 20 10">abcd</span></div>"#,
        );
        let err = extract_text_str(&markup, &settings(Details::Characters)).unwrap_err();
        assert!(matches!(err, OcrodjvuError::MalformedHocr { .. }));
        assert!(err.to_string().contains("number of bboxes"));
    }

    #[test]
    fn test_extra_trailing_box_is_dropped() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 30 10; bboxes 0 0 10 10, 10 0 20 10, 20 0 30 10">ab</span></div>"#,
        );
        let zones = extract_text_str(&markup, &settings(Details::Characters)).unwrap();
        assert_eq!(zones[0].zones().next().map(|line| line.text()), Some("ab".to_string()));
    }

    #[test]
    fn test_page_without_bbox_uses_page_size() {
        let markup = document(r#"<div class="ocr_page"></div>"#);
        assert!(extract_text_str(&markup, &settings(Details::Words)).is_err());
        let mut settings = settings(Details::Words);
        settings.page_size = Some((30, 20));
        let zones = extract_text_str(&markup, &settings).unwrap();
        assert_eq!(sexprs(&zones), vec![r#"(page 0 0 30 20 "")"#]);
    }

    #[test]
    fn test_page_bbox_must_start_at_origin() {
        let markup = document(r#"<div class="ocr_page" title="bbox 1 0 30 20"></div>"#);
        assert!(extract_text_str(&markup, &settings(Details::Words)).is_err());
    }

    #[test]
    fn test_text_mixed_with_zones_is_malformed() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 40 10">stray <span class="ocrx_word" title="bbox 0 0 10 10">x</span></span></div>"#,
        );
        let err = extract_text_str(&markup, &settings(Details::Words)).unwrap_err();
        assert!(err.to_string().contains("plain text intermixed"));
    }

    #[test]
    fn test_top_level_text_is_malformed() {
        let markup = document("loose text");
        assert!(extract_text_str(&markup, &settings(Details::Words)).is_err());
        let blank = document("   ");
        assert!(extract_text_str(&blank, &settings(Details::Words)).unwrap().is_empty());
    }

    #[test]
    fn test_boxless_placeholder_line_is_dropped() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line">ghost</span><span class="ocr_line" title="bbox 0 0 40 10">real</span></div>"#,
        );
        let zones = extract_text_str(&markup, &settings(Details::Lines)).unwrap();
        assert_eq!(sexprs(&zones), vec![r#"(page 0 0 100 50 (line 0 40 40 50 "real"))"#]);
    }

    #[test]
    fn test_boxless_word_is_malformed() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 40 10"><span class="ocr_word">x</span></span></div>"#,
        );
        let err = extract_text_str(&markup, &settings(Details::Words)).unwrap_err();
        assert!(err.to_string().contains("without bounding box"));
    }

    #[test]
    fn test_tesseract_boxless_ocrx_word_is_transparent() {
        let markup = r#"<html><head><meta name="ocr-system" content="tesseract 3.02"/></head><body><div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 40 10"><span class="ocrx_word">word</span></span></div></body></html>"#;
        let zones = extract_text_str(markup, &settings(Details::Lines)).unwrap();
        assert_eq!(sexprs(&zones), vec![r#"(page 0 0 100 50 (line 0 40 40 50 "word"))"#]);
    }

    #[test]
    fn test_rotation_applies_to_page() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 40 100"><span class="ocr_line" title="bbox 5 10 25 60">x</span></div>"#,
        );
        let mut settings = settings(Details::Lines);
        settings.rotation = 90;
        let zones = extract_text_str(&markup, &settings).unwrap();
        assert_eq!(zones[0].bbox, BBox::new(0, 0, 100, 40));
    }

    #[test]
    fn test_uax29_splits_punctuation() {
        let markup = document(
            r#"<div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 30 10"><span class="ocrx_word" title="bbox 0 0 30 10">ab,</span></span></div>"#,
        );
        let settings = ExtractSettings {
            details: Details::Words,
            segmentation: WordSegmentation::uax29("en").unwrap(),
            ..Default::default()
        };
        let zones = extract_text_str(&markup, &settings).unwrap();
        let line = zones[0].zones().next().unwrap();
        let words: Vec<String> = line.zones().map(Zone::text).collect();
        assert_eq!(words, vec!["ab", ","]);
    }

    #[test]
    fn test_cuneiform_tags() {
        let markup = "<html><head></head><body><p><span title=\"bbox 0 0 10 10\">a</span><span title=\"bbox 10 0 20 10\">b</span></p></body></html>";
        let mut settings = settings(Details::Words);
        settings.page_size = Some((50, 20));
        let zones = extract_text_str(markup, &settings).unwrap();
        assert_eq!(sexprs(&zones), vec![r#"(page 0 0 50 20 (para 0 10 20 20 (word 0 10 20 20 "ab")))"#]);
    }

    #[test]
    fn test_embedded_makebox_data() {
        let markup = embed_makebox(
            r#"<html><head><meta name="ocr-system" content="tesseract 3.02"/></head><body><div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 20 10">ab</span></div></body></html>"#,
            "a 0 40 10 50 0\nb 10 40 20 50 0\n",
        );
        let zones = extract_text_str(&markup, &settings(Details::Characters)).unwrap();
        assert_eq!(
            sexprs(&zones),
            vec![
                r#"(page 0 0 100 50 (line 0 40 20 50 (word 0 40 20 50 (char 0 40 10 50 "a") (char 10 40 20 50 "b"))))"#
            ]
        );
    }

    #[test]
    fn test_embedded_makebox_mismatch() {
        let markup = embed_makebox(
            r#"<html><head><meta name="ocr-system" content="tesseract 3.02"/></head><body><div class="ocr_page" title="bbox 0 0 100 50"><span class="ocr_line" title="bbox 0 0 20 10">ab</span></div></body></html>"#,
            "x 0 40 10 50 0\nb 10 40 20 50 0\n",
        );
        let err = extract_text_str(&markup, &settings(Details::Characters)).unwrap_err();
        assert!(matches!(err, OcrodjvuError::MalformedOcrOutput { .. }));
    }

    #[test]
    fn test_parse_bboxes_accepts_commas_and_negatives() {
        assert_eq!(
            parse_bboxes("bboxes -1 -1 -1 -1, 0 0 5 5 1 1 2 2"),
            Some(vec![(-1, -1, -1, -1), (0, 0, 5, 5), (1, 1, 2, 2)])
        );
        assert_eq!(parse_bboxes("bbox 0 0 1 1"), None);
        assert_eq!(parse_bbox("x_wconf 3; bbox 1 2 3 4"), BBox::new(1, 2, 3, 4));
    }
}
