//! Text zones to hOCR.
//!
//! Zones come in DjVu coordinates (origin in the bottom-left corner); hOCR
//! boxes are written top-down as `(x0, H - y1, x1, H - y0)`. Character zones
//! have no hOCR element: the enclosing word or line is segmented by hand and
//! written as `ocrx_word` spans whose `bboxes` property carries the
//! per-character boxes.
//!
//! # Example
//!
//! ```rust
//! use ocrodjvu::hocr::{HocrGenerator, HocrOptions};
//! use ocrodjvu::text_zones::Zone;
//!
//! let page = Zone::parse_sexpr(r#"(page 0 0 100 40 (word 10 10 50 30 "hi"))"#)?;
//! let fragment = HocrGenerator::new(HocrOptions::default()).page_fragment(&page, (100, 40))?;
//! assert!(fragment.contains(r#"title="bbox 10 10 50 30""#));
//! # Ok::<(), ocrodjvu::OcrodjvuError>(())
//! ```

use crate::core::config::Details;
use crate::error::Result;
use crate::segmentation::WordSegmentation;
use crate::text_zones::{BBox, Zone, ZoneChild, ZoneType};
use quick_xml::escape::{escape, partial_escape};

/// Default `<title>` of generated documents.
pub const DEFAULT_TITLE: &str = "DjVu hidden text layer";

/// hOCR classes written by the generator, sorted.
pub const CAPABILITIES: [&str; 6] = ["ocr_carea", "ocr_page", "ocr_par", "ocrx_block", "ocrx_line", "ocrx_word"];

const FOOTER: &str = "\n</body>\n</html>\n";

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HocrOptions {
    /// At word detail, lines holding plain text are split into word spans.
    /// At character detail, spans also carry interpolated `bboxes`.
    pub details: Details,
    /// UAX #29 segmentation splits every text run into word spans.
    pub segmentation: WordSegmentation,
}

impl Default for HocrOptions {
    fn default() -> Self {
        Self {
            details: Details::Lines,
            segmentation: WordSegmentation::Simple,
        }
    }
}

enum Node {
    Text(String),
    Element(Element),
}

struct Element {
    tag: &'static str,
    class: &'static str,
    title: String,
    children: Vec<Node>,
    tail: Option<&'static str>,
}

impl Element {
    fn new(tag: &'static str, class: &'static str, title: String) -> Self {
        Self {
            tag,
            class,
            title,
            children: Vec::new(),
            tail: None,
        }
    }

    fn word(title: String, text: &str) -> Self {
        let mut element = Self::new("span", "ocrx_word", title);
        element.set_text(text);
        element
    }

    /// Append `text`, turning characters XML cannot carry into `djvu_char` spans.
    fn set_text(&mut self, text: &str) {
        let mut run = String::new();
        for c in text.chars() {
            if is_xml_forbidden(c) {
                if !run.is_empty() {
                    self.children.push(Node::Text(std::mem::take(&mut run)));
                }
                let mut placeholder = Element::new("span", "djvu_char", format!("#x{:02x}", c as u32));
                placeholder.children.push(Node::Text(" ".to_string()));
                self.children.push(Node::Element(placeholder));
            } else {
                run.push(c);
            }
        }
        if !run.is_empty() {
            self.children.push(Node::Text(run));
        }
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(self.tag);
        out.push_str(" class=\"");
        out.push_str(self.class);
        out.push('"');
        if !self.title.is_empty() {
            out.push_str(" title=\"");
            out.push_str(&escape(self.title.as_str()));
            out.push('"');
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
                Node::Element(element) => {
                    element.write(out);
                    if let Some(tail) = element.tail {
                        out.push_str(tail);
                    }
                }
            }
        }
        out.push_str("</");
        out.push_str(self.tag);
        out.push('>');
    }
}

/// What processing a zone produced.
enum Emitted {
    Element(Element),
    /// Word spans that replace the zone inside its parent.
    Spans(Vec<Element>),
    /// A character zone; the parent has to segment its characters by hand.
    CharacterLevel,
}

fn is_xml_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}')
}

fn format_box(bbox: (i32, i32, i32, i32)) -> String {
    format!("{} {} {} {}", bbox.0, bbox.1, bbox.2, bbox.3)
}

/// `x0 + width * numerator / denominator`, rounded half up.
fn interpolate(x0: i32, x1: i32, numerator: usize, denominator: usize) -> i32 {
    let width = f64::from(x1 - x0);
    (f64::from(x0) + width * numerator as f64 / denominator as f64 + 0.5) as i32
}

fn union(boxes: &[(i32, i32, i32, i32)]) -> (i32, i32, i32, i32) {
    let mut bbox = BBox::empty();
    for &(x0, y0, x1, y1) in boxes {
        bbox.update(&BBox::new(x0, y0, x1, y1));
    }
    bbox.coordinates().unwrap_or((0, 0, 0, 0))
}

/// Serializes zone trees as hOCR.
#[derive(Debug, Clone, Default)]
pub struct HocrGenerator {
    options: HocrOptions,
}

impl HocrGenerator {
    pub fn new(options: HocrOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HocrOptions {
        &self.options
    }

    /// Document prologue: XHTML doctype, `ocr-system`/`ocr-capabilities`
    /// metadata, optional style sheet, and title.
    pub fn header(&self, title: &str, css: &str) -> String {
        let mut header = String::from(concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Transitional//EN\" ",
            "\"http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd\">\n",
            "<html xmlns=\"http://www.w3.org/1999/xhtml\">\n",
            "<head>\n",
            "  <meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\" />\n",
        ));
        header.push_str(&format!(
            "  <meta name=\"ocr-system\" content=\"djvu2hocr {}\" />\n",
            env!("CARGO_PKG_VERSION")
        ));
        header.push_str(&format!(
            "  <meta name=\"ocr-capabilities\" content=\"{}\" />\n",
            CAPABILITIES.join(" ")
        ));
        if !css.is_empty() {
            header.push_str(&format!("  <style type=\"text/css\">{}</style>\n", partial_escape(css)));
        }
        header.push_str(&format!("  <title>{}</title>\n", partial_escape(title)));
        header.push_str("</head>\n<body>\n");
        header
    }

    pub fn footer(&self) -> &'static str {
        FOOTER
    }

    /// A complete document with one fragment per page, in the given order.
    pub fn document<'a, I>(&self, pages: I, title: &str, css: &str) -> Result<String>
    where
        I: IntoIterator<Item = (&'a Zone, (i32, i32))>,
    {
        let mut out = self.header(title, css);
        for (page, page_size) in pages {
            out.push_str(&self.page_fragment(page, page_size)?);
        }
        out.push_str(self.footer());
        Ok(out)
    }

    /// hOCR for a single page of `page_size` pixels.
    ///
    /// The root element gets `bbox 0 0 W H` when it is a page zone; all other
    /// boxes are flipped top-down using the page height.
    pub fn page_fragment(&self, page: &Zone, page_size: (i32, i32)) -> Result<String> {
        let mut out = String::new();
        let generation = Generation {
            options: &self.options,
            page_size,
        };
        match generation.zone(page, true, true) {
            Emitted::Element(element) => element.write(&mut out),
            Emitted::Spans(spans) => {
                for span in spans {
                    span.write(&mut out);
                    if let Some(tail) = span.tail {
                        out.push_str(tail);
                    }
                }
            }
            Emitted::CharacterLevel => {
                let spans = generation.break_chars(std::slice::from_ref(page));
                for span in spans {
                    span.write(&mut out);
                    if let Some(tail) = span.tail {
                        out.push_str(tail);
                    }
                }
            }
        }
        out.push('\n');
        tracing::debug!("generated {} bytes of hOCR for a {}x{} page", out.len(), page_size.0, page_size.1);
        Ok(out)
    }
}

struct Generation<'o> {
    options: &'o HocrOptions,
    page_size: (i32, i32),
}

impl Generation<'_> {
    fn top_down(&self, bbox: &BBox) -> (i32, i32, i32, i32) {
        let height = self.page_size.1;
        let (x0, y0, x1, y1) = bbox.coordinates().unwrap_or((0, 0, 0, 0));
        (x0, height - y1, x1, height - y0)
    }

    fn breaks_plain_text(&self, zone_type: ZoneType) -> bool {
        self.options.segmentation.is_uax29()
            || self.options.details == Details::Characters
            || (zone_type >= ZoneType::Line && self.options.details <= Details::Words)
    }

    fn zone(&self, zone: &Zone, is_root: bool, last: bool) -> Emitted {
        let Some((tag, class)) = zone.zone_type.hocr_element() else {
            return Emitted::CharacterLevel;
        };
        let bbox = if zone.zone_type == ZoneType::Page {
            (0, 0, self.page_size.0, self.page_size.1)
        } else {
            self.top_down(&zone.bbox)
        };
        let mut element = Element::new(tag, class, format!("bbox {}", format_box(bbox)));

        let mut character_level = false;
        let mut text = None;
        let count = zone.children.len();
        for (n, child) in zone.children.iter().enumerate() {
            let child = match child {
                ZoneChild::Zone(child) => child,
                ZoneChild::Text(run) => {
                    text = Some(run.as_str());
                    break;
                }
            };
            if child.zone_type <= ZoneType::Line {
                element.tail = Some("\n");
            }
            match self.zone(child, false, n + 1 == count) {
                Emitted::Element(child) => element.children.push(Node::Element(child)),
                Emitted::Spans(spans) => element.children.extend(spans.into_iter().map(Node::Element)),
                Emitted::CharacterLevel => {
                    character_level = true;
                    break;
                }
            }
        }
        if count == 0 {
            text = Some("");
        }

        if character_level {
            let mut spans = self.break_chars(&zone.zones().cloned().collect::<Vec<_>>());
            // The spans take the place of the zone's own element, whatever its type.
            if !is_root {
                if zone.zone_type == ZoneType::Word
                    && !last
                    && let Some(span) = spans.last_mut()
                {
                    span.tail = Some(" ");
                }
                return Emitted::Spans(spans);
            }
            element.children = spans.into_iter().map(Node::Element).collect();
            return Emitted::Element(element);
        }

        if let Some(text) = text {
            if zone.zone_type >= ZoneType::Word && !is_root && self.breaks_plain_text(zone.zone_type) {
                let mut spans = self.break_plain_text(text, bbox);
                if zone.zone_type == ZoneType::Word {
                    if !last && let Some(span) = spans.last_mut() {
                        span.tail = Some(" ");
                    }
                    return Emitted::Spans(spans);
                }
                element.children = spans.into_iter().map(Node::Element).collect();
            } else {
                element.set_text(text);
                if zone.zone_type == ZoneType::Word && !last {
                    element.tail = Some(" ");
                }
            }
        }
        Emitted::Element(element)
    }

    /// Word spans for a run of character zones.
    fn break_chars(&self, char_zones: &[Zone]) -> Vec<Element> {
        let mut boxes = Vec::new();
        let mut text = String::new();
        for zone in char_zones {
            let char_text = zone.text();
            if char_text.is_empty() {
                continue;
            }
            let (x0, y0, x1, y1) = self.top_down(&zone.bbox);
            let n = char_text.chars().count();
            for i in 0..n {
                boxes.push((interpolate(x0, x1, i, n), y0, interpolate(x0, x1, i + 1, n), y1));
            }
            text.push_str(&char_text);
        }
        let boundaries = self.options.segmentation.boundaries(&text);
        self.spans(&text, &boundaries, |start, end, subtext| {
            let char_boxes = &boxes[start..end];
            let title = format!(
                "bbox {}; bboxes {}",
                format_box(union(char_boxes)),
                char_boxes.iter().copied().map(format_box).collect::<Vec<_>>().join(", ")
            );
            Element::word(title, subtext)
        })
    }

    /// Word spans for plain text, with boxes interpolated along the zone.
    fn break_plain_text(&self, text: &str, bbox: (i32, i32, i32, i32)) -> Vec<Element> {
        let (x0, y0, x1, y1) = bbox;
        let length = text.chars().count();
        let with_characters = self.options.details == Details::Characters;
        let boundaries = self.options.segmentation.boundaries(text);
        self.spans(text, &boundaries, |start, end, subtext| {
            let word_box = (interpolate(x0, x1, start, length), y0, interpolate(x0, x1, end, length), y1);
            let mut title = format!("bbox {}", format_box(word_box));
            if with_characters {
                let char_boxes: Vec<String> = (start..end)
                    .map(|k| format_box((interpolate(x0, x1, k, length), y0, interpolate(x0, x1, k + 1, length), y1)))
                    .collect();
                title.push_str("; bboxes ");
                title.push_str(&char_boxes.join(", "));
            }
            Element::word(title, subtext)
        })
    }

    /// Cut `text` at `boundaries`; whitespace segments become a single space between spans.
    fn spans<F>(&self, text: &str, boundaries: &[usize], mut make: F) -> Vec<Element>
    where
        F: FnMut(usize, usize, &str) -> Element,
    {
        let chars: Vec<char> = text.chars().collect();
        let mut spans: Vec<Element> = Vec::new();
        let mut start = 0;
        for &end in boundaries {
            let subtext: String = chars[start..end].iter().collect();
            if subtext.chars().all(char::is_whitespace) {
                if let Some(previous) = spans.last_mut() {
                    previous.tail = Some(" ");
                }
            } else {
                spans.push(make(start, end, &subtext));
            }
            start = end;
        }
        spans
    }
}
