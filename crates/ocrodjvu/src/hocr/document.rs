//! hOCR input documents.
//!
//! Engine output is parsed with `scraper` (html5ever), which copes with the
//! malformed markup several engines produce. On top of the parsed tree this
//! module answers the questions the scanner asks before it starts: which
//! engine wrote the document, and whether per-character boxes from Tesseract
//! `makebox` were embedded next to the markup.

use crate::error::{OcrodjvuError, Result};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

/// `type` of the `<script>` element carrying embedded Tesseract box data.
pub const TESSERACT_BOXES_SCRIPT_TYPE: &str = "application/x-ocrodjvu-tesseract";

static OCR_SYSTEM: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"head > meta[name="ocr-system"]"#).expect("valid ocr-system selector"));
static OCR_CAPABILITIES: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"head > meta[name="ocr-capabilities"]"#).expect("valid ocr-capabilities selector")
});
static TESSERACT_BOXES: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(&format!(r#"script[type="{}"]"#, TESSERACT_BOXES_SCRIPT_TYPE))
        .expect("valid box data selector")
});
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid body selector"));

/// Engine-specific behaviour detected from a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineQuirks {
    /// Cuneiform version, `(0, 8)` for pre-hOCR output and `(0, 9)` for later releases.
    pub cuneiform: Option<(u32, u32)>,
    pub tesseract: bool,
}

impl EngineQuirks {
    /// Whether elements are classified by tag name rather than by hOCR class.
    pub fn uses_cuneiform_tags(&self) -> bool {
        self.cuneiform.is_some_and(|version| version <= (0, 8))
    }
}

/// A character box from Tesseract `makebox` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharBox {
    /// The character, or `None` when Tesseract could not tell (`~`).
    pub ch: Option<char>,
    pub bbox: (i32, i32, i32, i32),
    /// Coordinates have their origin in the bottom-left corner.
    pub upside_down: bool,
}

impl CharBox {
    /// Box in top-left-origin coordinates for a page of the given height.
    pub fn top_down(&self, page_height: i32) -> (i32, i32, i32, i32) {
        let (x0, y0, x1, y1) = self.bbox;
        if self.upside_down {
            (x0, page_height - y1, x1, page_height - y0)
        } else {
            (x0, y0, x1, y1)
        }
    }
}

/// Character boxes consumed in document order while scanning.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedBoxes {
    entries: Vec<CharBox>,
    cursor: usize,
}

impl EmbeddedBoxes {
    pub fn new(entries: Vec<CharBox>) -> Self {
        Self { entries, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }
}

impl Iterator for EmbeddedBoxes {
    type Item = CharBox;

    fn next(&mut self) -> Option<CharBox> {
        let entry = self.entries.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(entry)
    }
}

/// Parse `makebox` output: one `chars left bottom right top page` line per box.
///
/// Boxes covering several characters (ligatures) are split evenly along x.
pub fn parse_makebox(data: &str) -> Result<Vec<CharBox>> {
    let mut boxes = Vec::new();
    for line in data.lines() {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [chars, x0, y0, x1, y1, _page] = fields.as_slice() else {
            return Err(OcrodjvuError::malformed_ocr_output(format!(
                "bad \"makebox\" line: {:?}",
                line
            )));
        };
        let mut coords = [0i32; 4];
        for (slot, field) in coords.iter_mut().zip([x0, y0, x1, y1]) {
            *slot = field.parse().map_err(|e| {
                OcrodjvuError::malformed_ocr_output_with_source(format!("bad \"makebox\" line: {:?}", line), e)
            })?;
        }
        let [x0, y0, x1, y1] = coords;
        let chars: Vec<Option<char>> = if *chars == "~" {
            vec![None]
        } else {
            chars.chars().map(Some).collect()
        };
        let width = i64::from(x1) - i64::from(x0);
        let n = chars.len() as i64;
        for (i, ch) in chars.into_iter().enumerate() {
            let i = i as i64;
            let left = i64::from(x0) + (width * i).div_euclid(n);
            let right = i64::from(x0) + (width * (i + 1)).div_euclid(n);
            boxes.push(CharBox {
                ch,
                bbox: (left as i32, y0, right as i32, y1),
                upside_down: true,
            });
        }
    }
    Ok(boxes)
}

/// Append `makebox` output to an hOCR document, just before `</body>`.
pub fn embed_makebox(hocr: &str, makebox: &str) -> String {
    let script = format!(
        "<!-- The following script was appended to hOCR by ocrodjvu -->\n<script type=\"{}\">{}</script>\n",
        TESSERACT_BOXES_SCRIPT_TYPE,
        makebox.replace("</", "<\\/")
    );
    match hocr.rfind("</body>") {
        Some(index) => format!("{}{}{}", &hocr[..index], script, &hocr[index..]),
        None => format!("{}{}", hocr, script),
    }
}

/// Decode engine output, replacing invalid UTF-8 and stray control characters.
///
/// Tab, line feed and carriage return are kept; other C0 controls and DEL
/// become U+FFFD.
pub fn sanitize_utf8(bytes: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    if let std::borrow::Cow::Owned(_) = decoded {
        tracing::warn!("engine output contains invalid UTF-8; replaced with U+FFFD");
    }
    let mut replaced = 0usize;
    let sanitized: String = decoded
        .chars()
        .map(|c| {
            if (c.is_control() && (c as u32) < 0x80 && !matches!(c, '\t' | '\n' | '\r')) || c == '\u{7f}' {
                replaced += 1;
                '\u{fffd}'
            } else {
                c
            }
        })
        .collect();
    if replaced > 0 {
        tracing::warn!("replaced {} control character(s) in engine output", replaced);
    }
    sanitized
}

/// A parsed hOCR document.
pub struct HocrDocument {
    html: Html,
}

impl HocrDocument {
    /// Parse raw engine output. Without `fix_utf8`, invalid UTF-8 is an error.
    pub fn parse(markup: &[u8], fix_utf8: bool) -> Result<Self> {
        let text = if fix_utf8 {
            sanitize_utf8(markup)
        } else {
            String::from_utf8(markup.to_vec())
                .map_err(|e| OcrodjvuError::malformed_hocr_with_source("document is not valid UTF-8", e))?
        };
        Ok(Self::parse_str(&text))
    }

    pub fn parse_str(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
        }
    }

    pub fn body(&self) -> Option<ElementRef<'_>> {
        self.html.select(&BODY).next()
    }

    /// Guess the producing engine from the `<meta>` elements.
    ///
    /// A document without `ocr-system` and `ocr-capabilities` is assumed to
    /// come from Cuneiform 0.8, which predates hOCR proper.
    pub fn quirks(&self) -> EngineQuirks {
        let mut quirks = EngineQuirks::default();
        match self.html.select(&OCR_SYSTEM).next() {
            None => {
                if self.html.select(&OCR_CAPABILITIES).next().is_none() {
                    quirks.cuneiform = Some((0, 8));
                }
            }
            Some(meta) => {
                let content = meta.value().attr("content").unwrap_or("");
                if content == "openocr" {
                    quirks.cuneiform = Some((0, 9));
                } else if content.split_whitespace().next() == Some("tesseract") {
                    quirks.tesseract = true;
                }
            }
        }
        quirks
    }

    /// Embedded Tesseract box data, if any.
    pub fn embedded_boxes(&self) -> Result<Option<EmbeddedBoxes>> {
        let Some(script) = self.html.select(&TESSERACT_BOXES).next() else {
            return Ok(None);
        };
        let data: String = script.text().collect();
        let data = data.replace("<\\/", "</");
        Ok(Some(EmbeddedBoxes::new(parse_makebox(&data)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quirks_tesseract() {
        let doc = HocrDocument::parse_str(
            r#"<html><head><meta name="ocr-system" content="tesseract 3.02"/></head><body></body></html>"#,
        );
        assert_eq!(
            doc.quirks(),
            EngineQuirks {
                cuneiform: None,
                tesseract: true
            }
        );
    }

    #[test]
    fn test_quirks_cuneiform() {
        let old = HocrDocument::parse_str("<html><head></head><body><p>x</p></body></html>");
        assert_eq!(old.quirks().cuneiform, Some((0, 8)));
        assert!(old.quirks().uses_cuneiform_tags());

        let new = HocrDocument::parse_str(
            r#"<html><head><meta name="ocr-system" content="openocr"/></head><body></body></html>"#,
        );
        assert_eq!(new.quirks().cuneiform, Some((0, 9)));
        assert!(!new.quirks().uses_cuneiform_tags());

        let generic = HocrDocument::parse_str(
            r#"<html><head><meta name="ocr-capabilities" content="ocr_line"/></head><body></body></html>"#,
        );
        assert_eq!(generic.quirks(), EngineQuirks::default());
    }

    #[test]
    fn test_parse_makebox() {
        let boxes = parse_makebox("a 10 20 30 40 0\nfi 0 0 10 5 0\n~ 1 2 3 4 0\n// comment\n").unwrap();
        assert_eq!(boxes.len(), 4);
        assert_eq!(boxes[0].ch, Some('a'));
        assert_eq!(boxes[1].bbox, (0, 0, 5, 5));
        assert_eq!(boxes[2].bbox, (5, 0, 10, 5));
        assert_eq!(boxes[3].ch, None);
        assert_eq!(boxes[0].top_down(100), (10, 60, 30, 80));
    }

    #[test]
    fn test_parse_makebox_rejects_garbage() {
        assert!(parse_makebox("a 1 2 3\n").is_err());
        assert!(parse_makebox("a 1 2 x 4 0\n").is_err());
    }

    #[test]
    fn test_embedded_boxes_round_trip() {
        let hocr = "<html><head></head><body><p>x</p></body></html>";
        let embedded = embed_makebox(hocr, "x 1 2 3 4 0\n< 5 6 7 8 0\n");
        let doc = HocrDocument::parse_str(&embedded);
        let mut boxes = doc.embedded_boxes().unwrap().unwrap();
        assert_eq!(boxes.remaining(), 2);
        assert_eq!(boxes.next().map(|b| b.ch), Some(Some('x')));
        assert_eq!(boxes.next().map(|b| b.ch), Some(Some('<')));
        assert!(boxes.next().is_none());
    }

    #[test]
    fn test_sanitize_utf8() {
        let bytes = b"ok\xff\x01\tend";
        assert_eq!(sanitize_utf8(bytes), "ok\u{fffd}\u{fffd}\tend");
    }

    #[test]
    fn test_parse_without_fix_rejects_invalid_utf8() {
        assert!(HocrDocument::parse(b"<html>\xff</html>", false).is_err());
        assert!(HocrDocument::parse(b"<html>\xff</html>", true).is_ok());
    }
}
