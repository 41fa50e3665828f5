//! Text zone tree.

use super::bbox::BBox;
use crate::core::config::Details;
use crate::error::{OcrodjvuError, Result};
use crate::segmentation::WordSegmentation;
use std::fmt;
use std::str::FromStr;

/// Kind of a DjVu text zone.
///
/// Variants are declared from the finest to the coarsest, so the derived
/// ordering follows the DjVu rank: `Character < Word < … < Page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ZoneType {
    Character = 1,
    Word = 2,
    Line = 3,
    Paragraph = 4,
    Region = 5,
    Column = 6,
    Page = 7,
}

impl ZoneType {
    pub const ALL: [ZoneType; 7] = [
        ZoneType::Page,
        ZoneType::Column,
        ZoneType::Region,
        ZoneType::Paragraph,
        ZoneType::Line,
        ZoneType::Word,
        ZoneType::Character,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Symbol used by `djvused` for this zone type.
    pub fn symbol(self) -> &'static str {
        match self {
            ZoneType::Page => "page",
            ZoneType::Column => "column",
            ZoneType::Region => "region",
            ZoneType::Paragraph => "para",
            ZoneType::Line => "line",
            ZoneType::Word => "word",
            ZoneType::Character => "char",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        ZoneType::ALL.into_iter().find(|zone_type| zone_type.symbol() == symbol)
    }

    /// hOCR element and class emitted for this zone type.
    ///
    /// Characters have no element of their own; they are folded into
    /// `ocrx_word` spans carrying a `bboxes` property.
    pub fn hocr_element(self) -> Option<(&'static str, &'static str)> {
        match self {
            ZoneType::Page => Some(("div", "ocr_page")),
            ZoneType::Column => Some(("div", "ocr_carea")),
            ZoneType::Region => Some(("div", "ocrx_block")),
            ZoneType::Paragraph => Some(("p", "ocr_par")),
            ZoneType::Line => Some(("span", "ocrx_line")),
            ZoneType::Word => Some(("span", "ocrx_word")),
            ZoneType::Character => None,
        }
    }

    /// Zone type for an hOCR class name.
    pub fn from_hocr_class(class: &str) -> Option<Self> {
        match class {
            "ocr_page" => Some(ZoneType::Page),
            "ocr_column" | "ocr_carea" => Some(ZoneType::Column),
            "ocr_par" => Some(ZoneType::Paragraph),
            "ocr_line" | "ocrx_line" => Some(ZoneType::Line),
            "ocr_word" | "ocrx_word" => Some(ZoneType::Word),
            "ocrx_block" => Some(ZoneType::Region),
            _ => None,
        }
    }

    /// Zone type for an element name in pre-hOCR Cuneiform output.
    pub fn from_cuneiform_tag(tag: &str) -> Option<Self> {
        match tag {
            "body" => Some(ZoneType::Page),
            "p" => Some(ZoneType::Paragraph),
            "span" => Some(ZoneType::Character),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ZoneType {
    type Err = OcrodjvuError;

    fn from_str(s: &str) -> Result<Self> {
        ZoneType::from_symbol(s).ok_or_else(|| OcrodjvuError::sexpr(format!("unknown zone type: {}", s)))
    }
}

/// A child of a zone: either a nested zone or a run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneChild {
    Zone(Zone),
    Text(String),
}

impl ZoneChild {
    pub fn as_zone(&self) -> Option<&Zone> {
        match self {
            ZoneChild::Zone(zone) => Some(zone),
            ZoneChild::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ZoneChild::Text(text) => Some(text),
            ZoneChild::Zone(_) => None,
        }
    }
}

impl From<Zone> for ZoneChild {
    fn from(zone: Zone) -> Self {
        ZoneChild::Zone(zone)
    }
}

impl From<String> for ZoneChild {
    fn from(text: String) -> Self {
        ZoneChild::Text(text)
    }
}

impl From<&str> for ZoneChild {
    fn from(text: &str) -> Self {
        ZoneChild::Text(text.to_string())
    }
}

/// A node of the text layer: a typed rectangle with ordered children.
///
/// Character zones hold a single text run. Coarser zones hold sub-zones, or
/// a single text run when no finer detail was recorded. Construction does not
/// check ranks; scanners are responsible for building well-formed trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub zone_type: ZoneType,
    pub bbox: BBox,
    pub children: Vec<ZoneChild>,
}

impl Zone {
    pub fn new(zone_type: ZoneType, bbox: BBox, children: Vec<ZoneChild>) -> Self {
        Self {
            zone_type,
            bbox,
            children,
        }
    }

    /// A zone whose only child is `text`.
    pub fn with_text(zone_type: ZoneType, bbox: BBox, text: impl Into<String>) -> Self {
        Self::new(zone_type, bbox, vec![ZoneChild::Text(text.into())])
    }

    pub fn push(&mut self, child: impl Into<ZoneChild>) {
        self.children.push(child.into());
    }

    pub fn extend<I>(&mut self, children: I)
    where
        I: IntoIterator,
        I::Item: Into<ZoneChild>,
    {
        self.children.extend(children.into_iter().map(Into::into));
    }

    /// Direct sub-zones, skipping text runs.
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.children.iter().filter_map(ZoneChild::as_zone)
    }

    /// All text of the subtree, concatenated in document order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                ZoneChild::Text(text) => out.push_str(text),
                ZoneChild::Zone(zone) => zone.collect_text(out),
            }
        }
    }

    /// Number of zones in the subtree, this one included.
    pub fn count_zones(&self) -> usize {
        1 + self.zones().map(Zone::count_zones).sum::<usize>()
    }
}

/// Regroup character-ish zones into words.
///
/// Each input zone holds one text run, possibly longer than one character.
/// Multi-character zones are split into per-character boxes by integer
/// interpolation along x. Loose text runs between the zones (whitespace, in
/// practice) take part in segmentation but have no geometry. The merged text
/// is then segmented; whitespace segments are skipped and every other segment
/// becomes a WORD zone covering its characters. Its children are the segment
/// text at word detail, or one CHARACTER zone per character at character
/// detail.
///
/// At line detail no words are built and the merged text is returned as the
/// only child.
pub fn group_words(
    children: &[ZoneChild],
    details: Details,
    segmentation: &WordSegmentation,
) -> Result<Vec<ZoneChild>> {
    let text: String = children
        .iter()
        .map(|child| match child {
            ZoneChild::Zone(zone) => zone.text(),
            ZoneChild::Text(text) => text.clone(),
        })
        .collect();
    if details > Details::Words {
        return Ok(vec![ZoneChild::Text(text)]);
    }

    let mut boxes = Vec::with_capacity(text.len());
    for child in children {
        let zone = match child {
            ZoneChild::Zone(zone) => zone,
            ZoneChild::Text(text) => {
                boxes.extend(text.chars().map(|_| BBox::empty()));
                continue;
            }
        };
        let length = zone.text().chars().count();
        if length == 1 {
            boxes.push(zone.bbox);
            continue;
        }
        let Some((x0, y0, x1, y1)) = zone.bbox.coordinates() else {
            return Err(OcrodjvuError::malformed_ocr_output(
                "zone without bounding box information",
            ));
        };
        boxes.extend(split_horizontally(x0, y0, x1, y1, length));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut words = Vec::new();
    let mut start = 0;
    for end in segmentation.boundaries(&text) {
        let segment = &chars[start..end];
        if segment.iter().all(|c| c.is_whitespace()) {
            start = end;
            continue;
        }
        let mut bbox = BBox::empty();
        for char_box in &boxes[start..end] {
            bbox.update(char_box);
        }
        let children = if details > Details::Characters {
            vec![ZoneChild::Text(segment.iter().collect())]
        } else {
            (start..end)
                .map(|k| ZoneChild::Zone(Zone::with_text(ZoneType::Character, boxes[k], chars[k].to_string())))
                .collect()
        };
        words.push(ZoneChild::Zone(Zone::new(ZoneType::Word, bbox, children)));
        start = end;
    }
    Ok(words)
}

/// Split `(x0, y0, x1, y1)` into `parts` boxes of (nearly) equal width.
pub(crate) fn split_horizontally(x0: i32, y0: i32, x1: i32, y1: i32, parts: usize) -> Vec<BBox> {
    let width = i64::from(x1) - i64::from(x0);
    let parts = parts as i64;
    let at = |n: i64| -> i32 { (i64::from(x0) + (width * n).div_euclid(parts)) as i32 };
    (0..parts).map(|n| BBox::new(at(n), y0, at(n + 1), y1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_zone(text: &str, bbox: BBox) -> ZoneChild {
        ZoneChild::Zone(Zone::with_text(ZoneType::Character, bbox, text))
    }

    #[test]
    fn test_zone_type_order_follows_rank() {
        assert!(ZoneType::Page > ZoneType::Column);
        assert!(ZoneType::Line > ZoneType::Word);
        assert!(ZoneType::Word > ZoneType::Character);
        assert_eq!(ZoneType::Paragraph.rank(), 4);
    }

    #[test]
    fn test_zone_type_symbols() {
        for zone_type in ZoneType::ALL {
            assert_eq!(ZoneType::from_symbol(zone_type.symbol()), Some(zone_type));
        }
        assert_eq!(ZoneType::Paragraph.symbol(), "para");
        assert!("paragraph".parse::<ZoneType>().is_err());
    }

    #[test]
    fn test_hocr_class_table() {
        assert_eq!(ZoneType::from_hocr_class("ocr_carea"), Some(ZoneType::Column));
        assert_eq!(ZoneType::from_hocr_class("ocrx_block"), Some(ZoneType::Region));
        assert_eq!(ZoneType::from_hocr_class("ocr_line"), Some(ZoneType::Line));
        assert_eq!(ZoneType::from_hocr_class("ocr_cinfo"), None);
        assert_eq!(ZoneType::Character.hocr_element(), None);
    }

    #[test]
    fn test_text_concatenates_subtree() {
        let mut line = Zone::new(ZoneType::Line, BBox::new(0, 0, 10, 10), vec![]);
        line.push(Zone::with_text(ZoneType::Word, BBox::new(0, 0, 4, 10), "ab"));
        line.push(Zone::with_text(ZoneType::Word, BBox::new(5, 0, 10, 10), "cd"));
        assert_eq!(line.text(), "abcd");
        assert_eq!(line.count_zones(), 3);
    }

    #[test]
    fn test_group_words_line_detail_returns_text() {
        let zones = vec![
            char_zone("a", BBox::new(0, 0, 5, 10)),
            char_zone(" ", BBox::new(5, 0, 8, 10)),
            char_zone("b", BBox::new(8, 0, 12, 10)),
        ];
        let grouped = group_words(&zones, Details::Lines, &WordSegmentation::Simple).unwrap();
        assert_eq!(grouped, vec![ZoneChild::Text("a b".to_string())]);
    }

    #[test]
    fn test_group_words_word_detail() {
        let zones = vec![
            char_zone("a", BBox::new(0, 0, 5, 10)),
            char_zone("b", BBox::new(5, 2, 9, 12)),
            char_zone(" ", BBox::new(9, 0, 12, 10)),
            char_zone("c", BBox::new(12, 0, 16, 10)),
        ];
        let grouped = group_words(&zones, Details::Words, &WordSegmentation::Simple).unwrap();
        assert_eq!(
            grouped,
            vec![
                ZoneChild::Zone(Zone::with_text(ZoneType::Word, BBox::new(0, 0, 9, 12), "ab")),
                ZoneChild::Zone(Zone::with_text(ZoneType::Word, BBox::new(12, 0, 16, 10), "c")),
            ]
        );
    }

    #[test]
    fn test_group_words_splits_multi_character_zones() {
        let zones = vec![char_zone("fi", BBox::new(0, 0, 9, 10))];
        let grouped = group_words(&zones, Details::Characters, &WordSegmentation::Simple).unwrap();
        let [ZoneChild::Zone(word)] = grouped.as_slice() else {
            panic!("expected one word, got {:?}", grouped);
        };
        assert_eq!(word.bbox, BBox::new(0, 0, 9, 10));
        let boxes: Vec<BBox> = word.zones().map(|zone| zone.bbox).collect();
        assert_eq!(boxes, vec![BBox::new(0, 0, 4, 10), BBox::new(4, 0, 9, 10)]);
        assert_eq!(word.text(), "fi");
    }

    #[test]
    fn test_group_words_loose_whitespace_separates_words() {
        let children = vec![
            char_zone("a", BBox::new(0, 0, 5, 10)),
            ZoneChild::Text(" ".to_string()),
            char_zone("b", BBox::new(8, 0, 12, 10)),
        ];
        let grouped = group_words(&children, Details::Words, &WordSegmentation::Simple).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[1].as_zone().map(|word| word.bbox), Some(BBox::new(8, 0, 12, 10)));
    }

    #[test]
    fn test_split_horizontally_covers_whole_width() {
        let boxes = split_horizontally(10, 0, 20, 5, 3);
        assert_eq!(boxes.first().and_then(BBox::x0), Some(10));
        assert_eq!(boxes.last().and_then(BBox::x1), Some(20));
        assert_eq!(boxes.len(), 3);
    }
}
