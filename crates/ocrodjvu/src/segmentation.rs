//! Word segmentation.
//!
//! Two strategies split a run of text into words:
//!
//! - **Simple** - a boundary at every switch between whitespace and
//!   non-whitespace characters.
//! - **UAX #29** - Unicode word boundaries, as implemented by
//!   `unicode-segmentation`.
//!
//! Both return boundaries as character offsets (not byte offsets), strictly
//! increasing and ending at the character length of the text. The start of
//! the text is implied and not reported.

use crate::error::{OcrodjvuError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unicode_segmentation::UnicodeSegmentation;

/// Locale used when UAX #29 segmentation is requested without a language.
pub const DEFAULT_LOCALE: &str = "en-US-POSIX";

static LOCALE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z]{2,3}(?:[-_][A-Za-z0-9]+)*|POSIX)$").expect("valid locale regex"));

/// Segmentation strategy as named in configuration and on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    #[default]
    Simple,
    Uax29,
}

impl SegmentationMode {
    /// Resolve the mode into a segmenter. The locale only matters for UAX #29.
    pub fn with_locale(self, locale: Option<&str>) -> Result<WordSegmentation> {
        match self {
            SegmentationMode::Simple => Ok(WordSegmentation::Simple),
            SegmentationMode::Uax29 => WordSegmentation::uax29(locale.unwrap_or(DEFAULT_LOCALE)),
        }
    }
}

impl FromStr for SegmentationMode {
    type Err = OcrodjvuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(SegmentationMode::Simple),
            "uax29" => Ok(SegmentationMode::Uax29),
            other => Err(OcrodjvuError::validation(format!(
                "unknown word segmentation: {} (expected simple or uax29)",
                other
            ))),
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentationMode::Simple => "simple",
            SegmentationMode::Uax29 => "uax29",
        })
    }
}

/// A word segmenter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WordSegmentation {
    #[default]
    Simple,
    Uax29 {
        locale: String,
    },
}

impl WordSegmentation {
    /// UAX #29 segmentation for `locale`.
    ///
    /// The locale is checked for well-formedness only; boundaries are the
    /// default Unicode ones for every locale.
    pub fn uax29(locale: &str) -> Result<Self> {
        if !LOCALE_PATTERN.is_match(locale) {
            return Err(OcrodjvuError::validation(format!("invalid locale: {}", locale)));
        }
        Ok(WordSegmentation::Uax29 {
            locale: locale.to_string(),
        })
    }

    pub fn is_uax29(&self) -> bool {
        matches!(self, WordSegmentation::Uax29 { .. })
    }

    pub fn locale(&self) -> Option<&str> {
        match self {
            WordSegmentation::Simple => None,
            WordSegmentation::Uax29 { locale } => Some(locale),
        }
    }

    pub fn mode(&self) -> SegmentationMode {
        match self {
            WordSegmentation::Simple => SegmentationMode::Simple,
            WordSegmentation::Uax29 { .. } => SegmentationMode::Uax29,
        }
    }

    pub fn boundaries(&self, text: &str) -> Vec<usize> {
        match self {
            WordSegmentation::Simple => simple_boundaries(text),
            WordSegmentation::Uax29 { .. } => uax29_boundaries(text),
        }
    }
}

/// Word boundaries of `text`: UAX #29 when a locale is given, simple otherwise.
pub fn boundaries(text: &str, locale: Option<&str>) -> Vec<usize> {
    match locale {
        Some(_) => uax29_boundaries(text),
        None => simple_boundaries(text),
    }
}

/// Boundaries at every whitespace/non-whitespace transition.
pub fn simple_boundaries(text: &str) -> Vec<usize> {
    let mut result = Vec::new();
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return result;
    };
    let mut space = first.is_whitespace();
    let mut length = 1;
    for c in chars {
        if c.is_whitespace() != space {
            result.push(length);
            space = !space;
        }
        length += 1;
    }
    result.push(length);
    result
}

/// Unicode word boundaries.
pub fn uax29_boundaries(text: &str) -> Vec<usize> {
    let mut result = Vec::new();
    let mut offset = 0;
    for word in text.split_word_bounds() {
        offset += word.chars().count();
        result.push(offset);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_boundaries() {
        assert_eq!(simple_boundaries("ab  cd"), vec![2, 4, 6]);
        assert_eq!(simple_boundaries(" x"), vec![1, 2]);
        assert_eq!(simple_boundaries("żółw"), vec![4]);
        assert!(simple_boundaries("").is_empty());
    }

    #[test]
    fn test_uax29_splits_punctuation() {
        let text = "Hello, world";
        let bounds = uax29_boundaries(text);
        assert_eq!(bounds, vec![5, 6, 7, 12]);
    }

    #[test]
    fn test_boundaries_are_strictly_increasing_and_complete() {
        for text in ["", "a", "The quick (brown) fox.", "  leading", "trailing  ", "日本語のテキスト"] {
            for segmentation in [WordSegmentation::Simple, WordSegmentation::uax29("en").unwrap()] {
                let bounds = segmentation.boundaries(text);
                assert!(bounds.windows(2).all(|pair| pair[0] < pair[1]));
                assert_eq!(bounds.last().copied().unwrap_or(0), text.chars().count());
                assert_eq!(bounds, segmentation.boundaries(text));
            }
        }
    }

    #[test]
    fn test_locale_validation() {
        assert!(WordSegmentation::uax29("pl").is_ok());
        assert!(WordSegmentation::uax29("en_US").is_ok());
        assert!(WordSegmentation::uax29(DEFAULT_LOCALE).is_ok());
        assert!(WordSegmentation::uax29("not a locale").is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("uax29".parse::<SegmentationMode>().unwrap(), SegmentationMode::Uax29);
        assert!("icu".parse::<SegmentationMode>().is_err());
        let segmentation = SegmentationMode::Uax29.with_locale(None).unwrap();
        assert_eq!(segmentation.locale(), Some(DEFAULT_LOCALE));
        assert_eq!(SegmentationMode::Simple.with_locale(Some("pl")).unwrap(), WordSegmentation::Simple);
    }
}
