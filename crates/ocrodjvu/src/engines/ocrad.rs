//! GNU Ocrad.
//!
//! Ocrad is run with `-x -`, which writes an ORF ("OCR results file") to
//! standard output: text blocks, lines, and one entry per character with its
//! box and candidate interpretations.
//!
//! Ocrad knows no languages, only character sets. English is always
//! available; Turkish is when Ocrad supports ISO 8859-9.
//!
//! Properties: `executable`, `extra-args` and `replacement-character`
//! (used for characters Ocrad could not interpret, U+FFFD by default).

use super::process::{self, RunOptions};
use super::{
    EngineDescriptor, EngineOutput, EngineProperties, ImageFormat, OcrEngine, OutputKind, PageImage, RecognizeOptions,
    split_arguments,
};
use crate::core::config::ExtractSettings;
use crate::error::{OcrodjvuError, Result};
use crate::text_zones::{BBox, Zone, ZoneChild, ZoneType, group_words};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use tokio::sync::OnceCell;

pub const NAME: &str = "ocrad";

const DEFAULT_LANGUAGE: &str = "eng";

static LANGUAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{3}$").expect("language regex is valid"));

static CHARACTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+, '('|[^']*)'[0-9]+").expect("character regex is valid"));

pub struct OcradEngine {
    executable: String,
    extra_args: Vec<String>,
    replacement_character: String,
    languages: OnceCell<Vec<String>>,
}

impl OcradEngine {
    pub fn new(mut properties: EngineProperties) -> Result<Self> {
        let executable = properties.take("executable").unwrap_or_else(|| NAME.to_string());
        let extra_args = match properties.take("extra-args") {
            Some(value) => split_arguments(&value)?,
            None => Vec::new(),
        };
        let replacement_character = properties
            .take("replacement-character")
            .unwrap_or_else(|| "\u{fffd}".to_string());
        properties.finish(NAME)?;
        Ok(Self {
            executable,
            extra_args,
            replacement_character,
            languages: OnceCell::new(),
        })
    }

    async fn languages(&self) -> Result<&Vec<String>> {
        self.languages.get_or_try_init(|| self.detect_languages()).await
    }

    /// Ask Ocrad for its character sets. `--charset=help` lists them on
    /// stderr and exits with a failure status.
    async fn detect_languages(&self) -> Result<Vec<String>> {
        let output = process::run(&self.executable, &["--charset=help"], &RunOptions::default())
            .await
            .map_err(|_| OcrodjvuError::UnknownLanguageList)?;
        if output.status.success() {
            return Err(OcrodjvuError::UnknownLanguageList);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut languages = vec![DEFAULT_LANGUAGE.to_string()];
        if stderr.split_whitespace().skip(1).any(|charset| charset == "iso-8859-9") {
            languages.push("tur".to_string());
        }
        Ok(languages)
    }
}

#[async_trait]
impl OcrEngine for OcradEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: NAME.to_string(),
            image_format: ImageFormat::Pnm,
            output_kind: OutputKind::Native,
            needs_utf8_fix: false,
        }
    }

    fn default_language(&self) -> &str {
        DEFAULT_LANGUAGE
    }

    async fn initialize(&self) -> Result<()> {
        match self.languages().await {
            Ok(_) => Ok(()),
            Err(OcrodjvuError::UnknownLanguageList) => Err(OcrodjvuError::EngineNotFound(NAME.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn list_languages(&self) -> Result<Vec<String>> {
        Ok(self.languages().await?.clone())
    }

    async fn check_language(&self, language: &str) -> Result<()> {
        if !LANGUAGE_RE.is_match(language) {
            return Err(OcrodjvuError::InvalidLanguageId(language.to_string()));
        }
        if self.languages().await?.iter().any(|known| known == language) {
            Ok(())
        } else {
            Err(OcrodjvuError::MissingLanguagePack {
                language: language.to_string(),
                engine: NAME.to_string(),
            })
        }
    }

    async fn recognize(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput> {
        let charset = if options.language == "tur" {
            "iso-8859-9"
        } else {
            "iso-8859-15"
        };
        let mut args: Vec<OsString> = ["--charset", charset, "--format=utf8", "-x"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(OsString::from("-"));
        args.push(image.path.as_os_str().to_os_string());

        tracing::debug!("Running ocrad on {} ({})", image.path.display(), charset);
        let run_options = RunOptions {
            thread_limit: options.thread_limit,
            ..Default::default()
        };
        let output = process::run(&self.executable, &args, &run_options).await?;
        process::check_status(NAME, &output)?;
        process::forward_stderr(NAME, &output.stderr, |_| false);
        Ok(EngineOutput::new(output.stdout, "orf"))
    }

    fn extract_text(&self, output: &EngineOutput, settings: &ExtractSettings) -> Result<Vec<Zone>> {
        let text = output.as_text();
        let page = parse_orf(&text, settings, &self.replacement_character)?;
        Ok(vec![page])
    }
}

/// Parse an ORF into a PAGE zone, rotated into page coordinates.
pub fn parse_orf(orf: &str, settings: &ExtractSettings, replacement_character: &str) -> Result<Zone> {
    let mut parser = OrfParser {
        lines: orf.lines(),
        last_line: None,
        settings,
        replacement_character,
    };
    match parser.item()? {
        OrfItem::Page(mut page) => {
            page.rotate(settings.rotation)?;
            Ok(page)
        }
        _ => Err(OcrodjvuError::malformed_ocr_output("ORF does not start with a text block count")),
    }
}

enum OrfItem {
    Page(Zone),
    Block(Zone),
    Lines(Vec<Zone>),
    Line(Option<Zone>),
    Character(Zone),
}

struct OrfParser<'a> {
    lines: std::str::Lines<'a>,
    last_line: Option<&'a str>,
    settings: &'a ExtractSettings,
    replacement_character: &'a str,
}

impl<'a> OrfParser<'a> {
    fn next_line(&mut self) -> Result<&'a str> {
        loop {
            let Some(line) = self.lines.next() else {
                return Err(OcrodjvuError::malformed_ocr_output(format!(
                    "unexpected line at EOF: {:?}",
                    self.last_line.unwrap_or("")
                )));
            };
            self.last_line = Some(line);
            if line.starts_with('#') || line.starts_with("source ") {
                continue;
            }
            return Ok(line);
        }
    }

    fn item(&mut self) -> Result<OrfItem> {
        let line = self.next_line()?;
        if let Some(count) = line.strip_prefix("total text blocks ") {
            let count = parse_numbers::<1>(count, line)?[0];
            let (width, height) = self
                .settings
                .page_size
                .ok_or_else(|| OcrodjvuError::malformed_ocr_output("page size is required for ORF output"))?;
            let mut page = Zone::new(ZoneType::Page, BBox::new(0, 0, width, height), Vec::new());
            for _ in 0..count {
                match self.item()? {
                    OrfItem::Block(block) if !block.children.is_empty() => page.push(block),
                    OrfItem::Block(_) => {}
                    _ => return Err(unexpected(line)),
                }
            }
            return Ok(OrfItem::Page(page));
        }
        if let Some(rest) = line.strip_prefix("text block ") {
            let [_, x, y, w, h] = parse_numbers::<5>(rest, line)?;
            let bbox = BBox::new(x, y, x + w, y + h);
            let OrfItem::Lines(lines) = self.item()? else {
                return Err(unexpected(line));
            };
            let children = lines.into_iter().map(ZoneChild::Zone).collect();
            return Ok(OrfItem::Block(Zone::new(ZoneType::Region, bbox, children)));
        }
        if let Some(count) = line.strip_prefix("lines ") {
            let count = parse_numbers::<1>(count, line)?[0];
            let mut lines = Vec::new();
            for _ in 0..count {
                match self.item()? {
                    OrfItem::Line(Some(zone)) => lines.push(zone),
                    OrfItem::Line(None) => {}
                    _ => return Err(unexpected(line)),
                }
            }
            return Ok(OrfItem::Lines(lines));
        }
        if line.starts_with("line ") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let ["line", _, "chars", count, "height", _] = fields.as_slice() else {
                return Err(unexpected(line));
            };
            let count = parse_numbers::<1>(count, line)?[0];
            let mut characters = Vec::new();
            for _ in 0..count {
                match self.item()? {
                    OrfItem::Character(zone) => characters.push(ZoneChild::Zone(zone)),
                    _ => return Err(unexpected(line)),
                }
            }
            if characters.is_empty() {
                return Ok(OrfItem::Line(None));
            }
            let mut bbox = BBox::empty();
            for character in characters.iter().filter_map(ZoneChild::as_zone) {
                bbox.update(&character.bbox);
            }
            let children = group_words(&characters, self.settings.details, &self.settings.segmentation)?;
            return Ok(OrfItem::Line(Some(Zone::new(ZoneType::Line, bbox, children))));
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            return self.character(trimmed).map(OrfItem::Character);
        }
        Err(unexpected(line))
    }

    /// `x y w h; N, 'c'conf, ...`, or `x y w h; 0` without interpretations.
    fn character(&self, line: &str) -> Result<Zone> {
        let Some((coordinates, guesses)) = line.split_once("; ") else {
            return Err(bad_character(line));
        };
        let [x, y, w, h] = parse_numbers::<4>(coordinates, line)?;
        let bbox = BBox::new(x, y, x + w, y + h);
        let text = if guesses.starts_with('0') {
            self.replacement_character.to_string()
        } else {
            let captures = CHARACTER_RE.captures(guesses).ok_or_else(|| bad_character(line))?;
            captures[1].to_string()
        };
        Ok(Zone::with_text(ZoneType::Character, bbox, text))
    }
}

fn parse_numbers<const N: usize>(text: &str, line: &str) -> Result<[i32; N]> {
    let mut numbers = [0i32; N];
    let mut fields = text.split_whitespace();
    for slot in &mut numbers {
        let field = fields.next().ok_or_else(|| unexpected(line))?;
        *slot = field
            .parse()
            .map_err(|e| OcrodjvuError::malformed_ocr_output_with_source(format!("unexpected line: {:?}", line), e))?;
    }
    if fields.next().is_some() {
        return Err(unexpected(line));
    }
    Ok(numbers)
}

fn unexpected(line: &str) -> OcrodjvuError {
    OcrodjvuError::malformed_ocr_output(format!("unexpected line: {:?}", line))
}

fn bad_character(line: &str) -> OcrodjvuError {
    OcrodjvuError::malformed_ocr_output(format!("bad character description: {:?}", line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Details;

    const ORF: &str = "\
# Ocr Results File. Created by GNU Ocrad version 0.25
source file -
total text blocks 1
text block 1 0 0 100 40
lines 2
line 1 chars 4 height 20
 10 10 10 20; 1, 'h'0
 20 10 10 20; 1, 'i'0
 30 10 5 20; 1, ' '0
 40 10 10 20; 2, '''0, 'x'0
line 2 chars 0 height 20
";

    fn settings(details: Details) -> ExtractSettings {
        ExtractSettings {
            details,
            page_size: Some((100, 40)),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_orf_words() {
        let page = parse_orf(ORF, &settings(Details::Words), "\u{fffd}").unwrap();
        assert_eq!(
            page.to_string(),
            r#"(page 0 0 100 40 (region 0 0 100 40 (line 10 10 50 30 (word 10 10 30 30 "hi") (word 40 10 50 30 "'"))))"#
        );
    }

    #[test]
    fn test_parse_orf_lines() {
        let page = parse_orf(ORF, &settings(Details::Lines), "\u{fffd}").unwrap();
        assert_eq!(
            page.to_string(),
            r#"(page 0 0 100 40 (region 0 0 100 40 (line 10 10 50 30 "hi '")))"#
        );
    }

    #[test]
    fn test_parse_orf_characters() {
        let page = parse_orf(ORF, &settings(Details::Characters), "\u{fffd}").unwrap();
        let line = page.zones().next().and_then(|region| region.zones().next()).unwrap();
        let word = line.zones().next().unwrap();
        assert_eq!(word.to_string(), r#"(word 10 10 30 30 (char 10 10 20 30 "h") (char 20 10 30 30 "i"))"#);
    }

    #[test]
    fn test_unrecognized_character_uses_replacement() {
        let orf = "total text blocks 1\ntext block 1 0 0 10 10\nlines 1\nline 1 chars 1 height 5\n 1 1 3 3; 0\n";
        let page = parse_orf(orf, &settings(Details::Lines), "?").unwrap();
        assert_eq!(page.text(), "?");
    }

    #[test]
    fn test_empty_blocks_are_dropped() {
        let orf = "total text blocks 1\ntext block 1 0 0 10 10\nlines 0\n";
        let page = parse_orf(orf, &settings(Details::Words), "?").unwrap();
        assert_eq!(page.to_string(), r#"(page 0 0 100 40 "")"#);
    }

    #[test]
    fn test_malformed_orf() {
        let truncated = "total text blocks 1\ntext block 1 0 0 10 10\nlines 1\n";
        let err = parse_orf(truncated, &settings(Details::Words), "?").unwrap_err();
        assert!(err.to_string().contains("unexpected line at EOF"));

        let garbage = "total text blocks 1\nhello\n";
        let err = parse_orf(garbage, &settings(Details::Words), "?").unwrap_err();
        assert!(err.to_string().contains("unexpected line: \"hello\""));

        let bad = "total text blocks 1\ntext block 1 0 0 10 10\nlines 1\nline 1 chars 1 height 5\n 1 1 3 3; 1, x\n";
        let err = parse_orf(bad, &settings(Details::Words), "?").unwrap_err();
        assert!(err.to_string().contains("bad character description"));
    }

    #[test]
    fn test_page_size_required() {
        let err = parse_orf("total text blocks 0\n", &ExtractSettings::default(), "?").unwrap_err();
        assert!(matches!(err, OcrodjvuError::MalformedOcrOutput { .. }));
    }

    #[tokio::test]
    async fn test_check_language() {
        let engine = OcradEngine::new(EngineProperties::new()).unwrap();
        engine.languages.set(vec!["eng".to_string()]).unwrap();
        assert!(engine.check_language("eng").await.is_ok());
        assert!(matches!(
            engine.check_language("tur").await,
            Err(OcrodjvuError::MissingLanguagePack { .. })
        ));
        assert!(matches!(
            engine.check_language("en").await,
            Err(OcrodjvuError::InvalidLanguageId(_))
        ));
    }

    #[test]
    fn test_replacement_character_property() {
        let engine = OcradEngine::new([("replacement_character", "#")].into_iter().collect()).unwrap();
        assert_eq!(engine.replacement_character, "#");
    }
}
