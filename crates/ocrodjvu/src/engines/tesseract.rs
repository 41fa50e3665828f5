//! Tesseract.
//!
//! Tesseract writes its result next to an output base name: `tmp.html` for
//! hOCR (enabled through a one-line config file) or `tmp.txt` for plain text.
//! When character boxes are needed, a second `makebox` run produces
//! `tmp.box`, which is embedded into the hOCR for the scanner.
//!
//! Properties: `executable`, `extra-args`, `use-hocr` (default: on for
//! installations with `.traineddata` language files) and `fix-html`.

use super::process::{self, RunOptions};
use super::{
    EngineDescriptor, EngineOutput, EngineProperties, ImageFormat, OcrEngine, OutputKind, PageImage, RecognizeOptions,
    split_arguments,
};
use crate::core::config::ExtractSettings;
use crate::error::{OcrodjvuError, Result};
use crate::hocr::{self, embed_makebox};
use crate::text_zones::{BBox, Zone, ZoneType};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

pub const NAME: &str = "tesseract";

static LANGUAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{3}(-[a-z]+)?$").expect("language regex is valid"));

/// The message Tesseract prints when asked for an empty language name.
static DATA_FILE_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Error openn?ing data|Unable to load unicharset) file (?P<dir>/.*)/[.](?P<ext>[a-z]+)\n")
        .expect("data file error regex is valid")
});

/// Header of `tesseract --list-langs` output.
static LIST_LANGS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^List of available languages in "?(?P<dir>[^"]*?)/?"? \(\d+\):"#).expect("list-langs regex is valid")
});

/// Markup that breaks HTML parsers in some Tesseract releases.
static HTML_CHUNK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<[!/]?[a-z]+(?:\s+[^<>]*)?>|&[a-z]+;|&#[0-9]+;|&#x[0-9a-f]+;").expect("html chunk regex is valid")
});

const BANNER: &str = "Tesseract Open Source OCR Engine";

/// Where language data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LanguageData {
    directory: PathBuf,
    extension: String,
}

pub struct TesseractEngine {
    executable: String,
    extra_args: Vec<String>,
    use_hocr: Option<bool>,
    fix_html: bool,
    default_language: String,
    data: OnceCell<LanguageData>,
}

impl TesseractEngine {
    pub fn new(mut properties: EngineProperties) -> Result<Self> {
        let executable = properties.take("executable").unwrap_or_else(|| NAME.to_string());
        let extra_args = match properties.take("extra-args") {
            Some(value) => split_arguments(&value)?,
            None => Vec::new(),
        };
        let use_hocr = properties.take_bool("use-hocr")?;
        let fix_html = properties.take_bool("fix-html")?.unwrap_or(false);
        properties.finish(NAME)?;
        let default_language = std::env::var("tesslanguage")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "eng".to_string());
        Ok(Self {
            executable,
            extra_args,
            use_hocr,
            fix_html,
            default_language,
            data: OnceCell::new(),
        })
    }

    async fn language_data(&self) -> Result<&LanguageData> {
        self.data.get_or_try_init(|| self.detect_language_data()).await
    }

    /// Locate the language data directory.
    ///
    /// Older releases reveal it in the error message for an empty language
    /// name; newer ones list it in `--list-langs` output.
    async fn detect_language_data(&self) -> Result<LanguageData> {
        let output = process::run(&self.executable, &["", "", "-l", ""], &RunOptions::default())
            .await
            .map_err(|_| OcrodjvuError::UnknownLanguageList)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(captures) = DATA_FILE_ERROR_RE.captures(&stderr) {
            let directory = PathBuf::from(&captures["dir"]);
            if output.status.success() || !directory.is_dir() {
                return Err(OcrodjvuError::UnknownLanguageList);
            }
            return Ok(LanguageData {
                directory,
                extension: captures["ext"].to_string(),
            });
        }

        let output = process::run(&self.executable, &["--list-langs"], &RunOptions::default())
            .await
            .map_err(|_| OcrodjvuError::UnknownLanguageList)?;
        let listing = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let captures = LIST_LANGS_RE
            .captures(&listing)
            .ok_or(OcrodjvuError::UnknownLanguageList)?;
        let directory = PathBuf::from(&captures["dir"]);
        if !output.status.success() || !directory.is_dir() {
            return Err(OcrodjvuError::UnknownLanguageList);
        }
        Ok(LanguageData {
            directory,
            extension: "traineddata".to_string(),
        })
    }

    fn uses_hocr(&self) -> bool {
        self.use_hocr.unwrap_or_else(|| {
            self.data
                .get()
                .is_none_or(|data| data.extension == "traineddata")
        })
    }

    fn base_args(&self, image: &Path, base: &Path, language: &str) -> Vec<OsString> {
        vec![
            image.as_os_str().to_os_string(),
            base.as_os_str().to_os_string(),
            OsString::from("-l"),
            OsString::from(language),
        ]
    }

    async fn run_tesseract(&self, mut args: Vec<OsString>, options: &RecognizeOptions) -> Result<()> {
        args.extend(self.extra_args.iter().map(OsString::from));
        let run_options = RunOptions {
            thread_limit: options.thread_limit,
            ..Default::default()
        };
        let output = process::run(&self.executable, &args, &run_options).await?;
        process::check_status(NAME, &output)?;
        process::forward_stderr(NAME, &output.stderr, |stderr| {
            let mut lines = stderr.lines().filter(|line| !line.trim().is_empty());
            matches!((lines.next(), lines.next()), (Some(line), None) if line.starts_with(BANNER))
        });
        Ok(())
    }

    async fn recognize_plain_text(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput> {
        let workdir = tempfile::Builder::new().prefix("ocrodjvu.tesseract.").tempdir()?;
        let base = workdir.path().join("tmp");
        let args = self.base_args(&image.path, &base, &options.language);
        self.run_tesseract(args, options).await?;
        let data = read_result(&base, "txt").await?;
        Ok(EngineOutput::new(data, "txt"))
    }

    async fn recognize_hocr(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput> {
        let workdir = tempfile::Builder::new().prefix("ocrodjvu.tesseract.").tempdir()?;
        let base = workdir.path().join("tmp");
        let config = workdir.path().join("tessconf");
        tokio::fs::write(&config, "tessedit_create_hocr T\n").await?;

        let mut args = self.base_args(&image.path, &base, &options.language);
        args.push(config.into_os_string());
        self.run_tesseract(args, options).await?;
        // Tesseract 3.03 and later name the file after the output format.
        let data = match read_result(&base, "html").await {
            Ok(data) => data,
            Err(_) => read_result(&base, "hocr").await?,
        };

        if !self.fix_html && !options.needs_character_boxes() {
            return Ok(EngineOutput::new(data, "html"));
        }

        let mut contents = String::from_utf8_lossy(&data).into_owned();
        if self.fix_html {
            contents = fix_html(&contents);
        }
        if options.needs_character_boxes() {
            let mut args = self.base_args(&image.path, &base, &options.language);
            args.push(OsString::from("makebox"));
            self.run_tesseract(args, options).await?;
            let boxes = read_result(&base, "box").await?;
            contents = embed_makebox(&contents, &String::from_utf8_lossy(&boxes));
        }
        Ok(EngineOutput::new(contents, "html"))
    }
}

async fn read_result(base: &Path, extension: &str) -> Result<Vec<u8>> {
    let path = base.with_extension(extension);
    tokio::fs::read(&path).await.map_err(|e| OcrodjvuError::Engine {
        engine: NAME.to_string(),
        message: format!("cannot read {}: {}", path.display(), e),
        source: Some(Box::new(e)),
    })
}

/// Escape stray markup characters in broken hOCR.
///
/// Tags and entity references are kept; any other `<`, `>` or `&` is
/// escaped. Box data must be embedded afterwards, since script contents are
/// not unescaped by HTML parsers.
pub fn fix_html(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut last = 0;
    for chunk in HTML_CHUNK_RE.find_iter(markup) {
        out.push_str(&quick_xml::escape::partial_escape(&markup[last..chunk.start()]));
        out.push_str(chunk.as_str());
        last = chunk.end();
    }
    out.push_str(&quick_xml::escape::partial_escape(&markup[last..]));
    out
}

fn is_valid_language(language: &str) -> bool {
    LANGUAGE_RE.is_match(language)
}

/// Zones for plain-text output: the whole text on one page-sized zone.
fn extract_plain_text(text: &str, settings: &ExtractSettings) -> Result<Vec<Zone>> {
    let (width, height) = settings
        .page_size
        .ok_or_else(|| OcrodjvuError::malformed_ocr_output("page size is required for plain-text output"))?;
    let mut page = Zone::with_text(ZoneType::Page, BBox::new(0, 0, width, height), text);
    page.rotate(settings.rotation)?;
    Ok(vec![page])
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: NAME.to_string(),
            image_format: ImageFormat::Tiff,
            output_kind: if self.uses_hocr() {
                OutputKind::Hocr
            } else {
                OutputKind::PlainText
            },
            needs_utf8_fix: false,
        }
    }

    fn default_language(&self) -> &str {
        &self.default_language
    }

    async fn initialize(&self) -> Result<()> {
        match self.language_data().await {
            Ok(data) => {
                tracing::debug!(
                    "Tesseract language data in {} (*.{})",
                    data.directory.display(),
                    data.extension
                );
                Ok(())
            }
            Err(OcrodjvuError::UnknownLanguageList) => Err(OcrodjvuError::EngineNotFound(NAME.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn list_languages(&self) -> Result<Vec<String>> {
        let data = self.language_data().await?;
        let suffix = format!(".{}", data.extension);
        let mut entries = tokio::fs::read_dir(&data.directory).await?;
        let mut languages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(language) = file_name.to_str().and_then(|name| name.strip_suffix(&suffix)) else {
                continue;
            };
            if is_valid_language(language) {
                languages.push(language.to_string());
            }
        }
        languages.sort();
        Ok(languages)
    }

    async fn check_language(&self, language: &str) -> Result<()> {
        if !is_valid_language(language) {
            return Err(OcrodjvuError::InvalidLanguageId(language.to_string()));
        }
        let data = self.language_data().await?;
        let path = data.directory.join(format!("{}.{}", language, data.extension));
        if tokio::fs::try_exists(&path).await? {
            Ok(())
        } else {
            Err(OcrodjvuError::MissingLanguagePack {
                language: language.to_string(),
                engine: NAME.to_string(),
            })
        }
    }

    async fn recognize(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput> {
        tracing::debug!("Running tesseract on {} ({})", image.path.display(), options.language);
        if self.uses_hocr() {
            self.recognize_hocr(image, options).await
        } else {
            self.recognize_plain_text(image, options).await
        }
    }

    fn extract_text(&self, output: &EngineOutput, settings: &ExtractSettings) -> Result<Vec<Zone>> {
        if output.extension == "html" {
            hocr::extract_text(&output.data, settings)
        } else {
            extract_plain_text(&output.as_text(), settings)
        }
    }
}
