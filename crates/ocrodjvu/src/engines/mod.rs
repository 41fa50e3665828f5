//! OCR engines.
//!
//! Every engine is an external program driven through [`OcrEngine`]: the
//! pipeline renders a page image in the format the engine asks for, the
//! engine recognizes it and returns its raw output, and the same engine turns
//! that output into text zones.
//!
//! Engines are created by name through the [`registry`], with engine-specific
//! [`EngineProperties`] (`-X KEY=VALUE` on the command line).
//!
//! # Example
//!
//! ```rust,no_run
//! use ocrodjvu::engines::{EngineProperties, registry};
//!
//! # async fn example() -> ocrodjvu::Result<()> {
//! let engine = registry::load_engine("tesseract", EngineProperties::default()).await?;
//! for language in engine.list_languages().await? {
//!     println!("{}", language);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cuneiform;
pub mod dummy;
pub mod ocrad;
pub mod ocropus;
pub mod process;
pub mod registry;
pub mod tesseract;

use crate::core::config::{Details, ExtractSettings};
use crate::error::{OcrodjvuError, Result};
use crate::segmentation::WordSegmentation;
use crate::text_zones::Zone;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub use cuneiform::CuneiformEngine;
pub use dummy::DummyEngine;
pub use ocrad::OcradEngine;
pub use ocropus::OcropusEngine;
pub use registry::{EngineRegistry, get_engine_registry, load_engine};
pub use tesseract::TesseractEngine;

/// Image file format an engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// PBM for bitonal images, PPM otherwise.
    Pnm,
    Tiff,
}

impl ImageFormat {
    /// File extension for an image of the given depth.
    pub fn extension(self, bits_per_pixel: u8) -> &'static str {
        match (self, bits_per_pixel) {
            (ImageFormat::Pnm, 1) => "pbm",
            (ImageFormat::Pnm, _) => "ppm",
            (ImageFormat::Tiff, _) => "tif",
        }
    }

    /// Value of the `-format` option of `ddjvu`.
    pub fn ddjvu_format(self, bits_per_pixel: u8) -> &'static str {
        match (self, bits_per_pixel) {
            (ImageFormat::Pnm, 1) => "pbm",
            (ImageFormat::Pnm, _) => "ppm",
            (ImageFormat::Tiff, _) => "tiff",
        }
    }
}

/// Kind of raw output an engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Hocr,
    PlainText,
    /// An engine-specific format with its own parser.
    Native,
}

/// Static facts about an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub name: String,
    pub image_format: ImageFormat,
    pub output_kind: OutputKind,
    /// The engine may emit invalid UTF-8 or control characters.
    pub needs_utf8_fix: bool,
}

/// A rendered page image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub path: PathBuf,
    /// Width and height in pixels.
    pub size: (i32, i32),
    pub format: ImageFormat,
    pub bits_per_pixel: u8,
}

/// Per-page recognition options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizeOptions {
    pub language: String,
    pub details: Details,
    pub segmentation: WordSegmentation,
    /// Value for `OMP_THREAD_LIMIT` in the engine's environment.
    pub thread_limit: Option<usize>,
}

impl RecognizeOptions {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            details: Details::default(),
            segmentation: WordSegmentation::Simple,
            thread_limit: None,
        }
    }

    /// Whether the engine has to report per-character boxes.
    pub fn needs_character_boxes(&self) -> bool {
        self.details < Details::Words || (self.segmentation.is_uax29() && self.details <= Details::Words)
    }
}

/// Raw output of one recognition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub data: Vec<u8>,
    /// File extension used when the output is saved (`html`, `txt`, `orf`, ...).
    pub extension: String,
}

impl EngineOutput {
    pub fn new(data: impl Into<Vec<u8>>, extension: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            extension: extension.into(),
        }
    }

    /// Write the output to `<prefix>.<extension>` and return that path.
    pub async fn save(&self, prefix: &Path) -> Result<PathBuf> {
        let mut file_name = prefix.as_os_str().to_os_string();
        file_name.push(".");
        file_name.push(&self.extension);
        let path = PathBuf::from(file_name);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }

    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Engine-specific settings given as `KEY=VALUE` pairs.
///
/// Keys are case-sensitive; `_` and `-` are interchangeable. Engines take the
/// properties they know and then call [`EngineProperties::finish`], which
/// rejects anything left over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineProperties {
    values: IndexMap<String, String>,
}

impl EngineProperties {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> String {
        key.replace('_', "-")
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(Self::normalize(key), value.into());
    }

    /// Parse a `KEY=VALUE` argument.
    pub fn insert_pair(&mut self, pair: &str) -> Result<()> {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(OcrodjvuError::validation(format!(
                "expected KEY=VALUE, got {:?}",
                pair
            )));
        };
        self.insert(key, value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn take(&mut self, key: &str) -> Option<String> {
        self.values.shift_remove(&Self::normalize(key))
    }

    /// Take a `0`/`1` style flag.
    pub fn take_bool(&mut self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.take(key) else {
            return Ok(None);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(OcrodjvuError::validation(format!(
                "invalid value for property '{}': {:?}",
                key, value
            ))),
        }
    }

    /// Fail on the first property the engine did not take.
    pub fn finish(self, engine: &str) -> Result<()> {
        match self.values.into_keys().next() {
            None => Ok(()),
            Some(key) => Err(OcrodjvuError::validation(format!(
                "'{}' is not a valid property for the {} engine",
                key, engine
            ))),
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for EngineProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.insert(key.as_ref(), value);
        }
        properties
    }
}

/// Split an `extra-args` property into arguments.
///
/// Arguments are separated by whitespace; single and double quotes group
/// words and a backslash escapes the next character outside single quotes.
pub fn split_arguments(value: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('"'), '"') => quote = None,
            (Some('"') | None, '\\') => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| OcrodjvuError::validation("extra arguments end with a backslash"))?;
                current.push(escaped);
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(OcrodjvuError::validation(format!(
            "unbalanced quotes in extra arguments: {}",
            value
        )));
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// An OCR engine.
///
/// Implementations are `Send + Sync` and keep no per-page state, so a single
/// instance serves every worker of a run.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn descriptor(&self) -> EngineDescriptor;

    fn default_language(&self) -> &str;

    /// Check the installation. Called once by [`registry::load_engine`];
    /// an engine that cannot run reports [`OcrodjvuError::EngineNotFound`].
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn list_languages(&self) -> Result<Vec<String>>;

    /// Fails with `InvalidLanguageId`, `MissingLanguagePack` or
    /// `UnknownLanguageList`.
    async fn check_language(&self, language: &str) -> Result<()>;

    async fn recognize(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput>;

    /// Turn raw output into zones, rotated into page coordinates.
    fn extract_text(&self, output: &EngineOutput, settings: &ExtractSettings) -> Result<Vec<Zone>>;
}
