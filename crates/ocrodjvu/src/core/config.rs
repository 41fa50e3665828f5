//! Configuration.
//!
//! [`ExtractSettings`] is the per-page context handed to scanners.
//! [`PipelineConfig`] describes a whole `ocr` run; it can be loaded from an
//! `ocrodjvu.toml` file and is then refined by command-line flags.

use crate::error::{OcrodjvuError, Result};
use crate::segmentation::{SegmentationMode, WordSegmentation};
use crate::text_zones::ZoneType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the configuration file looked up by [`PipelineConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "ocrodjvu.toml";

/// Requested granularity of the text layer.
///
/// Variants are ordered from the finest to the coarsest, consistently with
/// [`ZoneType`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Details {
    #[serde(rename = "chars")]
    Characters,
    #[default]
    #[serde(rename = "words")]
    Words,
    #[serde(rename = "lines")]
    Lines,
}

impl Details {
    /// The finest zone type kept at this level.
    pub fn zone_type(self) -> ZoneType {
        match self {
            Details::Characters => ZoneType::Character,
            Details::Words => ZoneType::Word,
            Details::Lines => ZoneType::Line,
        }
    }

    /// Whether zones of `zone_type` keep their text merged at this level.
    pub fn merges(self, zone_type: ZoneType) -> bool {
        self.zone_type() >= zone_type
    }
}

impl FromStr for Details {
    type Err = OcrodjvuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lines" => Ok(Details::Lines),
            "words" => Ok(Details::Words),
            "chars" => Ok(Details::Characters),
            other => Err(OcrodjvuError::validation(format!(
                "unknown text details: {} (expected lines, words or chars)",
                other
            ))),
        }
    }
}

impl fmt::Display for Details {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Details::Characters => "chars",
            Details::Words => "words",
            Details::Lines => "lines",
        })
    }
}

/// Per-page context for turning engine output into zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSettings {
    /// Page rotation in degrees, a multiple of 90.
    pub rotation: i32,
    pub details: Details,
    pub segmentation: WordSegmentation,
    /// Size of the image the engine saw, used when the output lacks a page box.
    pub page_size: Option<(i32, i32)>,
    /// Replace invalid UTF-8 and control characters instead of failing.
    pub fix_utf8: bool,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            rotation: 0,
            details: Details::Words,
            segmentation: WordSegmentation::Simple,
            page_size: None,
            fix_utf8: false,
        }
    }
}

impl ExtractSettings {
    pub fn validate(&self) -> Result<()> {
        validate_rotation(self.rotation)?;
        if let Some((width, height)) = self.page_size
            && (width <= 0 || height <= 0)
        {
            return Err(OcrodjvuError::validation(format!(
                "invalid page size: {}x{}",
                width, height
            )));
        }
        Ok(())
    }

    /// Whether scanning has to work at character level internally.
    ///
    /// UAX #29 needs per-character boxes to rebuild words, so it lowers word
    /// detail to character detail.
    pub fn effective_details(&self) -> Details {
        if self.segmentation.is_uax29() && self.details <= Details::Words {
            Details::Characters
        } else {
            self.details
        }
    }
}

pub fn validate_rotation(rotation: i32) -> Result<()> {
    if rotation % 90 != 0 {
        return Err(OcrodjvuError::validation(format!(
            "rotation must be a multiple of 90 degrees, not {}",
            rotation
        )));
    }
    Ok(())
}

/// What to do when a page fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the run and write nothing.
    #[default]
    Abort,
    /// Log the error, leave the page without text, continue.
    Resume,
}

impl FromStr for ErrorPolicy {
    type Err = OcrodjvuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(ErrorPolicy::Abort),
            "resume" => Ok(ErrorPolicy::Resume),
            other => Err(OcrodjvuError::validation(format!(
                "unknown error policy: {} (expected abort or resume)",
                other
            ))),
        }
    }
}

/// Image layers rendered for recognition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderLayers {
    /// Only the bitonal mask layer (1 bit per pixel).
    #[default]
    Mask,
    /// Foreground layers (24 bits per pixel).
    Foreground,
    /// All layers (24 bits per pixel).
    All,
}

impl RenderLayers {
    pub fn bits_per_pixel(self) -> u8 {
        match self {
            RenderLayers::Mask => 1,
            RenderLayers::Foreground | RenderLayers::All => 24,
        }
    }

    /// Value of the `-mode` option of `ddjvu`.
    pub fn ddjvu_mode(self) -> &'static str {
        match self {
            RenderLayers::Mask => "mask",
            RenderLayers::Foreground => "foreground",
            RenderLayers::All => "color",
        }
    }
}

impl FromStr for RenderLayers {
    type Err = OcrodjvuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mask" => Ok(RenderLayers::Mask),
            "foreground" => Ok(RenderLayers::Foreground),
            "all" => Ok(RenderLayers::All),
            other => Err(OcrodjvuError::validation(format!(
                "unknown render layers: {} (expected mask, foreground or all)",
                other
            ))),
        }
    }
}

/// Where the results of a run go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Save a bundled multi-page document.
    Bundled(PathBuf),
    /// Save an indirect multi-page document (index file path).
    Indirect(PathBuf),
    /// Save the `djvused` script only.
    Script(PathBuf),
    /// Modify the input document.
    InPlace,
    /// Change no files.
    DryRun,
}

/// Settings of an `ocr` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Recognition language; the engine's default when unset.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub details: Details,
    #[serde(default)]
    pub word_segmentation: SegmentationMode,
    /// Number of concurrent workers; the number of CPUs when unset.
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub render: RenderLayers,
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Remove existing text before writing the new one.
    #[serde(default)]
    pub clear_text: bool,
    /// Keep only processed pages in bundled and indirect output.
    #[serde(default)]
    pub ocr_only: bool,
    /// Directory for raw engine output.
    #[serde(default)]
    pub save_raw_ocr: Option<PathBuf>,
    #[serde(default = "default_raw_ocr_filename_template")]
    pub raw_ocr_filename_template: String,
    /// Engine properties (`-X KEY=VALUE`).
    #[serde(default)]
    pub engine_properties: IndexMap<String, String>,
    /// Keep temporary files.
    #[serde(default)]
    pub debug: bool,
}

fn default_engine() -> String {
    crate::engines::registry::DEFAULT_ENGINE.to_string()
}

fn default_raw_ocr_filename_template() -> String {
    "{id-ext}".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            language: None,
            details: Details::default(),
            word_segmentation: SegmentationMode::default(),
            jobs: None,
            render: RenderLayers::default(),
            on_error: ErrorPolicy::default(),
            clear_text: false,
            ocr_only: false,
            save_raw_ocr: None,
            raw_ocr_filename_template: default_raw_ocr_filename_template(),
            engine_properties: IndexMap::new(),
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OcrodjvuError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| OcrodjvuError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Look for `ocrodjvu.toml` in the current directory and its parents.
    pub fn discover() -> Result<Option<Self>> {
        let current = std::env::current_dir().map_err(OcrodjvuError::Io)?;
        Self::discover_from(&current)
    }

    /// Look for `ocrodjvu.toml` in `start` and its parents.
    pub fn discover_from(start: &Path) -> Result<Option<Self>> {
        let mut current = start.to_path_buf();

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                tracing::debug!("Loading configuration from {}", candidate.display());
                return Ok(Some(Self::from_toml_file(candidate)?));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Number of workers to run; at least one.
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Segmenter for this run; UAX #29 uses the recognition language as locale.
    pub fn segmentation(&self, language: &str) -> Result<WordSegmentation> {
        self.word_segmentation.with_locale(Some(language))
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.is_empty() {
            return Err(OcrodjvuError::validation("engine name cannot be empty"));
        }
        crate::utils::validate_template(&self.raw_ocr_filename_template)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_details_order() {
        assert!(Details::Characters < Details::Words);
        assert!(Details::Words < Details::Lines);
        assert!(Details::Lines.merges(ZoneType::Line));
        assert!(!Details::Lines.merges(ZoneType::Paragraph));
        assert!(Details::Words.merges(ZoneType::Character));
    }

    #[test]
    fn test_details_parsing() {
        assert_eq!("chars".parse::<Details>().unwrap(), Details::Characters);
        assert_eq!(Details::Lines.to_string(), "lines");
        assert!("paragraphs".parse::<Details>().is_err());
    }

    #[test]
    fn test_effective_details_with_uax29() {
        let mut settings = ExtractSettings {
            segmentation: WordSegmentation::uax29("en").unwrap(),
            ..Default::default()
        };
        assert_eq!(settings.effective_details(), Details::Characters);
        settings.details = Details::Lines;
        assert_eq!(settings.effective_details(), Details::Lines);
    }

    #[test]
    fn test_settings_validation() {
        let settings = ExtractSettings {
            rotation: 45,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings = ExtractSettings {
            page_size: Some((0, 10)),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(ExtractSettings::default().validate().is_ok());
    }

    #[test]
    fn test_render_layers() {
        assert_eq!(RenderLayers::Mask.bits_per_pixel(), 1);
        assert_eq!(RenderLayers::All.bits_per_pixel(), 24);
        assert_eq!("foreground".parse::<RenderLayers>().unwrap(), RenderLayers::Foreground);
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.engine, "tesseract");
        assert_eq!(config.raw_ocr_filename_template, "{id-ext}");
        assert!(config.jobs() >= 1);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
engine = "ocrad"
language = "tur"
details = "chars"
word_segmentation = "uax29"
jobs = 0
render = "all"
on_error = "resume"

[engine_properties]
extra-args = "--filter=letters"
"#,
        )
        .unwrap();

        let config = PipelineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.engine, "ocrad");
        assert_eq!(config.language.as_deref(), Some("tur"));
        assert_eq!(config.details, Details::Characters);
        assert_eq!(config.on_error, ErrorPolicy::Resume);
        assert_eq!(config.render, RenderLayers::All);
        assert_eq!(config.jobs(), 1);
        assert_eq!(config.engine_properties["extra-args"], "--filter=letters");
        assert_eq!(config.segmentation("tur").unwrap().locale(), Some("tur"));
    }

    #[test]
    fn test_from_toml_file_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "details = \"paragraphs\"").unwrap();
        let err = PipelineConfig::from_toml_file(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "clear_text = true").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let config = PipelineConfig::discover_from(&nested).unwrap().unwrap();
        assert!(config.clear_text);
    }
}
