//! OCRopus.
//!
//! OCRopus is driven through `ocroscript`, which prints hOCR on standard
//! output. Releases differ in the script name: `recognize` (0.3 and later,
//! which can also report character boxes) or `rec-tess` (0.2). Recognition
//! is done by Tesseract, so languages are Tesseract's and the language is
//! passed in the `tesslanguage` environment variable.
//!
//! Properties: `executable`, `tesseract-executable`, `extra-args`,
//! `script-name` and `has-charboxes`.

use super::process::{self, RunOptions};
use super::tesseract::TesseractEngine;
use super::{
    EngineDescriptor, EngineOutput, EngineProperties, ImageFormat, OcrEngine, OutputKind, PageImage, RecognizeOptions,
    split_arguments,
};
use crate::core::config::{Details, ExtractSettings};
use crate::error::{OcrodjvuError, Result};
use crate::hocr;
use crate::text_zones::Zone;
use async_trait::async_trait;
use std::ffi::OsString;
use tokio::sync::OnceCell;

pub const NAME: &str = "ocropus";

const SCRIPT_NAMES: &[&str] = &["recognize", "rec-tess"];

/// The `ocroscript` script found at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Script {
    name: String,
    has_charboxes: bool,
}

pub struct OcropusEngine {
    executable: String,
    extra_args: Vec<String>,
    script_name: Option<String>,
    has_charboxes: Option<bool>,
    tesseract: TesseractEngine,
    script: OnceCell<Script>,
}

impl OcropusEngine {
    pub fn new(mut properties: EngineProperties) -> Result<Self> {
        let executable = properties
            .take("executable")
            .unwrap_or_else(|| "ocroscript".to_string());
        let tesseract_executable = properties.take("tesseract-executable");
        let extra_args = match properties.take("extra-args") {
            Some(value) => split_arguments(&value)?,
            None => Vec::new(),
        };
        let script_name = properties.take("script-name");
        let has_charboxes = properties.take_bool("has-charboxes")?;
        properties.finish(NAME)?;

        let mut tesseract_properties = EngineProperties::new();
        if let Some(tesseract_executable) = tesseract_executable {
            tesseract_properties.insert("executable", tesseract_executable);
        }
        Ok(Self {
            executable,
            extra_args,
            script_name,
            has_charboxes,
            tesseract: TesseractEngine::new(tesseract_properties)?,
            script: OnceCell::new(),
        })
    }

    async fn script(&self) -> Result<&Script> {
        self.script.get_or_try_init(|| self.detect_script()).await
    }

    /// Find a script that answers with its usage message when run without
    /// arguments.
    async fn detect_script(&self) -> Result<Script> {
        let candidates: Vec<&str> = match &self.script_name {
            Some(name) => vec![name.as_str()],
            None => SCRIPT_NAMES.to_vec(),
        };
        for name in candidates {
            let output = process::run(&self.executable, &[name], &RunOptions::default())
                .await
                .map_err(|_| OcrodjvuError::EngineNotFound(NAME.to_string()))?;
            if output.stdout.starts_with(b"Usage: ") {
                let has_charboxes = self.has_charboxes.unwrap_or(name == "recognize");
                tracing::debug!("OCRopus script: {} (character boxes: {})", name, has_charboxes);
                return Ok(Script {
                    name: name.to_string(),
                    has_charboxes,
                });
            }
        }
        Err(OcrodjvuError::EngineNotFound(NAME.to_string()))
    }
}

#[async_trait]
impl OcrEngine for OcropusEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: NAME.to_string(),
            image_format: ImageFormat::Pnm,
            output_kind: OutputKind::Hocr,
            needs_utf8_fix: false,
        }
    }

    fn default_language(&self) -> &str {
        self.tesseract.default_language()
    }

    async fn initialize(&self) -> Result<()> {
        self.script().await?;
        match self.tesseract.initialize().await {
            Err(OcrodjvuError::EngineNotFound(_)) => Err(OcrodjvuError::EngineNotFound(NAME.to_string())),
            other => other,
        }
    }

    async fn list_languages(&self) -> Result<Vec<String>> {
        self.tesseract.list_languages().await
    }

    async fn check_language(&self, language: &str) -> Result<()> {
        self.tesseract.check_language(language).await
    }

    async fn recognize(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput> {
        let script = self.script().await?;
        let mut args: Vec<OsString> = vec![OsString::from(&script.name)];
        if script.has_charboxes && options.details < Details::Lines {
            args.push(OsString::from("--charboxes"));
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(image.path.as_os_str().to_os_string());

        tracing::debug!("Running ocropus on {} ({})", image.path.display(), options.language);
        let run_options = RunOptions {
            thread_limit: options.thread_limit,
            env: vec![(OsString::from("tesslanguage"), OsString::from(&options.language))],
            ..Default::default()
        };
        let output = process::run(&self.executable, &args, &run_options).await?;
        process::check_status(NAME, &output)?;
        process::forward_stderr(NAME, &output.stderr, |_| false);
        Ok(EngineOutput::new(output.stdout, "html"))
    }

    fn extract_text(&self, output: &EngineOutput, settings: &ExtractSettings) -> Result<Vec<Zone>> {
        hocr::extract_text(&output.data, settings)
    }
}
