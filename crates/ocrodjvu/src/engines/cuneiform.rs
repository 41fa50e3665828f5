//! Cuneiform.
//!
//! Cuneiform writes hOCR to a file given with `-o`. Its language codes are
//! its own: mostly ISO 639-2/B, with combined packs such as `ruseng` or
//! `rus_cze`. Users may give either those codes or ISO 639-2/T codes joined
//! with `+` (`rus+eng`, `deu`).
//!
//! Properties: `executable`, `extra-args` and `fix-html`.

use super::process::{self, RunOptions};
use super::tesseract::fix_html;
use super::{
    EngineDescriptor, EngineOutput, EngineProperties, ImageFormat, OcrEngine, OutputKind, PageImage, RecognizeOptions,
    split_arguments,
};
use crate::core::config::ExtractSettings;
use crate::error::{OcrodjvuError, Result};
use crate::hocr;
use crate::text_zones::Zone;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use tokio::sync::OnceCell;

pub const NAME: &str = "cuneiform";

const DEFAULT_LANGUAGE: &str = "eng";

static LANGUAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{3}(?:[+][a-z]{3})*$").expect("language regex is valid"));

static LANGUAGE_INFO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Supported languages: (.*)[.]$").expect("language info regex is valid"));

/// ISO 639-2 bibliographic codes that differ from terminology codes.
const BIBLIOGRAPHIC_TO_TERMINOLOGY: &[(&str, &str)] = &[
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("dut", "nld"),
    ("fre", "fra"),
    ("geo", "kat"),
    ("ger", "deu"),
    ("gre", "ell"),
    ("ice", "isl"),
    ("mac", "mkd"),
    ("mao", "mri"),
    ("may", "msa"),
    ("per", "fas"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("tib", "bod"),
    ("wel", "cym"),
];

/// Convert an ISO 639-2/B code to 639-2/T; `None` for anything that is not
/// a three-letter code.
fn terminology_code(code: &str) -> Option<&str> {
    if code.len() != 3 {
        return None;
    }
    Some(
        BIBLIOGRAPHIC_TO_TERMINOLOGY
            .iter()
            .find(|(bibliographic, _)| *bibliographic == code)
            .map_or(code, |(_, terminology)| *terminology),
    )
}

/// Languages reported by `cuneiform -l`, with the mappings between
/// Cuneiform codes and ISO codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LanguageTable {
    /// ISO codes in listing order.
    languages: Vec<String>,
    to_iso: HashMap<String, String>,
    /// Sets of ISO codes to the Cuneiform code covering them.
    from_iso: HashMap<BTreeSet<String>, String>,
}

impl LanguageTable {
    /// Parse the `Supported languages: ...` line; `None` if there is none.
    fn parse(listing: &str) -> Option<Self> {
        let codes: Vec<&str> = listing
            .lines()
            .find_map(|line| LANGUAGE_INFO_RE.captures(line.trim_end()))
            .map(|captures| captures.get(1).map_or("", |m| m.as_str()).split_whitespace().collect())?;
        let mut table = Self::default();
        for &code in &codes {
            let iso = match code {
                "ruseng" => {
                    table
                        .from_iso
                        .insert(BTreeSet::from(["rus-eng".to_string()]), code.to_string());
                    "rus+eng".to_string()
                }
                // Cuneiform 1.0 and older use `slo` for Slovenian.
                "slo" if !codes.contains(&"slv") => "slv".to_string(),
                "slo" => "slk".to_string(),
                _ => {
                    let parts: Option<Vec<&str>> = code.split('_').map(terminology_code).collect();
                    match parts {
                        Some(parts) => parts.join("+"),
                        None => {
                            tracing::warn!("Unparsable Cuneiform language code: {:?}", code);
                            continue;
                        }
                    }
                }
            };
            table.to_iso.insert(code.to_string(), iso.clone());
            table.from_iso.insert(iso_set(&iso), code.to_string());
            table.languages.push(iso);
        }
        Some(table)
    }

    /// The Cuneiform code for a user-supplied language.
    fn to_cuneiform<'a>(&'a self, language: &'a str) -> &'a str {
        self.from_iso
            .get(&iso_set(language))
            .map_or(language, String::as_str)
    }

    fn to_iso<'a>(&'a self, language: &'a str) -> &'a str {
        self.to_iso.get(language).map_or(language, String::as_str)
    }

    fn normalize<'a>(&'a self, language: &'a str) -> &'a str {
        self.to_iso(self.to_cuneiform(language))
    }
}

/// Split `a+b` into a set of ISO 639-2/T codes; codes of other lengths are
/// kept as given.
fn iso_set(language: &str) -> BTreeSet<String> {
    language
        .split('+')
        .map(|code| terminology_code(code).unwrap_or(code).to_string())
        .collect()
}

pub struct CuneiformEngine {
    executable: String,
    extra_args: Vec<String>,
    fix_html: bool,
    languages: OnceCell<LanguageTable>,
}

impl CuneiformEngine {
    pub fn new(mut properties: EngineProperties) -> Result<Self> {
        let executable = properties.take("executable").unwrap_or_else(|| NAME.to_string());
        let extra_args = match properties.take("extra-args") {
            Some(value) => split_arguments(&value)?,
            None => Vec::new(),
        };
        let fix_html = properties.take_bool("fix-html")?.unwrap_or(false);
        properties.finish(NAME)?;
        Ok(Self {
            executable,
            extra_args,
            fix_html,
            languages: OnceCell::new(),
        })
    }

    async fn languages(&self) -> Result<&LanguageTable> {
        self.languages.get_or_try_init(|| self.detect_languages()).await
    }

    /// `cuneiform -l` prints its languages and exits with a failure status.
    async fn detect_languages(&self) -> Result<LanguageTable> {
        let output = process::run(&self.executable, &["-l"], &RunOptions::default())
            .await
            .map_err(|_| OcrodjvuError::UnknownLanguageList)?;
        if output.status.success() {
            return Err(OcrodjvuError::UnknownLanguageList);
        }
        LanguageTable::parse(&String::from_utf8_lossy(&output.stdout)).ok_or(OcrodjvuError::UnknownLanguageList)
    }
}

#[async_trait]
impl OcrEngine for CuneiformEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            name: NAME.to_string(),
            image_format: ImageFormat::Tiff,
            output_kind: OutputKind::Hocr,
            needs_utf8_fix: true,
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
        Ok(self.languages().await?.languages.clone())
    }

    async fn check_language(&self, language: &str) -> Result<()> {
        let table = self.languages().await?;
        // `slo` is Slovak in ISO 639-2, whatever Cuneiform thinks.
        let language = if language == "slo" { "slk" } else { table.to_iso(language) };
        let language = table.normalize(language);
        if !LANGUAGE_RE.is_match(language) {
            return Err(OcrodjvuError::InvalidLanguageId(language.to_string()));
        }
        if table.languages.iter().any(|known| known == language) {
            Ok(())
        } else {
            Err(OcrodjvuError::MissingLanguagePack {
                language: language.to_string(),
                engine: NAME.to_string(),
            })
        }
    }

    async fn recognize(&self, image: &PageImage, options: &RecognizeOptions) -> Result<EngineOutput> {
        let table = self.languages().await?;
        let language = table.to_cuneiform(&options.language);
        // Cuneiform may write extra files (images) next to its output.
        let workdir = tempfile::Builder::new().prefix("ocrodjvu.cuneiform.").tempdir()?;
        let result = workdir.path().join("ocr.html");
        let mut args: Vec<OsString> = vec![
            OsString::from("-l"),
            OsString::from(language),
            OsString::from("-f"),
            OsString::from("hocr"),
            OsString::from("-o"),
            result.as_os_str().to_os_string(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(image.path.as_os_str().to_os_string());

        tracing::debug!("Running cuneiform on {} ({})", image.path.display(), language);
        let run_options = RunOptions {
            thread_limit: options.thread_limit,
            ..Default::default()
        };
        let output = process::run(&self.executable, &args, &run_options).await?;
        process::check_status(NAME, &output)?;
        process::forward_stderr(NAME, &output.stderr, |_| false);

        let data = tokio::fs::read(&result).await.map_err(|e| OcrodjvuError::Engine {
            engine: NAME.to_string(),
            message: format!("cannot read {}: {}", result.display(), e),
            source: Some(Box::new(e)),
        })?;
        if self.fix_html {
            return Ok(EngineOutput::new(fix_html(&String::from_utf8_lossy(&data)), "html"));
        }
        Ok(EngineOutput::new(data, "html"))
    }

    fn extract_text(&self, output: &EngineOutput, settings: &ExtractSettings) -> Result<Vec<Zone>> {
        hocr::extract_text(&output.data, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "Cuneiform for Linux 1.1.0\nSupported languages: eng ger fra rus ruseng slo rus_cze.\n";

    #[test]
    fn test_language_table() {
        let table = LanguageTable::parse(LISTING).unwrap();
        assert_eq!(
            table.languages,
            vec!["eng", "deu", "fra", "rus", "rus+eng", "slv", "rus+ces"]
        );
        assert_eq!(table.to_cuneiform("deu"), "ger");
        assert_eq!(table.to_cuneiform("ger"), "ger");
        assert_eq!(table.to_cuneiform("eng+rus"), "ruseng");
        assert_eq!(table.to_cuneiform("rus-eng"), "ruseng");
        assert_eq!(table.to_cuneiform("ces+rus"), "rus_cze");
        assert_eq!(table.normalize("cze+rus"), "rus+ces");
        assert_eq!(table.to_cuneiform("tlh"), "tlh");
        assert!(LanguageTable::parse("Usage: cuneiform [options] imagefile\n").is_none());
    }

    #[test]
    fn test_slo_means_slovak_next_to_slv() {
        let table = LanguageTable::parse("Supported languages: slo slv.\n").unwrap();
        assert_eq!(table.languages, vec!["slk", "slv"]);
    }

    #[test]
    fn test_hocr_extraction() {
        let engine = CuneiformEngine::new(EngineProperties::new()).unwrap();
        assert!(engine.descriptor().needs_utf8_fix);
        let output = EngineOutput::new(
            r#"<html><head><meta name="ocr-system" content="openocr"/></head><body>
<div class="ocr_page" title="bbox 0 0 100 40"><span class="ocr_line" title="bbox 10 10 50 30">hi</span></div>
</body></html>"#,
            "html",
        );
        let zones = engine.extract_text(&output, &ExtractSettings::default()).unwrap();
        assert_eq!(zones[0].to_string(), r#"(page 0 0 100 40 (line 10 10 50 30 "hi"))"#);
    }

    #[test]
    fn test_properties() {
        let properties: EngineProperties = [("fix-html", "1"), ("extra-args", "--dotmatrix")].into_iter().collect();
        let engine = CuneiformEngine::new(properties).unwrap();
        assert!(engine.fix_html);
        assert_eq!(engine.extra_args, vec!["--dotmatrix"]);
        let properties: EngineProperties = [("use-hocr", "1")].into_iter().collect();
        assert!(CuneiformEngine::new(properties).is_err());
    }

    #[cfg(unix)]
    fn fake_cuneiform(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-cuneiform");
        std::fs::write(
            &path,
            format!(
                "#!/bin/sh\nif [ \"$1\" = -l ]; then printf '{}'; exit 1; fi\n\
                 printf '<html><body><div class=\"ocr_page\" title=\"bbox 0 0 10 10\">%s</div></body></html>' \"$2\" > \"$6\"\n",
                LISTING.replace('\n', "\\n")
            ),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_languages_from_fake_executable() {
        let dir = tempfile::tempdir().unwrap();
        let properties: EngineProperties = [("executable", fake_cuneiform(dir.path()))].into_iter().collect();
        let engine = CuneiformEngine::new(properties).unwrap();
        engine.initialize().await.unwrap();
        for language in ["eng", "ger", "deu", "ruseng", "rus-eng", "rus+eng", "eng+rus", "rus_cze", "ces+rus"] {
            engine.check_language(language).await.unwrap();
        }
        let err = engine.check_language("tlh").await.unwrap_err();
        assert!(matches!(err, OcrodjvuError::MissingLanguagePack { ref language, .. } if language == "tlh"));
        assert!(matches!(
            engine.check_language("English").await.unwrap_err(),
            OcrodjvuError::InvalidLanguageId(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recognize_passes_cuneiform_language_code() {
        let dir = tempfile::tempdir().unwrap();
        let properties: EngineProperties = [("executable", fake_cuneiform(dir.path()))].into_iter().collect();
        let engine = CuneiformEngine::new(properties).unwrap();
        let image = PageImage {
            path: dir.path().join("page.tif"),
            size: (10, 10),
            format: ImageFormat::Tiff,
            bits_per_pixel: 1,
        };
        let output = engine
            .recognize(&image, &RecognizeOptions::new("eng+rus"))
            .await
            .unwrap();
        assert_eq!(output.extension, "html");
        assert!(output.as_text().contains(">ruseng</div>"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_executable_is_engine_not_found() {
        let properties: EngineProperties = [("executable", "/nonexistent/cuneiform")].into_iter().collect();
        let engine = CuneiformEngine::new(properties).unwrap();
        let err = engine.initialize().await.unwrap_err();
        assert!(matches!(err, OcrodjvuError::EngineNotFound(ref name) if name == "cuneiform"));
    }
}
