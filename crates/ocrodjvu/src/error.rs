//! Error types for ocrodjvu.
//!
//! Every fallible operation in the library returns [`Result<T>`], backed by
//! [`OcrodjvuError`].
//!
//! # Error Handling Philosophy
//!
//! **System errors bubble up unchanged:**
//! - `OcrodjvuError::Io` (from `std::io::Error`) - file system and pipe errors
//!
//! **Input errors carry context:**
//! - `MalformedHocr` - hOCR that cannot be mapped onto text zones
//! - `MalformedOcrOutput` - engine output in a non-hOCR format that cannot be parsed
//! - `Sexpr` - text zone expressions that cannot be parsed
//!
//! **Engine errors** describe missing engines, language packs, and failing
//! subprocesses. A page without a usable image is not an error at all; see
//! [`crate::core::pipeline::PageOutcome::NoImage`].
use thiserror::Error;

/// Result type alias using `OcrodjvuError`.
pub type Result<T> = std::result::Result<T, OcrodjvuError>;

/// Process exit code for a run that was aborted.
pub const EXIT_FATAL: i32 = 1;

/// Process exit code for a run that completed with failed pages.
pub const EXIT_NONFATAL: i32 = 2;

/// Main error type for all ocrodjvu operations.
#[derive(Debug, Error)]
pub enum OcrodjvuError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed hOCR document: {message}")]
    MalformedHocr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Malformed OCR output: {message}")]
    MalformedOcrOutput {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Malformed text zone expression: {message}")]
    Sexpr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported configuration: {message}")]
    UnsupportedConfiguration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("OCR engine ({0}) was not found")]
    EngineNotFound(String),

    #[error("Unable to determine list of available languages")]
    UnknownLanguageList,

    #[error(
        "Invalid language identifier: {0}; language identifier is typically an ISO 639-2 three-letter code"
    )]
    InvalidLanguageId(String),

    #[error("Language pack for the selected language ({language}) is not available for the {engine} engine")]
    MissingLanguagePack { language: String, engine: String },

    #[error("{engine} failed: {message}")]
    Engine {
        engine: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Processing aborted at page {page}: {source}")]
    PipelineAborted {
        page: usize,
        #[source]
        source: Box<OcrodjvuError>,
    },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for OcrodjvuError {
    fn from(err: toml::de::Error) -> Self {
        OcrodjvuError::Validation {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for OcrodjvuError {
    fn from(err: serde_json::Error) -> Self {
        OcrodjvuError::Validation {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        paste::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl OcrodjvuError {
    error_constructor!(malformed_hocr, MalformedHocr);
    error_constructor!(malformed_ocr_output, MalformedOcrOutput);
    error_constructor!(sexpr, Sexpr);
    error_constructor!(validation, Validation);
    error_constructor!(unsupported_configuration, UnsupportedConfiguration);

    /// Create an `Engine` error for a failing external program.
    pub fn engine<E: Into<String>, S: Into<String>>(engine: E, message: S) -> Self {
        Self::Engine {
            engine: engine.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Process exit code a command-line front end reports for this error.
    ///
    /// Every error that reaches the top level ends the run, so all of them
    /// map to [`EXIT_FATAL`]. [`EXIT_NONFATAL`] is reserved for runs that
    /// finished after skipping failed pages.
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }

    /// The page-level error behind a pipeline abort, or `self`.
    pub fn root_cause(&self) -> &OcrodjvuError {
        match self {
            OcrodjvuError::PipelineAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OcrodjvuError = io_err.into();
        assert!(matches!(err, OcrodjvuError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_malformed_hocr_error() {
        let err = OcrodjvuError::malformed_hocr("number of bboxes doesn't match text length");
        assert_eq!(
            err.to_string(),
            "Malformed hOCR document: number of bboxes doesn't match text length"
        );
    }

    #[test]
    fn test_malformed_ocr_output_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad data");
        let err = OcrodjvuError::malformed_ocr_output_with_source("unexpected line", source);
        assert_eq!(err.to_string(), "Malformed OCR output: unexpected line");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_engine_not_found_message() {
        let err = OcrodjvuError::EngineNotFound("tesseract".to_string());
        assert_eq!(err.to_string(), "OCR engine (tesseract) was not found");
    }

    #[test]
    fn test_invalid_language_message() {
        let err = OcrodjvuError::InvalidLanguageId("english".to_string());
        assert!(err.to_string().starts_with("Invalid language identifier: english;"));
    }

    #[test]
    fn test_missing_language_pack_message() {
        let err = OcrodjvuError::MissingLanguagePack {
            language: "pol".to_string(),
            engine: "ocrad".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Language pack for the selected language (pol) is not available for the ocrad engine"
        );
    }

    #[test]
    fn test_pipeline_aborted_keeps_source() {
        let err = OcrodjvuError::PipelineAborted {
            page: 3,
            source: Box::new(OcrodjvuError::engine("tesseract", "exit status 1")),
        };
        assert_eq!(err.to_string(), "Processing aborted at page 3: tesseract failed: exit status 1");
        assert!(matches!(err.root_cause(), OcrodjvuError::Engine { .. }));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Table>("= broken").unwrap_err();
        let err: OcrodjvuError = toml_err.into();
        assert!(matches!(err, OcrodjvuError::Validation { .. }));
    }

    #[test]
    fn test_other_error() {
        let err = OcrodjvuError::Other("unexpected error".to_string());
        assert_eq!(err.to_string(), "unexpected error");
    }
}
