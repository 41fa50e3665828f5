//! hOCR support.
//!
//! - **Documents** (`document`): tolerant parsing, engine detection, embedded box data
//! - **Scanner** (`scanner`): hOCR to DjVu text zones
//! - **Generator** (`generator`): DjVu text zones to hOCR

pub mod document;
pub mod generator;
pub mod scanner;

pub use document::{EngineQuirks, HocrDocument, TESSERACT_BOXES_SCRIPT_TYPE, embed_makebox, sanitize_utf8};
pub use generator::{DEFAULT_TITLE, HocrGenerator, HocrOptions};
pub use scanner::{extract_text, extract_text_str, scan_document};
