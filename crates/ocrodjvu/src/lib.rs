//! ocrodjvu - OCR for DjVu
//!
//! ocrodjvu runs an OCR engine over the pages of a DjVu document and stores
//! the recognized text in the document's hidden text layer. The same zone
//! model converts between engine hOCR output, `djvused` scripts, and hOCR
//! generated from an existing text layer.
//!
//! # Quick Start
//!
//! ```rust
//! use ocrodjvu::core::config::ExtractSettings;
//! use ocrodjvu::hocr::extract_text_str;
//!
//! # fn main() -> ocrodjvu::Result<()> {
//! let markup = r#"<html><head><meta name="ocr-system" content="example"/></head>
//! <body><div class="ocr_page" title="bbox 0 0 100 40">
//! <span class="ocrx_word" title="bbox 10 10 50 30">hi</span></div></body></html>"#;
//! for zone in extract_text_str(markup, &ExtractSettings::default())? {
//!     println!("{}", zone.to_sexpr_pretty());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Text zones** (`text_zones`): zone tree, bounding boxes, rotation, `djvused` s-expressions
//! - **hOCR** (`hocr`): scanner and generator
//! - **Engines** (`engines`): Tesseract, Ocrad, Cuneiform, OCRopus and a dummy engine behind one trait, plus a registry
//! - **Documents** (`document`): page images in, text layers out
//! - **Core** (`core`): configuration and the concurrent page pipeline

#![deny(unsafe_code)]

pub mod core;
pub mod document;
pub mod engines;
pub mod error;
pub mod hocr;
pub mod segmentation;
pub mod text_zones;
pub mod utils;

pub use error::{OcrodjvuError, Result};
pub use segmentation::{SegmentationMode, WordSegmentation};
pub use text_zones::{BBox, Zone, ZoneChild, ZoneType};
