//! Paged documents.
//!
//! The pipeline sees a document through two interfaces: a
//! [`PageImageSource`] renders page images for the engine, and a
//! [`TextLayerSink`] receives the recognized text page by page and commits
//! it once the whole run succeeded.
//!
//! - **DjVu** (`djvu`): documents on disk, through the djvulibre tools
//! - **Memory** (`memory`): in-memory pages, for tests and embedding
//! - **Savers** (`savers`): `djvused` scripts and the five output modes

pub mod djvu;
pub mod memory;
pub mod savers;

use crate::core::config::RenderLayers;
use crate::engines::{ImageFormat, PageImage};
use crate::error::Result;
use crate::text_zones::Zone;
use async_trait::async_trait;
use std::path::Path;

pub use djvu::DjvuDocument;
pub use memory::{MemoryDocument, MemoryTextLayer};
pub use savers::{DjvuSaver, DjvusedScript};

/// A page of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// 1-based page number.
    pub number: usize,
    /// Component file identifier, for multi-page documents.
    pub id: Option<String>,
    /// Width and height of the unrotated page in pixels.
    pub size: (i32, i32),
    /// Initial rotation in degrees, counter-clockwise.
    pub rotation: i32,
}

impl PageInfo {
    pub fn new(number: usize, size: (i32, i32)) -> Self {
        Self {
            number,
            id: None,
            size,
            rotation: 0,
        }
    }

    /// Size of the page as displayed, with its rotation applied.
    pub fn rendered_size(&self) -> (i32, i32) {
        let (width, height) = self.size;
        if (self.rotation / 90).rem_euclid(2) == 1 {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Identifier used in raw OCR file names: the component id, or the page
    /// number for single-page documents.
    pub fn file_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.number.to_string())
    }
}

/// What image to render for recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub format: ImageFormat,
    pub layers: RenderLayers,
}

impl RenderRequest {
    pub fn bits_per_pixel(&self) -> u8 {
        self.layers.bits_per_pixel()
    }
}

/// Source of page images.
#[async_trait]
pub trait PageImageSource: Send + Sync {
    /// All pages, in document order.
    async fn pages(&self) -> Result<Vec<PageInfo>>;

    /// Render `page` into a file inside `directory`.
    ///
    /// Returns `Ok(None)` when the page has no image suitable for OCR.
    async fn render(&self, page: &PageInfo, request: &RenderRequest, directory: &Path) -> Result<Option<PageImage>>;
}

/// Destination of recognized text.
///
/// Pages arrive in processing order. `text` is `None` for pages without
/// usable text; their existing text layer is replaced by an empty one.
/// Nothing is written to the document before [`TextLayerSink::commit`].
#[async_trait]
pub trait TextLayerSink: Send {
    async fn set_text(&mut self, page: &PageInfo, text: Option<&Zone>) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    /// Called instead of `commit` when the run is aborted. Pages written so
    /// far stay available for inspection; the document is left untouched.
    async fn discard(&mut self) -> Result<()> {
        Ok(())
    }
}
