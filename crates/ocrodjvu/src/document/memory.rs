//! In-memory documents.

use super::{PageImageSource, PageInfo, RenderRequest, TextLayerSink};
use crate::engines::PageImage;
use crate::error::{OcrodjvuError, Result};
use crate::text_zones::Zone;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Pages held in memory. A page without image bytes has no image suitable
/// for OCR.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    pages: Vec<(PageInfo, Option<Vec<u8>>)>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page of `size` pixels; its number is its position.
    pub fn push_page(&mut self, size: (i32, i32), image: Option<Vec<u8>>) -> &mut Self {
        let number = self.pages.len() + 1;
        self.pages.push((PageInfo::new(number, size), image));
        self
    }

    /// Append a fully described page.
    pub fn push(&mut self, page: PageInfo, image: Option<Vec<u8>>) -> &mut Self {
        self.pages.push((page, image));
        self
    }
}

#[async_trait]
impl PageImageSource for MemoryDocument {
    async fn pages(&self) -> Result<Vec<PageInfo>> {
        Ok(self.pages.iter().map(|(page, _)| page.clone()).collect())
    }

    async fn render(&self, page: &PageInfo, request: &RenderRequest, directory: &Path) -> Result<Option<PageImage>> {
        let (_, image) = self
            .pages
            .iter()
            .find(|(candidate, _)| candidate.number == page.number)
            .ok_or_else(|| OcrodjvuError::validation(format!("no such page: {}", page.number)))?;
        let Some(bytes) = image else {
            return Ok(None);
        };
        let bits_per_pixel = request.bits_per_pixel();
        let path = directory.join(format!(
            "{:06}.{}",
            page.number - 1,
            request.format.extension(bits_per_pixel)
        ));
        tokio::fs::write(&path, bytes).await?;
        Ok(Some(PageImage {
            path,
            size: page.rendered_size(),
            format: request.format,
            bits_per_pixel,
        }))
    }
}

/// State shared between a [`MemoryTextLayer`] and its clones.
#[derive(Debug, Default)]
struct TextLayerState {
    pending: Vec<(usize, Option<Zone>)>,
    committed: Option<Vec<(usize, Option<Zone>)>>,
}

/// A text layer sink that keeps everything in memory.
///
/// Clones share state, so a clone kept by the caller observes what the
/// pipeline wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryTextLayer {
    state: Arc<Mutex<TextLayerState>>,
}

impl MemoryTextLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages received so far, in arrival order.
    pub fn pending(&self) -> Vec<(usize, Option<Zone>)> {
        self.state.lock().pending.clone()
    }

    /// Pages as of the last commit; `None` before any commit.
    pub fn committed(&self) -> Option<Vec<(usize, Option<Zone>)>> {
        self.state.lock().committed.clone()
    }
}

#[async_trait]
impl TextLayerSink for MemoryTextLayer {
    async fn set_text(&mut self, page: &PageInfo, text: Option<&Zone>) -> Result<()> {
        self.state.lock().pending.push((page.number, text.cloned()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.committed = Some(state.pending.clone());
        Ok(())
    }
}
