//! DjVu documents through the djvulibre command-line tools.
//!
//! Page geometry and component ids come from `djvused` (`n`, `ls`, `size`),
//! page images from `ddjvu`, and existing text layers from `djvused
//! print-txt`. Scripts are fed to `djvused` on standard input.

use super::savers::DJVUSED;
use super::{PageImageSource, PageInfo, RenderRequest};
use crate::engines::PageImage;
use crate::engines::process::{self, RunOptions};
use crate::error::{OcrodjvuError, Result};
use crate::text_zones::{Expr, Zone};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;

pub const DDJVU: &str = "ddjvu";

/// The text layer of one page, as read back from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: usize,
    /// Unrotated page size.
    pub size: (i32, i32),
    /// `None` for pages without a text layer.
    pub text: Option<Zone>,
}

/// A DjVu document on disk.
pub struct DjvuDocument {
    path: PathBuf,
    pages: OnceCell<Vec<PageInfo>>,
}

impl DjvuDocument {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pages: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn djvused(&self, script: &str) -> Result<String> {
        let options = RunOptions {
            stdin: Some(script.as_bytes().to_vec()),
            ..Default::default()
        };
        let output = process::run(DJVUSED, &[self.path.as_os_str()], &options).await?;
        process::check_status(DJVUSED, &output)?;
        process::forward_stderr(DJVUSED, &output.stderr, |_| false);
        String::from_utf8(output.stdout)
            .map_err(|e| OcrodjvuError::engine(DJVUSED, format!("output is not valid UTF-8: {}", e)))
    }

    /// Whether the file is a multi-page (bundled or indirect) document.
    pub async fn is_multi_page(&self) -> Result<bool> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let mut header = [0u8; 16];
        file.read_exact(&mut header).await.map_err(|e| {
            OcrodjvuError::validation_with_source(format!("{} is not a DjVu document", self.path.display()), e)
        })?;
        match (&header[..8], &header[12..16]) {
            (b"AT&TFORM", b"DJVM") => Ok(true),
            (b"AT&TFORM", b"DJVU") => Ok(false),
            _ => Err(OcrodjvuError::validation(format!(
                "{} is not a DjVu document",
                self.path.display()
            ))),
        }
    }

    pub async fn page_count(&self) -> Result<usize> {
        let output = self.djvused("n\n").await?;
        let line = output.lines().next().unwrap_or("").trim();
        line.parse().map_err(|e| {
            OcrodjvuError::engine(DJVUSED, format!("unexpected page count {:?}: {}", line, e))
        })
    }

    async fn load_pages(&self) -> Result<Vec<PageInfo>> {
        let count = self.page_count().await?;
        let ids = if self.is_multi_page().await? {
            parse_page_ids(&self.djvused("ls\n").await?)
        } else {
            Vec::new()
        };
        let script: String = (1..=count).map(|n| format!("select {}\nsize\n", n)).collect();
        let sizes = self.djvused(&script).await?;
        let sizes: Vec<&str> = sizes.lines().filter(|line| !line.trim().is_empty()).collect();
        if sizes.len() != count {
            return Err(OcrodjvuError::engine(
                DJVUSED,
                format!("expected {} page sizes, got {}", count, sizes.len()),
            ));
        }
        let use_ids = ids.len() == count;
        sizes
            .into_iter()
            .enumerate()
            .map(|(index, line)| {
                let (size, rotation) = parse_size(line)?;
                Ok(PageInfo {
                    number: index + 1,
                    id: if use_ids { Some(ids[index].clone()) } else { None },
                    size,
                    rotation,
                })
            })
            .collect()
    }

    /// Existing text layers of the given 1-based pages.
    pub async fn read_text(&self, pages: &[usize]) -> Result<Vec<PageText>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let script: String = pages
            .iter()
            .map(|n| format!("select {}\nsize\nprint-txt\n", n))
            .collect();
        let output = self.djvused(&script).await?;
        parse_text_dump(&output, pages)
    }
}

#[async_trait]
impl PageImageSource for DjvuDocument {
    async fn pages(&self) -> Result<Vec<PageInfo>> {
        Ok(self.pages.get_or_try_init(|| self.load_pages()).await?.clone())
    }

    async fn render(&self, page: &PageInfo, request: &RenderRequest, directory: &Path) -> Result<Option<PageImage>> {
        let bits_per_pixel = request.bits_per_pixel();
        let path = directory.join(format!(
            "{:06}.{}",
            page.number - 1,
            request.format.extension(bits_per_pixel)
        ));
        let args = [
            OsString::from(format!("-format={}", request.format.ddjvu_format(bits_per_pixel))),
            OsString::from(format!("-mode={}", request.layers.ddjvu_mode())),
            OsString::from(format!("-page={}", page.number)),
            self.path.as_os_str().to_os_string(),
            path.as_os_str().to_os_string(),
        ];
        let output = process::run(DDJVU, &args, &RunOptions::default()).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Cannot render") {
                return Ok(None);
            }
            process::check_status(DDJVU, &output)?;
        }
        process::forward_stderr(DDJVU, &output.stderr, |_| false);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.len() > 0 => Ok(Some(PageImage {
                path,
                size: page.rendered_size(),
                format: request.format,
                bits_per_pixel,
            })),
            _ => Ok(None),
        }
    }
}

/// Component ids of pages from `ls` output (`  1 P  12345 p0001.djvu`).
fn parse_page_ids(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _number = fields.next()?;
            if fields.next()? != "P" {
                return None;
            }
            let _size = fields.next()?;
            let id: Vec<&str> = fields.collect();
            if id.is_empty() { None } else { Some(id.join(" ")) }
        })
        .collect()
}

/// Parse `size` output: `width=W height=H` with an optional `rotation=R`.
fn parse_size(line: &str) -> Result<((i32, i32), i32)> {
    let mut width = None;
    let mut height = None;
    let mut rotation = 0;
    for field in line.split_whitespace() {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value: i32 = value
            .parse()
            .map_err(|e| OcrodjvuError::engine(DJVUSED, format!("bad page size {:?}: {}", line, e)))?;
        match key {
            "width" => width = Some(value),
            "height" => height = Some(value),
            "rotation" => rotation = value,
            _ => {}
        }
    }
    match (width, height) {
        (Some(width), Some(height)) => Ok(((width, height), rotation)),
        _ => Err(OcrodjvuError::engine(DJVUSED, format!("bad page size: {:?}", line))),
    }
}

/// Split `size` + `print-txt` output into per-page results.
///
/// `print-txt` prints nothing for a page without text, so pages are delimited
/// by the `width=` symbol of the next `size`.
fn parse_text_dump(output: &str, pages: &[usize]) -> Result<Vec<PageText>> {
    let mut results: Vec<PageText> = Vec::with_capacity(pages.len());
    let mut size_fields: Vec<String> = Vec::new();
    let flush = |fields: &mut Vec<String>, results: &mut Vec<PageText>| -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let number = *pages.get(results.len()).ok_or_else(|| {
            OcrodjvuError::engine(DJVUSED, "more pages in output than requested")
        })?;
        let (size, _) = parse_size(&fields.join(" "))?;
        fields.clear();
        results.push(PageText {
            number,
            size,
            text: None,
        });
        Ok(())
    };
    for expr in Expr::parse_many(output)? {
        match expr {
            Expr::Symbol(symbol) => {
                if symbol.starts_with("width=") {
                    flush(&mut size_fields, &mut results)?;
                }
                size_fields.push(symbol);
            }
            list @ Expr::List(_) => {
                flush(&mut size_fields, &mut results)?;
                let page = results
                    .last_mut()
                    .ok_or_else(|| OcrodjvuError::engine(DJVUSED, "text layer without page size"))?;
                page.text = Some(Zone::from_sexpr(&list)?);
            }
            other => {
                return Err(OcrodjvuError::engine(
                    DJVUSED,
                    format!("unexpected output: {}", other),
                ));
            }
        }
    }
    flush(&mut size_fields, &mut results)?;
    if results.len() != pages.len() {
        return Err(OcrodjvuError::engine(
            DJVUSED,
            format!("expected {} pages in output, got {}", pages.len(), results.len()),
        ));
    }
    Ok(results)
}
