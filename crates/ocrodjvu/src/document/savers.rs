//! Saving results.
//!
//! Recognized text is collected into a `djvused` script: one
//! `select`/`set-txt` block per page, in page order. The output mode decides
//! what happens with the script once the run is over:
//!
//! | mode       | action                                                      |
//! |------------|-------------------------------------------------------------|
//! | bundled    | convert the input with `djvmcvt -b`, then apply the script   |
//! | indirect   | convert the input with `djvmcvt -i`, then apply the script   |
//! | script     | write the script                                            |
//! | in-place   | apply the script to the input                               |
//! | dry run    | nothing                                                     |

use super::{PageInfo, TextLayerSink};
use crate::core::config::OutputMode;
use crate::engines::process::{self, RunOptions};
use crate::error::{OcrodjvuError, Result};
use crate::text_zones::Zone;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const DJVUSED: &str = "djvused";
pub const DJVMCVT: &str = "djvmcvt";
pub const DJVM: &str = "djvm";

/// Quote a component file identifier for `select`.
pub fn quote_page_id(id: &str) -> String {
    format!("'{}'", id.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// A `djvused` script under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DjvusedScript {
    buffer: String,
}

impl DjvusedScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the text layer of every selected page.
    pub fn remove_text(&mut self) -> &mut Self {
        self.buffer.push_str("remove-txt\n");
        self
    }

    /// Select a page by component id, or by number when it has none.
    pub fn select(&mut self, page: &PageInfo) -> &mut Self {
        match &page.id {
            Some(id) => {
                let _ = writeln!(self.buffer, "select {}", quote_page_id(id));
            }
            None => self.select_number(page.number),
        }
        self
    }

    pub fn select_number(&mut self, number: usize) {
        let _ = writeln!(self.buffer, "select {}", number);
    }

    /// Replace the text of the selected page; `None` leaves it empty.
    pub fn set_text(&mut self, text: Option<&Zone>) -> &mut Self {
        self.buffer.push_str("set-txt\n");
        if let Some(zone) = text {
            self.buffer.push_str(&zone.to_sexpr_pretty());
        }
        self.buffer.push_str("\n.\n\n");
        self
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Script that replaces the text of pages `1..=n` with `zones`, as written by
/// `hocr2djvused`.
pub fn hocr2djvused_script(zones: &[Zone]) -> String {
    let mut script = DjvusedScript::new();
    for (index, zone) in zones.iter().enumerate() {
        script.select_number(index + 1);
        script.remove_text().set_text(Some(zone));
    }
    script.into_string()
}

/// Apply a script file to a document with `djvused -s`.
pub async fn apply_script(script: &Path, document: &Path) -> Result<()> {
    let args = [
        OsString::from("-s"),
        OsString::from("-f"),
        script.as_os_str().to_os_string(),
        document.as_os_str().to_os_string(),
    ];
    let output = process::run(DJVUSED, &args, &RunOptions::default()).await?;
    process::check_status(DJVUSED, &output)?;
    process::forward_stderr(DJVUSED, &output.stderr, |_| false);
    Ok(())
}

async fn run_tool(tool: &str, args: &[OsString]) -> Result<()> {
    let output = process::run(tool, args, &RunOptions::default()).await?;
    process::check_status(tool, &output)?;
    process::forward_stderr(tool, &output.stderr, |_| false);
    Ok(())
}

/// Writes recognized text into DjVu documents.
pub struct DjvuSaver {
    input: PathBuf,
    multi_page: bool,
    mode: OutputMode,
    ocr_only: bool,
    script: DjvusedScript,
    pages: Vec<usize>,
    workdir: PathBuf,
}

impl DjvuSaver {
    /// `workdir` holds the script and intermediate documents; it must exist
    /// until [`TextLayerSink::commit`] returns.
    pub fn new(
        input: impl Into<PathBuf>,
        multi_page: bool,
        mode: OutputMode,
        clear_text: bool,
        ocr_only: bool,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        let mut script = DjvusedScript::new();
        if clear_text {
            script.remove_text();
        }
        Self {
            input: input.into(),
            multi_page,
            mode,
            ocr_only,
            script,
            pages: Vec::new(),
            workdir: workdir.into(),
        }
    }

    pub fn script(&self) -> &DjvusedScript {
        &self.script
    }

    /// Check that the tools the output mode needs are installed.
    pub fn check(&self) -> Result<()> {
        let tools: &[&str] = match self.mode {
            OutputMode::Bundled(_) | OutputMode::Indirect(_) => &[DJVUSED, DJVMCVT, DJVM],
            OutputMode::InPlace => &[DJVUSED],
            OutputMode::Script(_) | OutputMode::DryRun => &[],
        };
        for tool in tools {
            process::find_program(tool)?;
        }
        Ok(())
    }

    async fn write_script(&self) -> Result<PathBuf> {
        let path = self.workdir.join("ocrodjvu.djvused");
        tokio::fs::write(&path, self.script.as_str()).await?;
        Ok(path)
    }

    /// A bundled copy of the input holding only the pages that are saved.
    async fn bundle(&self, output: &Path) -> Result<()> {
        if self.multi_page {
            run_tool(
                DJVMCVT,
                &[
                    OsString::from("-b"),
                    self.input.as_os_str().to_os_string(),
                    output.as_os_str().to_os_string(),
                ],
            )
            .await?;
        } else {
            run_tool(
                DJVM,
                &[
                    OsString::from("-c"),
                    output.as_os_str().to_os_string(),
                    self.input.as_os_str().to_os_string(),
                ],
            )
            .await?;
        }
        if self.ocr_only {
            self.prune(output).await?;
        }
        Ok(())
    }

    /// Delete pages that were not processed, last page first.
    async fn prune(&self, bundled: &Path) -> Result<()> {
        let count = super::djvu::DjvuDocument::open(bundled).page_count().await?;
        for number in (1..=count).rev() {
            if self.pages.contains(&number) {
                continue;
            }
            run_tool(
                DJVM,
                &[
                    OsString::from("-d"),
                    bundled.as_os_str().to_os_string(),
                    OsString::from(number.to_string()),
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn save_indirect(&self, index: &Path) -> Result<()> {
        let directory = match index.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = index
            .file_name()
            .ok_or_else(|| OcrodjvuError::validation(format!("invalid index file name: {}", index.display())))?;
        tokio::fs::create_dir_all(&directory).await?;
        let source = if self.ocr_only || !self.multi_page {
            let bundled = self.workdir.join("bundled.djvu");
            self.bundle(&bundled).await?;
            bundled
        } else {
            self.input.clone()
        };
        run_tool(
            DJVMCVT,
            &[
                OsString::from("-i"),
                source.as_os_str().to_os_string(),
                directory.as_os_str().to_os_string(),
                file_name.to_os_string(),
            ],
        )
        .await
    }
}

#[async_trait]
impl TextLayerSink for DjvuSaver {
    async fn set_text(&mut self, page: &PageInfo, text: Option<&Zone>) -> Result<()> {
        // A single-page document copied into a bundle gets a new component id.
        if self.multi_page {
            self.script.select(page);
        } else {
            self.script.select_number(page.number);
        }
        self.script.set_text(text);
        self.pages.push(page.number);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        match &self.mode {
            OutputMode::DryRun => {
                tracing::info!("Dry run; {} page(s) left unchanged", self.pages.len());
            }
            OutputMode::Script(path) => {
                tokio::fs::write(path, self.script.as_str()).await?;
                tracing::info!("Saved djvused script to {}", path.display());
            }
            OutputMode::InPlace => {
                let script = self.write_script().await?;
                apply_script(&script, &self.input).await?;
                tracing::info!("Updated {} in place", self.input.display());
            }
            OutputMode::Bundled(path) => {
                self.bundle(path).await?;
                let script = self.write_script().await?;
                apply_script(&script, path).await?;
                tracing::info!("Saved bundled document to {}", path.display());
            }
            OutputMode::Indirect(index) => {
                self.save_indirect(index).await?;
                let script = self.write_script().await?;
                apply_script(&script, index).await?;
                tracing::info!("Saved indirect document to {}", index.display());
            }
        }
        Ok(())
    }

    async fn discard(&mut self) -> Result<()> {
        let script = self.write_script().await?;
        tracing::info!("Partial djvused script left in {}", script.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: usize, id: Option<&str>) -> PageInfo {
        PageInfo {
            id: id.map(str::to_string),
            ..PageInfo::new(number, (100, 40))
        }
    }

    #[test]
    fn test_quote_page_id() {
        assert_eq!(quote_page_id("p0001.djvu"), "'p0001.djvu'");
        assert_eq!(quote_page_id(r"it's\x"), r"'it\'s\\x'");
    }

    #[test]
    fn test_script_blocks() {
        let zone = Zone::parse_sexpr(r#"(page 0 0 100 40 "hi")"#).unwrap();
        let mut script = DjvusedScript::new();
        script.remove_text();
        script.select(&page(1, Some("p1.djvu"))).set_text(Some(&zone));
        script.select(&page(2, None)).set_text(None);
        assert_eq!(
            script.as_str(),
            "remove-txt\nselect 'p1.djvu'\nset-txt\n(page 0 0 100 40 \"hi\")\n.\n\nselect 2\nset-txt\n\n.\n\n"
        );
    }

    #[test]
    fn test_hocr2djvused_script() {
        let zones = vec![
            Zone::parse_sexpr(r#"(page 0 0 10 10 "a")"#).unwrap(),
            Zone::parse_sexpr(r#"(page 0 0 10 10 "b")"#).unwrap(),
        ];
        assert_eq!(
            hocr2djvused_script(&zones),
            "select 1\nremove-txt\nset-txt\n(page 0 0 10 10 \"a\")\n.\n\nselect 2\nremove-txt\nset-txt\n(page 0 0 10 10 \"b\")\n.\n\n"
        );
    }

    #[tokio::test]
    async fn test_script_mode_writes_script() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.djvused");
        let mut saver = DjvuSaver::new(
            dir.path().join("in.djvu"),
            true,
            OutputMode::Script(target.clone()),
            true,
            false,
            dir.path(),
        );
        assert!(saver.check().is_ok());
        let zone = Zone::parse_sexpr(r#"(page 0 0 100 40 "x")"#).unwrap();
        saver.set_text(&page(1, Some("a.djvu")), Some(&zone)).await.unwrap();
        saver.set_text(&page(2, Some("b.djvu")), None).await.unwrap();
        assert!(!target.exists());
        saver.commit().await.unwrap();
        let written = std::fs::read_to_string(&target).unwrap();
        assert!(written.starts_with("remove-txt\nselect 'a.djvu'\n"));
        assert!(written.ends_with("select 'b.djvu'\nset-txt\n\n.\n\n"));
    }

    #[tokio::test]
    async fn test_discard_keeps_partial_script() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.djvu");
        let mut saver = DjvuSaver::new(&input, true, OutputMode::InPlace, false, false, dir.path());
        saver.set_text(&page(1, None), None).await.unwrap();
        saver.discard().await.unwrap();
        let partial = std::fs::read_to_string(dir.path().join("ocrodjvu.djvused")).unwrap();
        assert_eq!(partial, "select 1\nset-txt\n\n.\n\n");
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn test_single_page_selected_by_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = DjvuSaver::new(
            dir.path().join("in.djvu"),
            false,
            OutputMode::DryRun,
            false,
            false,
            dir.path(),
        );
        saver.set_text(&page(1, Some("in.djvu")), None).await.unwrap();
        saver.commit().await.unwrap();
        assert_eq!(saver.script().as_str(), "select 1\nset-txt\n\n.\n\n");
    }
}
