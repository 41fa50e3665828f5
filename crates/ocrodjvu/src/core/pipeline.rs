//! Concurrent page recognition with in-order output.
//!
//! A feeder task sends one job per page into a bounded channel shared by a
//! fixed number of worker tasks. Each job carries a `oneshot` sender for its
//! result. The caller acts as the writer: it awaits the results strictly in
//! page order and hands them to the [`TextLayerSink`], so the sink sees pages
//! in order no matter which worker finishes first.
//!
//! When a page fails under [`ErrorPolicy::Abort`], a shared stop flag makes
//! workers skip the remaining jobs, the run waits for pages already being
//! recognized, and nothing is committed: the sink is told to discard and
//! intermediate files are kept for inspection. Under [`ErrorPolicy::Resume`] the
//! page is logged, left without text, and the run continues.
//!
//! # Example
//!
//! ```rust,no_run
//! use ocrodjvu::core::config::PipelineConfig;
//! use ocrodjvu::core::pipeline::Pipeline;
//! use ocrodjvu::document::{MemoryDocument, MemoryTextLayer};
//! use ocrodjvu::engines::{EngineProperties, registry};
//! use std::sync::Arc;
//!
//! # async fn example() -> ocrodjvu::Result<()> {
//! let config = PipelineConfig::default();
//! let engine = registry::load_engine(&config.engine, EngineProperties::new()).await?;
//! let pipeline = Pipeline::new(engine, &config)?;
//!
//! let mut document = MemoryDocument::new();
//! document.push_page((2550, 3300), Some(std::fs::read("page.tif")?));
//! let mut layer = MemoryTextLayer::new();
//! let report = pipeline.run(Arc::new(document), &mut layer, None).await?;
//! println!("{} page(s) recognized", report.recognized);
//! # Ok(())
//! # }
//! ```

use crate::core::config::{Details, ErrorPolicy, ExtractSettings, PipelineConfig, RenderLayers};
use crate::document::{PageImageSource, PageInfo, RenderRequest, TextLayerSink};
use crate::engines::{OcrEngine, RecognizeOptions};
use crate::error::{EXIT_NONFATAL, OcrodjvuError, Result};
use crate::segmentation::WordSegmentation;
use crate::text_zones::Zone;
use crate::utils;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Result of processing one page.
#[derive(Debug)]
pub enum PageOutcome {
    /// Recognized text, a PAGE zone in page coordinates.
    Text(Zone),
    /// The page has no image suitable for OCR.
    NoImage,
    Failed(OcrodjvuError),
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub pages: usize,
    pub recognized: usize,
    pub no_image: usize,
    /// Pages that failed and were left without text.
    pub failed: Vec<usize>,
    /// Directory with intermediate files, kept in debug mode.
    pub debug_dir: Option<PathBuf>,
}

impl PipelineReport {
    /// `0` for a clean run, [`EXIT_NONFATAL`] when pages were skipped.
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() { 0 } else { EXIT_NONFATAL }
    }
}

/// Settings shared by all workers of a run.
#[derive(Debug, Clone)]
struct PageJobSettings {
    language: String,
    details: Details,
    segmentation: WordSegmentation,
    render: RenderLayers,
    save_raw_ocr: Option<PathBuf>,
    raw_ocr_filename_template: String,
    debug: bool,
}

struct Job {
    page: PageInfo,
    reply: oneshot::Sender<PageOutcome>,
}

/// Temporary directory for page images, removed on drop unless kept.
enum WorkDir {
    Temporary(tempfile::TempDir),
    Kept(PathBuf),
}

impl WorkDir {
    fn create(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("ocrodjvu.").tempdir()?;
        Ok(if keep {
            WorkDir::Kept(dir.keep())
        } else {
            WorkDir::Temporary(dir)
        })
    }

    /// Stop the directory from being removed.
    fn keep(self) -> PathBuf {
        match self {
            WorkDir::Temporary(dir) => dir.keep(),
            WorkDir::Kept(path) => path,
        }
    }

    fn path(&self) -> &Path {
        match self {
            WorkDir::Temporary(dir) => dir.path(),
            WorkDir::Kept(path) => path,
        }
    }
}

/// Recognizes pages with one engine.
pub struct Pipeline {
    engine: Arc<dyn OcrEngine>,
    settings: Arc<PageJobSettings>,
    jobs: usize,
    on_error: ErrorPolicy,
}

impl Pipeline {
    /// Set up a run. The recognition language defaults to the engine's.
    pub fn new(engine: Arc<dyn OcrEngine>, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let language = config
            .language
            .clone()
            .unwrap_or_else(|| engine.default_language().to_string());
        let segmentation = config.segmentation(&language)?;
        let settings = PageJobSettings {
            language,
            details: config.details,
            segmentation,
            render: config.render,
            save_raw_ocr: config.save_raw_ocr.clone(),
            raw_ocr_filename_template: config.raw_ocr_filename_template.clone(),
            debug: config.debug,
        };
        Ok(Self {
            engine,
            settings: Arc::new(settings),
            jobs: config.jobs(),
            on_error: config.on_error,
        })
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        &self.engine
    }

    pub fn language(&self) -> &str {
        &self.settings.language
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Check the recognition language. An engine that cannot list its
    /// languages is trusted to have it.
    pub async fn check_language(&self) -> Result<()> {
        match self.engine.check_language(&self.settings.language).await {
            Err(OcrodjvuError::UnknownLanguageList) => {
                tracing::debug!(
                    "Cannot verify language {} for the {} engine",
                    self.settings.language,
                    self.engine.name()
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Recognize `pages` (1-based; all pages when `None`) and write the
    /// results to `sink`.
    ///
    /// The sink is committed only if the run was not aborted.
    pub async fn run<S, T>(&self, source: Arc<S>, sink: &mut T, pages: Option<&[usize]>) -> Result<PipelineReport>
    where
        S: PageImageSource + 'static,
        T: TextLayerSink + ?Sized,
    {
        let all_pages = source.pages().await?;
        let selected = select_pages(&all_pages, pages)?;
        let workdir = WorkDir::create(self.settings.debug)?;
        let thread_limit = utils::thread_limit(selected.len(), self.jobs);
        tracing::info!(
            "Processing {} page(s) with the {} engine ({} job(s))",
            selected.len(),
            self.engine.name(),
            self.jobs
        );

        let stop = Arc::new(AtomicBool::new(false));
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.jobs);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut replies = Vec::with_capacity(selected.len());
        let mut queued = Vec::with_capacity(selected.len());
        for page in &selected {
            let (reply, receiver) = oneshot::channel();
            replies.push(receiver);
            queued.push(Job {
                page: page.clone(),
                reply,
            });
        }

        let feeder = {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                for job in queued {
                    if stop.load(Ordering::SeqCst) || job_tx.send(job).await.is_err() {
                        break;
                    }
                }
            })
        };

        let workers: Vec<JoinHandle<()>> = (0..self.jobs)
            .map(|_| {
                let worker = Worker {
                    engine: Arc::clone(&self.engine),
                    source: Arc::clone(&source),
                    settings: Arc::clone(&self.settings),
                    workdir: workdir.path().to_path_buf(),
                    thread_limit,
                };
                let job_rx = Arc::clone(&job_rx);
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    loop {
                        let job = { job_rx.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        if stop.load(Ordering::SeqCst) {
                            continue;
                        }
                        let outcome = worker.process(&job.page).await;
                        let _ = job.reply.send(outcome);
                    }
                })
            })
            .collect();

        let mut report = PipelineReport {
            pages: selected.len(),
            ..Default::default()
        };
        let mut aborted = None;
        let mut sink_error = None;
        for (page, reply) in selected.iter().zip(replies) {
            let outcome = reply
                .await
                .unwrap_or_else(|_| PageOutcome::Failed(OcrodjvuError::Other("worker stopped unexpectedly".to_string())));
            let written = match outcome {
                PageOutcome::Text(zone) => {
                    report.recognized += 1;
                    sink.set_text(page, Some(&zone)).await
                }
                PageOutcome::NoImage => {
                    tracing::info!("Page #{}: no image suitable for OCR", page.number);
                    report.no_image += 1;
                    sink.set_text(page, None).await
                }
                PageOutcome::Failed(e) => {
                    tracing::error!("Exception while processing page {}: {}", page.number, e);
                    if self.on_error == ErrorPolicy::Abort {
                        stop.store(true, Ordering::SeqCst);
                        aborted = Some(OcrodjvuError::PipelineAborted {
                            page: page.number,
                            source: Box::new(e),
                        });
                        break;
                    }
                    tracing::warn!("Page #{} left without text", page.number);
                    report.failed.push(page.number);
                    sink.set_text(page, None).await
                }
            };
            if let Err(e) = written {
                stop.store(true, Ordering::SeqCst);
                sink_error = Some(e);
                break;
            }
        }

        if aborted.is_some() && self.jobs > 1 {
            tracing::info!("Waiting for other workers to finish...");
        }
        let join_error = |e: tokio::task::JoinError| OcrodjvuError::Other(format!("worker task failed: {}", e));
        feeder.await.map_err(join_error)?;
        for worker in workers {
            worker.await.map_err(join_error)?;
        }

        if let Some(e) = sink_error {
            return Err(e);
        }
        if let Some(e) = aborted {
            if let Err(discard_error) = sink.discard().await {
                tracing::warn!("Cannot keep partial results: {}", discard_error);
            }
            let path = workdir.keep();
            tracing::info!("Intermediate files were left in the {} directory", path.display());
            return Err(e);
        }
        if let WorkDir::Kept(path) = &workdir {
            tracing::info!("Intermediate files were left in the {} directory", path.display());
            report.debug_dir = Some(path.clone());
        }
        sink.commit().await?;
        Ok(report)
    }
}

/// Pick pages by 1-based number, in the order given.
fn select_pages(all_pages: &[PageInfo], numbers: Option<&[usize]>) -> Result<Vec<PageInfo>> {
    let Some(numbers) = numbers else {
        return Ok(all_pages.to_vec());
    };
    numbers
        .iter()
        .map(|&number| {
            number
                .checked_sub(1)
                .and_then(|index| all_pages.get(index))
                .cloned()
                .ok_or_else(|| {
                    OcrodjvuError::validation(format!(
                        "page {} does not exist (the document has {} page(s))",
                        number,
                        all_pages.len()
                    ))
                })
        })
        .collect()
}

struct Worker<S: ?Sized> {
    engine: Arc<dyn OcrEngine>,
    source: Arc<S>,
    settings: Arc<PageJobSettings>,
    workdir: PathBuf,
    thread_limit: usize,
}

impl<S: PageImageSource + ?Sized> Worker<S> {
    async fn process(&self, page: &PageInfo) -> PageOutcome {
        match self.recognize(page).await {
            Ok(Some(zone)) => PageOutcome::Text(zone),
            Ok(None) => PageOutcome::NoImage,
            Err(e) => PageOutcome::Failed(e),
        }
    }

    async fn recognize(&self, page: &PageInfo) -> Result<Option<Zone>> {
        tracing::info!("- Page #{}", page.number);
        let descriptor = self.engine.descriptor();
        let request = RenderRequest {
            format: descriptor.image_format,
            layers: self.settings.render,
        };
        let Some(image) = self.source.render(page, &request, &self.workdir).await? else {
            return Ok(None);
        };

        let options = RecognizeOptions {
            language: self.settings.language.clone(),
            details: self.settings.details,
            segmentation: self.settings.segmentation.clone(),
            thread_limit: Some(self.thread_limit),
        };
        let result = self.engine.recognize(&image, &options).await;
        if !self.settings.debug {
            let _ = tokio::fs::remove_file(&image.path).await;
        }
        let output = result?;

        if self.settings.debug {
            output
                .save(&self.workdir.join(format!("{:06}", page.number - 1)))
                .await?;
        }
        if let Some(directory) = &self.settings.save_raw_ocr {
            let name = utils::expand_template(&self.settings.raw_ocr_filename_template, page.number, &page.file_id())?;
            let path = output.save(&directory.join(name)).await?;
            tracing::debug!("Saved raw OCR output to {}", path.display());
        }

        let settings = ExtractSettings {
            rotation: page.rotation,
            details: self.settings.details,
            segmentation: self.settings.segmentation.clone(),
            page_size: Some(image.size),
            fix_utf8: descriptor.needs_utf8_fix,
        };
        let mut zones = self.engine.extract_text(&output, &settings)?;
        if zones.len() != 1 {
            return Err(OcrodjvuError::malformed_ocr_output(format!(
                "expected text for exactly one page, got {}",
                zones.len()
            )));
        }
        Ok(zones.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MemoryDocument, MemoryTextLayer};
    use crate::engines::{EngineDescriptor, EngineOutput, ImageFormat, OutputKind, PageImage};
    use crate::text_zones::{BBox, ZoneType};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Recognizes the page number stored in the image; later pages finish first.
    struct CountingEngine {
        pages: usize,
        failing: Option<usize>,
    }

    #[async_trait]
    impl OcrEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }

        fn descriptor(&self) -> EngineDescriptor {
            EngineDescriptor {
                name: "counting".to_string(),
                image_format: ImageFormat::Pnm,
                output_kind: OutputKind::PlainText,
                needs_utf8_fix: false,
            }
        }

        fn default_language(&self) -> &str {
            "eng"
        }

        async fn list_languages(&self) -> Result<Vec<String>> {
            Ok(vec!["eng".to_string()])
        }

        async fn check_language(&self, _language: &str) -> Result<()> {
            Err(OcrodjvuError::UnknownLanguageList)
        }

        async fn recognize(&self, image: &PageImage, _options: &RecognizeOptions) -> Result<EngineOutput> {
            let data = tokio::fs::read(&image.path).await?;
            let number: usize = String::from_utf8_lossy(&data).trim().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(10 * (self.pages - number) as u64)).await;
            if self.failing == Some(number) {
                return Err(OcrodjvuError::engine("counting", "cannot read page"));
            }
            Ok(EngineOutput::new(data, "txt"))
        }

        fn extract_text(&self, output: &EngineOutput, settings: &ExtractSettings) -> Result<Vec<Zone>> {
            let (width, height) = settings.page_size.unwrap();
            let text = format!("page {}", output.as_text().trim());
            Ok(vec![Zone::with_text(ZoneType::Page, BBox::new(0, 0, width, height), text)])
        }
    }

    fn document(pages: usize, without_image: Option<usize>) -> Arc<MemoryDocument> {
        let mut document = MemoryDocument::new();
        for number in 1..=pages {
            let image = (Some(number) != without_image).then(|| number.to_string().into_bytes());
            document.push_page((100, 40), image);
        }
        Arc::new(document)
    }

    fn pipeline(pages: usize, failing: Option<usize>, on_error: ErrorPolicy, jobs: usize) -> Pipeline {
        let config = PipelineConfig {
            jobs: Some(jobs),
            on_error,
            ..Default::default()
        };
        Pipeline::new(Arc::new(CountingEngine { pages, failing }), &config).unwrap()
    }

    fn texts(pages: &[(usize, Option<Zone>)]) -> Vec<(usize, Option<String>)> {
        pages
            .iter()
            .map(|(number, zone)| (*number, zone.as_ref().map(Zone::text)))
            .collect()
    }

    #[tokio::test]
    async fn test_results_written_in_page_order() {
        let pipeline = pipeline(6, None, ErrorPolicy::Abort, 4);
        let mut layer = MemoryTextLayer::new();
        let report = pipeline.run(document(6, None), &mut layer, None).await.unwrap();
        assert_eq!(report.recognized, 6);
        assert_eq!(report.exit_code(), 0);
        let committed = layer.committed().unwrap();
        let expected: Vec<(usize, Option<String>)> = (1..=6).map(|n| (n, Some(format!("page {}", n)))).collect();
        assert_eq!(texts(&committed), expected);
    }

    #[tokio::test]
    async fn test_selected_pages() {
        let pipeline = pipeline(5, None, ErrorPolicy::Abort, 2);
        let mut layer = MemoryTextLayer::new();
        let report = pipeline.run(document(5, None), &mut layer, Some(&[4, 2])).await.unwrap();
        assert_eq!(report.pages, 2);
        let numbers: Vec<usize> = layer.committed().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![4, 2]);

        let err = pipeline.run(document(5, None), &mut layer, Some(&[6])).await.unwrap_err();
        assert!(matches!(err, OcrodjvuError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_page_without_image() {
        let pipeline = pipeline(3, None, ErrorPolicy::Abort, 2);
        let mut layer = MemoryTextLayer::new();
        let report = pipeline.run(document(3, Some(2)), &mut layer, None).await.unwrap();
        assert_eq!(report.no_image, 1);
        assert_eq!(report.recognized, 2);
        let committed = layer.committed().unwrap();
        assert_eq!(committed[1], (2, None));
    }

    #[tokio::test]
    async fn test_abort_commits_nothing() {
        let pipeline = pipeline(5, Some(3), ErrorPolicy::Abort, 2);
        let mut layer = MemoryTextLayer::new();
        let err = pipeline.run(document(5, None), &mut layer, None).await.unwrap_err();
        match &err {
            OcrodjvuError::PipelineAborted { page, source } => {
                assert_eq!(*page, 3);
                assert!(matches!(**source, OcrodjvuError::Engine { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(layer.committed().is_none());
        let written: Vec<usize> = layer.pending().iter().map(|(n, _)| *n).collect();
        assert_eq!(written, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resume_leaves_failed_page_empty() {
        let pipeline = pipeline(5, Some(3), ErrorPolicy::Resume, 3);
        let mut layer = MemoryTextLayer::new();
        let report = pipeline.run(document(5, None), &mut layer, None).await.unwrap();
        assert_eq!(report.failed, vec![3]);
        assert_eq!(report.exit_code(), EXIT_NONFATAL);
        let committed = texts(&layer.committed().unwrap());
        assert_eq!(committed.len(), 5);
        assert_eq!(committed[2], (3, None));
        assert_eq!(committed[3], (4, Some("page 4".to_string())));
    }

    #[tokio::test]
    async fn test_raw_ocr_saved_with_template() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            jobs: Some(2),
            save_raw_ocr: Some(dir.path().to_path_buf()),
            raw_ocr_filename_template: "raw{page:03}".to_string(),
            ..Default::default()
        };
        let pipeline = Pipeline::new(Arc::new(CountingEngine { pages: 2, failing: None }), &config).unwrap();
        let mut layer = MemoryTextLayer::new();
        pipeline.run(document(2, None), &mut layer, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("raw001.txt")).unwrap(), "1");
        assert!(dir.path().join("raw002.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_language_list_is_accepted() {
        let pipeline = pipeline(1, None, ErrorPolicy::Abort, 1);
        assert_eq!(pipeline.language(), "eng");
        assert!(pipeline.check_language().await.is_ok());
    }
}
