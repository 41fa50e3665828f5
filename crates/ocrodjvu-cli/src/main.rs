//! ocrodjvu command-line interface.
//!
//! `ocr` recognizes the pages of a DjVu document and stores the text in its
//! hidden text layer. `hocr2djvused` and `djvu2hocr` convert between hOCR and
//! `djvused` text layers. `engines` and `languages` report what is installed.

use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use ocrodjvu::core::config::{Details, ErrorPolicy, ExtractSettings, OutputMode, PipelineConfig, RenderLayers};
use ocrodjvu::core::pipeline::Pipeline;
use ocrodjvu::document::{DjvuDocument, DjvuSaver, PageImageSource};
use ocrodjvu::document::savers::hocr2djvused_script;
use ocrodjvu::engines::{EngineProperties, registry};
use ocrodjvu::error::EXIT_FATAL;
use ocrodjvu::hocr::{self, DEFAULT_TITLE, HocrGenerator, HocrOptions};
use ocrodjvu::{BBox, OcrodjvuError, SegmentationMode, Zone, ZoneType, utils};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ocrodjvu")]
#[command(version, about = "OCR for DjVu documents", long_about = None)]
struct Cli {
    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize a DjVu document and store the text in its hidden text layer
    Ocr(OcrArgs),

    /// Convert hOCR from standard input into a djvused script
    Hocr2djvused(Hocr2djvusedArgs),

    /// Convert the hidden text layer of a DjVu document into hOCR
    Djvu2hocr(Djvu2hocrArgs),

    /// List available OCR engines
    Engines {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List languages supported by an OCR engine
    Languages {
        /// OCR engine
        #[arg(short, long)]
        engine: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One name per line
    Text,
    /// A JSON array
    Json,
}

fn print_list(names: &[String], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for name in names {
                println!("{}", name);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(names)?),
    }
    Ok(())
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("output")
        .required(true)
        .args(["save_bundled", "save_indirect", "save_script", "in_place", "dry_run"])
))]
struct OcrArgs {
    /// Input DjVu document
    input: PathBuf,

    /// Save results as a bundled multi-page document
    #[arg(long, value_name = "FILE")]
    save_bundled: Option<PathBuf>,

    /// Save results as an indirect multi-page document
    #[arg(long, value_name = "INDEX-FILE")]
    save_indirect: Option<PathBuf>,

    /// Save a djvused script with the results
    #[arg(long, value_name = "FILE")]
    save_script: Option<PathBuf>,

    /// Save results in place
    #[arg(long)]
    in_place: bool,

    /// Don't change any files
    #[arg(long)]
    dry_run: bool,

    /// Configuration file (default: ocrodjvu.toml in the current directory or a parent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OCR engine
    #[arg(short, long)]
    engine: Option<String>,

    /// Recognition language
    #[arg(short, long)]
    language: Option<String>,

    /// Pages to process, e.g. 17,37-42
    #[arg(short, long)]
    pages: Option<String>,

    /// Number of pages processed in parallel
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Amount of text details to extract (lines, words, chars)
    #[arg(short = 't', long)]
    details: Option<Details>,

    /// Word segmentation algorithm (simple, uax29)
    #[arg(long)]
    word_segmentation: Option<SegmentationMode>,

    /// Image layers to render (mask, foreground, all)
    #[arg(long)]
    render: Option<RenderLayers>,

    /// What to do when a page fails (abort, resume)
    #[arg(long)]
    on_error: Option<ErrorPolicy>,

    /// Remove existing text layers
    #[arg(long)]
    clear_text: bool,

    /// Save only the processed pages
    #[arg(long)]
    ocr_only: bool,

    /// Save raw OCR output into this directory
    #[arg(long, value_name = "DIRECTORY")]
    save_raw_ocr: Option<PathBuf>,

    /// File name template for raw OCR output (default: {id-ext})
    #[arg(long)]
    raw_ocr_filename_template: Option<String>,

    /// Engine property
    #[arg(short = 'X', value_name = "KEY=VALUE")]
    properties: Vec<String>,

    /// Keep intermediate files
    #[arg(short = 'D', long)]
    debug: bool,
}

#[derive(Args)]
struct Hocr2djvusedArgs {
    /// Page rotation in degrees
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    rotation: i32,

    /// Page size used when the hOCR has no page box
    #[arg(long, value_name = "WxH")]
    page_size: Option<String>,

    /// Amount of text details to extract (lines, words, chars)
    #[arg(short = 't', long, default_value = "words")]
    details: Details,

    /// Word segmentation algorithm (simple, uax29)
    #[arg(long, default_value = "simple")]
    word_segmentation: SegmentationMode,

    /// Language used as locale for uax29 segmentation
    #[arg(short, long)]
    language: Option<String>,

    /// Replace invalid UTF-8 and control characters
    #[arg(long)]
    fix_utf8: bool,
}

#[derive(Args)]
struct Djvu2hocrArgs {
    /// Input DjVu document
    input: PathBuf,

    /// Pages to convert, e.g. 17,37-42
    #[arg(short, long)]
    pages: Option<String>,

    /// Word segmentation algorithm (simple, uax29)
    #[arg(long, default_value = "simple")]
    word_segmentation: SegmentationMode,

    /// Language used as locale for uax29 segmentation
    #[arg(short, long)]
    language: Option<String>,

    /// Document title
    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,

    /// CSS stylesheet URL
    #[arg(long, default_value = "")]
    css: String,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Ocr(args) => ocr(args).await,
        Commands::Hocr2djvused(args) => hocr2djvused(args).map(|()| 0),
        Commands::Djvu2hocr(args) => djvu2hocr(args).await.map(|()| 0),
        Commands::Engines { format } => engines(format).await.map(|()| 0),
        Commands::Languages { engine, format } => languages(engine, format).await.map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e
                .downcast_ref::<OcrodjvuError>()
                .map(OcrodjvuError::exit_code)
                .unwrap_or(EXIT_FATAL);
            ExitCode::from(code as u8)
        }
    }
}

impl OcrArgs {
    fn output_mode(&self) -> OutputMode {
        if let Some(path) = &self.save_bundled {
            OutputMode::Bundled(path.clone())
        } else if let Some(path) = &self.save_indirect {
            OutputMode::Indirect(path.clone())
        } else if let Some(path) = &self.save_script {
            OutputMode::Script(path.clone())
        } else if self.in_place {
            OutputMode::InPlace
        } else {
            OutputMode::DryRun
        }
    }

    /// Configuration file settings overridden by command-line flags.
    fn config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)?,
            None => PipelineConfig::discover()?.unwrap_or_default(),
        };
        if let Some(engine) = &self.engine {
            config.engine = engine.clone();
        }
        if let Some(language) = &self.language {
            config.language = Some(language.clone());
        }
        if let Some(jobs) = self.jobs {
            config.jobs = Some(jobs);
        }
        if let Some(details) = self.details {
            config.details = details;
        }
        if let Some(mode) = self.word_segmentation {
            config.word_segmentation = mode;
        }
        if let Some(render) = self.render {
            config.render = render;
        }
        if let Some(policy) = self.on_error {
            config.on_error = policy;
        }
        if let Some(directory) = &self.save_raw_ocr {
            config.save_raw_ocr = Some(directory.clone());
        }
        if let Some(template) = &self.raw_ocr_filename_template {
            config.raw_ocr_filename_template = template.clone();
        }
        config.clear_text |= self.clear_text;
        config.ocr_only |= self.ocr_only;
        config.debug |= self.debug;
        config.validate()?;
        Ok(config)
    }

    fn properties(&self, config: &PipelineConfig) -> Result<EngineProperties> {
        let mut properties: EngineProperties = config.engine_properties.iter().collect();
        for pair in &self.properties {
            properties.insert_pair(pair)?;
        }
        Ok(properties)
    }
}

async fn ocr(args: OcrArgs) -> Result<i32> {
    let config = args.config()?;
    let properties = args.properties(&config)?;
    let engine = match registry::load_engine(&config.engine, properties).await {
        Ok(engine) => engine,
        Err(e @ OcrodjvuError::EngineNotFound(_)) if args.engine.is_none() => {
            return Err(anyhow!("{}; use -e/--engine to use another engine", e));
        }
        Err(e) => return Err(e.into()),
    };

    let pipeline = Pipeline::new(engine, &config)?;
    pipeline.check_language().await?;

    let pages = args.pages.as_deref().map(utils::parse_page_numbers).transpose()?;
    let document = Arc::new(DjvuDocument::open(&args.input));
    let multi_page = document.is_multi_page().await?;

    let workdir = tempfile::Builder::new()
        .prefix("ocrodjvu.")
        .tempdir()
        .context("cannot create a temporary directory")?;
    let mut saver = DjvuSaver::new(
        &args.input,
        multi_page,
        args.output_mode(),
        config.clear_text,
        config.ocr_only,
        workdir.path(),
    );
    saver.check()?;

    let report = match pipeline.run(document, &mut saver, pages.as_deref()).await {
        Ok(report) => report,
        Err(e) => {
            if matches!(e, OcrodjvuError::PipelineAborted { .. }) {
                let kept = workdir.keep();
                tracing::debug!("Keeping {}", kept.display());
            }
            return Err(e.into());
        }
    };
    if !report.failed.is_empty() {
        tracing::warn!(
            "{} page(s) could not be recognized: {:?}",
            report.failed.len(),
            report.failed
        );
    }
    Ok(report.exit_code())
}

fn parse_page_size(value: &str) -> Result<(i32, i32)> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| anyhow!("invalid page size {:?}, expected WIDTHxHEIGHT", value))?;
    let parse = |n: &str| {
        n.trim()
            .parse::<i32>()
            .with_context(|| format!("invalid page size {:?}", value))
    };
    Ok((parse(width)?, parse(height)?))
}

fn hocr2djvused(args: Hocr2djvusedArgs) -> Result<()> {
    let settings = ExtractSettings {
        rotation: args.rotation,
        details: args.details,
        segmentation: args.word_segmentation.with_locale(args.language.as_deref())?,
        page_size: args.page_size.as_deref().map(parse_page_size).transpose()?,
        fix_utf8: args.fix_utf8,
    };
    settings.validate()?;

    let mut markup = Vec::new();
    std::io::stdin()
        .read_to_end(&mut markup)
        .context("cannot read hOCR from standard input")?;
    let zones = hocr::extract_text(&markup, &settings)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(hocr2djvused_script(&zones).as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn djvu2hocr(args: Djvu2hocrArgs) -> Result<()> {
    let document = DjvuDocument::open(&args.input);
    let numbers = match args.pages.as_deref() {
        Some(pages) => utils::parse_page_numbers(pages)?,
        None => (1..=document.pages().await?.len()).collect(),
    };
    let segmentation = args.word_segmentation.with_locale(args.language.as_deref())?;
    let generator = HocrGenerator::new(HocrOptions {
        segmentation,
        ..Default::default()
    });

    let pages = document.read_text(&numbers).await?;
    let zones: Vec<(Zone, (i32, i32))> = pages
        .into_iter()
        .map(|page| {
            let (width, height) = page.size;
            let zone = page
                .text
                .unwrap_or_else(|| Zone::new(ZoneType::Page, BBox::new(0, 0, width, height), Vec::new()));
            (zone, page.size)
        })
        .collect();
    let html = generator.document(
        zones.iter().map(|(zone, size)| (zone, *size)),
        &args.title,
        &args.css,
    )?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(html.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn engines(format: OutputFormat) -> Result<()> {
    print_list(&registry::available_engines().await?, format)
}

async fn languages(engine: Option<String>, format: OutputFormat) -> Result<()> {
    let name = match engine {
        Some(name) => name,
        None => PipelineConfig::discover()?.unwrap_or_default().engine,
    };
    let engine = registry::load_engine(&name, EngineProperties::new()).await?;
    print_list(&engine.list_languages().await?, format)
}
