//! Run orchestration.
//!
//! - **Configuration** (`config`): per-page extraction settings and run settings,
//!   loaded from `ocrodjvu.toml` and refined by command-line flags
//! - **Pipeline** (`pipeline`): concurrent page recognition with in-order output
//!
//! # Example
//!
//! ```rust,no_run
//! use ocrodjvu::core::config::PipelineConfig;
//!
//! # fn example() -> ocrodjvu::Result<()> {
//! let config = PipelineConfig::discover()?.unwrap_or_default();
//! println!("Using the {} engine with {} jobs", config.engine, config.jobs());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pipeline;

pub use config::{Details, ErrorPolicy, ExtractSettings, OutputMode, PipelineConfig, RenderLayers};
pub use pipeline::{PageOutcome, Pipeline, PipelineReport};
