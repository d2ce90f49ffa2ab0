pub mod config;

pub use config::PipelineConfig;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// msurv: data preparation and sub-models for multimodal survival prediction
#[derive(Parser, Debug)]
#[command(name = "msurv")]
#[command(about = "Data preparation and sub-models for multimodal survival prediction")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with defaults for every subcommand
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare two clinical tables keyed by patient
    Compare(CompareArgs),

    /// Extract random patches from whole-slide images
    Patch(PatchArgs),

    /// Load per-patient metadata tables into a document store
    Ingest(IngestArgs),

    /// Build the sub-models and report their output shapes
    Models(ModelsArgs),
}

/// Table comparison arguments
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// First table (CSV or TSV, optionally gzipped)
    #[arg(short = 'a', long, required = true)]
    pub table1: PathBuf,

    /// Second table
    #[arg(short = 'b', long, required = true)]
    pub table2: PathBuf,

    /// Write a detailed text report here
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Patient key column
    #[arg(long)]
    pub key: Option<String>,

    /// Columns left out of the comparison (repeatable)
    #[arg(long)]
    pub ignore: Vec<String>,

    /// List the patients that differ in this column
    #[arg(long)]
    pub column: Option<String>,
}

/// Patch extraction arguments
#[derive(Parser, Debug)]
pub struct PatchArgs {
    /// Directory of slide images
    #[arg(short, long, required = true)]
    pub slides: PathBuf,

    /// Directory of ASAP XML annotations named after the slides
    #[arg(short, long)]
    pub annotations: Option<PathBuf>,

    /// Output directory for PNG patches
    #[arg(short, long, required = true)]
    pub output: PathBuf,

    /// Patches per slide
    #[arg(short, long)]
    pub n: Option<usize>,

    /// Patch edge in pixels
    #[arg(long)]
    pub size: Option<u32>,

    /// Pyramid level to read from
    #[arg(long)]
    pub level: Option<usize>,

    /// Sample tissue anywhere instead of annotated regions
    #[arg(long)]
    pub tissue: bool,

    /// Annotation class to sample
    #[arg(long)]
    pub target_class: Option<u32>,

    /// Minimum share of the patch covered by the target class
    #[arg(long)]
    pub min_class_area_ratio: Option<f64>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Metadata ingestion arguments
#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// Processed-data root holding one folder per modality
    #[arg(short, long, required = true)]
    pub base: PathBuf,

    /// Document store directory
    #[arg(short, long, required = true)]
    pub store: PathBuf,

    /// Only these modalities (repeatable)
    #[arg(short, long)]
    pub modality: Vec<String>,
}

/// Sub-model summary arguments
#[derive(Parser, Debug)]
pub struct ModelsArgs {
    /// Fusion method (cat, max, sum, prod, embrace, attention)
    #[arg(short, long)]
    pub fusion: Option<String>,

    /// Feature vector size of every modality
    #[arg(long)]
    pub output_size: Option<usize>,

    /// Genes in the copy number input
    #[arg(long)]
    pub genes: Option<usize>,

    /// Random seed for the fusion layer
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity
pub fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
