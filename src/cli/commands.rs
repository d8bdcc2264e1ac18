//! CLI command definitions for bookforge.
//!
//! `run` drives one book through the pipeline in-process; `result` and
//! `assets` inspect what a previous run left in the storage root.

use crate::book::{BookRequest, BookStyle, FinalPackage};
use crate::llm::{LlmClient, LlmProvider, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{BatchMode, PipelineConfig, PipelineService, PipelineServices};
use crate::services::repair::LlmRepairConfig;
use crate::services::{template_stages, DryRunGenerator, DryRunValidator, LlmRepair, RuleRepair};
use crate::storage::JobStorage;
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Memory book illustration pipeline.
#[derive(Parser)]
#[command(name = "bookforge")]
#[command(about = "Generate and validate illustrations for a memory book")]
#[command(version)]
#[command(
    long_about = "bookforge runs a memory book request through the illustration pipeline: \
normalization, planning, prompt authoring, image generation, review and validation with \
automatic repair.\n\nExample usage:\n  bookforge run --request book.yaml --reference photo.jpg --storage-root ./storage"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a book request through the pipeline.
    Run(RunArgs),

    /// Print the stored result of a finished job.
    Result(ResultArgs),

    /// List the reference and output files stored for a job.
    Assets(AssetsArgs),
}

/// Arguments for `bookforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Request file (YAML or JSON, by extension).
    #[arg(short = 'r', long)]
    pub request: PathBuf,

    /// Reference photo of the subject. May be repeated.
    #[arg(long = "reference")]
    pub references: Vec<PathBuf>,

    /// Job id; a random one is generated when omitted.
    #[arg(long)]
    pub job_id: Option<String>,

    /// Storage root directory (overrides BOOKFORGE_STORAGE_ROOT).
    #[arg(short = 's', long)]
    pub storage_root: Option<PathBuf>,

    /// Override the illustration style of the request.
    #[arg(long, value_parser = parse_style)]
    pub style: Option<BookStyle>,

    /// Maximum concurrent generation calls.
    #[arg(short = 'k', long)]
    pub concurrency: Option<usize>,

    /// Repair cycles per artifact.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Minimum passing QC score (0-10).
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Validation scheduling: sequential or parallel.
    #[arg(long)]
    pub batch_mode: Option<BatchMode>,

    /// Fixed score the offline validator assigns to every artifact.
    #[arg(long, default_value_t = 8.0)]
    pub dry_run_score: f64,

    /// Repair descriptors with an LLM instead of fixed rules.
    #[arg(long)]
    pub llm_repair: bool,

    /// LLM model used for repair.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// OpenAI-compatible API base URL.
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// API key for the LLM (can also be set via BOOKFORGE_LLM_API_KEY).
    #[arg(long, env = "BOOKFORGE_LLM_API_KEY")]
    pub api_key: Option<String>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Output JSON to stdout instead of a summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `bookforge result`.
#[derive(Parser, Debug)]
pub struct ResultArgs {
    /// Job id.
    pub job_id: String,

    /// Storage root directory.
    #[arg(short = 's', long, default_value = "./storage")]
    pub storage_root: PathBuf,

    /// Inline images as base64 data URLs.
    #[arg(long)]
    pub embed_images: bool,
}

/// Arguments for `bookforge assets`.
#[derive(Parser, Debug)]
pub struct AssetsArgs {
    /// Job id.
    pub job_id: String,

    /// Storage root directory.
    #[arg(short = 's', long, default_value = "./storage")]
    pub storage_root: PathBuf,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

fn parse_style(value: &str) -> Result<BookStyle, String> {
    match value.trim().to_lowercase().as_str() {
        "coloring" => Ok(BookStyle::Coloring),
        "cartoon" => Ok(BookStyle::Cartoon),
        "anime" => Ok(BookStyle::Anime),
        "watercolor" => Ok(BookStyle::Watercolor),
        other => Err(format!(
            "unknown style '{}', expected coloring, cartoon, anime or watercolor",
            other
        )),
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_book_command(args).await,
        Commands::Result(args) => run_result_command(args).await,
        Commands::Assets(args) => run_assets_command(args),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

/// Summary printed after a run.
#[derive(Debug, Serialize)]
struct RunOutput {
    job_id: String,
    status: String,
    title: String,
    total_pages: usize,
    total_retries: u32,
    pages_needing_attention: Vec<i32>,
    output_directory: PathBuf,
    duration_ms: u64,
}

impl RunOutput {
    fn from_package(package: &FinalPackage, duration_ms: u64) -> Self {
        Self {
            job_id: package.book_id.clone(),
            status: "completed".to_string(),
            title: package.title.clone(),
            total_pages: package.total_pages,
            total_retries: package.total_retries,
            pages_needing_attention: package.pages_needing_attention.clone(),
            output_directory: package.output_directory.clone(),
            duration_ms,
        }
    }
}

/// Loads a request from YAML or JSON, chosen by file extension.
fn load_request(path: &Path) -> anyhow::Result<BookRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let request = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON request {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML request {}", path.display()))?
    };
    Ok(request)
}

fn build_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(root) = &args.storage_root {
        config = config.with_storage_root(root.clone());
    }
    if let Some(k) = args.concurrency {
        config = config.with_generation_concurrency(k);
    }
    if let Some(max_retries) = args.max_retries {
        config = config.with_max_retries(max_retries);
    }
    if let Some(threshold) = args.threshold {
        config = config.with_validation_threshold(threshold);
    }
    if let Some(mode) = args.batch_mode {
        config = config.with_batch_mode(mode);
    }
    config.validate()?;
    Ok(config)
}

fn build_services(
    args: &RunArgs,
    config: &PipelineConfig,
    language: &str,
) -> anyhow::Result<PipelineServices> {
    let repairer: Arc<dyn crate::services::RepairService> = if args.llm_repair {
        let api_key = args
            .api_key
            .clone()
            .context("--llm-repair needs --api-key or BOOKFORGE_LLM_API_KEY")?;
        let client: Arc<dyn LlmProvider> = Arc::new(LlmClient::new(
            args.api_base.clone(),
            Some(api_key),
            args.model.clone(),
        )?);
        info!(model = %args.model, "Using LLM repair");
        Arc::new(LlmRepair::new(
            client,
            LlmRepairConfig::default()
                .with_model(args.model.clone())
                .with_language(language),
        ))
    } else {
        Arc::new(RuleRepair::new())
    };

    Ok(PipelineServices {
        stages: template_stages(),
        generator: Arc::new(DryRunGenerator::new()),
        validator: Arc::new(DryRunValidator::new(
            args.dry_run_score,
            config.validation_threshold,
        )),
        repairer,
    })
}

async fn run_book_command(args: RunArgs) -> anyhow::Result<()> {
    let mut request = load_request(&args.request)?;
    if let Some(style) = args.style {
        request.style = style;
    }

    let config = build_config(&args)?;
    let services = build_services(&args, &config, &request.user_language)?;
    if args.metrics {
        init_metrics()?;
    }

    let job_id = args.job_id.clone().unwrap_or_else(PipelineService::new_job_id);
    let service = PipelineService::new(config, services);

    info!(
        job_id = %job_id,
        title = %request.title,
        pages = request.page_count,
        references = args.references.len(),
        "Starting book"
    );
    let start = std::time::Instant::now();
    let outcome = service.run(&job_id, request, &args.references).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let package = match outcome {
        Ok(package) => package,
        Err(e) => {
            if args.json {
                if let Some(status) = service.status(&job_id).await {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
            }
            return Err(anyhow::anyhow!("Job {} failed: {}", job_id, e));
        }
    };

    let output = RunOutput::from_package(&package, duration_ms);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&output);
    }
    if !output.pages_needing_attention.is_empty() {
        warn!(
            pages = ?output.pages_needing_attention,
            "Some pages did not pass validation"
        );
    }
    if args.metrics {
        println!("{}", export_metrics());
    }
    Ok(())
}

fn print_summary(output: &RunOutput) {
    println!("Book:        {}", output.title);
    println!("Job:         {}", output.job_id);
    println!("Status:      {}", output.status);
    println!("Pages:       {} (including covers)", output.total_pages);
    println!("Retries:     {}", output.total_retries);
    if output.pages_needing_attention.is_empty() {
        println!("Attention:   none");
    } else {
        let pages: Vec<String> = output
            .pages_needing_attention
            .iter()
            .map(|p| p.to_string())
            .collect();
        println!("Attention:   pages {}", pages.join(", "));
    }
    println!("Output:      {}", output.output_directory.display());
    println!("Duration:    {} ms", output.duration_ms);
}

// ============================================================================
// Inspection Commands
// ============================================================================

async fn run_result_command(args: ResultArgs) -> anyhow::Result<()> {
    let storage = JobStorage::new(args.storage_root);
    let mut package = storage
        .read_result(&args.job_id)
        .await
        .with_context(|| format!("No stored result for job {}", args.job_id))?;
    if args.embed_images {
        storage.embed_images(&mut package).await;
    }
    println!("{}", serde_json::to_string_pretty(&package)?);
    Ok(())
}

fn run_assets_command(args: AssetsArgs) -> anyhow::Result<()> {
    let storage = JobStorage::new(args.storage_root);
    let assets = storage.list_assets(&args.job_id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&assets)?);
        return Ok(());
    }
    println!("References:");
    for name in &assets.references {
        println!("  {}", name);
    }
    println!("Outputs:");
    for name in &assets.outputs {
        println!("  {}", name);
    }
    Ok(())
}
