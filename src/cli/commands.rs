//! CLI argument definitions and the batch command.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::PipelineConfig;
use crate::pipeline::{run_batch, BatchOptions};
use crate::scheduler::EpisodeStatus;

/// Default configuration file location.
const DEFAULT_CONFIG_PATH: &str = "./config/config.yaml";

/// Labels multi-camera robot episodes with a video-language model.
#[derive(Parser, Debug)]
#[command(name = "vlm-labeler")]
#[command(about = "Synthesize, analyze and validate robot episode videos")]
#[command(version)]
#[command(
    long_about = "vlm-labeler stitches the camera videos of each episode into one frame-labeled video,\nsends it to the analysis model and writes a validated JSON record per episode.\n\nExample usage:\n  vlm-labeler --config ./config/config.yaml --workers 4"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Stop after frame synthesis; do not call the analysis model.
    #[arg(long)]
    pub skip_gemini: bool,

    /// Number of parallel workers (overrides processing.num_workers).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Parse CLI arguments without running anything.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the batch.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if cli.workers == Some(0) {
        anyhow::bail!("--workers must be at least 1");
    }

    let options = BatchOptions {
        skip_analysis: cli.skip_gemini,
        num_workers: cli.workers,
    };

    let summary = run_batch(&config, options)
        .await
        .context("Batch failed to start")?;

    info!(
        discovered = summary.discovered,
        ok = summary.count(EpisodeStatus::Ok),
        output_dir = %config.output.dir.display(),
        "Done"
    );
    Ok(())
}
