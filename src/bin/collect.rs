#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use clipscout_tools::{
    config::{self, Settings},
    export,
    logging,
    metadata::VideoRecord,
    pipeline::Pipeline,
    provider::build_provider,
};
use tracing::{info, warn};

const SUMMARY_TOP: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Collect recent short videos for a list of search terms."
)]
struct Cli {
    #[arg(
        short = 't',
        long = "term",
        value_name = "TEXT",
        help = "Search term; repeat to query several (default: SEARCH_TERMS)"
    )]
    terms: Vec<String>,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "PATH",
        help = "Where to write results (default: OUTPUT_FILE)"
    )]
    output: Option<PathBuf>,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    #[arg(long = "window-days", value_name = "DAYS")]
    window_days: Option<u32>,
    #[arg(long = "max-results", value_name = "N")]
    max_results: Option<usize>,
    #[arg(long = "config", value_name = "PATH", help = "Path to the env config file")]
    config: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose", help = "Log pipeline details")]
    verbose: bool,
}

impl Cli {
    /// Folds command-line overrides into the loaded settings.
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if !self.terms.is_empty() {
            settings.search_terms = self
                .terms
                .iter()
                .map(|term| term.trim().to_owned())
                .filter(|term| !term.is_empty())
                .collect();
        }
        if let Some(window_days) = self.window_days {
            settings.pipeline.window_days = window_days;
        }
        if let Some(max_results) = self.max_results {
            if max_results == 0 {
                bail!("--max-results must be at least 1");
            }
            settings.pipeline.max_results = max_results;
        }
        if let Some(output) = &self.output {
            settings.output_file = output.clone();
        } else if self.format == OutputFormat::Json {
            settings.output_file.set_extension("json");
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
struct Summary {
    count: usize,
    average_views: f64,
    top: Vec<(String, u64)>,
}

impl Summary {
    /// Expects `records` already ranked.
    fn of(records: &[VideoRecord]) -> Self {
        let total: u64 = records.iter().map(|record| record.views).sum();
        let average_views = if records.is_empty() {
            0.0
        } else {
            total as f64 / records.len() as f64
        };
        Self {
            count: records.len(),
            average_views,
            top: records
                .iter()
                .take(SUMMARY_TOP)
                .map(|record| (record.url.clone(), record.views))
                .collect(),
        }
    }

    fn print(&self) {
        println!("Collected {} video(s).", self.count);
        println!("Average views: {:.0}", self.average_views);
        if !self.top.is_empty() {
            println!("Top {} by views:", self.top.len());
            for (rank, (url, views)) in self.top.iter().enumerate() {
                println!("  {}. {} ({} views)", rank + 1, url, views);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&logging::default_filter("collect", cli.verbose));

    let mut settings = match &cli.config {
        Some(path) => config::load_settings_from(path)?,
        None => config::load_settings()?,
    };
    cli.apply(&mut settings)?;

    let provider = build_provider(&settings.provider).context("initializing video provider")?;
    let pipeline = Pipeline::new(provider, settings.pipeline.clone());

    let records = run_batch(&pipeline, &settings, cli.format).await?;
    Summary::of(&records).print();
    Ok(())
}

/// Runs every configured term and writes the ranked union. Nothing is written
/// when the collection comes back empty.
async fn run_batch(
    pipeline: &Pipeline,
    settings: &Settings,
    format: OutputFormat,
) -> Result<Vec<VideoRecord>> {
    if settings.search_terms.is_empty() {
        bail!("no search terms configured; pass --term or set SEARCH_TERMS");
    }

    info!(
        terms = settings.search_terms.len(),
        window_days = pipeline.settings().window_days,
        "starting batch collection"
    );
    let records = pipeline.collect_many(&settings.search_terms).await;

    if records.is_empty() {
        warn!("no videos collected; nothing written");
        return Ok(records);
    }
    if records.len() < settings.target_count {
        warn!(
            collected = records.len(),
            target = settings.target_count,
            "collected fewer videos than the target"
        );
    }

    let written = write_output(&settings.output_file, &records, format)?;
    info!(
        path = %settings.output_file.display(),
        written,
        "results saved"
    );
    Ok(records)
}

fn write_output(path: &Path, records: &[VideoRecord], format: OutputFormat) -> Result<usize> {
    let written = match format {
        OutputFormat::Csv => export::save_csv(path, records),
        OutputFormat::Json => export::save_json(path, records),
    };
    written.with_context(|| format!("Saving results to {}", path.display()))
}
