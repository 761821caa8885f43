//! marginal-force CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod io;

use mf_inference::{AnalysisConfig, ExecutionContext, PreprocessConfig};

#[derive(Parser)]
#[command(name = "mforce")]
#[command(about = "mforce - Police spending and violent crime: matching, DiD and sensitivity")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis on a preprocessed panel
    Run {
        /// Input panel (CSV with header)
        #[arg(short, long)]
        input: PathBuf,

        /// Analysis config (YAML or JSON). Defaults apply to missing fields.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the matched sample as CSV.
        #[arg(long)]
        matched_out: Option<PathBuf>,

        /// Threads (0 = rayon default). Overrides the config value.
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Merge finance, crime and demographic tables into an analysis panel
    Prepare {
        /// City finance table (CSV: city, year, police spending)
        #[arg(long)]
        fisc: PathBuf,

        /// Crime table (CSV: city, year, crime rates)
        #[arg(long)]
        cius: PathBuf,

        /// Demographics table (CSV: city, year, covariates)
        #[arg(long)]
        acs: PathBuf,

        /// Output panel (CSV)
        #[arg(short, long)]
        output: PathBuf,

        /// Preprocessing config (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { input, config, output, matched_out, threads } => cmd_run(
            &input,
            config.as_ref(),
            output.as_ref(),
            matched_out.as_ref(),
            threads,
        ),
        Commands::Prepare { fisc, cius, acs, output, config } => {
            cmd_prepare(&fisc, &cius, &acs, &output, config.as_ref())
        }
        Commands::Version => {
            println!("mforce {}", env!("CARGO_PKG_VERSION"));
            println!("mf-core {}", mf_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_run(
    input: &PathBuf,
    config: Option<&PathBuf>,
    output: Option<&PathBuf>,
    matched_out: Option<&PathBuf>,
    threads: Option<usize>,
) -> Result<()> {
    let mut cfg: AnalysisConfig = match config {
        Some(path) => config::read_config(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(n) = threads {
        cfg.threads = n;
    }

    let panel = io::read_table(input)?;
    tracing::info!(rows = panel.n_rows(), cols = panel.n_cols(), "panel loaded");

    let ctx = ExecutionContext::init(cfg.threads)?;
    let result = mf_inference::run_analysis(&panel, &cfg, &ctx);
    ctx.shutdown();
    let run = result.context("analysis failed")?;

    tracing::info!(
        design = ?run.report.design,
        matched_pairs = run.report.matched_pairs,
        att = ?run.report.att,
        "analysis complete"
    );

    if let Some(path) = matched_out {
        io::write_table(path, &run.matched.to_table()?)?;
        tracing::info!(path = %path.display(), "matched sample written");
    }

    write_json(output, serde_json::to_value(&run.report)?)
}

fn cmd_prepare(
    fisc: &PathBuf,
    cius: &PathBuf,
    acs: &PathBuf,
    output: &PathBuf,
    config: Option<&PathBuf>,
) -> Result<()> {
    let cfg: PreprocessConfig = match config {
        Some(path) => config::read_config(path)?,
        None => PreprocessConfig::default(),
    };

    let fisc = io::read_table(fisc)?;
    let cius = io::read_table(cius)?;
    let acs = io::read_table(acs)?;

    let panel = mf_inference::preprocess_panel(&fisc, &cius, &acs, &cfg)
        .context("preprocessing failed")?;
    if panel.is_empty() && panel.n_cols() == 0 {
        tracing::warn!("preprocessing produced an empty panel");
    }
    io::write_table(output, &panel)?;
    tracing::info!(rows = panel.n_rows(), path = %output.display(), "panel written");
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
