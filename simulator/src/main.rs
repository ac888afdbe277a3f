use anyhow::{Context, Result};
use clap::Parser;
use dacsim::{Config, Simulation};
use dacsim_common::{init_tracer, tracer::TracerOptions};
use std::path::{Path, PathBuf};
use tracing::{info, level_filters::LevelFilter};

const DEFAULT_OUTPUT: &str = "dacsim.json";

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Run configuration, either JSON or the key/value input format
    #[clap(long)]
    config: PathBuf,

    /// Where to write the JSON output, overrides the configured path
    #[clap(long)]
    output: Option<PathBuf>,

    /// Overrides the configured seed
    #[clap(long)]
    seed: Option<u64>,

    /// Number of worker threads, one per core when absent
    #[clap(long)]
    threads: Option<usize>,

    /// Log level used when RUST_LOG is not set
    #[clap(long, env = "DACSIM_LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let _tracer = init_tracer!(TracerOptions {
        default_level: args.log_level,
        ..Default::default()
    })?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Cannot build the worker thread pool")?;
    }

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Cannot load configuration {}", args.config.display()))?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    let output_path = args
        .output
        .clone()
        .or_else(|| config.output.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let base_dir = args.config.parent().unwrap_or(Path::new("."));
    let tables = config
        .load_tables(base_dir)
        .context("Cannot load coefficient tables")?;

    let simulation = Simulation::new(config, tables)?;
    let output = simulation.run()?;
    output
        .save(&output_path)
        .with_context(|| format!("Cannot write {}", output_path.display()))?;
    info!(
        "{} pulses written to {}",
        output.summary.written,
        output_path.display()
    );
    Ok(())
}
