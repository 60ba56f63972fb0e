use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use boolode::perturbation::DEFAULT_PERTURBATION_LEVEL;
use boolode::{PerturbationArity, Settings, start_perturbations, start_run};

#[derive(Parser, Debug)]
#[command(name = "boolode", about = "Simulate single-cell datasets from Boolean-network ODE models")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a population of cells
    Run {
        /// Settings file (TOML)
        #[arg(long)]
        config: PathBuf,
    },
    /// Simulate a population, then re-run it with each gene perturbed
    Perturb {
        /// Settings file (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Perturb every pair of genes instead of one gene at a time
        #[arg(long)]
        pairs: bool,

        /// Factor applied to each perturbed gene's parameter
        #[arg(long, default_value_t = DEFAULT_PERTURBATION_LEVEL)]
        level: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "boolode=debug" } else { "boolode=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Command::Run { config } => {
            let settings = Settings::load(&config)
                .with_context(|| format!("failed to read settings from {}", config.display()))?;
            let output = start_run(&settings)?;
            info!(
                genes = output.result.table.n_rows(),
                samples = output.result.table.n_cols(),
                "dataset written"
            );
        }
        Command::Perturb {
            config,
            pairs,
            level,
        } => {
            let settings = Settings::load(&config)
                .with_context(|| format!("failed to read settings from {}", config.display()))?;
            let arity = if pairs {
                PerturbationArity::Pairs
            } else {
                PerturbationArity::Single
            };
            let mut previous = start_run(&settings)?;
            let outcome = start_perturbations(&settings, &mut previous, level, arity)?;
            for run in &outcome.runs {
                info!(outprefix = %run.outprefix.display(), "perturbation written");
            }
        }
    }
    Ok(())
}
