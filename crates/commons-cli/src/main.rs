//! Commons CLI - Command-line interface for simulation and distributed evolution.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commons::prelude::PopulationStrategy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "commons")]
#[command(author, version, about = "Commons - Evolving foraging policies on a scarce-resource grid", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new Commons project
    Init {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Manage the generation lifecycle (one poll by default)
    Evolve {
        /// Create generation zero
        #[arg(long, conflicts_with_all = ["run_loop", "status"])]
        init: bool,

        /// Poll forever, evolving whenever a generation completes
        #[arg(long = "loop", conflicts_with = "status")]
        run_loop: bool,

        /// Stop the loop after this many new generations
        #[arg(long, requires = "run_loop")]
        generations: Option<u64>,

        /// Show generation history and job counts
        #[arg(long)]
        status: bool,
    },

    /// Run simulations locally or as a distributed worker
    Simulate {
        /// Lease and process jobs from the shared database
        #[arg(long)]
        worker: bool,

        /// Worker name recorded with claimed jobs and results
        #[arg(long, requires = "worker")]
        id: Option<String>,

        /// Resource density in [0, 1]
        #[arg(short, long, default_value = "0.2", conflicts_with = "worker")]
        density: f64,

        /// Population: random-walk, cooperative, aggressive, mixed, or genetic
        #[arg(short, long, default_value = "mixed", conflicts_with = "worker")]
        strategy: PopulationStrategy,

        /// Cooperative share of a mixed population
        #[arg(long, default_value = "0.5", conflicts_with = "worker")]
        mixed_ratio: f64,

        /// Tick ceiling (default: from commons.toml)
        #[arg(short, long, conflicts_with = "worker")]
        ticks: Option<u64>,

        /// World seed for a reproducible run
        #[arg(long, conflicts_with = "worker")]
        seed: Option<u64>,

        /// Drive policy agents with a stored genome
        #[arg(short, long, conflicts_with = "worker")]
        genome: Option<String>,

        /// Drive policy agents with weights saved by `commons train`
        #[arg(short, long, conflicts_with_all = ["worker", "genome"])]
        weights: Option<PathBuf>,

        /// Write the full result as JSON
        #[arg(short, long, conflicts_with = "worker")]
        output: Option<PathBuf>,
    },

    /// Train a policy by deep Q-learning
    Train {
        /// Number of episodes
        #[arg(short, long, default_value = "100")]
        episodes: u64,

        /// Population: cooperative, aggressive, mixed, or genetic (default: from commons.toml)
        #[arg(short, long)]
        strategy: Option<PopulationStrategy>,

        /// Resource density in [0, 1] (default: from commons.toml)
        #[arg(short, long)]
        density: Option<f64>,

        /// Tick ceiling per episode
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Seed for a reproducible session
        #[arg(long)]
        seed: Option<u64>,

        /// Where to write the trained weights as JSON
        #[arg(short, long, default_value = "policy.json")]
        output: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path } => commands::init::run(path),
        Commands::Evolve {
            init,
            run_loop,
            generations,
            status,
        } => {
            if init {
                commands::evolve::init()
            } else if run_loop {
                commands::evolve::run_loop(generations)
            } else if status {
                commands::evolve::status()
            } else {
                commands::evolve::step()
            }
        }
        Commands::Simulate {
            worker,
            id,
            density,
            strategy,
            mixed_ratio,
            ticks,
            seed,
            genome,
            weights,
            output,
        } => {
            if worker {
                commands::simulate::worker(id)
            } else {
                commands::simulate::local(commands::simulate::LocalRun {
                    density,
                    strategy,
                    mixed_ratio,
                    ticks,
                    seed,
                    genome,
                    weights,
                    output,
                    verbose: cli.verbose,
                })
            }
        }
        Commands::Train {
            episodes,
            strategy,
            density,
            ticks,
            seed,
            output,
        } => commands::train::run(commands::train::TrainRun {
            episodes,
            strategy,
            density,
            ticks,
            seed,
            output,
        }),
    }
}
