//! Run simulations locally or as a distributed worker.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use commons::core::config::validate_density;
use commons::distributed::{EvolutionStore, GenomeId, Worker};
use commons::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::open_store;
use crate::config::Config;

/// Options for a local headless run.
pub struct LocalRun {
    pub density: f64,
    pub strategy: PopulationStrategy,
    pub mixed_ratio: f64,
    pub ticks: Option<u64>,
    pub seed: Option<u64>,
    pub genome: Option<String>,
    pub weights: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub verbose: bool,
}

/// Lease and process jobs until interrupted.
pub fn worker(id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let id = id.unwrap_or_else(|| format!("worker-{}", std::process::id()));

    println!(
        "{} Worker {} polling {}",
        "→".blue(),
        id.cyan(),
        config.database_path()?.display()
    );
    Worker::new(id, store, config.world.clone())
        .with_idle_backoff(config.worker.idle_backoff())
        .run();
    Ok(())
}

/// Run one simulation in-process and print its results.
pub fn local(run: LocalRun) -> Result<()> {
    validate_density(run.density)?;
    let config = Config::load()?;

    let mut world = config.world.clone();
    if let Some(ticks) = run.ticks {
        world.max_ticks = ticks;
    }

    let mut evaluation = EvaluationRun::new(world.clone(), run.density, run.strategy)
        .with_mixed_ratio(run.mixed_ratio)
        .with_seed(run.seed);

    if let Some(genome) = &run.genome {
        let policy = load_genome_policy(&config, genome, &world)?;
        println!(
            "  Loaded genome {} ({} parameters)",
            genome.cyan(),
            policy.parameter_count()
        );
        evaluation = evaluation.with_policy(Arc::new(policy));
    } else if let Some(path) = &run.weights {
        let policy = load_weights_file(path, &world)?;
        println!(
            "  Loaded weights from {} ({} parameters)",
            path.display().to_string().cyan(),
            policy.parameter_count()
        );
        evaluation = evaluation.with_policy(Arc::new(policy));
    } else if run.strategy.strategies(1, 1.0).iter().any(|s| s.is_policy_driven()) {
        println!(
            "  {} no genome or weights given; policy agents will act randomly",
            "•".yellow()
        );
    }

    println!(
        "{} Simulating {} population at density {} for up to {} ticks...",
        "→".blue(),
        run.strategy.to_string().cyan(),
        run.density.to_string().cyan(),
        world.max_ticks.to_string().cyan()
    );

    let pb = ProgressBar::new(world.max_ticks);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ticks ({msg} alive)")?
            .progress_chars("#>-"),
    );

    let verbose = run.verbose;
    let result = evaluation.execute_with(|report| {
        pb.set_position(report.tick);
        pb.set_message(report.alive.to_string());
        if verbose && report.died > 0 {
            pb.println(format!(
                "  tick {}: {} died, {} alive",
                report.tick, report.died, report.alive
            ));
        }
    })?;
    pb.finish_and_clear();

    let stats = &result.stats;
    println!("{} Simulation complete!", "✓".green().bold());
    println!("  Simulation:  {}", result.simulation_id.to_string().cyan());
    println!("  Seed:        {}", result.seed);
    println!("  Ticks:       {}", stats.ticks.to_string().green());
    println!("  Survivors:   {}", stats.survivors.to_string().green());
    println!("  Avg energy:  {:.2}", stats.avg_energy);
    println!("  Gini:        {:.3}", stats.gini);
    println!("  Fitness:     {}", format!("{:.2}", result.fitness()).yellow());

    if !result.snapshots.is_empty() {
        println!();
        println!("  {:>6} {:>6} {:>6} {:>6} {:>8} {:>8}", "tick", "alive", "coop", "aggr", "gini", "energy");
        for snap in &result.snapshots {
            println!(
                "  {:>6} {:>6} {:>6} {:>6} {:>8.3} {:>8.2}",
                snap.tick,
                snap.population,
                snap.coop_count,
                snap.aggressive_count,
                snap.gini_coefficient,
                snap.avg_energy
            );
        }
    }

    if let Some(path) = &run.output {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!();
        println!("  {} Saved results to {}", "✓".green(), path.display());
    }

    Ok(())
}

fn load_weights_file(path: &Path, world: &WorldConfig) -> Result<Policy> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let weights: WeightMap = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse weights in {}", path.display()))?;
    let policy = Policy::from_weights(&weights)
        .with_context(|| format!("{} holds malformed weights", path.display()))?;
    check_input_size(&policy, world, &path.display().to_string())?;
    Ok(policy)
}

fn check_input_size(policy: &Policy, world: &WorldConfig, source: &str) -> Result<()> {
    if policy.input_size() != world.observation_size() {
        bail!(
            "{source} expects {} inputs but this world produces {}",
            policy.input_size(),
            world.observation_size()
        );
    }
    Ok(())
}

fn load_genome_policy(config: &Config, genome: &str, world: &WorldConfig) -> Result<Policy> {
    let id = Uuid::parse_str(genome).with_context(|| format!("Invalid genome id {genome:?}"))?;
    let store: Arc<dyn EvolutionStore> = open_store(config)?;
    let record = store
        .get_genome(GenomeId(id))?
        .with_context(|| format!("Genome {id} not found"))?;

    let policy = Policy::from_weights(&record.weights)
        .with_context(|| format!("Genome {id} has malformed weights"))?;
    check_input_size(&policy, world, &format!("Genome {id}"))?;
    Ok(policy)
}
