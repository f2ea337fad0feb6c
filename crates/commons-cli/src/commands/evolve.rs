//! Generation lifecycle commands.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use commons::distributed::{
    EvolutionOrchestrator, EvolutionReport, EvolutionStore, GenerationStatus, JobStatusCounts,
};
use std::sync::Arc;

use super::open_store;
use crate::config::Config;

fn orchestrator(config: &Config, store: Arc<dyn EvolutionStore>) -> Result<EvolutionOrchestrator> {
    EvolutionOrchestrator::new(store, config.evolution.clone(), config.world.clone())
        .context("Failed to create orchestrator")
}

/// Create generation zero and its jobs.
pub fn init() -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let mut orchestrator = orchestrator(&config, Arc::clone(&store))?;

    if let Some(active) = store.latest_active_generation()? {
        bail!(
            "Generation {} is already active. Use {} to follow it.",
            active.id.to_string().cyan(),
            "commons evolve --loop".cyan()
        );
    }

    println!(
        "{} Creating generation zero with {} genomes...",
        "→".blue(),
        config.evolution.population_size.to_string().cyan()
    );
    let generation = orchestrator.init_generation_zero()?;
    println!(
        "{} Generation {} ready, {} jobs queued",
        "✓".green().bold(),
        generation.to_string().cyan(),
        config.evolution.population_size
    );
    Ok(())
}

/// One poll: evolve if the active generation has finished.
pub fn step() -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let mut orchestrator = orchestrator(&config, Arc::clone(&store))?;

    match orchestrator.step()? {
        Some(report) => print_report(&report),
        None => {
            let Some(generation) = orchestrator.current_generation() else {
                bail!("No active generation. Run {} first.", "commons evolve --init".cyan());
            };
            let counts = store.job_counts(generation)?;
            println!(
                "{} Generation {} still evaluating",
                "•".yellow(),
                generation.to_string().cyan()
            );
            print_counts(&counts);
        }
    }
    Ok(())
}

/// Poll until interrupted or the generation limit is reached.
pub fn run_loop(generations: Option<u64>) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let mut orchestrator = orchestrator(&config, store)?;

    println!(
        "{} Orchestrator polling every {}s",
        "→".blue(),
        config.worker.poll_interval_secs.to_string().cyan()
    );
    orchestrator.run_loop(config.worker.poll_interval(), generations);
    println!("{} Evolution loop finished", "✓".green().bold());
    Ok(())
}

/// Print generation history with job counts.
pub fn status() -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let orchestrator = orchestrator(&config, store)?;

    let summaries = orchestrator.status()?;
    if summaries.is_empty() {
        println!("No generations yet. Run {} first.", "commons evolve --init".cyan());
        return Ok(());
    }

    println!("{}", "Generations".bold());
    for summary in &summaries {
        let generation = &summary.generation;
        let status = match generation.status {
            GenerationStatus::Active => "active".green(),
            GenerationStatus::Completed => "completed".normal(),
        };
        let fitness = match (generation.avg_fitness, generation.best_fitness) {
            (Some(avg), Some(best)) => format!("avg {avg:>8.2}  best {best:>8.2}"),
            _ => String::from("-"),
        };
        println!(
            "  {:>8}  {:<10} {}  [{}]",
            generation.id.to_string().cyan(),
            status,
            fitness,
            summary.jobs
        );
    }
    Ok(())
}

fn print_report(report: &EvolutionReport) {
    println!(
        "{} Generation {} completed",
        "✓".green().bold(),
        report.previous.to_string().cyan()
    );
    println!("  Avg fitness:  {}", format!("{:.2}", report.avg_fitness).yellow());
    println!("  Best fitness: {}", format!("{:.2}", report.best_fitness).green());
    println!(
        "{} Generation {} created: {} elites, {} children",
        "→".blue(),
        report.next.to_string().cyan(),
        report.elites.len(),
        report.children
    );
}

fn print_counts(counts: &JobStatusCounts) {
    println!("  Pending:    {}", counts.pending.to_string().yellow());
    println!("  Processing: {}", counts.processing.to_string().cyan());
    println!("  Completed:  {}", counts.completed.to_string().green());
    println!("  Failed:     {}", counts.failed.to_string().red());
}
