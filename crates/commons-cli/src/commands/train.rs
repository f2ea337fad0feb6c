//! Train a policy by deep Q-learning.

use anyhow::{Context, Result};
use colored::Colorize;
use commons::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use crate::config::Config;

/// Options for a training session; unset fields come from `[training]`.
pub struct TrainRun {
    pub episodes: u64,
    pub strategy: Option<PopulationStrategy>,
    pub density: Option<f64>,
    pub ticks: Option<u64>,
    pub seed: Option<u64>,
    pub output: PathBuf,
}

pub fn run(run: TrainRun) -> Result<()> {
    let config = Config::load()?;
    let mut training = config.training.clone();
    if let Some(strategy) = run.strategy {
        training.strategy = strategy;
    }
    if let Some(density) = run.density {
        training.resource_density = density;
    }
    if run.ticks.is_some() {
        training.max_ticks = run.ticks;
    }
    if run.seed.is_some() {
        training.seed = run.seed;
    }

    let mut trainer =
        DqnTrainer::new(training.clone(), config.world.clone()).context("Failed to create trainer")?;

    println!(
        "{} Training {} policy for {} episodes at density {}",
        "→".blue(),
        training.strategy.to_string().cyan(),
        run.episodes.to_string().cyan(),
        training.resource_density.to_string().cyan()
    );
    println!(
        "  {} parameters, batch {}, γ {}, ε {} → {}",
        trainer.policy().parameter_count(),
        training.batch_size,
        training.gamma,
        training.epsilon_start,
        training.epsilon_end
    );

    let pb = ProgressBar::new(run.episodes);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} episodes ({msg})")?
            .progress_chars("#>-"),
    );
    let history = trainer.train(run.episodes, |stats| {
        pb.set_position(stats.episode);
        pb.set_message(format!("avg reward {:.1}, ε {:.3}", stats.avg_reward, stats.epsilon));
        if stats.episode % 10 == 0 {
            pb.println(format!(
                "  episode {:>5}  reward {:>9.2}  avg {:>9.2}  ε {:.3}",
                stats.episode, stats.episode_reward, stats.avg_reward, stats.epsilon
            ));
        }
    })?;
    pb.finish_and_clear();

    if let Some(last) = history.last() {
        println!("{} Training complete!", "✓".green().bold());
        println!("  Episodes:     {}", last.episode.to_string().green());
        println!("  Avg reward:   {}", format!("{:.2}", last.avg_reward).yellow());
        println!("  Epsilon:      {:.3}", last.epsilon);
        println!("  Train steps:  {}", trainer.train_steps());
    }

    let weights = trainer.policy().export_weights();
    let json = serde_json::to_string_pretty(&weights).context("Failed to serialize weights")?;
    if let Some(parent) = run.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&run.output, json)
        .with_context(|| format!("Failed to write {}", run.output.display()))?;
    println!(
        "  {} Saved weights to {} (load with {})",
        "✓".green(),
        run.output.display(),
        "commons simulate --weights".cyan()
    );
    Ok(())
}
