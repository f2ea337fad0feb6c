//! Population metrics.
//!
//! Inequality is measured with the Gini coefficient over the energies of
//! live agents; snapshots record how the population composition and its
//! inequality evolve over a run.

use commons_agents::agent::Agent;
use commons_core::types::Tick;
use serde::{Deserialize, Serialize};

/// Gini coefficient of a set of non-negative values.
///
/// 0 means perfect equality. For `n` values where one holds everything
/// the result is `(n-1)/n`. Empty input or a zero total yields 0.
pub fn gini(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, e)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * e)
        .sum();

    weighted / (n as f64 * total)
}

/// Mean of a slice, 0 when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population state at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: Tick,
    pub population: usize,
    /// Live cooperative or genetic agents.
    pub coop_count: usize,
    pub aggressive_count: usize,
    pub gini_coefficient: f64,
    pub avg_energy: f64,
}

impl Snapshot {
    /// Capture the live part of a population.
    pub fn capture(tick: Tick, agents: &[Agent]) -> Self {
        let live: Vec<&Agent> = agents.iter().filter(|a| a.is_alive()).collect();
        let energies: Vec<f64> = live.iter().map(|a| a.energy()).collect();

        Snapshot {
            tick,
            population: live.len(),
            coop_count: live.iter().filter(|a| a.strategy().is_cooperative()).count(),
            aggressive_count: live.iter().filter(|a| a.strategy().is_aggressive()).count(),
            gini_coefficient: gini(&energies),
            avg_energy: mean(&energies),
        }
    }
}

/// Statistics computed once when a run terminates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Ticks the world ran before the population died out or the ceiling
    /// was reached.
    pub ticks: Tick,
    pub survivors: usize,
    /// Mean energy of survivors (0 when none survive).
    pub avg_energy: f64,
    pub gini: f64,
}
