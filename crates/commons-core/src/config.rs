//! World parameters.
//!
//! The defaults reproduce the tuned values the scarcity-window experiments
//! were run with: a 40×40 grid, 40 agents, and food worth 20 energy.

use crate::error::{CommonsError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for grid-world simulation parameters.
///
/// Every field has a serde default so partial TOML tables are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Side length of the square grid (default: 40).
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    /// Agents placed at reset (default: 40).
    #[serde(default = "default_agent_count")]
    pub agent_count: usize,
    /// Starting energy for every agent (default: 100).
    #[serde(default = "default_initial_energy")]
    pub initial_energy: f64,
    /// Energy ceiling (default: 200).
    #[serde(default = "default_max_energy")]
    pub max_energy: f64,
    /// Energy lost by every live agent each tick (default: 0.5).
    #[serde(default = "default_energy_decay")]
    pub energy_decay: f64,
    /// Energy gained from one resource cell (default: 20).
    #[serde(default = "default_food_value")]
    pub food_value: f64,
    /// Vision radius; the window is `(2r+1)²` cells (default: 2).
    #[serde(default = "default_vision_range")]
    pub vision_range: usize,
    /// Energy below which an agent accepts sharing (default: 30).
    #[serde(default = "default_share_threshold")]
    pub share_threshold: f64,
    /// Energy the donor pays to share (default: 3).
    #[serde(default = "default_share_cost")]
    pub share_cost: f64,
    /// Energy the recipient receives (default: 10).
    #[serde(default = "default_share_amount")]
    pub share_amount: f64,
    /// Energy the attacker pays (default: 5).
    #[serde(default = "default_attack_cost")]
    pub attack_cost: f64,
    /// Fraction of the target's energy stolen per attack (default: 0.3).
    #[serde(default = "default_steal_fraction")]
    pub steal_fraction: f64,
    /// Upper bound on energy stolen per attack (default: 15).
    #[serde(default = "default_steal_cap")]
    pub steal_cap: f64,
    /// Maximum Euclidean distance for share/attack candidates (default: 1.5).
    #[serde(default = "default_interaction_radius")]
    pub interaction_radius: f64,
    /// Ticks between full resource rescatters (default: 50).
    #[serde(default = "default_resource_respawn_interval")]
    pub resource_respawn_interval: u64,
    /// Ticks between time-series snapshots (default: 50).
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
    /// Tick ceiling for a run (default: 2000).
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
}

fn default_grid_size() -> usize { 40 }
fn default_agent_count() -> usize { 40 }
fn default_initial_energy() -> f64 { 100.0 }
fn default_max_energy() -> f64 { 200.0 }
fn default_energy_decay() -> f64 { 0.5 }
fn default_food_value() -> f64 { 20.0 }
fn default_vision_range() -> usize { 2 }
fn default_share_threshold() -> f64 { 30.0 }
fn default_share_cost() -> f64 { 3.0 }
fn default_share_amount() -> f64 { 10.0 }
fn default_attack_cost() -> f64 { 5.0 }
fn default_steal_fraction() -> f64 { 0.3 }
fn default_steal_cap() -> f64 { 15.0 }
fn default_interaction_radius() -> f64 { 1.5 }
fn default_resource_respawn_interval() -> u64 { 50 }
fn default_snapshot_interval() -> u64 { 50 }
fn default_max_ticks() -> u64 { 2000 }

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            agent_count: default_agent_count(),
            initial_energy: default_initial_energy(),
            max_energy: default_max_energy(),
            energy_decay: default_energy_decay(),
            food_value: default_food_value(),
            vision_range: default_vision_range(),
            share_threshold: default_share_threshold(),
            share_cost: default_share_cost(),
            share_amount: default_share_amount(),
            attack_cost: default_attack_cost(),
            steal_fraction: default_steal_fraction(),
            steal_cap: default_steal_cap(),
            interaction_radius: default_interaction_radius(),
            resource_respawn_interval: default_resource_respawn_interval(),
            snapshot_interval: default_snapshot_interval(),
            max_ticks: default_max_ticks(),
        }
    }
}

impl WorldConfig {
    /// Side length of the square vision window.
    pub fn vision_size(&self) -> usize {
        self.vision_range * 2 + 1
    }

    /// Length of the observation vector: two channels per visible cell plus
    /// normalized energy.
    pub fn observation_size(&self) -> usize {
        self.vision_size() * self.vision_size() * 2 + 1
    }

    pub fn cell_count(&self) -> usize {
        self.grid_size * self.grid_size
    }

    /// Check that the parameters describe a runnable world.
    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(CommonsError::invalid_config(
                "grid_size",
                "0",
                "grid must have at least one cell",
            ));
        }
        if self.agent_count > self.cell_count() {
            return Err(CommonsError::invalid_config(
                "agent_count",
                self.agent_count.to_string(),
                format!("cannot place more agents than the {} grid cells", self.cell_count()),
            ));
        }
        if self.max_energy <= 0.0 {
            return Err(CommonsError::out_of_range(
                "max_energy",
                f64::MIN_POSITIVE,
                f64::MAX,
                self.max_energy,
            ));
        }
        if !(0.0..=self.max_energy).contains(&self.initial_energy) {
            return Err(CommonsError::out_of_range(
                "initial_energy",
                0.0,
                self.max_energy,
                self.initial_energy,
            ));
        }
        if !(0.0..=1.0).contains(&self.steal_fraction) {
            return Err(CommonsError::out_of_range(
                "steal_fraction",
                0.0,
                1.0,
                self.steal_fraction,
            ));
        }
        if self.energy_decay < 0.0 {
            return Err(CommonsError::out_of_range(
                "energy_decay",
                0.0,
                f64::MAX,
                self.energy_decay,
            ));
        }
        if self.resource_respawn_interval == 0 || self.snapshot_interval == 0 {
            return Err(CommonsError::invalid_config(
                "resource_respawn_interval/snapshot_interval",
                "0",
                "intervals must be at least one tick",
            ));
        }
        Ok(())
    }
}

/// Check a resource density before it reaches the world.
pub fn validate_density(density: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&density) {
        return Err(CommonsError::out_of_range("resource_density", 0.0, 1.0, density));
    }
    Ok(())
}
