//! Shared types used across all Commons crates.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation time in ticks.
pub type Tick = u64;

/// Number of discrete actions an agent can take.
pub const ACTION_COUNT: usize = 5;

/// Identifier for an agent within a single world.
///
/// Ids are assigned densely from zero at reset, so they double as the
/// agent's spawn index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// A cell on the square grid. `(0, 0)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub x: usize,
    pub y: usize,
}

impl GridPos {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Row-major index into a `grid_size × grid_size` buffer.
    pub fn index(&self, grid_size: usize) -> usize {
        self.y * grid_size + self.x
    }

    pub fn in_bounds(&self, grid_size: usize) -> bool {
        self.x < grid_size && self.y < grid_size
    }

    /// Like [`index`](Self::index), but `None` for cells off the grid.
    pub fn checked_index(&self, grid_size: usize) -> Option<usize> {
        self.in_bounds(grid_size).then(|| self.index(grid_size))
    }

    /// Apply an action, clamping the result to the grid bounds.
    pub fn step(&self, action: Action, grid_size: usize) -> GridPos {
        let max = grid_size.saturating_sub(1);
        match action {
            Action::Up => GridPos::new(self.x, self.y.saturating_sub(1)),
            Action::Down => GridPos::new(self.x, (self.y + 1).min(max)),
            Action::Left => GridPos::new(self.x.saturating_sub(1), self.y),
            Action::Right => GridPos::new((self.x + 1).min(max), self.y),
            Action::Interact => *self,
        }
    }

    pub fn distance_to(&self, other: &GridPos) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One of the five discrete actions.
///
/// The discriminants match the output indices of the policy network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    /// Stay in place and share with or attack neighbours.
    Interact = 4,
}

impl Action {
    pub const ALL: [Action; ACTION_COUNT] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Interact,
    ];

    pub fn from_index(index: usize) -> Option<Action> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Uniformly random action.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Action {
        Self::ALL[rng.random_range(0..ACTION_COUNT)]
    }
}

/// Behavioural strategy carried by every agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Uniformly random actions, never bound to a policy.
    RandomWalk,
    /// Shares energy with needy neighbours when interacting.
    CooperativePolicy,
    /// Steals energy from neighbours when interacting.
    AggressivePolicy,
    /// Driven by an evolved genome; shares when interacting.
    GeneticPolicy,
}

impl Strategy {
    /// Whether agents of this strategy take their actions from a bound policy.
    pub fn is_policy_driven(self) -> bool {
        match self {
            Strategy::RandomWalk => false,
            Strategy::CooperativePolicy | Strategy::AggressivePolicy | Strategy::GeneticPolicy => {
                true
            }
        }
    }

    /// Counted as cooperative in population snapshots.
    pub fn is_cooperative(self) -> bool {
        match self {
            Strategy::CooperativePolicy | Strategy::GeneticPolicy => true,
            Strategy::RandomWalk | Strategy::AggressivePolicy => false,
        }
    }

    pub fn is_aggressive(self) -> bool {
        matches!(self, Strategy::AggressivePolicy)
    }

    pub fn label(self) -> &'static str {
        match self {
            Strategy::RandomWalk => "random_walk",
            Strategy::CooperativePolicy => "cooperative",
            Strategy::AggressivePolicy => "aggressive",
            Strategy::GeneticPolicy => "genetic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Population composition requested for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationStrategy {
    RandomWalk,
    Cooperative,
    Aggressive,
    /// Cooperative and aggressive agents split by a ratio.
    Mixed,
    /// Every agent carries the genome under evaluation.
    Genetic,
}

impl PopulationStrategy {
    /// Expand into one strategy per agent, in spawn order before shuffling.
    ///
    /// For [`PopulationStrategy::Mixed`], `floor(count × mixed_ratio)` agents
    /// are cooperative and the rest aggressive.
    pub fn strategies(self, count: usize, mixed_ratio: f64) -> Vec<Strategy> {
        match self {
            PopulationStrategy::RandomWalk => vec![Strategy::RandomWalk; count],
            PopulationStrategy::Cooperative => vec![Strategy::CooperativePolicy; count],
            PopulationStrategy::Aggressive => vec![Strategy::AggressivePolicy; count],
            PopulationStrategy::Genetic => vec![Strategy::GeneticPolicy; count],
            PopulationStrategy::Mixed => {
                let ratio = mixed_ratio.clamp(0.0, 1.0);
                let cooperative = (count as f64 * ratio) as usize;
                let mut out = vec![Strategy::CooperativePolicy; cooperative];
                out.resize(count, Strategy::AggressivePolicy);
                out
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PopulationStrategy::RandomWalk => "random_walk",
            PopulationStrategy::Cooperative => "cooperative",
            PopulationStrategy::Aggressive => "aggressive",
            PopulationStrategy::Mixed => "mixed",
            PopulationStrategy::Genetic => "genetic",
        }
    }
}

impl fmt::Display for PopulationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for PopulationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "random_walk" | "random" => Ok(PopulationStrategy::RandomWalk),
            "cooperative" => Ok(PopulationStrategy::Cooperative),
            "aggressive" => Ok(PopulationStrategy::Aggressive),
            "mixed" => Ok(PopulationStrategy::Mixed),
            "genetic" => Ok(PopulationStrategy::Genetic),
            other => Err(format!("unknown population strategy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_clamps_to_bounds() {
        let corner = GridPos::new(0, 0);
        assert_eq!(corner.step(Action::Up, 10), corner);
        assert_eq!(corner.step(Action::Left, 10), corner);

        let far = GridPos::new(9, 9);
        assert_eq!(far.step(Action::Down, 10), far);
        assert_eq!(far.step(Action::Right, 10), far);
        assert_eq!(far.step(Action::Up, 10), GridPos::new(9, 8));
    }

    #[test]
    fn off_grid_cells_have_no_index() {
        assert_eq!(GridPos::new(9, 9).checked_index(10), Some(99));
        assert_eq!(GridPos::new(10, 3).checked_index(10), None);
        assert_eq!(GridPos::new(3, 10).checked_index(10), None);
    }

    #[test]
    fn interact_stays_in_place() {
        let p = GridPos::new(4, 5);
        assert_eq!(p.step(Action::Interact, 10), p);
    }

    #[test]
    fn diagonal_neighbour_is_within_interaction_range() {
        let a = GridPos::new(2, 2);
        assert!(a.distance_to(&GridPos::new(3, 3)) <= 1.5);
        assert!(a.distance_to(&GridPos::new(4, 2)) > 1.5);
    }

    #[test]
    fn action_indices_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_index(action.index()), Some(action));
        }
        assert_eq!(Action::from_index(ACTION_COUNT), None);
    }

    #[test]
    fn mixed_population_splits_by_ratio() {
        let s = PopulationStrategy::Mixed.strategies(40, 0.25);
        assert_eq!(s.len(), 40);
        assert_eq!(s.iter().filter(|s| s.is_cooperative()).count(), 10);
        assert_eq!(s.iter().filter(|s| s.is_aggressive()).count(), 30);
    }

    #[test]
    fn strategy_parses_from_cli_spelling() {
        assert_eq!(
            "random-walk".parse::<PopulationStrategy>().ok(),
            Some(PopulationStrategy::RandomWalk)
        );
        assert_eq!(
            "Genetic".parse::<PopulationStrategy>().ok(),
            Some(PopulationStrategy::Genetic)
        );
        assert!("greedy".parse::<PopulationStrategy>().is_err());
    }
}
