//! Deep Q-learning building blocks: rewards, experience replay, and the
//! exploration schedule.
//!
//! The episode loop that drives a world lives in the runtime crate; this
//! module only knows about observations, actions, and energy.

use commons_core::types::{Action, Strategy};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Discount applied to the best next-state score.
pub const GAMMA: f32 = 0.99;
pub const BATCH_SIZE: usize = 32;
pub const LEARNING_RATE: f32 = 0.001;
pub const EPSILON_START: f64 = 1.0;
pub const EPSILON_END: f64 = 0.01;
/// Multiplicative ε decay applied once per tick.
pub const EPSILON_DECAY: f64 = 0.995;
pub const REPLAY_CAPACITY: usize = 10_000;
/// Optimiser steps between copies of the online policy into the target.
pub const TARGET_SYNC_INTERVAL: u64 = 100;

/// What happened to one agent during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepOutcome {
    pub prev_energy: f64,
    pub energy: f64,
    /// Consumed a resource cell.
    pub ate: bool,
    /// At least one donation went through.
    pub shared: bool,
    /// At least one attack went through.
    pub attacked: bool,
    pub died: bool,
}

impl StepOutcome {
    pub fn energy_change(&self) -> f64 {
        self.energy - self.prev_energy
    }
}

/// Reward shaping per behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardFunction {
    /// Rewards eating and sharing, punishes stealing.
    Cooperative,
    /// Rewards eating and successful attacks.
    Aggressive,
}

impl RewardFunction {
    pub fn for_strategy(strategy: Strategy) -> Self {
        if strategy.is_aggressive() {
            RewardFunction::Aggressive
        } else {
            RewardFunction::Cooperative
        }
    }

    pub fn reward(self, outcome: &StepOutcome) -> f64 {
        match self {
            RewardFunction::Cooperative => cooperative_reward(outcome),
            RewardFunction::Aggressive => aggressive_reward(outcome),
        }
    }
}

/// Food +10, share +5, steal −10, death −1, plus a tenth of the energy change.
pub fn cooperative_reward(outcome: &StepOutcome) -> f64 {
    let mut reward = 0.1 * outcome.energy_change();
    if outcome.ate {
        reward += 10.0;
    }
    if outcome.shared {
        reward += 5.0;
    }
    if outcome.attacked {
        reward -= 10.0;
    }
    if outcome.died {
        reward -= 1.0;
    }
    reward
}

/// Food +10, attack +5, death −1, plus a tenth of the energy change.
pub fn aggressive_reward(outcome: &StepOutcome) -> f64 {
    let mut reward = 0.1 * outcome.energy_change();
    if outcome.ate {
        reward += 10.0;
    }
    if outcome.attacked {
        reward += 5.0;
    }
    if outcome.died {
        reward -= 1.0;
    }
    reward
}

/// One experience. Terminal transitions carry a zero `next_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: Action,
    pub reward: f64,
    pub next_state: Vec<f32>,
    pub done: bool,
}

/// Bounded FIFO of transitions; the oldest is evicted when full.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    items: VecDeque<Transition>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.clamp(1, REPLAY_CAPACITY)),
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(transition);
    }

    /// Up to `batch_size` distinct transitions, uniformly at random.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&Transition> {
        let amount = batch_size.min(self.items.len());
        rand::seq::index::sample(rng, self.items.len(), amount)
            .iter()
            .map(|i| &self.items[i])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(REPLAY_CAPACITY)
    }
}

/// Exponentially decaying exploration rate with a floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    value: f64,
    end: f64,
    decay: f64,
}

impl EpsilonSchedule {
    pub fn new(start: f64, end: f64, decay: f64) -> Self {
        Self {
            value: start.max(end),
            end,
            decay,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn decay(&mut self) -> f64 {
        self.value = (self.value * self.decay).max(self.end);
        self.value
    }
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self::new(EPSILON_START, EPSILON_END, EPSILON_DECAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;
    use std::collections::HashSet;

    fn transition(tag: f32) -> Transition {
        Transition {
            state: vec![tag],
            action: Action::Up,
            reward: tag as f64,
            next_state: vec![0.0],
            done: false,
        }
    }

    #[test]
    fn cooperative_reward_punishes_stealing() {
        let fed = StepOutcome {
            prev_energy: 50.0,
            energy: 69.5,
            ate: true,
            ..StepOutcome::default()
        };
        assert!((cooperative_reward(&fed) - 11.95).abs() < 1e-9);

        let thief = StepOutcome {
            prev_energy: 50.0,
            energy: 50.0,
            attacked: true,
            ..StepOutcome::default()
        };
        assert_eq!(cooperative_reward(&thief), -10.0);
        assert_eq!(aggressive_reward(&thief), 5.0);
    }

    #[test]
    fn death_and_energy_loss_are_penalised() {
        let starved = StepOutcome {
            prev_energy: 0.4,
            energy: -0.1,
            died: true,
            ..StepOutcome::default()
        };
        assert!((aggressive_reward(&starved) - (-1.05)).abs() < 1e-9);

        let donor = StepOutcome {
            prev_energy: 80.0,
            energy: 74.5,
            shared: true,
            ..StepOutcome::default()
        };
        assert!((cooperative_reward(&donor) - 4.45).abs() < 1e-9);
        assert!((aggressive_reward(&donor) - (-0.55)).abs() < 1e-9);
    }

    #[test]
    fn reward_function_follows_strategy() {
        assert_eq!(RewardFunction::for_strategy(Strategy::AggressivePolicy), RewardFunction::Aggressive);
        assert_eq!(RewardFunction::for_strategy(Strategy::CooperativePolicy), RewardFunction::Cooperative);
        assert_eq!(RewardFunction::for_strategy(Strategy::GeneticPolicy), RewardFunction::Cooperative);
    }

    #[test]
    fn replay_buffer_evicts_oldest() {
        let mut buffer = ReplayBuffer::new(3);
        for i in 0..5 {
            buffer.push(transition(i as f32));
        }
        assert_eq!(buffer.len(), 3);

        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let tags: HashSet<u32> = buffer
            .sample(10, &mut rng)
            .iter()
            .map(|t| t.state[0] as u32)
            .collect();
        assert_eq!(tags, HashSet::from([2, 3, 4]));
    }

    #[test]
    fn sample_draws_distinct_transitions() {
        let mut buffer = ReplayBuffer::default();
        assert!(buffer.is_empty());
        for i in 0..100 {
            buffer.push(transition(i as f32));
        }
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let batch = buffer.sample(BATCH_SIZE, &mut rng);
        assert_eq!(batch.len(), BATCH_SIZE);
        let distinct: HashSet<u32> = batch.iter().map(|t| t.state[0] as u32).collect();
        assert_eq!(distinct.len(), BATCH_SIZE);
    }

    #[test]
    fn epsilon_decays_to_its_floor() {
        let mut schedule = EpsilonSchedule::default();
        assert_eq!(schedule.value(), 1.0);
        assert!((schedule.decay() - 0.995).abs() < 1e-12);
        for _ in 0..2000 {
            schedule.decay();
        }
        assert_eq!(schedule.value(), EPSILON_END);
    }
}
