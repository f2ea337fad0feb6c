//! Agent: a single forager on the grid.
//!
//! An agent is a small state machine: alive with some energy, or dead.
//! Every operation on a dead agent is a no-op, so the world can iterate
//! over a mixed population without special-casing corpses.
//!
//! How an agent interacts is fixed by its [`Strategy`]: aggressive agents
//! attack their neighbours, every other strategy shares.

use crate::policy::Policy;
use commons_core::config::WorldConfig;
use commons_core::types::{Action, AgentId, GridPos, Strategy};
use rand::Rng;
use std::sync::Arc;

/// Result of one initiator/target interaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interaction {
    /// Energy was donated to the target.
    Shared { amount: f64 },
    /// Energy was stolen from the target.
    Attacked { stolen: f64, killed: bool },
    /// Preconditions were not met; nothing changed.
    Declined,
}

#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,
    pos: GridPos,
    energy: f64,
    alive: bool,
    strategy: Strategy,
    ticks_survived: u64,
    policy: Option<Arc<Policy>>,
}

impl Agent {
    pub fn new(id: AgentId, pos: GridPos, strategy: Strategy, energy: f64) -> Self {
        Self {
            id,
            pos,
            energy,
            alive: true,
            strategy,
            ticks_survived: 0,
            policy: None,
        }
    }

    /// Bind a policy at construction time.
    pub fn with_policy(mut self, policy: Arc<Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn bind_policy(&mut self, policy: Arc<Policy>) {
        self.policy = Some(policy);
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn pos(&self) -> GridPos {
        self.pos
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn ticks_survived(&self) -> u64 {
        self.ticks_survived
    }

    /// The bound policy, if any. The only place callers branch on
    /// policy presence.
    pub fn policy(&self) -> Option<&Policy> {
        self.policy.as_deref()
    }

    /// Build the partial observation: a `(2r+1)²` window of
    /// `[occupied, resource]` pairs in row-major order (out-of-bounds cells
    /// read as empty), followed by energy normalized to `[0, 1]`.
    pub fn observe(
        &self,
        occupancy: &[Option<AgentId>],
        resources: &[bool],
        config: &WorldConfig,
    ) -> Vec<f32> {
        let size = config.grid_size as i64;
        let range = config.vision_range as i64;
        let mut obs = Vec::with_capacity(config.observation_size());

        for dy in -range..=range {
            for dx in -range..=range {
                let vx = self.pos.x as i64 + dx;
                let vy = self.pos.y as i64 + dy;
                if (0..size).contains(&vx) && (0..size).contains(&vy) {
                    let idx = GridPos::new(vx as usize, vy as usize).index(config.grid_size);
                    obs.push(if occupancy[idx].is_some() { 1.0 } else { 0.0 });
                    obs.push(if resources[idx] { 1.0 } else { 0.0 });
                } else {
                    obs.push(0.0);
                    obs.push(0.0);
                }
            }
        }

        obs.push((self.energy / config.max_energy) as f32);
        obs
    }

    /// Choose an action: ε-greedy over the policy output when a policy is
    /// bound, otherwise uniformly random.
    pub fn decide<R: Rng + ?Sized>(&self, observation: &[f32], epsilon: f64, rng: &mut R) -> Action {
        match self.policy() {
            Some(policy) => policy.predict_action(observation, epsilon, rng),
            None => Action::random(rng),
        }
    }

    /// Move by one action, clamped to the grid. Returns the new position.
    pub fn move_by(&mut self, action: Action, grid_size: usize) -> GridPos {
        if self.alive {
            self.pos = self.pos.step(action, grid_size);
        }
        self.pos
    }

    /// Consume one resource cell. Returns the energy actually gained.
    pub fn eat(&mut self, food_value: f64, max_energy: f64) -> f64 {
        if !self.alive {
            return 0.0;
        }
        let gained = food_value.min(max_energy - self.energy).max(0.0);
        self.energy += gained;
        gained
    }

    /// Interact with a neighbour according to this agent's strategy.
    pub fn interact(&mut self, target: &mut Agent, config: &WorldConfig) -> Interaction {
        match self.strategy {
            Strategy::AggressivePolicy => self.attack(target, config),
            Strategy::RandomWalk | Strategy::CooperativePolicy | Strategy::GeneticPolicy => {
                self.share_with(target, config)
            }
        }
    }

    /// Donate energy to a needy neighbour.
    ///
    /// Only happens when the target is below the share threshold and this
    /// agent can afford the cost while staying above it.
    pub fn share_with(&mut self, target: &mut Agent, config: &WorldConfig) -> Interaction {
        if !self.alive || !target.alive {
            return Interaction::Declined;
        }
        if target.energy < config.share_threshold
            && self.energy > config.share_threshold + config.share_cost
        {
            self.energy -= config.share_cost;
            let before = target.energy;
            target.energy = (target.energy + config.share_amount).min(config.max_energy);
            return Interaction::Shared {
                amount: target.energy - before,
            };
        }
        Interaction::Declined
    }

    /// Steal a fraction of a neighbour's energy.
    pub fn attack(&mut self, target: &mut Agent, config: &WorldConfig) -> Interaction {
        if !self.alive || !target.alive || self.energy <= config.attack_cost {
            return Interaction::Declined;
        }

        self.energy -= config.attack_cost;
        let stolen = (target.energy * config.steal_fraction).min(config.steal_cap);
        target.energy -= stolen;
        self.energy = (self.energy + stolen).min(config.max_energy);

        let killed = target.energy <= 0.0;
        if killed {
            target.die();
        }
        Interaction::Attacked { stolen, killed }
    }

    /// End-of-turn metabolism. Returns `false` if the agent died.
    pub fn metabolize(&mut self, decay: f64) -> bool {
        if !self.alive {
            return false;
        }
        self.energy -= decay;
        if self.energy <= 0.0 {
            self.die();
            false
        } else {
            self.ticks_survived += 1;
            true
        }
    }

    fn die(&mut self) {
        self.alive = false;
        self.energy = self.energy.max(0.0);
    }
}
