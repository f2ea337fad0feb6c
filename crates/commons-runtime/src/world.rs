//! GridWorld: the shared environment and its tick loop.
//!
//! The world owns the population, a resource grid, and an occupancy grid.
//! Each tick:
//! 1. The occupancy grid is rebuilt from live agents
//! 2. Every live agent, in order, observes, acts, moves, eats, interacts,
//!    and pays its metabolic cost
//! 3. Dead agents are pruned
//! 4. Resources are rescattered and snapshots recorded on their periods
//!
//! All randomness flows through one seeded RNG, so a world built with
//! [`GridWorld::with_seed`] replays identically.

use crate::metrics::{gini, mean, RunStats, Snapshot};
use commons_agents::agent::{Agent, Interaction};
use commons_agents::policy::Policy;
use commons_agents::training::StepOutcome;
use commons_core::config::{validate_density, WorldConfig};
use commons_core::error::{CommonsError, Result};
use commons_core::types::{Action, AgentId, GridPos, PopulationStrategy, Strategy, Tick};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: Tick,
    pub alive: usize,
    pub died: usize,
}

/// One agent's turn within a tick, as seen by a learner.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    pub agent: AgentId,
    pub strategy: Strategy,
    pub observation: Vec<f32>,
    pub action: Action,
    pub outcome: StepOutcome,
    /// Observation once the whole tick has resolved; `None` if the agent died.
    pub next_observation: Option<Vec<f32>>,
}

pub struct GridWorld {
    config: WorldConfig,
    resources: Vec<bool>,
    occupancy: Vec<Option<AgentId>>,
    agents: Vec<Agent>,
    policy: Option<Arc<Policy>>,
    exploration: f64,
    snapshots: Vec<Snapshot>,
    tick: Tick,
    resource_density: f64,
    running: bool,
    seed: u64,
    rng: ChaCha12Rng,
}

impl GridWorld {
    /// Create an empty world seeded from the thread RNG.
    pub fn new(config: WorldConfig) -> Result<Self> {
        Self::with_seed(config, rand::random())
    }

    /// Create an empty world with a reproducible seed.
    pub fn with_seed(config: WorldConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let cells = config.cell_count();
        Ok(Self {
            config,
            resources: vec![false; cells],
            occupancy: vec![None; cells],
            agents: Vec::new(),
            policy: None,
            exploration: 0.0,
            snapshots: Vec::new(),
            tick: 0,
            resource_density: 0.0,
            running: false,
            seed,
            rng: ChaCha12Rng::seed_from_u64(seed),
        })
    }

    /// Clear the world and populate it for a new run.
    ///
    /// `agent_count` agents are placed on distinct random cells, their
    /// strategies drawn from `population` and shuffled. Resource covers
    /// `floor(density × cells)` distinct cells.
    pub fn reset(
        &mut self,
        resource_density: f64,
        population: PopulationStrategy,
        mixed_ratio: f64,
    ) -> Result<()> {
        validate_density(resource_density)?;

        let cells = self.config.cell_count();
        let count = self.config.agent_count;
        if count > cells {
            return Err(CommonsError::invalid_config(
                "agent_count",
                count.to_string(),
                "more agents than grid cells",
            ));
        }

        self.tick = 0;
        self.resource_density = resource_density;
        self.snapshots.clear();
        self.occupancy.iter_mut().for_each(|c| *c = None);

        let mut strategies = population.strategies(count, mixed_ratio);
        strategies.shuffle(&mut self.rng);

        let cells_for_agents = rand::seq::index::sample(&mut self.rng, cells, count);
        self.agents = cells_for_agents
            .iter()
            .zip(strategies)
            .enumerate()
            .map(|(i, (cell, strategy))| {
                let pos = GridPos::new(cell % self.config.grid_size, cell / self.config.grid_size);
                let mut agent = Agent::new(AgentId(i as u32), pos, strategy, self.config.initial_energy);
                if let (true, Some(policy)) = (strategy.is_policy_driven(), &self.policy) {
                    agent.bind_policy(Arc::clone(policy));
                }
                agent
            })
            .collect();

        self.rebuild_occupancy();
        self.scatter_resources();
        self.running = !self.agents.is_empty();

        debug!(
            seed = self.seed,
            agents = self.agents.len(),
            density = resource_density,
            population = %population,
            "world reset"
        );
        Ok(())
    }

    /// Bind a policy to every policy-driven agent, now and after future resets.
    pub fn bind_policy(&mut self, policy: Arc<Policy>) {
        for agent in self.agents.iter_mut().filter(|a| a.strategy().is_policy_driven()) {
            agent.bind_policy(Arc::clone(&policy));
        }
        self.policy = Some(policy);
    }

    /// ε used by policy-driven agents when choosing actions. Zero (greedy)
    /// unless a trainer raises it.
    pub fn set_exploration(&mut self, epsilon: f64) {
        self.exploration = epsilon.clamp(0.0, 1.0);
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    /// Add an agent directly. Its position must be on the grid.
    pub fn spawn(&mut self, agent: Agent) -> Result<()> {
        let idx = self.cell(agent.pos())?;
        self.occupancy[idx] = Some(agent.id());
        self.agents.push(agent);
        self.running = true;
        Ok(())
    }

    /// Place or remove a resource on one cell.
    pub fn set_resource(&mut self, pos: GridPos, present: bool) -> Result<()> {
        let idx = self.cell(pos)?;
        self.resources[idx] = present;
        Ok(())
    }

    /// Advance the world by one tick.
    pub fn step(&mut self) -> TickReport {
        self.advance(None)
    }

    /// Like [`step`](Self::step), also returning every live agent's turn.
    /// Energy changes are measured from the start of the tick, so losses to
    /// other agents' attacks count against the victim.
    pub fn step_recorded(&mut self) -> (TickReport, Vec<AgentStep>) {
        let mut turns = Vec::with_capacity(self.agents.len());
        let report = self.advance(Some(&mut turns));
        (report, turns)
    }

    fn advance(&mut self, mut turns: Option<&mut Vec<AgentStep>>) -> TickReport {
        self.tick += 1;
        self.rebuild_occupancy();

        let grid = self.config.grid_size;
        let mut acted = Vec::new();
        let start_energy: Vec<f64> = match turns {
            Some(_) => self.agents.iter().map(Agent::energy).collect(),
            None => Vec::new(),
        };
        for i in 0..self.agents.len() {
            if !self.agents[i].is_alive() {
                continue;
            }

            let observation = self.agents[i].observe(&self.occupancy, &self.resources, &self.config);
            let action = self.agents[i].decide(&observation, self.exploration, &mut self.rng);

            let id = self.agents[i].id();
            let from = self.agents[i].pos();
            let to = self.agents[i].move_by(action, grid);
            if to != from && self.occupancy[from.index(grid)] == Some(id) {
                self.occupancy[from.index(grid)] = None;
            }
            let cell = to.index(grid);
            self.occupancy[cell] = Some(id);

            let mut outcome = StepOutcome {
                prev_energy: start_energy.get(i).copied().unwrap_or_default(),
                ..StepOutcome::default()
            };
            if self.resources[cell] {
                self.agents[i].eat(self.config.food_value, self.config.max_energy);
                self.resources[cell] = false;
                outcome.ate = true;
            }

            if action == Action::Interact {
                (outcome.shared, outcome.attacked) = self.interact_from(i);
            }

            self.agents[i].metabolize(self.config.energy_decay);

            if let Some(turns) = turns.as_mut() {
                acted.push(i);
                turns.push(AgentStep {
                    agent: id,
                    strategy: self.agents[i].strategy(),
                    observation,
                    action,
                    outcome,
                    next_observation: None,
                });
            }
        }

        if let Some(turns) = turns {
            // Final energies and next observations see the fully resolved tick.
            self.rebuild_occupancy();
            for (turn, &i) in turns.iter_mut().zip(&acted) {
                let agent = &self.agents[i];
                turn.outcome.energy = agent.energy();
                turn.outcome.died = !agent.is_alive();
                if agent.is_alive() {
                    turn.next_observation =
                        Some(agent.observe(&self.occupancy, &self.resources, &self.config));
                }
            }
        }

        let before = self.agents.len();
        self.agents.retain(Agent::is_alive);
        let died = before - self.agents.len();

        if self.tick % self.config.resource_respawn_interval == 0 {
            self.scatter_resources();
        }
        if self.tick % self.config.snapshot_interval == 0 {
            self.record_snapshot();
        }
        if self.agents.is_empty() || self.tick >= self.config.max_ticks {
            self.running = false;
        }

        TickReport {
            tick: self.tick,
            alive: self.agents.len(),
            died,
        }
    }

    /// Run until the population dies out or the tick ceiling is reached.
    pub fn run(&mut self) -> RunStats {
        self.run_with(|_| {})
    }

    /// Like [`run`](Self::run), calling `on_tick` after every tick.
    pub fn run_with(&mut self, mut on_tick: impl FnMut(&TickReport)) -> RunStats {
        self.running = !self.agents.is_empty() && self.tick < self.config.max_ticks;
        self.record_snapshot();

        while self.running {
            let report = self.step();
            on_tick(&report);
        }

        let stats = self.stats();
        debug!(
            ticks = stats.ticks,
            survivors = stats.survivors,
            avg_energy = stats.avg_energy,
            gini = stats.gini,
            "run finished"
        );
        stats
    }

    /// Statistics over the current live population.
    pub fn stats(&self) -> RunStats {
        let energies = self.live_energies();
        RunStats {
            ticks: self.tick,
            survivors: energies.len(),
            avg_energy: mean(&energies),
            gini: gini(&energies),
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn alive_count(&self) -> usize {
        self.agents.iter().filter(|a| a.is_alive()).count()
    }

    /// Agent recorded on a cell. `None` for empty or off-grid cells.
    pub fn occupant(&self, pos: GridPos) -> Option<AgentId> {
        pos.checked_index(self.config.grid_size)
            .and_then(|idx| self.occupancy[idx])
    }

    pub fn resource_count(&self) -> usize {
        self.resources.iter().filter(|r| **r).count()
    }

    pub fn resource_density(&self) -> f64 {
        self.resource_density
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn take_snapshots(&mut self) -> Vec<Snapshot> {
        std::mem::take(&mut self.snapshots)
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn cell(&self, pos: GridPos) -> Result<usize> {
        pos.checked_index(self.config.grid_size).ok_or_else(|| {
            CommonsError::invalid_config(
                "position",
                format!("({}, {})", pos.x, pos.y),
                "outside the grid",
            )
        })
    }

    /// Interact with every live neighbour in range. Returns whether any
    /// donation and whether any attack went through.
    fn interact_from(&mut self, initiator: usize) -> (bool, bool) {
        let origin = self.agents[initiator].pos();
        let radius = self.config.interaction_radius;
        let (mut shared, mut attacked) = (false, false);

        for j in 0..self.agents.len() {
            if j == initiator {
                continue;
            }
            let (source, target) = pair_mut(&mut self.agents, initiator, j);
            if !target.is_alive() || origin.distance_to(&target.pos()) > radius {
                continue;
            }
            match source.interact(target, &self.config) {
                Interaction::Shared { amount } => {
                    shared = true;
                    debug!(tick = self.tick, from = %source.id(), to = %target.id(), amount, "shared");
                }
                Interaction::Attacked { stolen, killed } => {
                    attacked = true;
                    debug!(tick = self.tick, from = %source.id(), to = %target.id(), stolen, killed, "attacked");
                }
                Interaction::Declined => {}
            }
        }
        (shared, attacked)
    }

    fn rebuild_occupancy(&mut self) {
        let grid = self.config.grid_size;
        self.occupancy.iter_mut().for_each(|c| *c = None);
        for agent in self.agents.iter().filter(|a| a.is_alive()) {
            self.occupancy[agent.pos().index(grid)] = Some(agent.id());
        }
    }

    fn scatter_resources(&mut self) {
        let cells = self.config.cell_count();
        let count = ((self.resource_density * cells as f64).floor() as usize).min(cells);
        self.resources.iter_mut().for_each(|r| *r = false);
        for idx in rand::seq::index::sample(&mut self.rng, cells, count).iter() {
            self.resources[idx] = true;
        }
    }

    fn record_snapshot(&mut self) {
        let snapshot = Snapshot::capture(self.tick, &self.agents);
        debug!(
            tick = snapshot.tick,
            population = snapshot.population,
            gini = snapshot.gini_coefficient,
            "snapshot"
        );
        self.snapshots.push(snapshot);
    }

    fn live_energies(&self) -> Vec<f64> {
        self.agents
            .iter()
            .filter(|a| a.is_alive())
            .map(|a| a.energy())
            .collect()
    }
}

/// Borrow two distinct agents mutably.
fn pair_mut(agents: &mut [Agent], a: usize, b: usize) -> (&mut Agent, &mut Agent) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = agents.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = agents.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons_core::types::Strategy;

    fn small_config() -> WorldConfig {
        WorldConfig {
            grid_size: 10,
            agent_count: 8,
            max_ticks: 100,
            ..WorldConfig::default()
        }
    }

    #[test]
    fn reset_places_agents_on_distinct_cells() {
        let mut world = GridWorld::with_seed(small_config(), 1).unwrap();
        world.reset(0.2, PopulationStrategy::RandomWalk, 0.5).unwrap();

        assert_eq!(world.agents().len(), 8);
        let mut cells: Vec<_> = world.agents().iter().map(|a| a.pos()).collect();
        cells.sort_by_key(|p| (p.x, p.y));
        cells.dedup();
        assert_eq!(cells.len(), 8);
        for agent in world.agents() {
            assert_eq!(world.occupant(agent.pos()), Some(agent.id()));
        }
    }

    #[test]
    fn reset_scatters_floor_of_density_times_cells() {
        let mut world = GridWorld::with_seed(small_config(), 2).unwrap();
        world.reset(0.25, PopulationStrategy::RandomWalk, 0.5).unwrap();
        assert_eq!(world.resource_count(), 25);

        world.reset(0.0, PopulationStrategy::RandomWalk, 0.5).unwrap();
        assert_eq!(world.resource_count(), 0);
    }

    #[test]
    fn reset_rejects_bad_density() {
        let mut world = GridWorld::with_seed(small_config(), 3).unwrap();
        assert!(world.reset(1.2, PopulationStrategy::RandomWalk, 0.5).is_err());
    }

    #[test]
    fn mixed_population_uses_ratio() {
        let mut world = GridWorld::with_seed(small_config(), 4).unwrap();
        world.reset(0.1, PopulationStrategy::Mixed, 0.25).unwrap();
        let coop = world.agents().iter().filter(|a| a.strategy().is_cooperative()).count();
        assert_eq!(coop, 2);
        assert_eq!(world.agents().len() - coop, 6);
    }

    #[test]
    fn same_seed_replays_identically() {
        let run = |seed| {
            let mut world = GridWorld::with_seed(small_config(), seed).unwrap();
            world.reset(0.2, PopulationStrategy::Mixed, 0.5).unwrap();
            world.run()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn agents_stay_in_bounds() {
        let config = small_config();
        let mut world = GridWorld::with_seed(config.clone(), 5).unwrap();
        world.reset(0.3, PopulationStrategy::RandomWalk, 0.5).unwrap();
        for _ in 0..50 {
            world.step();
            for agent in world.agents() {
                assert!(agent.pos().x < config.grid_size);
                assert!(agent.pos().y < config.grid_size);
                assert!(agent.energy() <= config.max_energy);
            }
        }
    }

    #[test]
    fn run_stops_at_tick_ceiling() {
        let config = WorldConfig {
            max_ticks: 30,
            ..small_config()
        };
        let mut world = GridWorld::with_seed(config, 6).unwrap();
        world.reset(0.5, PopulationStrategy::Cooperative, 0.5).unwrap();
        let stats = world.run();
        assert_eq!(stats.ticks, 30);
        assert!(!world.is_running());
    }

    #[test]
    fn snapshots_start_at_tick_zero_and_follow_interval() {
        let config = WorldConfig {
            max_ticks: 120,
            snapshot_interval: 50,
            ..small_config()
        };
        let mut world = GridWorld::with_seed(config, 7).unwrap();
        world.reset(1.0, PopulationStrategy::RandomWalk, 0.5).unwrap();
        world.run();

        let ticks: Vec<_> = world.snapshots().iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![0, 50, 100]);
        assert_eq!(world.snapshots()[0].population, 8);
    }

    #[test]
    fn resources_rescatter_on_period() {
        let config = WorldConfig {
            agent_count: 0,
            resource_respawn_interval: 5,
            ..small_config()
        };
        let mut world = GridWorld::with_seed(config, 8).unwrap();
        world.reset(0.1, PopulationStrategy::RandomWalk, 0.5).unwrap();
        for x in 0..10 {
            for y in 0..10 {
                world.set_resource(GridPos::new(x, y), false).unwrap();
            }
        }
        world
            .spawn(Agent::new(AgentId(0), GridPos::new(0, 0), Strategy::RandomWalk, 100.0))
            .unwrap();

        for _ in 0..4 {
            world.step();
        }
        assert_eq!(world.resource_count(), 0);
        world.step();
        assert_eq!(world.resource_count(), 10);
    }

    #[test]
    fn spawn_rejects_off_grid_positions() {
        let mut world = GridWorld::with_seed(small_config(), 9).unwrap();
        let agent = Agent::new(AgentId(0), GridPos::new(10, 0), Strategy::RandomWalk, 100.0);
        assert!(world.spawn(agent).is_err());
    }

    #[test]
    fn off_grid_cells_do_not_wrap_onto_the_next_row() {
        let config = WorldConfig {
            agent_count: 0,
            ..small_config()
        };
        let mut world = GridWorld::with_seed(config, 10).unwrap();
        world.reset(0.0, PopulationStrategy::RandomWalk, 0.5).unwrap();
        world
            .spawn(Agent::new(AgentId(3), GridPos::new(0, 1), Strategy::RandomWalk, 100.0))
            .unwrap();

        // (10, 0) would alias (0, 1) on a 10-wide grid.
        assert_eq!(world.occupant(GridPos::new(0, 1)), Some(AgentId(3)));
        assert_eq!(world.occupant(GridPos::new(10, 0)), None);
        assert!(world.set_resource(GridPos::new(10, 0), true).is_err());
        assert_eq!(world.resource_count(), 0);
    }
}
