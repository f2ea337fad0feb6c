//! Deep Q-learning trainer.
//!
//! Each episode runs a fresh world whose policy-driven agents all share the
//! online policy. After every tick the agents' turns become transitions in
//! the replay buffer; once the buffer holds more than a batch, one Adam step
//! is taken per tick against targets from a periodically synced copy of the
//! policy. ε decays once per tick and carries over between episodes.

use crate::world::GridWorld;
use commons_agents::policy::{Adam, Policy, QTarget, DEFAULT_HIDDEN_SIZE};
use commons_agents::training::{
    EpsilonSchedule, ReplayBuffer, RewardFunction, Transition, BATCH_SIZE, EPSILON_DECAY, EPSILON_END,
    EPSILON_START, GAMMA, LEARNING_RATE, REPLAY_CAPACITY, TARGET_SYNC_INTERVAL,
};
use commons_core::config::{validate_density, WorldConfig};
use commons_core::error::{CommonsError, Result};
use commons_core::types::PopulationStrategy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Episodes averaged in [`EpisodeStats::avg_reward`].
pub const REWARD_WINDOW: usize = 100;

/// Q-learning hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Population trained (default: cooperative). Each agent is rewarded
    /// by its own strategy's reward function.
    #[serde(default = "default_strategy")]
    pub strategy: PopulationStrategy,
    /// Resource density of training worlds (default: 0.20).
    #[serde(default = "default_resource_density")]
    pub resource_density: f64,
    /// Cooperative share when training a mixed population (default: 0.5).
    #[serde(default = "default_mixed_ratio")]
    pub mixed_ratio: f64,
    /// Tick ceiling per episode; the world's own ceiling when absent.
    #[serde(default)]
    pub max_ticks: Option<u64>,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_gamma")]
    pub gamma: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    #[serde(default = "default_epsilon_start")]
    pub epsilon_start: f64,
    #[serde(default = "default_epsilon_end")]
    pub epsilon_end: f64,
    #[serde(default = "default_epsilon_decay")]
    pub epsilon_decay: f64,
    /// Optimiser steps between target syncs (default: 100).
    #[serde(default = "default_target_sync_interval")]
    pub target_sync_interval: u64,
    /// Seed for initialisation, exploration, and episode worlds.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_strategy() -> PopulationStrategy { PopulationStrategy::Cooperative }
fn default_resource_density() -> f64 { 0.20 }
fn default_mixed_ratio() -> f64 { 0.5 }
fn default_hidden_size() -> usize { DEFAULT_HIDDEN_SIZE }
fn default_learning_rate() -> f32 { LEARNING_RATE }
fn default_gamma() -> f32 { GAMMA }
fn default_batch_size() -> usize { BATCH_SIZE }
fn default_replay_capacity() -> usize { REPLAY_CAPACITY }
fn default_epsilon_start() -> f64 { EPSILON_START }
fn default_epsilon_end() -> f64 { EPSILON_END }
fn default_epsilon_decay() -> f64 { EPSILON_DECAY }
fn default_target_sync_interval() -> u64 { TARGET_SYNC_INTERVAL }

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            resource_density: default_resource_density(),
            mixed_ratio: default_mixed_ratio(),
            max_ticks: None,
            hidden_size: default_hidden_size(),
            learning_rate: default_learning_rate(),
            gamma: default_gamma(),
            batch_size: default_batch_size(),
            replay_capacity: default_replay_capacity(),
            epsilon_start: default_epsilon_start(),
            epsilon_end: default_epsilon_end(),
            epsilon_decay: default_epsilon_decay(),
            target_sync_interval: default_target_sync_interval(),
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.strategy == PopulationStrategy::RandomWalk {
            return Err(CommonsError::invalid_config(
                "strategy",
                self.strategy.label(),
                "random walkers have no policy to train",
            ));
        }
        validate_density(self.resource_density)?;
        if !(0.0..=1.0).contains(&self.mixed_ratio) {
            return Err(CommonsError::out_of_range("mixed_ratio", 0.0, 1.0, self.mixed_ratio));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(CommonsError::out_of_range("gamma", 0.0, 1.0, self.gamma as f64));
        }
        if !(0.0..=1.0).contains(&self.epsilon_start) {
            return Err(CommonsError::out_of_range("epsilon_start", 0.0, 1.0, self.epsilon_start));
        }
        if !(0.0..=self.epsilon_start).contains(&self.epsilon_end) {
            return Err(CommonsError::out_of_range(
                "epsilon_end",
                0.0,
                self.epsilon_start,
                self.epsilon_end,
            ));
        }
        if !(0.0..=1.0).contains(&self.epsilon_decay) {
            return Err(CommonsError::out_of_range("epsilon_decay", 0.0, 1.0, self.epsilon_decay));
        }
        if self.learning_rate <= 0.0 {
            return Err(CommonsError::invalid_config(
                "learning_rate",
                self.learning_rate.to_string(),
                "must be positive",
            ));
        }
        let positive = [
            ("hidden_size", self.hidden_size as u64),
            ("batch_size", self.batch_size as u64),
            ("replay_capacity", self.replay_capacity as u64),
            ("target_sync_interval", self.target_sync_interval),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(CommonsError::invalid_config(*field, "0", "must be at least 1"));
        }
        Ok(())
    }
}

/// Summary of one training episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeStats {
    pub episode: u64,
    /// Sum of every agent's reward over the episode.
    pub episode_reward: f64,
    pub steps: u64,
    /// ε at the end of the episode.
    pub epsilon: f64,
    /// Mean episode reward over the last [`REWARD_WINDOW`] episodes.
    pub avg_reward: f64,
    /// Mean training loss, if any optimiser step ran.
    pub loss: Option<f32>,
    pub survivors: usize,
}

pub struct DqnTrainer {
    config: TrainingConfig,
    world: WorldConfig,
    policy: Policy,
    target: Policy,
    optimizer: Adam,
    replay: ReplayBuffer,
    epsilon: EpsilonSchedule,
    train_steps: u64,
    episodes: u64,
    recent_rewards: VecDeque<f64>,
    rng: ChaCha12Rng,
}

impl DqnTrainer {
    /// Trainer with a freshly initialised policy.
    pub fn new(config: TrainingConfig, world: WorldConfig) -> Result<Self> {
        config.validate()?;
        world.validate()?;
        let mut rng = ChaCha12Rng::seed_from_u64(config.seed.unwrap_or_else(rand::random));
        let policy = Policy::for_world(&world, config.hidden_size, &mut rng);
        Ok(Self::assemble(config, world, policy, rng))
    }

    /// Continue training an existing policy.
    pub fn with_policy(config: TrainingConfig, world: WorldConfig, policy: Policy) -> Result<Self> {
        config.validate()?;
        world.validate()?;
        if policy.input_size() != world.observation_size() {
            return Err(CommonsError::invalid_config(
                "policy",
                policy.input_size().to_string(),
                format!("world observations have {} inputs", world.observation_size()),
            ));
        }
        let rng = ChaCha12Rng::seed_from_u64(config.seed.unwrap_or_else(rand::random));
        Ok(Self::assemble(config, world, policy, rng))
    }

    fn assemble(config: TrainingConfig, world: WorldConfig, policy: Policy, rng: ChaCha12Rng) -> Self {
        Self {
            target: policy.clone(),
            optimizer: Adam::new(&policy, config.learning_rate),
            replay: ReplayBuffer::new(config.replay_capacity),
            epsilon: EpsilonSchedule::new(config.epsilon_start, config.epsilon_end, config.epsilon_decay),
            policy,
            config,
            world,
            train_steps: 0,
            episodes: 0,
            recent_rewards: VecDeque::with_capacity(REWARD_WINDOW),
            rng,
        }
    }

    /// Run one episode, learning as it goes.
    pub fn train_episode(&mut self) -> Result<EpisodeStats> {
        let mut world_config = self.world.clone();
        if let Some(ticks) = self.config.max_ticks {
            world_config.max_ticks = ticks;
        }
        let mut world = GridWorld::with_seed(world_config, self.rng.random())?;
        world.bind_policy(Arc::new(self.policy.clone()));
        world.reset(self.config.resource_density, self.config.strategy, self.config.mixed_ratio)?;
        world.set_exploration(self.epsilon.value());

        let mut episode_reward = 0.0;
        let mut steps = 0u64;
        let mut losses = Vec::new();

        while world.is_running() {
            let (_, turns) = world.step_recorded();
            steps += 1;

            for turn in turns.into_iter().filter(|t| t.strategy.is_policy_driven()) {
                let reward = RewardFunction::for_strategy(turn.strategy).reward(&turn.outcome);
                episode_reward += reward;
                let done = turn.next_observation.is_none();
                let next_state = turn
                    .next_observation
                    .unwrap_or_else(|| vec![0.0; turn.observation.len()]);
                self.replay.push(Transition {
                    state: turn.observation,
                    action: turn.action,
                    reward,
                    next_state,
                    done,
                });
            }

            if self.replay.len() > self.config.batch_size {
                losses.push(self.train_step());
                world.bind_policy(Arc::new(self.policy.clone()));
            }

            world.set_exploration(self.epsilon.decay());
        }

        self.episodes += 1;
        if self.recent_rewards.len() == REWARD_WINDOW {
            self.recent_rewards.pop_front();
        }
        self.recent_rewards.push_back(episode_reward);

        let stats = EpisodeStats {
            episode: self.episodes,
            episode_reward,
            steps,
            epsilon: self.epsilon.value(),
            avg_reward: self.recent_rewards.iter().sum::<f64>() / self.recent_rewards.len() as f64,
            loss: (!losses.is_empty()).then(|| losses.iter().sum::<f32>() / losses.len() as f32),
            survivors: world.alive_count(),
        };
        debug!(
            episode = stats.episode,
            reward = stats.episode_reward,
            steps = stats.steps,
            epsilon = stats.epsilon,
            "episode finished"
        );
        Ok(stats)
    }

    /// Train for `episodes` episodes, calling `on_episode` after each.
    pub fn train(&mut self, episodes: u64, mut on_episode: impl FnMut(&EpisodeStats)) -> Result<Vec<EpisodeStats>> {
        info!(
            strategy = %self.config.strategy,
            density = self.config.resource_density,
            episodes,
            "training started"
        );
        let mut history = Vec::with_capacity(episodes as usize);
        for _ in 0..episodes {
            let stats = self.train_episode()?;
            if stats.episode % 10 == 0 {
                info!(
                    episode = stats.episode,
                    reward = stats.episode_reward,
                    avg_reward = stats.avg_reward,
                    epsilon = stats.epsilon,
                    "training progress"
                );
            }
            on_episode(&stats);
            history.push(stats);
        }
        info!(train_steps = self.train_steps, "training finished");
        Ok(history)
    }

    /// One Adam step on a sampled batch.
    fn train_step(&mut self) -> f32 {
        let batch = self.replay.sample(self.config.batch_size, &mut self.rng);
        let targets: Vec<f32> = batch
            .iter()
            .map(|t| {
                let next = if t.done {
                    0.0
                } else {
                    self.target
                        .forward(&t.next_state)
                        .into_iter()
                        .fold(f32::NEG_INFINITY, f32::max)
                };
                t.reward as f32 + self.config.gamma * next
            })
            .collect();
        let samples: Vec<QTarget<'_>> = batch
            .iter()
            .zip(&targets)
            .map(|(t, &target)| QTarget {
                observation: &t.state,
                action: t.action,
                target,
            })
            .collect();

        let loss = self.policy.fit_q_targets(&samples, &mut self.optimizer, &mut self.rng);
        self.train_steps += 1;
        if self.train_steps % self.config.target_sync_interval == 0 {
            self.target = self.policy.clone();
            debug!(train_steps = self.train_steps, "target policy synced");
        }
        loss
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn into_policy(self) -> Policy {
        self.policy
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon.value()
    }

    /// Transitions currently held for replay.
    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    /// Optimiser steps taken so far.
    pub fn train_steps(&self) -> u64 {
        self.train_steps
    }
}
