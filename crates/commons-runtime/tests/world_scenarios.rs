//! World scenarios
//!
//! End-to-end checks of the tick loop:
//! 1. With no resource every agent starves on schedule
//! 2. A cooperative interaction moves exactly the configured energy
//! 3. An aggressive interaction steals the configured fraction
//! 4. A policy-driven evaluation produces a consistent fitness
//! 5. Recorded turns report what each agent did and saw

use commons_agents::agent::Agent;
use commons_agents::genome::WeightArray;
use commons_agents::policy::Policy;
use commons_core::config::WorldConfig;
use commons_core::types::*;
use commons_runtime::evaluation::EvaluationRun;
use commons_runtime::world::GridWorld;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// A policy that always chooses `Interact`.
fn always_interact(config: &WorldConfig) -> Arc<Policy> {
    let mut policy = Policy::zeroed(config.observation_size(), 8);
    let mut weights = policy.export_weights();
    weights.insert(
        "fc3.bias".to_string(),
        WeightArray::Vector(vec![0.0, 0.0, 0.0, 0.0, 1.0]),
    );
    policy.import_weights(&weights).unwrap();
    Arc::new(policy)
}

fn empty_world(config: WorldConfig) -> GridWorld {
    let mut world = GridWorld::with_seed(WorldConfig { agent_count: 0, ..config }, 17).unwrap();
    world.reset(0.0, PopulationStrategy::RandomWalk, 0.5).unwrap();
    world
}

#[test]
fn starvation_without_resource() {
    let config = WorldConfig::default();
    let mut world = GridWorld::with_seed(config.clone(), 3).unwrap();
    world.reset(0.0, PopulationStrategy::RandomWalk, 0.5).unwrap();
    assert_eq!(world.resource_count(), 0);

    let mut last: HashMap<AgentId, f64> =
        world.agents().iter().map(|a| (a.id(), a.energy())).collect();

    while world.is_running() {
        world.step();
        for agent in world.agents() {
            let previous = last[&agent.id()];
            assert!(agent.energy() < previous, "{} did not lose energy", agent.id());
            last.insert(agent.id(), agent.energy());
        }
    }

    let expected_ticks = (config.initial_energy / config.energy_decay).ceil() as u64;
    assert_eq!(world.tick(), expected_ticks);
    assert_eq!(world.alive_count(), 0);
    assert_eq!(world.stats().survivors, 0);
    assert_eq!(world.stats().avg_energy, 0.0);
}

#[test]
fn cooperative_share_transfers_fixed_amount() {
    let config = WorldConfig::default();
    let policy = always_interact(&config);
    let mut world = empty_world(config.clone());

    let donor = Agent::new(AgentId(0), GridPos::new(5, 5), Strategy::CooperativePolicy, 100.0)
        .with_policy(Arc::clone(&policy));
    let needy = Agent::new(AgentId(1), GridPos::new(6, 5), Strategy::CooperativePolicy, 20.0)
        .with_policy(Arc::clone(&policy));
    let distant = Agent::new(AgentId(2), GridPos::new(9, 5), Strategy::CooperativePolicy, 20.0)
        .with_policy(Arc::clone(&policy));
    world.spawn(donor).unwrap();
    world.spawn(needy).unwrap();
    world.spawn(distant).unwrap();

    world.step();

    let decay = config.energy_decay;
    let energy = |id| world.agent(AgentId(id)).unwrap().energy();
    assert_eq!(energy(0), 100.0 - config.share_cost - decay);
    assert_eq!(energy(1), 20.0 + config.share_amount - decay);
    assert_eq!(energy(2), 20.0 - decay);
}

#[test]
fn aggressive_attack_steals_fraction() {
    let config = WorldConfig::default();
    let policy = always_interact(&config);
    let mut world = empty_world(config.clone());

    let attacker = Agent::new(AgentId(0), GridPos::new(10, 10), Strategy::AggressivePolicy, 50.0)
        .with_policy(policy);
    let victim = Agent::new(AgentId(1), GridPos::new(11, 11), Strategy::RandomWalk, 20.0);
    world.spawn(attacker).unwrap();
    world.spawn(victim).unwrap();

    world.step();

    let energy = |id| world.agent(AgentId(id)).unwrap().energy();
    assert_eq!(energy(0), 50.0 - 5.0 + 6.0 - config.energy_decay);
    assert_eq!(energy(1), 20.0 - 6.0 - config.energy_decay);
}

#[test]
fn genetic_evaluation_reports_consistent_fitness() {
    let config = WorldConfig {
        grid_size: 20,
        agent_count: 15,
        max_ticks: 300,
        ..WorldConfig::default()
    };
    let mut rng = ChaCha12Rng::seed_from_u64(5);
    let policy = Arc::new(Policy::for_world(&config, 16, &mut rng));

    let result = EvaluationRun::new(config.clone(), 0.2, PopulationStrategy::Genetic)
        .with_policy(policy)
        .with_seed(Some(99))
        .execute()
        .unwrap();

    assert!(result.stats.ticks > 0 && result.stats.ticks <= config.max_ticks);
    assert!(result.fitness() >= result.stats.ticks as f64);
    assert!((0.0..1.0).contains(&result.stats.gini));
    assert_eq!(result.snapshots[0].tick, 0);
    assert_eq!(result.snapshots[0].coop_count, 15);
    assert_eq!(result.batch_result("local").agent_strategy, "genetic");
}

#[test]
fn recorded_turns_capture_attacks_and_deaths() {
    let config = WorldConfig::default();
    let policy = always_interact(&config);
    let mut world = empty_world(config.clone());

    let attacker = Agent::new(AgentId(0), GridPos::new(10, 10), Strategy::AggressivePolicy, 50.0)
        .with_policy(policy);
    let victim = Agent::new(AgentId(1), GridPos::new(11, 11), Strategy::RandomWalk, 0.6);
    world.spawn(attacker).unwrap();
    world.spawn(victim).unwrap();

    let (report, turns) = world.step_recorded();
    assert_eq!(report.died, 1);
    assert_eq!(turns.len(), 2);

    let attack = &turns[0];
    assert_eq!(attack.agent, AgentId(0));
    assert_eq!(attack.action, Action::Interact);
    assert!(attack.outcome.attacked && !attack.outcome.shared && !attack.outcome.ate);
    assert_eq!(attack.outcome.prev_energy, 50.0);
    assert!((attack.outcome.energy - (50.0 - 5.0 + 0.18 - 0.5)).abs() < 1e-9);
    assert!(!attack.outcome.died);
    assert_eq!(
        attack.next_observation.as_ref().map(Vec::len),
        Some(config.observation_size())
    );

    let death = &turns[1];
    assert_eq!(death.agent, AgentId(1));
    assert_eq!(death.outcome.prev_energy, 0.6);
    assert!(death.outcome.died);
    assert!(death.next_observation.is_none());
    assert_eq!(world.alive_count(), 1);
}

#[test]
fn exploration_randomises_policy_agents() {
    let config = WorldConfig::default();
    let policy = always_interact(&config);
    let mut world = empty_world(config);
    world
        .spawn(Agent::new(AgentId(0), GridPos::new(5, 5), Strategy::CooperativePolicy, 200.0).with_policy(policy))
        .unwrap();

    let (_, greedy) = world.step_recorded();
    assert_eq!(greedy[0].action, Action::Interact);

    world.set_exploration(2.0);
    assert_eq!(world.exploration(), 1.0);
    let actions: std::collections::HashSet<Action> =
        (0..100).map(|_| world.step_recorded().1[0].action).collect();
    assert!(actions.len() > 1);
}
