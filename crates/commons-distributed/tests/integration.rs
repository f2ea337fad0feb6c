//! End-to-end integration tests for distributed evolution.
//!
//! Tests the full lifecycle over a real store: concurrent leasing from
//! several connections, generation bookkeeping, elitist breeding, and
//! workers evaluating genomes and reporting fitness.

use commons_agents::genome::{WeightArray, WeightMap};
use commons_core::config::WorldConfig;
use commons_core::types::PopulationStrategy;
use commons_distributed::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

/// Helper: a small world so evaluations finish quickly.
fn small_world() -> WorldConfig {
    WorldConfig {
        grid_size: 12,
        agent_count: 6,
        ..WorldConfig::default()
    }
}

/// Helper: evolution settings for a ten-genome population.
fn small_evolution() -> EvolutionConfig {
    EvolutionConfig {
        population_size: 10,
        elite_fraction: 0.2,
        ticks_per_eval: 40,
        hidden_size: 4,
        seed: Some(7),
        ..EvolutionConfig::default()
    }
}

fn memory_store() -> Arc<dyn EvolutionStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

/// Helper: finish every pending job, assigning fitness by position.
fn finish_generation_by_hand(store: &Arc<dyn EvolutionStore>, generation: GenerationId) -> Vec<GenomeRecord> {
    let queue = JobQueue::new(Arc::clone(store));
    let genomes = store.genomes_for_generation(generation).unwrap();
    for (i, genome) in genomes.iter().enumerate() {
        store.set_fitness(genome.id, (i * 10) as f64).unwrap();
    }
    while let Some(job) = queue.lease("hand") {
        queue.complete(job.id).unwrap();
    }
    store.genomes_for_generation(generation).unwrap()
}

#[test]
fn concurrent_lease_has_a_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evolution.db");
    let store = SqliteStore::open(&path).unwrap();
    store.insert_jobs(&[Job::new(None, JobParams::genetic(0.2, 10))]).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store: Arc<dyn EvolutionStore> = Arc::new(SqliteStore::open(&path).unwrap());
                let queue = JobQueue::new(store);
                barrier.wait();
                queue.lease(&format!("worker-{i}"))
            })
        })
        .collect();

    let leased: Vec<Job> = handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].status, JobStatus::Processing);
}

#[test]
fn concurrent_workers_never_share_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evolution.db");
    let store = SqliteStore::open(&path).unwrap();
    let jobs: Vec<Job> = (0..20)
        .map(|_| Job::new(None, JobParams::genetic(0.2, 10)))
        .collect();
    store.insert_jobs(&jobs).unwrap();

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store: Arc<dyn EvolutionStore> = Arc::new(SqliteStore::open(&path).unwrap());
                let queue = JobQueue::new(Arc::clone(&store));
                barrier.wait();
                let mut mine = Vec::new();
                while store.next_pending_job().unwrap().is_some() {
                    if let Some(job) = queue.lease(&format!("worker-{i}")) {
                        mine.push(job.id);
                    }
                }
                mine
            })
        })
        .collect();

    let all: Vec<JobId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let unique: HashSet<JobId> = all.iter().copied().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[test]
fn generation_zero_has_one_pending_job_per_genome() {
    let store = memory_store();
    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();

    let generation = orchestrator.init_generation_zero().unwrap();
    let genomes = store.genomes_for_generation(generation).unwrap();
    assert_eq!(genomes.len(), 10);
    assert!(genomes.iter().all(|g| g.fitness_score == 0.0 && !g.is_elite));

    let counts = store.job_counts(generation).unwrap();
    assert_eq!(counts.pending, 10);
    assert!(!orchestrator.check_generation_complete().unwrap());
}

#[test]
fn check_without_generation_is_false() {
    let store = memory_store();
    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    assert!(!orchestrator.check_generation_complete().unwrap());
    assert!(matches!(
        orchestrator.evolve_next_generation(),
        Err(OrchestratorError::NoActiveGeneration)
    ));

    // An active generation without genomes is not complete either.
    store.create_generation().unwrap();
    assert!(!orchestrator.check_generation_complete().unwrap());
}

#[test]
fn elites_are_the_top_genomes_unchanged() {
    let store = memory_store();
    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    let first = orchestrator.init_generation_zero().unwrap();
    let evaluated = finish_generation_by_hand(&store, first);

    assert!(orchestrator.check_generation_complete().unwrap());
    let report = orchestrator.evolve_next_generation().unwrap();

    assert_eq!(report.previous, first);
    assert_eq!(report.best_fitness, 90.0);
    assert_eq!(report.avg_fitness, 45.0);
    assert_eq!(report.elites.len(), 2);
    assert_eq!(report.children, 8);

    let mut ranked = evaluated.clone();
    ranked.sort_by(|a, b| b.fitness_score.total_cmp(&a.fitness_score));
    let next = store.genomes_for_generation(report.next).unwrap();
    let elites: Vec<&GenomeRecord> = next.iter().filter(|g| g.is_elite).collect();
    assert_eq!(elites.len(), 2);
    for (elite, parent) in elites.iter().zip(&ranked[..2]) {
        assert_eq!(elite.weights, parent.weights);
        assert_eq!(elite.fitness_score, 0.0);
    }

    let closed = store.get_generation(first).unwrap().unwrap();
    assert_eq!(closed.status, GenerationStatus::Completed);
    assert_eq!(closed.best_fitness, Some(90.0));
}

#[test]
fn evolution_conserves_population_size() {
    let store = memory_store();
    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    let mut generation = orchestrator.init_generation_zero().unwrap();

    for _ in 0..3 {
        finish_generation_by_hand(&store, generation);
        let report = orchestrator.step().unwrap().expect("generation should be complete");
        generation = report.next;

        let genomes = store.genomes_for_generation(generation).unwrap();
        assert_eq!(genomes.len(), 10);
        assert_eq!(genomes.iter().filter(|g| g.is_elite).count(), 2);
        assert!(genomes.iter().all(|g| g.fitness_score == 0.0));
        assert_eq!(store.job_counts(generation).unwrap().pending, 10);
    }

    let active: Vec<_> = store
        .list_generations()
        .unwrap()
        .into_iter()
        .filter(|g| g.status == GenerationStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, generation);
}

#[test]
fn fresh_orchestrator_adopts_active_generation() {
    let store = memory_store();
    let generation = EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world())
        .unwrap()
        .init_generation_zero()
        .unwrap();

    let mut restarted =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    assert_eq!(restarted.current_generation(), None);
    assert!(!restarted.check_generation_complete().unwrap());
    assert_eq!(restarted.current_generation(), Some(generation));
}

#[test]
fn stale_orchestrator_follows_instead_of_breeding() {
    let store = memory_store();
    let mut looping =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    let mut one_shot =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();

    let first = one_shot.init_generation_zero().unwrap();
    assert!(!looping.check_generation_complete().unwrap());
    assert_eq!(looping.current_generation(), Some(first));

    finish_generation_by_hand(&store, first);
    let second = one_shot.step().unwrap().expect("first generation is complete").next;

    // The looping orchestrator still tracks the closed generation.
    assert!(looping.step().unwrap().is_none());
    assert_eq!(looping.current_generation(), Some(second));

    finish_generation_by_hand(&store, second);
    one_shot.step().unwrap().expect("second generation is complete");
    assert!(matches!(
        looping.evolve_next_generation(),
        Err(OrchestratorError::GenerationNotActive(id)) if id == second
    ));
    assert_eq!(looping.current_generation(), None);

    let generations = store.list_generations().unwrap();
    assert_eq!(generations.len(), 3);
    let active = generations.iter().filter(|g| g.status == GenerationStatus::Active).count();
    assert_eq!(active, 1);
}

#[test]
fn generation_zero_is_refused_while_one_is_active() {
    let store = memory_store();
    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    orchestrator.init_generation_zero().unwrap();
    assert!(matches!(
        orchestrator.init_generation_zero(),
        Err(OrchestratorError::Store(StoreError::ActiveGenerationExists(_)))
    ));
    assert_eq!(store.list_generations().unwrap().len(), 1);
}

#[test]
fn genomes_without_jobs_keep_the_generation_open() {
    let store = memory_store();
    let generation = store.create_generation().unwrap();
    let mut weights = WeightMap::new();
    weights.insert("fc1.bias".into(), WeightArray::Vector(vec![0.0; 4]));
    let genomes = vec![
        GenomeRecord::new(generation.id, weights.clone()),
        GenomeRecord::new(generation.id, weights),
    ];
    store.insert_genomes(&genomes).unwrap();
    let job = Job::new(Some(genomes[0].id), JobParams::genetic(0.2, 10));
    store.insert_jobs(std::slice::from_ref(&job)).unwrap();
    store.try_claim_job(job.id, "hand").unwrap();
    store.finish_job(job.id, JobStatus::Completed, None).unwrap();

    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), small_world()).unwrap();
    assert_eq!(store.job_counts(generation.id).unwrap().outstanding(), 0);
    assert!(!orchestrator.check_generation_complete().unwrap());
    assert!(orchestrator.step().unwrap().is_none());
}

#[test]
fn workers_evaluate_a_whole_generation() {
    let store = memory_store();
    let world = small_world();
    let mut orchestrator =
        EvolutionOrchestrator::new(Arc::clone(&store), small_evolution(), world.clone()).unwrap();
    let generation = orchestrator.init_generation_zero().unwrap();

    let worker = Worker::new("worker-a", Arc::clone(&store), world);
    let steps = worker.drain();
    assert_eq!(steps.len(), 10);
    assert!(steps.iter().all(|s| matches!(s, WorkerStep::Completed { .. })));
    assert_eq!(worker.run_once(), WorkerStep::Idle);

    let genomes = store.genomes_for_generation(generation).unwrap();
    assert!(genomes.iter().all(|g| g.fitness_score > 0.0));

    let batches = store.batch_results().unwrap();
    assert_eq!(batches.len(), 10);
    assert!(batches.iter().all(|b| b.machine_id == "worker-a" && b.agent_strategy == "genetic"));
    let series = store.time_series(batches[0].simulation_id).unwrap();
    assert_eq!(series[0].tick, 0);

    let summary = orchestrator.status().unwrap();
    assert_eq!(summary[0].jobs.completed, 10);
    assert!(orchestrator.step().unwrap().is_some());
}

#[test]
fn missing_genome_fails_the_job() {
    let store = memory_store();
    let job = Job::new(Some(GenomeId::new()), JobParams::genetic(0.2, 10));
    store.insert_jobs(std::slice::from_ref(&job)).unwrap();

    let worker = Worker::new("worker-b", Arc::clone(&store), small_world());
    let step = worker.run_once();
    assert!(matches!(step, WorkerStep::Failed { job: id, .. } if id == job.id));

    let failed = store.get_job(job.id).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("Could not load weights"));
    assert_eq!(worker.run_once(), WorkerStep::Idle);
}

#[test]
fn malformed_genome_fails_the_job() {
    let store = memory_store();
    let generation = store.create_generation().unwrap();
    let mut weights = WeightMap::new();
    weights.insert("fc1.weight".into(), WeightArray::Matrix(vec![vec![0.0; 51]; 4]));
    let genome = GenomeRecord::new(generation.id, weights);
    store.insert_genomes(std::slice::from_ref(&genome)).unwrap();
    let job = Job::new(Some(genome.id), JobParams::genetic(0.2, 10));
    store.insert_jobs(std::slice::from_ref(&job)).unwrap();

    let worker = Worker::new("worker-c", Arc::clone(&store), small_world());
    assert!(matches!(worker.run_once(), WorkerStep::Failed { .. }));
    assert_eq!(store.get_job(job.id).unwrap().unwrap().status, JobStatus::Failed);
    assert_eq!(store.get_genome(genome.id).unwrap().unwrap().fitness_score, 0.0);
}

#[test]
fn strategy_jobs_run_without_a_genome() {
    let store = memory_store();
    let params = JobParams {
        resource_density: 0.3,
        agent_strategy: PopulationStrategy::Mixed,
        max_ticks: 25,
        mixed_ratio: 0.5,
        seed: Some(3),
    };
    store.insert_jobs(&[Job::new(None, params)]).unwrap();

    let worker = Worker::new("worker-d", Arc::clone(&store), small_world());
    assert!(matches!(worker.run_once(), WorkerStep::Completed { .. }));

    let batches = store.batch_results().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].agent_strategy, "mixed");
    assert!(batches[0].total_ticks_survived <= 25);
}
