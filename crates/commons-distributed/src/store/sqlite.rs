//! SQLite-backed implementation of the EvolutionStore trait.
//!
//! Weights and job parameters are stored as JSON text. The database runs in
//! WAL mode with a busy timeout so independent worker processes can share
//! one file.

use super::EvolutionStore;
use crate::types::*;
use commons_runtime::evaluation::BatchResult;
use commons_runtime::metrics::Snapshot;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const GENERATION_COLUMNS: &str = "id, status, avg_fitness, best_fitness, created_at";
const GENOME_COLUMNS: &str = "id, generation_id, weights, fitness_score, is_elite";
const JOB_COLUMNS: &str =
    "id, status, genome_id, params, assigned_to, started_at, completed_at, error, created_at";

/// SQLite-backed evolution store.
///
/// One connection per store, guarded by a mutex. Processes that share the
/// database each open their own store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_with_connection(conn)
    }

    /// Create or open a file-backed store.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'active',
                avg_fitness REAL,
                best_fitness REAL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS genomes (
                id TEXT PRIMARY KEY,
                generation_id INTEGER NOT NULL,
                weights TEXT NOT NULL,
                fitness_score REAL NOT NULL DEFAULT 0,
                is_elite INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (generation_id) REFERENCES generations(id)
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                genome_id TEXT,
                params TEXT NOT NULL,
                assigned_to TEXT,
                started_at INTEGER,
                completed_at INTEGER,
                error TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS batch_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                simulation_id TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                agent_strategy TEXT NOT NULL,
                resource_density REAL NOT NULL,
                total_ticks_survived INTEGER NOT NULL,
                avg_agent_energy REAL NOT NULL,
                simulation_version TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS time_series (
                simulation_id TEXT NOT NULL,
                tick INTEGER NOT NULL,
                population INTEGER NOT NULL,
                coop_count INTEGER NOT NULL,
                aggressive_count INTEGER NOT NULL,
                gini_coefficient REAL NOT NULL,
                avg_energy REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_genomes_generation ON genomes(generation_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_genome ON jobs(genome_id);
            CREATE INDEX IF NOT EXISTS idx_time_series_sim ON time_series(simulation_id);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

type GenerationRow = (i64, String, Option<f64>, Option<f64>, i64);
type GenomeRow = (String, i64, String, f64, bool);
type JobRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    i64,
);

fn generation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn genome_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenomeRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("invalid id {s:?}: {e}")))
}

fn to_generation((id, status, avg, best, created_at): GenerationRow) -> StoreResult<Generation> {
    let status = GenerationStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("generation {id} has status {status:?}")))?;
    Ok(Generation {
        id: GenerationId(id),
        status,
        avg_fitness: avg,
        best_fitness: best,
        created_at,
    })
}

fn to_genome((id, generation_id, weights, fitness, elite): GenomeRow) -> StoreResult<GenomeRecord> {
    Ok(GenomeRecord {
        id: GenomeId(parse_uuid(&id)?),
        generation_id: GenerationId(generation_id),
        weights: serde_json::from_str(&weights)?,
        fitness_score: fitness,
        is_elite: elite,
    })
}

fn to_job(row: JobRow) -> StoreResult<Job> {
    let (id, status, genome_id, params, assigned_to, started_at, completed_at, error, created_at) = row;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("job {id} has status {status:?}")))?;
    Ok(Job {
        id: JobId(parse_uuid(&id)?),
        status,
        genome_id: genome_id.as_deref().map(parse_uuid).transpose()?.map(GenomeId),
        params: serde_json::from_str(&params)?,
        assigned_to,
        started_at,
        completed_at,
        error,
        created_at,
    })
}

fn insert_generation_row(conn: &Connection) -> StoreResult<Generation> {
    let created_at = now_millis();
    conn.execute(
        "INSERT INTO generations (status, created_at) VALUES (?1, ?2)",
        params![GenerationStatus::Active.as_str(), created_at],
    )?;
    Ok(Generation {
        id: GenerationId(conn.last_insert_rowid()),
        status: GenerationStatus::Active,
        avg_fitness: None,
        best_fitness: None,
        created_at,
    })
}

fn insert_genome_rows(conn: &Connection, genomes: &[GenomeRecord]) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO genomes (id, generation_id, weights, fitness_score, is_elite) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for genome in genomes {
        stmt.execute(params![
            genome.id.to_string(),
            genome.generation_id.0,
            serde_json::to_string(&genome.weights)?,
            genome.fitness_score,
            genome.is_elite,
        ])?;
    }
    Ok(())
}

fn insert_job_rows(conn: &Connection, jobs: &[Job]) -> StoreResult<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))?;
    for job in jobs {
        stmt.execute(params![
            job.id.to_string(),
            job.status.as_str(),
            job.genome_id.map(|g| g.to_string()),
            serde_json::to_string(&job.params)?,
            job.assigned_to,
            job.started_at,
            job.completed_at,
            job.error,
            job.created_at,
        ])?;
    }
    Ok(())
}

impl EvolutionStore for SqliteStore {
    fn create_generation(&self) -> StoreResult<Generation> {
        let conn = self.conn()?;
        insert_generation_row(&conn)
    }

    fn get_generation(&self, id: GenerationId) -> StoreResult<Option<Generation>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {GENERATION_COLUMNS} FROM generations WHERE id = ?1"),
                params![id.0],
                generation_row,
            )
            .optional()?;
        row.map(to_generation).transpose()
    }

    fn latest_active_generation(&self) -> StoreResult<Option<Generation>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {GENERATION_COLUMNS} FROM generations WHERE status = 'active' \
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                [],
                generation_row,
            )
            .optional()?;
        row.map(to_generation).transpose()
    }

    fn list_generations(&self) -> StoreResult<Vec<Generation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {GENERATION_COLUMNS} FROM generations ORDER BY id"))?;
        let rows = stmt.query_map([], generation_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(to_generation).collect()
    }

    fn open_generation(
        &self,
        close: Option<&GenerationClose>,
        genomes: &[GenomeSeed],
        params: &JobParams,
    ) -> StoreResult<GenerationPopulation> {
        let mut conn = self.conn()?;
        // Immediate: take the write lock before reading which generation is active.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(close) = close {
            let changed = tx.execute(
                "UPDATE generations SET status = ?2, avg_fitness = ?3, best_fitness = ?4 \
                 WHERE id = ?1 AND status = 'active'",
                params![
                    close.id.0,
                    GenerationStatus::Completed.as_str(),
                    close.avg_fitness,
                    close.best_fitness
                ],
            )?;
            if changed != 1 {
                return Err(StoreError::GenerationNotActive(close.id));
            }
        }
        let active: Option<i64> = tx
            .query_row(
                "SELECT id FROM generations WHERE status = 'active' ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = active {
            return Err(StoreError::ActiveGenerationExists(GenerationId(id)));
        }

        let generation = insert_generation_row(&tx)?;
        let records: Vec<GenomeRecord> = genomes
            .iter()
            .map(|seed| {
                let mut record = GenomeRecord::new(generation.id, seed.weights.clone());
                record.is_elite = seed.is_elite;
                record
            })
            .collect();
        let jobs: Vec<Job> = records
            .iter()
            .map(|genome| Job::new(Some(genome.id), params.clone()))
            .collect();
        insert_genome_rows(&tx, &records)?;
        insert_job_rows(&tx, &jobs)?;
        tx.commit()?;

        Ok(GenerationPopulation {
            generation,
            genomes: records,
        })
    }

    fn insert_genomes(&self, genomes: &[GenomeRecord]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_genome_rows(&tx, genomes)?;
        tx.commit()?;
        Ok(())
    }

    fn get_genome(&self, id: GenomeId) -> StoreResult<Option<GenomeRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {GENOME_COLUMNS} FROM genomes WHERE id = ?1"),
                params![id.to_string()],
                genome_row,
            )
            .optional()?;
        row.map(to_genome).transpose()
    }

    fn genomes_for_generation(&self, id: GenerationId) -> StoreResult<Vec<GenomeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GENOME_COLUMNS} FROM genomes WHERE generation_id = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![id.0], genome_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(to_genome).collect()
    }

    fn genome_count(&self, id: GenerationId) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM genomes WHERE generation_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn set_fitness(&self, id: GenomeId, fitness: f64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE genomes SET fitness_score = ?2 WHERE id = ?1",
            params![id.to_string(), fitness],
        )?;
        Ok(())
    }

    fn insert_jobs(&self, jobs: &[Job]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_job_rows(&tx, jobs)?;
        tx.commit()?;
        Ok(())
    }

    fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
                job_row,
            )
            .optional()?;
        row.map(to_job).transpose()
    }

    fn next_pending_job(&self) -> StoreResult<Option<JobId>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM jobs WHERE status = 'pending' ORDER BY created_at, rowid LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|s| parse_uuid(&s).map(JobId)).transpose()
    }

    fn try_claim_job(&self, id: JobId, worker_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = 'processing', assigned_to = ?2, started_at = ?3 \
             WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), worker_id, now_millis()],
        )?;
        Ok(changed == 1)
    }

    fn finish_job(&self, id: JobId, status: JobStatus, error: Option<&str>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET status = ?2, completed_at = ?3, error = ?4 WHERE id = ?1",
            params![id.to_string(), status.as_str(), now_millis(), error],
        )?;
        Ok(())
    }

    fn job_counts(&self, generation: GenerationId) -> StoreResult<JobStatusCounts> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT j.status, COUNT(*) FROM jobs j \
             JOIN genomes g ON j.genome_id = g.id \
             WHERE g.generation_id = ?1 GROUP BY j.status",
        )?;
        let rows = stmt
            .query_map(params![generation.0], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = JobStatusCounts::default();
        for (status, count) in rows {
            let status = JobStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown job status {status:?}")))?;
            counts.add(status, count as usize);
        }
        Ok(counts)
    }

    fn record_batch(&self, batch: &BatchResult, snapshots: &[Snapshot]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO batch_runs (simulation_id, machine_id, agent_strategy, resource_density, \
             total_ticks_survived, avg_agent_energy, simulation_version, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch.simulation_id.to_string(),
                batch.machine_id,
                batch.agent_strategy,
                batch.resource_density,
                batch.total_ticks_survived as i64,
                batch.avg_agent_energy,
                batch.simulation_version,
                now_millis(),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO time_series (simulation_id, tick, population, coop_count, \
                 aggressive_count, gini_coefficient, avg_energy) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for snap in snapshots {
                stmt.execute(params![
                    batch.simulation_id.to_string(),
                    snap.tick as i64,
                    snap.population as i64,
                    snap.coop_count as i64,
                    snap.aggressive_count as i64,
                    snap.gini_coefficient,
                    snap.avg_energy,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn batch_results(&self) -> StoreResult<Vec<BatchResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT simulation_id, machine_id, agent_strategy, resource_density, \
             total_ticks_survived, avg_agent_energy, simulation_version FROM batch_runs ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(sim, machine_id, agent_strategy, resource_density, ticks, energy, version)| {
                Ok(BatchResult {
                    simulation_id: parse_uuid(&sim)?,
                    machine_id,
                    agent_strategy,
                    resource_density,
                    total_ticks_survived: ticks as u64,
                    avg_agent_energy: energy,
                    simulation_version: version,
                })
            })
            .collect()
    }

    fn time_series(&self, simulation_id: Uuid) -> StoreResult<Vec<Snapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tick, population, coop_count, aggressive_count, gini_coefficient, avg_energy \
             FROM time_series WHERE simulation_id = ?1 ORDER BY tick",
        )?;
        let rows = stmt
            .query_map(params![simulation_id.to_string()], |row| {
                Ok(Snapshot {
                    tick: row.get::<_, i64>(0)? as u64,
                    population: row.get::<_, i64>(1)? as usize,
                    coop_count: row.get::<_, i64>(2)? as usize,
                    aggressive_count: row.get::<_, i64>(3)? as usize,
                    gini_coefficient: row.get(4)?,
                    avg_energy: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
