use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    catalog::{
        audit::{BatchAdjustment, ConstraintBackup, ExecutionLogEntry, MetricSample},
        chunk::{Chunk, ChunkOutcome},
        job::{Job, JobHealth},
        table::TableState,
        worker::WorkerRegistration,
    },
    core::ids::{ChunkId, JobId, WorkerId},
    spec::job::JobSpec,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod backoff;
pub mod error;
pub mod postgres;
pub mod sled_store;

pub use backoff::RetryBackoff;
pub use error::CatalogError;

/// Performance numbers attached to a heartbeat; persisted as one
/// `MetricSample` per tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub memory_mb: f64,
    pub rows_per_sec: f64,
    pub mb_per_sec: f64,
    pub insert_latency_ms: f64,
}

/// What the reaper did to one abandoned chunk.
#[derive(Debug, Clone)]
pub struct ReapedChunk {
    pub chunk_id: ChunkId,
    pub job_id: JobId,
    pub worker_id: Option<WorkerId>,
    pub retry_scheduled: bool,
}

/// Outcome of asking to drop constraints for a (job, table) pair. The
/// drop is job-global: exactly one worker wins the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintDropGate {
    /// Caller owns the drop; it must perform it and save the backups.
    Owner,
    /// Another worker already dropped the constraints; proceed.
    Dropped,
    /// Another worker is mid-drop; poll again shortly.
    InProgress,
}

/// The durable, transactional source of truth for jobs, tables, chunks,
/// workers, and audit history. Every state transition other components
/// perform goes through this trait, and each method is atomic: observers
/// never see a chunk update without its counter updates.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Job lifecycle ------------------------------------------------------

    async fn create_job(&self, spec: &JobSpec) -> Result<Job, CatalogError>;
    async fn get_job(&self, job_id: JobId) -> Result<Job, CatalogError>;
    async fn list_jobs(&self) -> Result<Vec<Job>, CatalogError>;
    async fn mark_job_planning(&self, job_id: JobId) -> Result<(), CatalogError>;
    /// Terminal failure. `auto` stamps `auto_failed_at` (supervisor path).
    async fn fail_job(&self, job_id: JobId, error: &str, auto: bool) -> Result<(), CatalogError>;
    async fn pause_job(&self, job_id: JobId) -> Result<(), CatalogError>;
    async fn resume_job(&self, job_id: JobId) -> Result<(), CatalogError>;
    async fn job_health(&self, job_id: JobId) -> Result<JobHealth, CatalogError>;

    // Planner output -----------------------------------------------------

    /// Single atomic write of all planner output. The only writer of
    /// chunk rows; `total_chunks` is final after this call.
    async fn insert_tables_and_chunks(
        &self,
        job_id: JobId,
        tables: Vec<TableState>,
        chunks: Vec<Chunk>,
    ) -> Result<(), CatalogError>;
    async fn get_tables(&self, job_id: JobId) -> Result<Vec<TableState>, CatalogError>;
    async fn get_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, CatalogError>;
    async fn get_chunk(&self, chunk_id: ChunkId) -> Result<Chunk, CatalogError>;

    // Dispatch -----------------------------------------------------------

    /// Atomically claim one eligible chunk for the worker, or `None`.
    /// Eligible: pending, retry timer elapsed, job dispatchable, job
    /// below its concurrent-worker cap. Tie-break (job priority asc,
    /// next_retry_at asc, created_at asc). Serializable against
    /// concurrent claimers.
    async fn claim_next_chunk(&self, worker_id: &WorkerId) -> Result<Option<Chunk>, CatalogError>;

    /// Fails with `OwnershipLost` if the chunk is no longer owned by
    /// `worker_id`; the caller must abort the in-flight chunk.
    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        chunk_id: ChunkId,
        sample: HeartbeatSample,
    ) -> Result<(), CatalogError>;

    async fn complete_chunk(
        &self,
        chunk_id: ChunkId,
        outcome: ChunkOutcome,
    ) -> Result<(), CatalogError>;

    /// Increments retry_count; schedules a retry with exponential
    /// back-off while attempts remain, otherwise marks the chunk
    /// terminal failed. `terminal` short-circuits the schedule for
    /// error kinds that retrying cannot fix.
    async fn fail_chunk(
        &self,
        chunk_id: ChunkId,
        error: &str,
        duration_ms: u64,
        terminal: bool,
    ) -> Result<(), CatalogError>;

    /// Operator reset of a terminal-failed chunk: retry_count back to
    /// zero, status pending, retry timer cleared.
    async fn retry_chunk(&self, chunk_id: ChunkId) -> Result<(), CatalogError>;

    /// Fail every running chunk whose heartbeat is older than the
    /// liveness threshold or whose runtime exceeds the hard timeout,
    /// through the normal retry path with error "heartbeat timeout".
    async fn reap_dead_workers(
        &self,
        liveness_threshold: Duration,
        hard_timeout: Duration,
    ) -> Result<Vec<ReapedChunk>, CatalogError>;

    /// Re-enqueue chunks that completed with validation_status=failed.
    async fn requeue_unvalidated_chunks(&self, job_id: JobId)
    -> Result<Vec<ChunkId>, CatalogError>;

    // Workers ------------------------------------------------------------

    async fn register_worker(&self, reg: &WorkerRegistration) -> Result<(), CatalogError>;
    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, CatalogError>;

    // Audit & metrics ----------------------------------------------------

    async fn execution_log(&self, chunk_id: ChunkId) -> Result<Vec<ExecutionLogEntry>, CatalogError>;
    async fn record_batch_adjustment(&self, adj: &BatchAdjustment) -> Result<(), CatalogError>;
    async fn batch_history(&self, job_id: JobId) -> Result<Vec<BatchAdjustment>, CatalogError>;
    async fn record_metric(&self, sample: &MetricSample) -> Result<(), CatalogError>;
    async fn metrics_for_job(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CatalogError>;

    // Constraint backups -------------------------------------------------

    async fn begin_constraint_drop(
        &self,
        job_id: JobId,
        table: &str,
        worker_id: &WorkerId,
    ) -> Result<ConstraintDropGate, CatalogError>;
    async fn finish_constraint_drop(
        &self,
        job_id: JobId,
        table: &str,
        records: &[ConstraintBackup],
    ) -> Result<(), CatalogError>;
    async fn constraint_backups_for(
        &self,
        job_id: JobId,
        table: &str,
    ) -> Result<Vec<ConstraintBackup>, CatalogError>;
    async fn mark_constraints_restored(
        &self,
        job_id: JobId,
        table: &str,
    ) -> Result<(), CatalogError>;

    // Leadership ---------------------------------------------------------

    /// Advisory lease for the maintenance loop. Returns true while
    /// `node_id` holds (or renews) the lease.
    async fn acquire_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, CatalogError>;
}
