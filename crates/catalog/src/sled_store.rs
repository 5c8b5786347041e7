use crate::{
    CatalogStore, ConstraintDropGate, HeartbeatSample, ReapedChunk, backoff::RetryBackoff,
    error::CatalogError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    catalog::{
        audit::{BatchAdjustment, ConstraintBackup, ExecutionLogEntry, MetricSample},
        chunk::{Chunk, ChunkOutcome},
        job::{Job, JobHealth},
        status::{ChunkStatus, JobStatus, TableStatus, ValidationStatus, WorkerStatus},
        table::TableState,
        worker::WorkerRegistration,
    },
    core::{
        ids::{ChunkId, JobId, TableId, WorkerId},
        utils::bounded_error_message,
    },
    spec::job::JobSpec,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sled::{
    Transactional,
    transaction::{ConflictableTransactionError, TransactionError, TransactionalTree},
};
use std::{collections::HashMap, path::Path, time::Duration};

const ERROR_MESSAGE_MAX_LEN: usize = 1024;
const LEADER_KEY: &[u8] = b"leader";

/// Embedded catalog on sled. One tree per entity; chunk transitions and
/// their counter updates run in a single multi-tree transaction, so the
/// counter-coherence invariant holds at every observation point.
pub struct SledCatalog {
    _db: sled::Db,
    jobs: sled::Tree,
    tables: sled::Tree,
    chunks: sled::Tree,
    workers: sled::Tree,
    exec_log: sled::Tree,
    metrics: sled::Tree,
    batch_history: sled::Tree,
    constraint_backups: sled::Tree,
    constraint_state: sled::Tree,
    meta: sled::Tree,
    backoff: RetryBackoff,
}

#[derive(Serialize, Deserialize)]
struct LeaderLease {
    node_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
enum DropPhase {
    Dropping,
    Dropped,
    Restored,
}

#[derive(Serialize, Deserialize)]
struct DropState {
    owner: WorkerId,
    phase: DropPhase,
}

fn enc<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(value)?)
}

fn dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CatalogError> {
    Ok(bincode::deserialize(bytes)?)
}

fn abort(err: CatalogError) -> ConflictableTransactionError<CatalogError> {
    ConflictableTransactionError::Abort(err)
}

fn enc_tx<T: Serialize>(value: &T) -> Result<Vec<u8>, ConflictableTransactionError<CatalogError>> {
    bincode::serialize(value).map_err(|e| abort(CatalogError::Encoding(e)))
}

fn dec_tx<T: DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ConflictableTransactionError<CatalogError>> {
    bincode::deserialize(bytes).map_err(|e| abort(CatalogError::Encoding(e)))
}

fn unwrap_tx<T>(result: Result<T, TransactionError<CatalogError>>) -> Result<T, CatalogError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(CatalogError::Storage(err)),
    }
}

fn get_chunk_tx(
    chunks: &TransactionalTree,
    chunk_id: ChunkId,
) -> Result<Chunk, ConflictableTransactionError<CatalogError>> {
    match chunks.get(chunk_id.0.as_bytes().as_slice())? {
        Some(bytes) => dec_tx(&bytes),
        None => Err(abort(CatalogError::ChunkNotFound(chunk_id))),
    }
}

fn get_job_tx(
    jobs: &TransactionalTree,
    job_id: JobId,
) -> Result<Job, ConflictableTransactionError<CatalogError>> {
    match jobs.get(job_id.0.as_bytes().as_slice())? {
        Some(bytes) => dec_tx(&bytes),
        None => Err(abort(CatalogError::JobNotFound(job_id))),
    }
}

fn get_table_tx(
    tables: &TransactionalTree,
    table_id: TableId,
) -> Result<TableState, ConflictableTransactionError<CatalogError>> {
    match tables.get(table_id.0.as_bytes().as_slice())? {
        Some(bytes) => dec_tx(&bytes),
        None => Err(abort(CatalogError::TableNotFound(table_id))),
    }
}

/// Transition a terminal chunk's job to completed/failed once nothing is
/// left to run. Runs inside the same transaction as the chunk update.
fn maybe_finish_job(job: &mut Job, now: DateTime<Utc>) {
    if job.status.is_terminal() || job.total_chunks == 0 {
        return;
    }
    if job.running_chunks == 0
        && job.validation_failed_chunks == 0
        && job.completed_chunks + job.failed_chunks == job.total_chunks
    {
        job.status = if job.failed_chunks == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        job.completed_at = Some(now);
    }
}

impl SledCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db = sled::open(path)?;
        Ok(Self {
            jobs: db.open_tree("jobs")?,
            tables: db.open_tree("tables")?,
            chunks: db.open_tree("chunks")?,
            workers: db.open_tree("workers")?,
            exec_log: db.open_tree("chunk_execution_log")?,
            metrics: db.open_tree("performance_metrics")?,
            batch_history: db.open_tree("batch_size_history")?,
            constraint_backups: db.open_tree("constraint_backup")?,
            constraint_state: db.open_tree("constraint_state")?,
            meta: db.open_tree("meta")?,
            backoff: RetryBackoff::default(),
            _db: db,
        })
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn read_job(&self, job_id: JobId) -> Result<Job, CatalogError> {
        match self.jobs.get(job_id.0.as_bytes().as_slice())? {
            Some(bytes) => dec(&bytes),
            None => Err(CatalogError::JobNotFound(job_id)),
        }
    }

    fn read_chunk(&self, chunk_id: ChunkId) -> Result<Chunk, CatalogError> {
        match self.chunks.get(chunk_id.0.as_bytes().as_slice())? {
            Some(bytes) => dec(&bytes),
            None => Err(CatalogError::ChunkNotFound(chunk_id)),
        }
    }

    fn all_jobs(&self) -> Result<HashMap<JobId, Job>, CatalogError> {
        let mut jobs = HashMap::new();
        for item in self.jobs.iter() {
            let (_key, value) = item?;
            let job: Job = dec(&value)?;
            jobs.insert(job.id, job);
        }
        Ok(jobs)
    }

    fn scan_chunks<F>(&self, mut keep: F) -> Result<Vec<Chunk>, CatalogError>
    where
        F: FnMut(&Chunk) -> bool,
    {
        let mut out = Vec::new();
        for item in self.chunks.iter() {
            let (_key, value) = item?;
            let chunk: Chunk = dec(&value)?;
            if keep(&chunk) {
                out.push(chunk);
            }
        }
        Ok(out)
    }

    /// CAS-claim one candidate. Returns None when a concurrent claimer
    /// got there first or the job hit its concurrency cap.
    fn try_claim(
        &self,
        chunk_id: ChunkId,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<Chunk>, CatalogError> {
        let result = (&self.chunks, &self.jobs).transaction(|(chunks, jobs)| {
            let mut chunk = get_chunk_tx(chunks, chunk_id)?;
            if chunk.status != ChunkStatus::Pending || !chunk.retry_due(now) {
                return Ok(None);
            }
            let mut job = get_job_tx(jobs, chunk.job_id)?;
            if !job.status.is_dispatchable()
                || job.running_chunks >= u64::from(job.max_concurrent_workers)
            {
                return Ok(None);
            }

            chunk.status = ChunkStatus::Running;
            chunk.worker_id = Some(worker_id.clone());
            chunk.started_at = Some(now);
            chunk.last_heartbeat = Some(now);
            chunk.last_error = None;

            job.running_chunks += 1;
            if job.status == JobStatus::Planning {
                job.status = JobStatus::Running;
            }
            if job.started_at.is_none() {
                job.started_at = Some(now);
            }

            chunks.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(&chunk)?)?;
            jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
            Ok(Some(chunk))
        });
        unwrap_tx(result)
    }

    /// Append one attempt record. Attempt numbers are derived from the
    /// log itself so the sequence stays 1, 2, 3, … even across operator
    /// resets, and existing rows are never overwritten.
    fn append_exec_log(&self, mut entry: ExecutionLogEntry) -> Result<(), CatalogError> {
        let prefix = format!("{}:", entry.chunk_id);
        let mut attempt = self.exec_log.scan_prefix(prefix.as_bytes()).count() as u32 + 1;
        loop {
            entry.attempt_number = attempt;
            let key = format!("{}:{:06}", entry.chunk_id, attempt);
            let swap = self.exec_log.compare_and_swap(
                key.as_bytes(),
                None as Option<&[u8]>,
                Some(enc(&entry)?),
            )?;
            if swap.is_ok() {
                return Ok(());
            }
            attempt += 1;
        }
    }

    /// Shared failure path for worker-reported failures and the reaper.
    /// Schedules a retry while attempts remain, otherwise the chunk goes
    /// terminal and the failed counters move.
    fn fail_chunk_inner(
        &self,
        chunk_id: ChunkId,
        error: &str,
        duration_ms: u64,
        clear_worker: bool,
        force_terminal: bool,
    ) -> Result<Chunk, CatalogError> {
        let now = Utc::now();
        let message = bounded_error_message(error, ERROR_MESSAGE_MAX_LEN);
        let backoff = self.backoff;

        let result = (&self.chunks, &self.jobs, &self.tables).transaction(
            |(chunks, jobs, tables)| {
                let mut chunk = get_chunk_tx(chunks, chunk_id)?;
                if chunk.status != ChunkStatus::Running {
                    return Err(abort(CatalogError::InvalidTransition {
                        chunk: chunk_id,
                        reason: format!("cannot fail a chunk in state {}", chunk.status),
                    }));
                }
                let mut job = get_job_tx(jobs, chunk.job_id)?;
                if job.status.is_terminal() {
                    return Err(abort(CatalogError::JobTerminal(job.id)));
                }
                let mut table = get_table_tx(tables, chunk.table_id)?;

                let attempt_worker = chunk.worker_id.clone();
                chunk.retry_count += 1;
                if force_terminal {
                    // Kinds retrying cannot fix exhaust all attempts at once;
                    // the terminal invariant stays retry_count = max_retries.
                    chunk.retry_count = chunk.retry_count.max(chunk.max_retries);
                }
                chunk.last_error = Some(message.clone());
                chunk.duration_ms = Some(duration_ms);
                chunk.completed_at = Some(now);
                if clear_worker {
                    chunk.worker_id = None;
                }

                job.running_chunks = job.running_chunks.saturating_sub(1);
                job.last_error = Some(message.clone());

                if chunk.retry_count < chunk.max_retries {
                    chunk.status = ChunkStatus::Pending;
                    let delay = backoff.delay(chunk.retry_count);
                    chunk.next_retry_at =
                        Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                } else {
                    chunk.status = ChunkStatus::Failed;
                    chunk.next_retry_at = None;
                    job.failed_chunks += 1;
                    table.failed_chunks += 1;
                    table.status = TableStatus::Failed;
                    table.last_error = Some(message.clone());
                    maybe_finish_job(&mut job, now);
                }

                chunks.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(&chunk)?)?;
                jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
                tables.insert(table.id.0.as_bytes().as_slice(), enc_tx(&table)?)?;
                Ok((chunk, attempt_worker))
            },
        );
        let (chunk, attempt_worker) = unwrap_tx(result)?;

        self.append_exec_log(ExecutionLogEntry {
            chunk_id: chunk.id,
            worker_id: attempt_worker,
            attempt_number: 0,
            status: ChunkStatus::Failed,
            rows_processed: chunk.rows_processed,
            source_row_count: chunk.source_row_count,
            target_row_count: chunk.target_row_count,
            duration_ms: Some(duration_ms),
            error_message: Some(message),
            started_at: chunk.started_at,
            completed_at: now,
        })?;
        Ok(chunk)
    }
}

#[async_trait]
impl CatalogStore for SledCatalog {
    async fn create_job(&self, spec: &JobSpec) -> Result<Job, CatalogError> {
        let job = Job::from_spec(spec, Utc::now());
        self.jobs.insert(job.id.0.as_bytes().as_slice(), enc(&job)?)?;
        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, CatalogError> {
        self.read_job(job_id)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, CatalogError> {
        let mut jobs: Vec<Job> = self.all_jobs()?.into_values().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn mark_job_planning(&self, job_id: JobId) -> Result<(), CatalogError> {
        let result = self.jobs.transaction(|jobs| {
            let mut job = get_job_tx(jobs, job_id)?;
            if !matches!(job.status, JobStatus::Pending | JobStatus::Planning) {
                return Err(abort(CatalogError::JobTerminal(job_id)));
            }
            job.status = JobStatus::Planning;
            jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn fail_job(&self, job_id: JobId, error: &str, auto: bool) -> Result<(), CatalogError> {
        let now = Utc::now();
        let message = bounded_error_message(error, ERROR_MESSAGE_MAX_LEN);
        let result = self.jobs.transaction(|jobs| {
            let mut job = get_job_tx(jobs, job_id)?;
            if job.status.is_terminal() {
                return Ok(());
            }
            job.status = JobStatus::Failed;
            job.last_error = Some(message.clone());
            job.completed_at = Some(now);
            if auto {
                job.auto_failed_at = Some(now);
            }
            jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn pause_job(&self, job_id: JobId) -> Result<(), CatalogError> {
        let result = self.jobs.transaction(|jobs| {
            let mut job = get_job_tx(jobs, job_id)?;
            if job.status.is_terminal() {
                return Err(abort(CatalogError::JobTerminal(job_id)));
            }
            job.status = JobStatus::Paused;
            jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn resume_job(&self, job_id: JobId) -> Result<(), CatalogError> {
        let result = self.jobs.transaction(|jobs| {
            let mut job = get_job_tx(jobs, job_id)?;
            if job.status != JobStatus::Paused {
                return Ok(());
            }
            job.status = if job.total_chunks > 0 {
                JobStatus::Running
            } else {
                JobStatus::Pending
            };
            jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn job_health(&self, job_id: JobId) -> Result<JobHealth, CatalogError> {
        let job = self.read_job(job_id)?;
        let settled = job.completed_chunks + job.failed_chunks + job.running_chunks;
        Ok(JobHealth {
            status: job.status,
            total_chunks: job.total_chunks,
            completed_chunks: job.completed_chunks,
            failed_chunks: job.failed_chunks,
            pending_chunks: job.total_chunks.saturating_sub(settled),
            running_chunks: job.running_chunks,
            failure_threshold_percent: job.failure_threshold_percent,
        })
    }

    async fn insert_tables_and_chunks(
        &self,
        job_id: JobId,
        tables: Vec<TableState>,
        chunks: Vec<Chunk>,
    ) -> Result<(), CatalogError> {
        let result = (&self.jobs, &self.tables, &self.chunks).transaction(
            |(jobs, table_tree, chunk_tree)| {
                let mut job = get_job_tx(jobs, job_id)?;
                if job.total_chunks > 0 {
                    return Err(abort(CatalogError::Unavailable(format!(
                        "job {job_id} is already planned; chunks cannot be added after planning"
                    ))));
                }
                for table in &tables {
                    table_tree.insert(table.id.0.as_bytes().as_slice(), enc_tx(table)?)?;
                }
                for chunk in &chunks {
                    chunk_tree.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(chunk)?)?;
                }
                job.total_tables = tables.len() as u32;
                job.total_chunks = chunks.len() as u64;
                jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
                Ok(())
            },
        );
        unwrap_tx(result)
    }

    async fn get_tables(&self, job_id: JobId) -> Result<Vec<TableState>, CatalogError> {
        let mut out = Vec::new();
        for item in self.tables.iter() {
            let (_key, value) = item?;
            let table: TableState = dec(&value)?;
            if table.job_id == job_id {
                out.push(table);
            }
        }
        out.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(out)
    }

    async fn get_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, CatalogError> {
        let mut chunks = self.scan_chunks(|c| c.job_id == job_id)?;
        chunks.sort_by(|a, b| {
            (&a.table_name, a.pk_start).cmp(&(&b.table_name, b.pk_start))
        });
        Ok(chunks)
    }

    async fn get_chunk(&self, chunk_id: ChunkId) -> Result<Chunk, CatalogError> {
        self.read_chunk(chunk_id)
    }

    async fn claim_next_chunk(&self, worker_id: &WorkerId) -> Result<Option<Chunk>, CatalogError> {
        let now = Utc::now();
        let jobs = self.all_jobs()?;

        let mut candidates = self.scan_chunks(|chunk| {
            chunk.status == ChunkStatus::Pending
                && chunk.retry_due(now)
                && jobs
                    .get(&chunk.job_id)
                    .is_some_and(|job| job.status.is_dispatchable())
        })?;

        candidates.sort_by(|a, b| {
            let pa = jobs.get(&a.job_id).map(|j| j.priority).unwrap_or(i32::MAX);
            let pb = jobs.get(&b.job_id).map(|j| j.priority).unwrap_or(i32::MAX);
            pa.cmp(&pb)
                .then(a.next_retry_at.cmp(&b.next_retry_at))
                .then(a.created_at.cmp(&b.created_at))
        });

        for candidate in candidates {
            if let Some(chunk) = self.try_claim(candidate.id, worker_id, now)? {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    }

    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        chunk_id: ChunkId,
        sample: HeartbeatSample,
    ) -> Result<(), CatalogError> {
        let now = Utc::now();
        let result = self.chunks.transaction(|chunks| {
            let mut chunk = get_chunk_tx(chunks, chunk_id)?;
            if chunk.status != ChunkStatus::Running
                || chunk.worker_id.as_ref() != Some(worker_id)
            {
                return Err(abort(CatalogError::OwnershipLost(chunk_id)));
            }
            chunk.last_heartbeat = Some(now);
            chunks.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(&chunk)?)?;
            Ok(chunk.job_id)
        });
        let job_id = unwrap_tx(result)?;

        self.register_worker(&WorkerRegistration {
            worker_id: worker_id.clone(),
            last_seen: now,
            current_chunk: Some(chunk_id),
            status: WorkerStatus::Busy,
        })
        .await?;

        self.record_metric(&MetricSample {
            job_id,
            chunk_id,
            worker_id: worker_id.clone(),
            recorded_at: now,
            rows_per_sec: sample.rows_per_sec,
            mb_per_sec: sample.mb_per_sec,
            memory_mb: sample.memory_mb,
            insert_latency_ms: sample.insert_latency_ms,
        })
        .await
    }

    async fn complete_chunk(
        &self,
        chunk_id: ChunkId,
        outcome: ChunkOutcome,
    ) -> Result<(), CatalogError> {
        let now = Utc::now();
        let result = (&self.chunks, &self.jobs, &self.tables).transaction(
            |(chunks, jobs, tables)| {
                let mut chunk = get_chunk_tx(chunks, chunk_id)?;
                if chunk.status != ChunkStatus::Running {
                    return Err(abort(CatalogError::OwnershipLost(chunk_id)));
                }
                let mut job = get_job_tx(jobs, chunk.job_id)?;
                if job.status.is_terminal() {
                    return Err(abort(CatalogError::JobTerminal(job.id)));
                }
                let mut table = get_table_tx(tables, chunk.table_id)?;

                chunk.status = ChunkStatus::Completed;
                chunk.completed_at = Some(now);
                chunk.next_retry_at = None;
                chunk.rows_processed = outcome.rows_processed;
                chunk.source_row_count = Some(outcome.source_row_count);
                chunk.target_row_count = Some(outcome.target_row_count);
                chunk.checksum = Some(outcome.checksum);
                chunk.duration_ms = Some(outcome.duration_ms);
                chunk.bytes_copied = outcome.bytes_copied;
                chunk.batch_size_used = Some(outcome.batch_size_used);
                chunk.throughput_rows_per_sec = Some(outcome.throughput_rows_per_sec);
                chunk.throughput_mb_per_sec = Some(outcome.throughput_mb_per_sec);
                chunk.memory_peak_mb = Some(outcome.memory_peak_mb);
                chunk.insert_latency_ms = Some(outcome.insert_latency_ms);
                chunk.validation_status = if !outcome.validation_enabled {
                    ValidationStatus::Pending
                } else if outcome.counts_match() {
                    ValidationStatus::Validated
                } else {
                    ValidationStatus::Failed
                };

                job.running_chunks = job.running_chunks.saturating_sub(1);
                job.completed_chunks += 1;
                if chunk.validation_status == ValidationStatus::Failed {
                    job.validation_failed_chunks += 1;
                }
                job.total_bytes += outcome.bytes_copied;
                job.peak_memory_mb = job.peak_memory_mb.max(outcome.memory_peak_mb);
                let n = job.completed_chunks as f64;
                job.avg_throughput_rows_per_sec = (job.avg_throughput_rows_per_sec * (n - 1.0)
                    + outcome.throughput_rows_per_sec)
                    / n;

                table.completed_chunks += 1;
                if table.completed_chunks == table.total_chunks {
                    table.status = TableStatus::Completed;
                    table.completed_at = Some(now);
                } else if table.status == TableStatus::Pending {
                    table.status = TableStatus::Running;
                }

                maybe_finish_job(&mut job, now);

                chunks.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(&chunk)?)?;
                jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
                tables.insert(table.id.0.as_bytes().as_slice(), enc_tx(&table)?)?;
                Ok(chunk)
            },
        );
        let chunk = unwrap_tx(result)?;

        self.append_exec_log(ExecutionLogEntry {
            chunk_id: chunk.id,
            worker_id: chunk.worker_id.clone(),
            attempt_number: 0,
            status: ChunkStatus::Completed,
            rows_processed: chunk.rows_processed,
            source_row_count: chunk.source_row_count,
            target_row_count: chunk.target_row_count,
            duration_ms: chunk.duration_ms,
            error_message: None,
            started_at: chunk.started_at,
            completed_at: now,
        })
    }

    async fn fail_chunk(
        &self,
        chunk_id: ChunkId,
        error: &str,
        duration_ms: u64,
        terminal: bool,
    ) -> Result<(), CatalogError> {
        self.fail_chunk_inner(chunk_id, error, duration_ms, false, terminal)?;
        Ok(())
    }

    async fn retry_chunk(&self, chunk_id: ChunkId) -> Result<(), CatalogError> {
        let result = (&self.chunks, &self.jobs, &self.tables).transaction(
            |(chunks, jobs, tables)| {
                let chunk = get_chunk_tx(chunks, chunk_id)?;
                if !chunk.is_terminal_failed() {
                    return Err(abort(CatalogError::InvalidTransition {
                        chunk: chunk_id,
                        reason: "only terminal-failed chunks can be reset".to_string(),
                    }));
                }
                let mut job = get_job_tx(jobs, chunk.job_id)?;
                let mut table = get_table_tx(tables, chunk.table_id)?;

                let mut chunk = chunk;
                chunk.status = ChunkStatus::Pending;
                chunk.retry_count = 0;
                chunk.next_retry_at = None;
                chunk.worker_id = None;

                job.failed_chunks = job.failed_chunks.saturating_sub(1);
                table.failed_chunks = table.failed_chunks.saturating_sub(1);
                if table.status == TableStatus::Failed && table.failed_chunks == 0 {
                    table.status = TableStatus::Running;
                }
                // An operator reset re-opens a terminal-failed job.
                if job.status == JobStatus::Failed {
                    job.status = JobStatus::Running;
                    job.completed_at = None;
                    job.auto_failed_at = None;
                }

                chunks.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(&chunk)?)?;
                jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
                tables.insert(table.id.0.as_bytes().as_slice(), enc_tx(&table)?)?;
                Ok(())
            },
        );
        unwrap_tx(result)
    }

    async fn reap_dead_workers(
        &self,
        liveness_threshold: Duration,
        hard_timeout: Duration,
    ) -> Result<Vec<ReapedChunk>, CatalogError> {
        let now = Utc::now();
        let liveness = chrono::Duration::from_std(liveness_threshold).unwrap_or_default();
        let hard = chrono::Duration::from_std(hard_timeout).unwrap_or_default();

        let stale = self.scan_chunks(|chunk| {
            if chunk.status != ChunkStatus::Running {
                return false;
            }
            let heartbeat_stale = chunk
                .last_heartbeat
                .is_none_or(|hb| now - hb > liveness);
            let overran = chunk.started_at.is_some_and(|st| now - st > hard);
            heartbeat_stale || overran
        })?;

        let mut reaped = Vec::with_capacity(stale.len());
        for chunk in stale {
            let abandoned_by = chunk.worker_id.clone();
            match self.fail_chunk_inner(chunk.id, "heartbeat timeout", 0, true, false) {
                Ok(updated) => reaped.push(ReapedChunk {
                    chunk_id: updated.id,
                    job_id: updated.job_id,
                    worker_id: abandoned_by,
                    retry_scheduled: updated.status == ChunkStatus::Pending,
                }),
                // Lost a race with the owning worker's own transition.
                Err(CatalogError::InvalidTransition { .. }) => continue,
                Err(err) => return Err(err),
            }
        }

        // Drop presence records that went quiet as well.
        for item in self.workers.iter() {
            let (key, value) = item?;
            let reg: WorkerRegistration = dec(&value)?;
            if reg.is_dead(now, liveness) {
                self.workers.remove(key)?;
            }
        }

        Ok(reaped)
    }

    async fn requeue_unvalidated_chunks(
        &self,
        job_id: JobId,
    ) -> Result<Vec<ChunkId>, CatalogError> {
        let targets = self.scan_chunks(|c| {
            c.job_id == job_id
                && c.status == ChunkStatus::Completed
                && c.validation_status == ValidationStatus::Failed
        })?;

        let mut requeued = Vec::with_capacity(targets.len());
        for target in targets {
            let chunk_id = target.id;
            let result = (&self.chunks, &self.jobs, &self.tables).transaction(
                |(chunks, jobs, tables)| {
                    let mut chunk = get_chunk_tx(chunks, chunk_id)?;
                    if chunk.status != ChunkStatus::Completed
                        || chunk.validation_status != ValidationStatus::Failed
                    {
                        return Ok(false);
                    }
                    let mut job = get_job_tx(jobs, chunk.job_id)?;
                    let mut table = get_table_tx(tables, chunk.table_id)?;

                    chunk.status = ChunkStatus::Pending;
                    chunk.validation_status = ValidationStatus::Pending;
                    chunk.next_retry_at = None;
                    chunk.worker_id = None;

                    job.completed_chunks = job.completed_chunks.saturating_sub(1);
                    job.validation_failed_chunks = job.validation_failed_chunks.saturating_sub(1);
                    table.completed_chunks = table.completed_chunks.saturating_sub(1);
                    if table.status == TableStatus::Completed {
                        table.status = TableStatus::Running;
                        table.completed_at = None;
                    }

                    chunks.insert(chunk.id.0.as_bytes().as_slice(), enc_tx(&chunk)?)?;
                    jobs.insert(job.id.0.as_bytes().as_slice(), enc_tx(&job)?)?;
                    tables.insert(table.id.0.as_bytes().as_slice(), enc_tx(&table)?)?;
                    Ok(true)
                },
            );
            if unwrap_tx(result)? {
                requeued.push(chunk_id);
            }
        }
        Ok(requeued)
    }

    async fn register_worker(&self, reg: &WorkerRegistration) -> Result<(), CatalogError> {
        self.workers
            .insert(reg.worker_id.as_str().as_bytes(), enc(reg)?)?;
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, CatalogError> {
        let mut out = Vec::new();
        for item in self.workers.iter() {
            let (_key, value) = item?;
            out.push(dec(&value)?);
        }
        Ok(out)
    }

    async fn execution_log(
        &self,
        chunk_id: ChunkId,
    ) -> Result<Vec<ExecutionLogEntry>, CatalogError> {
        let prefix = format!("{chunk_id}:");
        let mut entries = Vec::new();
        for item in self.exec_log.scan_prefix(prefix.as_bytes()) {
            let (_key, value) = item?;
            entries.push(dec(&value)?);
        }
        Ok(entries)
    }

    async fn record_batch_adjustment(&self, adj: &BatchAdjustment) -> Result<(), CatalogError> {
        let ts = adj.recorded_at.timestamp_nanos_opt().unwrap_or(0);
        let key = format!("{}:{:020}:{}", adj.job_id, ts, adj.worker_id);
        self.batch_history.insert(key.as_bytes(), enc(adj)?)?;
        Ok(())
    }

    async fn batch_history(&self, job_id: JobId) -> Result<Vec<BatchAdjustment>, CatalogError> {
        let prefix = format!("{job_id}:");
        let mut entries = Vec::new();
        for item in self.batch_history.scan_prefix(prefix.as_bytes()) {
            let (_key, value) = item?;
            entries.push(dec(&value)?);
        }
        Ok(entries)
    }

    async fn record_metric(&self, sample: &MetricSample) -> Result<(), CatalogError> {
        let ts = sample.recorded_at.timestamp_nanos_opt().unwrap_or(0);
        let key = format!("{}:{:020}:{}", sample.job_id, ts, sample.chunk_id);
        self.metrics.insert(key.as_bytes(), enc(sample)?)?;
        Ok(())
    }

    async fn metrics_for_job(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CatalogError> {
        let prefix = format!("{job_id}:");
        let mut samples = Vec::new();
        for item in self.metrics.scan_prefix(prefix.as_bytes()) {
            let (_key, value) = item?;
            let sample: MetricSample = dec(&value)?;
            if sample.recorded_at >= since {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    async fn begin_constraint_drop(
        &self,
        job_id: JobId,
        table: &str,
        worker_id: &WorkerId,
    ) -> Result<ConstraintDropGate, CatalogError> {
        let key = format!("{job_id}:{table}");
        let result = self.constraint_state.transaction(|states| {
            match states.get(key.as_bytes())? {
                None => {
                    let state = DropState {
                        owner: worker_id.clone(),
                        phase: DropPhase::Dropping,
                    };
                    states.insert(key.as_bytes(), enc_tx(&state)?)?;
                    Ok(ConstraintDropGate::Owner)
                }
                Some(bytes) => {
                    let state: DropState = dec_tx(&bytes)?;
                    Ok(match state.phase {
                        DropPhase::Dropping if &state.owner == worker_id => {
                            ConstraintDropGate::Owner
                        }
                        DropPhase::Dropping => ConstraintDropGate::InProgress,
                        DropPhase::Dropped | DropPhase::Restored => ConstraintDropGate::Dropped,
                    })
                }
            }
        });
        unwrap_tx(result)
    }

    async fn finish_constraint_drop(
        &self,
        job_id: JobId,
        table: &str,
        records: &[ConstraintBackup],
    ) -> Result<(), CatalogError> {
        for record in records {
            let key = format!("{job_id}:{table}:{}", record.constraint_name);
            self.constraint_backups.insert(key.as_bytes(), enc(record)?)?;
        }
        let key = format!("{job_id}:{table}");
        let result = self.constraint_state.transaction(|states| {
            let mut state: DropState = match states.get(key.as_bytes())? {
                Some(bytes) => dec_tx(&bytes)?,
                None => {
                    return Err(abort(CatalogError::Unavailable(format!(
                        "no constraint-drop in progress for {table}"
                    ))));
                }
            };
            state.phase = DropPhase::Dropped;
            states.insert(key.as_bytes(), enc_tx(&state)?)?;
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn constraint_backups_for(
        &self,
        job_id: JobId,
        table: &str,
    ) -> Result<Vec<ConstraintBackup>, CatalogError> {
        let prefix = format!("{job_id}:{table}:");
        let mut records = Vec::new();
        for item in self.constraint_backups.scan_prefix(prefix.as_bytes()) {
            let (_key, value) = item?;
            records.push(dec(&value)?);
        }
        Ok(records)
    }

    async fn mark_constraints_restored(
        &self,
        job_id: JobId,
        table: &str,
    ) -> Result<(), CatalogError> {
        let now = Utc::now();
        let prefix = format!("{job_id}:{table}:");
        for item in self.constraint_backups.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let mut record: ConstraintBackup = dec(&value)?;
            record.restored_at = Some(now);
            self.constraint_backups.insert(key, enc(&record)?)?;
        }

        let key = format!("{job_id}:{table}");
        let result = self.constraint_state.transaction(|states| {
            if let Some(bytes) = states.get(key.as_bytes())? {
                let mut state: DropState = dec_tx(&bytes)?;
                state.phase = DropPhase::Restored;
                states.insert(key.as_bytes(), enc_tx(&state)?)?;
            }
            Ok(())
        });
        unwrap_tx(result)
    }

    async fn acquire_leader(&self, node_id: &str, ttl: Duration) -> Result<bool, CatalogError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        let result = self.meta.transaction(|meta| {
            let current: Option<LeaderLease> = match meta.get(LEADER_KEY)? {
                Some(bytes) => Some(dec_tx(&bytes)?),
                None => None,
            };
            let can_take = match &current {
                None => true,
                Some(lease) => lease.node_id == node_id || lease.expires_at <= now,
            };
            if can_take {
                let lease = LeaderLease {
                    node_id: node_id.to_string(),
                    expires_at,
                };
                meta.insert(LEADER_KEY, enc_tx(&lease)?)?;
            }
            Ok(can_take)
        });
        unwrap_tx(result)
    }
}
