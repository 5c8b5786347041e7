use crate::{
    CatalogStore, ConstraintDropGate, HeartbeatSample, ReapedChunk, backoff::RetryBackoff,
    error::CatalogError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    catalog::{
        audit::{
            BatchAdjustment, ConstraintBackup, ConstraintKind, ExecutionLogEntry, MetricSample,
        },
        chunk::{Chunk, ChunkOutcome},
        job::{Job, JobHealth},
        status::{ChunkStatus, ValidationStatus},
        table::TableState,
        worker::WorkerRegistration,
    },
    core::{
        ids::{ChunkId, JobId, TableId, WorkerId},
        utils::bounded_error_message,
    },
    spec::job::JobSpec,
};
use std::{str::FromStr, time::Duration};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row, Transaction};
use tracing::error;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");
const INSERT_JOB_SQL: &str = include_str!("sql/insert_job.sql");
const INSERT_TABLE_SQL: &str = include_str!("sql/insert_table.sql");
const INSERT_CHUNK_SQL: &str = include_str!("sql/insert_chunk.sql");
const CLAIM_CHUNK_SQL: &str = include_str!("sql/claim_chunk.sql");
const REFRESH_JOB_COUNTERS_SQL: &str = include_str!("sql/refresh_job_counters.sql");
const REFRESH_TABLE_COUNTERS_SQL: &str = include_str!("sql/refresh_table_counters.sql");
const FINISH_JOB_CHECK_SQL: &str = include_str!("sql/finish_job_check.sql");
const REAP_CANDIDATES_SQL: &str = include_str!("sql/reap_candidates.sql");
const INSERT_EXEC_LOG_SQL: &str = include_str!("sql/insert_exec_log.sql");

const ERROR_MESSAGE_MAX_LEN: usize = 1024;
/// Advisory-lock key for the maintenance leader; arbitrary but fixed.
const LEADER_ADVISORY_KEY: i64 = 0x726f_7768_6175_6c;

/// Relational catalog on PostgreSQL: `FOR UPDATE SKIP LOCKED` claims and
/// counters recomputed inside the same transaction as every chunk
/// transition. Selected when `METADATA_DB_URL` points at a Postgres
/// database.
pub struct PgCatalog {
    client: Mutex<Client>,
    backoff: RetryBackoff,
}

fn corrupt(msg: impl Into<String>) -> CatalogError {
    CatalogError::Unavailable(msg.into())
}

fn parse_status<T>(raw: &str) -> Result<T, CatalogError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| corrupt(format!("bad status value {raw:?}: {e}")))
}

fn job_from_row(row: &Row) -> Result<Job, CatalogError> {
    let source = serde_json::from_value(row.get("source_descriptor"))
        .map_err(|e| corrupt(format!("bad source descriptor: {e}")))?;
    let target = serde_json::from_value(row.get("target_descriptor"))
        .map_err(|e| corrupt(format!("bad target descriptor: {e}")))?;
    Ok(Job {
        id: JobId(row.get("id")),
        source,
        target,
        status: parse_status(row.get("status"))?,
        priority: row.get("priority"),
        total_tables: row.get::<_, i32>("total_tables") as u32,
        total_chunks: row.get::<_, i64>("total_chunks") as u64,
        completed_chunks: row.get::<_, i64>("completed_chunks") as u64,
        failed_chunks: row.get::<_, i64>("failed_chunks") as u64,
        running_chunks: row.get::<_, i64>("running_chunks") as u64,
        validation_failed_chunks: row.get::<_, i64>("validation_failed_chunks") as u64,
        chunk_size: row.get::<_, i64>("chunk_size") as u64,
        batch_size: row.get::<_, i32>("batch_size") as u32,
        max_retries: row.get::<_, i32>("max_retries") as u32,
        failure_threshold_percent: row.get::<_, i16>("failure_threshold_percent") as u8,
        max_concurrent_workers: row.get::<_, i32>("max_concurrent_workers") as u32,
        drop_constraints: row.get("drop_constraints"),
        validate: row.get("validate_counts"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        auto_failed_at: row.get("auto_failed_at"),
        last_error: row.get("last_error"),
        optimization_method: row.get("optimization_method"),
        peak_memory_mb: row.get("peak_memory_mb"),
        total_bytes: row.get::<_, i64>("total_bytes") as u64,
        avg_throughput_rows_per_sec: row.get("avg_throughput_rows_per_sec"),
    })
}

fn table_from_row(row: &Row) -> Result<TableState, CatalogError> {
    let mapping = serde_json::from_value(row.get("mapping"))
        .map_err(|e| corrupt(format!("bad table mapping: {e}")))?;
    Ok(TableState {
        id: TableId(row.get("id")),
        job_id: JobId(row.get("job_id")),
        table_name: row.get("table_name"),
        target_table: row.get("target_table"),
        pk_column: row.get("pk_column"),
        mapping,
        total_rows_estimate: row.get::<_, i64>("total_rows_estimate") as u64,
        total_chunks: row.get::<_, i64>("total_chunks") as u64,
        completed_chunks: row.get::<_, i64>("completed_chunks") as u64,
        failed_chunks: row.get::<_, i64>("failed_chunks") as u64,
        status: parse_status(row.get("status"))?,
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        last_error: row.get("last_error"),
    })
}

fn chunk_from_row(row: &Row) -> Result<Chunk, CatalogError> {
    Ok(Chunk {
        id: ChunkId(row.get("id")),
        job_id: JobId(row.get("job_id")),
        table_id: TableId(row.get("table_id")),
        table_name: row.get("table_name"),
        pk_start: row.get("pk_start"),
        pk_end: row.get("pk_end"),
        upper_inclusive: row.get("upper_inclusive"),
        status: parse_status(row.get("status"))?,
        retry_count: row.get::<_, i32>("retry_count") as u32,
        max_retries: row.get::<_, i32>("max_retries") as u32,
        worker_id: row
            .get::<_, Option<String>>("worker_id")
            .map(WorkerId::new),
        next_retry_at: row.get("next_retry_at"),
        rows_processed: row.get::<_, i64>("rows_processed") as u64,
        source_row_count: row.get::<_, Option<i64>>("source_row_count").map(|v| v as u64),
        target_row_count: row.get::<_, Option<i64>>("target_row_count").map(|v| v as u64),
        checksum: row.get::<_, Option<i64>>("checksum").map(|v| v as u64),
        duration_ms: row.get::<_, Option<i64>>("duration_ms").map(|v| v as u64),
        bytes_copied: row.get::<_, i64>("bytes_copied") as u64,
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        last_heartbeat: row.get("last_heartbeat"),
        last_error: row.get("last_error"),
        validation_status: parse_status(row.get("validation_status"))?,
        batch_size_used: row.get::<_, Option<i32>>("batch_size_used").map(|v| v as u32),
        throughput_rows_per_sec: row.get("throughput_rows_per_sec"),
        throughput_mb_per_sec: row.get("throughput_mb_per_sec"),
        memory_peak_mb: row.get("memory_peak_mb"),
        insert_latency_ms: row.get("insert_latency_ms"),
    })
}

struct LogRow<'a> {
    chunk_id: ChunkId,
    worker_id: Option<&'a WorkerId>,
    status: ChunkStatus,
    rows_processed: u64,
    source_row_count: Option<u64>,
    target_row_count: Option<u64>,
    duration_ms: Option<u64>,
    error_message: Option<&'a str>,
    started_at: Option<DateTime<Utc>>,
}

/// Attempt numbers are assigned by the insert itself (max + 1 within the
/// same transaction), so the audit sequence stays 1, 2, 3, … even across
/// operator resets.
async fn insert_exec_log(tx: &Transaction<'_>, entry: LogRow<'_>) -> Result<(), CatalogError> {
    tx.execute(
        INSERT_EXEC_LOG_SQL,
        &[
            &entry.chunk_id.0,
            &entry.worker_id.map(|w| w.as_str().to_string()),
            &entry.status.as_str(),
            &(entry.rows_processed as i64),
            &entry.source_row_count.map(|v| v as i64),
            &entry.target_row_count.map(|v| v as i64),
            &entry.duration_ms.map(|v| v as i64),
            &entry.error_message,
            &entry.started_at,
            &Utc::now(),
        ],
    )
    .await?;
    Ok(())
}

/// Recompute job and table counters from chunk rows and run the job
/// completion check, all inside the caller's transaction.
async fn refresh_counters(
    tx: &Transaction<'_>,
    job_id: JobId,
    table_id: TableId,
) -> Result<(), CatalogError> {
    tx.execute(REFRESH_TABLE_COUNTERS_SQL, &[&table_id.0]).await?;
    tx.execute(REFRESH_JOB_COUNTERS_SQL, &[&job_id.0]).await?;
    tx.execute(FINISH_JOB_CHECK_SQL, &[&job_id.0]).await?;
    Ok(())
}

impl PgCatalog {
    /// Connect and apply the catalog schema. The schema is idempotent.
    pub async fn connect(url: &str) -> Result<Self, CatalogError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "catalog connection error");
            }
        });
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(Self {
            client: Mutex::new(client),
            backoff: RetryBackoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Shared failure path: schedules a retry or goes terminal, then
    /// refreshes counters, inside one transaction.
    async fn fail_chunk_tx(
        &self,
        chunk_id: ChunkId,
        error_msg: &str,
        duration_ms: u64,
        clear_worker: bool,
        force_terminal: bool,
    ) -> Result<Chunk, CatalogError> {
        let message = bounded_error_message(error_msg, ERROR_MESSAGE_MAX_LEN);
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT * FROM chunks WHERE id = $1 FOR UPDATE",
                &[&chunk_id.0],
            )
            .await?
            .ok_or(CatalogError::ChunkNotFound(chunk_id))?;
        let chunk = chunk_from_row(&row)?;
        if chunk.status != ChunkStatus::Running {
            return Err(CatalogError::InvalidTransition {
                chunk: chunk_id,
                reason: format!("cannot fail a chunk in state {}", chunk.status),
            });
        }

        let attempt_worker = chunk.worker_id.clone();
        let new_retry_count = if force_terminal {
            // Kinds retrying cannot fix exhaust all attempts at once; the
            // terminal invariant stays retry_count = max_retries.
            (chunk.retry_count + 1).max(chunk.max_retries)
        } else {
            chunk.retry_count + 1
        };
        let terminal = new_retry_count >= chunk.max_retries;
        let delay_secs = self.backoff.delay(new_retry_count).as_secs_f64();

        if terminal {
            tx.execute(
                "UPDATE chunks
                 SET status = 'failed', retry_count = $2, next_retry_at = NULL,
                     last_error = $3, duration_ms = $4, completed_at = now(),
                     worker_id = CASE WHEN $5 THEN NULL ELSE worker_id END
                 WHERE id = $1",
                &[
                    &chunk_id.0,
                    &(new_retry_count as i32),
                    &message,
                    &(duration_ms as i64),
                    &clear_worker,
                ],
            )
            .await?;
        } else {
            tx.execute(
                "UPDATE chunks
                 SET status = 'pending', retry_count = $2,
                     next_retry_at = now() + make_interval(secs => $3),
                     last_error = $4, duration_ms = $5, completed_at = now(),
                     worker_id = CASE WHEN $6 THEN NULL ELSE worker_id END
                 WHERE id = $1",
                &[
                    &chunk_id.0,
                    &(new_retry_count as i32),
                    &delay_secs,
                    &message,
                    &(duration_ms as i64),
                    &clear_worker,
                ],
            )
            .await?;
        }

        tx.execute("UPDATE jobs SET last_error = $2 WHERE id = $1", &[
            &chunk.job_id.0,
            &message,
        ])
        .await?;
        if terminal {
            tx.execute(
                "UPDATE tables SET last_error = $2 WHERE id = $1",
                &[&chunk.table_id.0, &message],
            )
            .await?;
        }
        refresh_counters(&tx, chunk.job_id, chunk.table_id).await?;

        insert_exec_log(
            &tx,
            LogRow {
                chunk_id,
                worker_id: attempt_worker.as_ref(),
                status: ChunkStatus::Failed,
                rows_processed: chunk.rows_processed,
                source_row_count: chunk.source_row_count,
                target_row_count: chunk.target_row_count,
                duration_ms: Some(duration_ms),
                error_message: Some(&message),
                started_at: chunk.started_at,
            },
        )
        .await?;

        tx.commit().await?;

        let mut updated = chunk;
        updated.retry_count = new_retry_count;
        updated.status = if terminal {
            ChunkStatus::Failed
        } else {
            ChunkStatus::Pending
        };
        if clear_worker {
            updated.worker_id = None;
        }
        Ok(updated)
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn create_job(&self, spec: &JobSpec) -> Result<Job, CatalogError> {
        let job = Job::from_spec(spec, Utc::now());
        let source = serde_json::to_value(&job.source)
            .map_err(|e| corrupt(format!("descriptor encode: {e}")))?;
        let target = serde_json::to_value(&job.target)
            .map_err(|e| corrupt(format!("descriptor encode: {e}")))?;

        let client = self.client.lock().await;
        client
            .execute(
                INSERT_JOB_SQL,
                &[
                    &job.id.0,
                    &source,
                    &target,
                    &job.status.as_str(),
                    &job.priority,
                    &(job.chunk_size as i64),
                    &(job.batch_size as i32),
                    &(job.max_retries as i32),
                    &(job.failure_threshold_percent as i16),
                    &(job.max_concurrent_workers as i32),
                    &job.drop_constraints,
                    &job.validate,
                    &job.created_at,
                    &job.optimization_method,
                ],
            )
            .await?;
        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, CatalogError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT * FROM jobs WHERE id = $1", &[&job_id.0])
            .await?
            .ok_or(CatalogError::JobNotFound(job_id))?;
        job_from_row(&row)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT * FROM jobs ORDER BY created_at", &[])
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn mark_job_planning(&self, job_id: JobId) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        let updated = client
            .execute(
                "UPDATE jobs SET status = 'planning'
                 WHERE id = $1 AND status IN ('pending', 'planning')",
                &[&job_id.0],
            )
            .await?;
        if updated == 0 {
            return Err(CatalogError::JobTerminal(job_id));
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: JobId, error_msg: &str, auto: bool) -> Result<(), CatalogError> {
        let message = bounded_error_message(error_msg, ERROR_MESSAGE_MAX_LEN);
        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE jobs
                 SET status = 'failed', last_error = $2, completed_at = now(),
                     auto_failed_at = CASE WHEN $3 THEN now() ELSE auto_failed_at END
                 WHERE id = $1 AND status NOT IN ('completed', 'failed')",
                &[&job_id.0, &message, &auto],
            )
            .await?;
        Ok(())
    }

    async fn pause_job(&self, job_id: JobId) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        let updated = client
            .execute(
                "UPDATE jobs SET status = 'paused'
                 WHERE id = $1 AND status NOT IN ('completed', 'failed')",
                &[&job_id.0],
            )
            .await?;
        if updated == 0 {
            return Err(CatalogError::JobTerminal(job_id));
        }
        Ok(())
    }

    async fn resume_job(&self, job_id: JobId) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE jobs
                 SET status = CASE WHEN total_chunks > 0 THEN 'running' ELSE 'pending' END
                 WHERE id = $1 AND status = 'paused'",
                &[&job_id.0],
            )
            .await?;
        Ok(())
    }

    async fn job_health(&self, job_id: JobId) -> Result<JobHealth, CatalogError> {
        let job = self.get_job(job_id).await?;
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
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT total_chunks FROM jobs WHERE id = $1 FOR UPDATE",
                &[&job_id.0],
            )
            .await?
            .ok_or(CatalogError::JobNotFound(job_id))?;
        if row.get::<_, i64>("total_chunks") > 0 {
            return Err(corrupt(format!(
                "job {job_id} is already planned; chunks cannot be added after planning"
            )));
        }

        let table_stmt = tx.prepare(INSERT_TABLE_SQL).await?;
        for table in &tables {
            let mapping = serde_json::to_value(&table.mapping)
                .map_err(|e| corrupt(format!("mapping encode: {e}")))?;
            tx.execute(
                &table_stmt,
                &[
                    &table.id.0,
                    &table.job_id.0,
                    &table.table_name,
                    &table.target_table,
                    &table.pk_column,
                    &mapping,
                    &(table.total_rows_estimate as i64),
                    &(table.total_chunks as i64),
                    &table.status.as_str(),
                    &table.created_at,
                    &table.completed_at,
                    &table.last_error,
                ],
            )
            .await?;
        }

        let chunk_stmt = tx.prepare(INSERT_CHUNK_SQL).await?;
        for chunk in &chunks {
            tx.execute(
                &chunk_stmt,
                &[
                    &chunk.id.0,
                    &chunk.job_id.0,
                    &chunk.table_id.0,
                    &chunk.table_name,
                    &chunk.pk_start,
                    &chunk.pk_end,
                    &chunk.upper_inclusive,
                    &(chunk.max_retries as i32),
                    &chunk.created_at,
                ],
            )
            .await?;
        }

        tx.execute(
            "UPDATE jobs SET total_tables = $2, total_chunks = $3 WHERE id = $1",
            &[&job_id.0, &(tables.len() as i32), &(chunks.len() as i64)],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_tables(&self, job_id: JobId) -> Result<Vec<TableState>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM tables WHERE job_id = $1 ORDER BY table_name",
                &[&job_id.0],
            )
            .await?;
        rows.iter().map(table_from_row).collect()
    }

    async fn get_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM chunks WHERE job_id = $1 ORDER BY table_name, pk_start",
                &[&job_id.0],
            )
            .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn get_chunk(&self, chunk_id: ChunkId) -> Result<Chunk, CatalogError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT * FROM chunks WHERE id = $1", &[&chunk_id.0])
            .await?
            .ok_or(CatalogError::ChunkNotFound(chunk_id))?;
        chunk_from_row(&row)
    }

    async fn claim_next_chunk(&self, worker_id: &WorkerId) -> Result<Option<Chunk>, CatalogError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(CLAIM_CHUNK_SQL, &[&worker_id.as_str()])
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let chunk = chunk_from_row(&row)?;

        tx.execute(
            "UPDATE jobs
             SET status = CASE WHEN status = 'planning' THEN 'running' ELSE status END,
                 started_at = COALESCE(started_at, now()),
                 running_chunks = running_chunks + 1
             WHERE id = $1",
            &[&chunk.job_id.0],
        )
        .await?;

        tx.commit().await?;
        Ok(Some(chunk))
    }

    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        chunk_id: ChunkId,
        sample: HeartbeatSample,
    ) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "UPDATE chunks SET last_heartbeat = now()
                 WHERE id = $1 AND worker_id = $2 AND status = 'running'
                 RETURNING job_id",
                &[&chunk_id.0, &worker_id.as_str()],
            )
            .await?
            .ok_or(CatalogError::OwnershipLost(chunk_id))?;
        let job_id: Uuid = row.get("job_id");

        client
            .execute(
                "INSERT INTO worker_heartbeats (worker_id, last_seen, current_chunk, status)
                 VALUES ($1, now(), $2, 'busy')
                 ON CONFLICT (worker_id)
                 DO UPDATE SET last_seen = now(), current_chunk = $2, status = 'busy'",
                &[&worker_id.as_str(), &chunk_id.0],
            )
            .await?;

        client
            .execute(
                "INSERT INTO performance_metrics
                     (job_id, chunk_id, worker_id, recorded_at,
                      rows_per_sec, mb_per_sec, memory_mb, insert_latency_ms)
                 VALUES ($1, $2, $3, now(), $4, $5, $6, $7)",
                &[
                    &job_id,
                    &chunk_id.0,
                    &worker_id.as_str(),
                    &sample.rows_per_sec,
                    &sample.mb_per_sec,
                    &sample.memory_mb,
                    &sample.insert_latency_ms,
                ],
            )
            .await?;
        Ok(())
    }

    async fn complete_chunk(
        &self,
        chunk_id: ChunkId,
        outcome: ChunkOutcome,
    ) -> Result<(), CatalogError> {
        let validation_status = if !outcome.validation_enabled {
            ValidationStatus::Pending
        } else if outcome.counts_match() {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Failed
        };

        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "UPDATE chunks
                 SET status = 'completed', completed_at = now(), next_retry_at = NULL,
                     rows_processed = $2, source_row_count = $3, target_row_count = $4,
                     checksum = $5, duration_ms = $6, bytes_copied = $7,
                     batch_size_used = $8, throughput_rows_per_sec = $9,
                     throughput_mb_per_sec = $10, memory_peak_mb = $11,
                     insert_latency_ms = $12, validation_status = $13
                 WHERE id = $1 AND status = 'running'
                 RETURNING job_id, table_id, worker_id, retry_count, started_at",
                &[
                    &chunk_id.0,
                    &(outcome.rows_processed as i64),
                    &(outcome.source_row_count as i64),
                    &(outcome.target_row_count as i64),
                    &(outcome.checksum as i64),
                    &(outcome.duration_ms as i64),
                    &(outcome.bytes_copied as i64),
                    &(outcome.batch_size_used as i32),
                    &outcome.throughput_rows_per_sec,
                    &outcome.throughput_mb_per_sec,
                    &outcome.memory_peak_mb,
                    &outcome.insert_latency_ms,
                    &validation_status.as_str(),
                ],
            )
            .await?
            .ok_or(CatalogError::OwnershipLost(chunk_id))?;

        let job_id = JobId(row.get("job_id"));
        let table_id = TableId(row.get("table_id"));
        let worker_id = row.get::<_, Option<String>>("worker_id").map(WorkerId::new);
        let retry_count = row.get::<_, i32>("retry_count") as u32;
        let started_at: Option<DateTime<Utc>> = row.get("started_at");

        tx.execute(
            "UPDATE jobs
             SET total_bytes = total_bytes + $2,
                 peak_memory_mb = GREATEST(peak_memory_mb, $3),
                 avg_throughput_rows_per_sec =
                     (avg_throughput_rows_per_sec * completed_chunks + $4)
                     / (completed_chunks + 1)
             WHERE id = $1",
            &[
                &job_id.0,
                &(outcome.bytes_copied as i64),
                &outcome.memory_peak_mb,
                &outcome.throughput_rows_per_sec,
            ],
        )
        .await?;

        refresh_counters(&tx, job_id, table_id).await?;

        insert_exec_log(
            &tx,
            LogRow {
                chunk_id,
                worker_id: worker_id.as_ref(),
                status: ChunkStatus::Completed,
                rows_processed: outcome.rows_processed,
                source_row_count: Some(outcome.source_row_count),
                target_row_count: Some(outcome.target_row_count),
                duration_ms: Some(outcome.duration_ms),
                error_message: None,
                started_at,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_chunk(
        &self,
        chunk_id: ChunkId,
        error_msg: &str,
        duration_ms: u64,
        terminal: bool,
    ) -> Result<(), CatalogError> {
        self.fail_chunk_tx(chunk_id, error_msg, duration_ms, false, terminal)
            .await?;
        Ok(())
    }

    async fn retry_chunk(&self, chunk_id: ChunkId) -> Result<(), CatalogError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT * FROM chunks WHERE id = $1 FOR UPDATE",
                &[&chunk_id.0],
            )
            .await?
            .ok_or(CatalogError::ChunkNotFound(chunk_id))?;
        let chunk = chunk_from_row(&row)?;
        if !chunk.is_terminal_failed() {
            return Err(CatalogError::InvalidTransition {
                chunk: chunk_id,
                reason: "only terminal-failed chunks can be reset".to_string(),
            });
        }

        tx.execute(
            "UPDATE chunks
             SET status = 'pending', retry_count = 0, next_retry_at = NULL, worker_id = NULL
             WHERE id = $1",
            &[&chunk_id.0],
        )
        .await?;
        // An operator reset re-opens a terminal-failed job.
        tx.execute(
            "UPDATE jobs
             SET status = 'running', completed_at = NULL, auto_failed_at = NULL
             WHERE id = $1 AND status = 'failed'",
            &[&chunk.job_id.0],
        )
        .await?;
        refresh_counters(&tx, chunk.job_id, chunk.table_id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn reap_dead_workers(
        &self,
        liveness_threshold: Duration,
        hard_timeout: Duration,
    ) -> Result<Vec<ReapedChunk>, CatalogError> {
        let candidates = {
            let mut client = self.client.lock().await;
            let tx = client.transaction().await?;
            let rows = tx
                .query(
                    REAP_CANDIDATES_SQL,
                    &[
                        &liveness_threshold.as_secs_f64(),
                        &hard_timeout.as_secs_f64(),
                    ],
                )
                .await?;
            let candidates: Vec<(ChunkId, JobId, Option<String>)> = rows
                .iter()
                .map(|row| {
                    (
                        ChunkId(row.get("id")),
                        JobId(row.get("job_id")),
                        row.get("worker_id"),
                    )
                })
                .collect();
            tx.rollback().await?;
            candidates
        };

        let mut reaped = Vec::with_capacity(candidates.len());
        for (chunk_id, job_id, worker) in candidates {
            match self
                .fail_chunk_tx(chunk_id, "heartbeat timeout", 0, true, false)
                .await
            {
                Ok(updated) => reaped.push(ReapedChunk {
                    chunk_id,
                    job_id,
                    worker_id: worker.map(WorkerId::new),
                    retry_scheduled: updated.status == ChunkStatus::Pending,
                }),
                // Lost a race with the owning worker's own transition.
                Err(CatalogError::InvalidTransition { .. }) => continue,
                Err(err) => return Err(err),
            }
        }

        let client = self.client.lock().await;
        client
            .execute(
                "DELETE FROM worker_heartbeats
                 WHERE last_seen < now() - make_interval(secs => $1)",
                &[&liveness_threshold.as_secs_f64()],
            )
            .await?;

        Ok(reaped)
    }

    async fn requeue_unvalidated_chunks(
        &self,
        job_id: JobId,
    ) -> Result<Vec<ChunkId>, CatalogError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let rows = tx
            .query(
                "UPDATE chunks
                 SET status = 'pending', validation_status = 'pending',
                     next_retry_at = NULL, worker_id = NULL
                 WHERE job_id = $1 AND status = 'completed' AND validation_status = 'failed'
                 RETURNING id, table_id",
                &[&job_id.0],
            )
            .await?;
        let mut requeued = Vec::with_capacity(rows.len());
        for row in &rows {
            requeued.push(ChunkId(row.get("id")));
            let table_id = TableId(row.get("table_id"));
            tx.execute(REFRESH_TABLE_COUNTERS_SQL, &[&table_id.0]).await?;
        }
        tx.execute(REFRESH_JOB_COUNTERS_SQL, &[&job_id.0]).await?;

        tx.commit().await?;
        Ok(requeued)
    }

    async fn register_worker(&self, reg: &WorkerRegistration) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO worker_heartbeats (worker_id, last_seen, current_chunk, status)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (worker_id)
                 DO UPDATE SET last_seen = $2, current_chunk = $3, status = $4",
                &[
                    &reg.worker_id.as_str(),
                    &reg.last_seen,
                    &reg.current_chunk.map(|c| c.0),
                    &reg.status.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT * FROM worker_heartbeats ORDER BY worker_id", &[])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(WorkerRegistration {
                    worker_id: WorkerId::new(row.get::<_, String>("worker_id")),
                    last_seen: row.get("last_seen"),
                    current_chunk: row.get::<_, Option<Uuid>>("current_chunk").map(ChunkId),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    async fn execution_log(
        &self,
        chunk_id: ChunkId,
    ) -> Result<Vec<ExecutionLogEntry>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM chunk_execution_log
                 WHERE chunk_id = $1 ORDER BY attempt_number",
                &[&chunk_id.0],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ExecutionLogEntry {
                    chunk_id: ChunkId(row.get("chunk_id")),
                    worker_id: row.get::<_, Option<String>>("worker_id").map(WorkerId::new),
                    attempt_number: row.get::<_, i32>("attempt_number") as u32,
                    status: parse_status(row.get("status"))?,
                    rows_processed: row.get::<_, i64>("rows_processed") as u64,
                    source_row_count: row
                        .get::<_, Option<i64>>("source_row_count")
                        .map(|v| v as u64),
                    target_row_count: row
                        .get::<_, Option<i64>>("target_row_count")
                        .map(|v| v as u64),
                    duration_ms: row.get::<_, Option<i64>>("duration_ms").map(|v| v as u64),
                    error_message: row.get("error_message"),
                    started_at: row.get("started_at"),
                    completed_at: row.get("completed_at"),
                })
            })
            .collect()
    }

    async fn record_batch_adjustment(&self, adj: &BatchAdjustment) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO batch_size_history
                     (job_id, worker_id, old_batch_size, new_batch_size,
                      avg_latency_ms, target_latency_ms, reason, recorded_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &adj.job_id.0,
                    &adj.worker_id.as_str(),
                    &(adj.old_batch_size as i32),
                    &(adj.new_batch_size as i32),
                    &adj.avg_latency_ms,
                    &adj.target_latency_ms,
                    &adj.reason,
                    &adj.recorded_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn batch_history(&self, job_id: JobId) -> Result<Vec<BatchAdjustment>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM batch_size_history WHERE job_id = $1 ORDER BY recorded_at",
                &[&job_id.0],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| BatchAdjustment {
                job_id: JobId(row.get("job_id")),
                worker_id: WorkerId::new(row.get::<_, String>("worker_id")),
                old_batch_size: row.get::<_, i32>("old_batch_size") as u32,
                new_batch_size: row.get::<_, i32>("new_batch_size") as u32,
                avg_latency_ms: row.get("avg_latency_ms"),
                target_latency_ms: row.get("target_latency_ms"),
                reason: row.get("reason"),
                recorded_at: row.get("recorded_at"),
            })
            .collect())
    }

    async fn record_metric(&self, sample: &MetricSample) -> Result<(), CatalogError> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO performance_metrics
                     (job_id, chunk_id, worker_id, recorded_at,
                      rows_per_sec, mb_per_sec, memory_mb, insert_latency_ms)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &sample.job_id.0,
                    &sample.chunk_id.0,
                    &sample.worker_id.as_str(),
                    &sample.recorded_at,
                    &sample.rows_per_sec,
                    &sample.mb_per_sec,
                    &sample.memory_mb,
                    &sample.insert_latency_ms,
                ],
            )
            .await?;
        Ok(())
    }

    async fn metrics_for_job(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM performance_metrics
                 WHERE job_id = $1 AND recorded_at >= $2
                 ORDER BY recorded_at",
                &[&job_id.0, &since],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| MetricSample {
                job_id: JobId(row.get("job_id")),
                chunk_id: ChunkId(row.get("chunk_id")),
                worker_id: WorkerId::new(row.get::<_, String>("worker_id")),
                recorded_at: row.get("recorded_at"),
                rows_per_sec: row.get("rows_per_sec"),
                mb_per_sec: row.get("mb_per_sec"),
                memory_mb: row.get("memory_mb"),
                insert_latency_ms: row.get("insert_latency_ms"),
            })
            .collect())
    }

    async fn begin_constraint_drop(
        &self,
        job_id: JobId,
        table: &str,
        worker_id: &WorkerId,
    ) -> Result<ConstraintDropGate, CatalogError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT owner, phase FROM constraint_state
                 WHERE job_id = $1 AND table_name = $2 FOR UPDATE",
                &[&job_id.0, &table],
            )
            .await?;
        let gate = match row {
            None => {
                tx.execute(
                    "INSERT INTO constraint_state (job_id, table_name, owner, phase)
                     VALUES ($1, $2, $3, 'dropping')",
                    &[&job_id.0, &table, &worker_id.as_str()],
                )
                .await?;
                ConstraintDropGate::Owner
            }
            Some(row) => {
                let owner: String = row.get("owner");
                match row.get::<_, &str>("phase") {
                    "dropping" if owner == worker_id.as_str() => ConstraintDropGate::Owner,
                    "dropping" => ConstraintDropGate::InProgress,
                    _ => ConstraintDropGate::Dropped,
                }
            }
        };

        tx.commit().await?;
        Ok(gate)
    }

    async fn finish_constraint_drop(
        &self,
        job_id: JobId,
        table: &str,
        records: &[ConstraintBackup],
    ) -> Result<(), CatalogError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        for record in records {
            let kind = match record.kind {
                ConstraintKind::Index => "index",
                ConstraintKind::ForeignKey => "foreign_key",
            };
            tx.execute(
                "INSERT INTO constraint_backup
                     (job_id, table_name, constraint_name, kind, restore_definition,
                      updated_by, dropped_at, restored_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (job_id, table_name, constraint_name)
                 DO UPDATE SET restore_definition = $5, updated_by = $6, dropped_at = $7",
                &[
                    &record.job_id.0,
                    &record.table_name,
                    &record.constraint_name,
                    &kind,
                    &record.restore_definition,
                    &record.updated_by.as_ref().map(|w| w.as_str().to_string()),
                    &record.dropped_at,
                    &record.restored_at,
                ],
            )
            .await?;
        }

        let updated = tx
            .execute(
                "UPDATE constraint_state SET phase = 'dropped'
                 WHERE job_id = $1 AND table_name = $2",
                &[&job_id.0, &table],
            )
            .await?;
        if updated == 0 {
            return Err(corrupt(format!(
                "no constraint-drop in progress for {table}"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn constraint_backups_for(
        &self,
        job_id: JobId,
        table: &str,
    ) -> Result<Vec<ConstraintBackup>, CatalogError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT * FROM constraint_backup
                 WHERE job_id = $1 AND table_name = $2
                 ORDER BY constraint_name",
                &[&job_id.0, &table],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let kind = match row.get::<_, &str>("kind") {
                    "index" => ConstraintKind::Index,
                    "foreign_key" => ConstraintKind::ForeignKey,
                    other => return Err(corrupt(format!("bad constraint kind {other:?}"))),
                };
                Ok(ConstraintBackup {
                    job_id: JobId(row.get("job_id")),
                    table_name: row.get("table_name"),
                    constraint_name: row.get("constraint_name"),
                    kind,
                    restore_definition: row.get("restore_definition"),
                    updated_by: row.get::<_, Option<String>>("updated_by").map(WorkerId::new),
                    dropped_at: row.get("dropped_at"),
                    restored_at: row.get("restored_at"),
                })
            })
            .collect()
    }

    async fn mark_constraints_restored(
        &self,
        job_id: JobId,
        table: &str,
    ) -> Result<(), CatalogError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.execute(
            "UPDATE constraint_backup SET restored_at = now()
             WHERE job_id = $1 AND table_name = $2",
            &[&job_id.0, &table],
        )
        .await?;
        tx.execute(
            "UPDATE constraint_state SET phase = 'restored'
             WHERE job_id = $1 AND table_name = $2",
            &[&job_id.0, &table],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn acquire_leader(&self, _node_id: &str, _ttl: Duration) -> Result<bool, CatalogError> {
        // Session-level advisory lock: held for the life of this catalog
        // connection, re-acquirable by the holder, denied to others.
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT pg_try_advisory_lock($1) AS locked",
                &[&LEADER_ADVISORY_KEY],
            )
            .await?;
        Ok(row.get("locked"))
    }
}
