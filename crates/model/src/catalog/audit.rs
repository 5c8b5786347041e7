use crate::{
    catalog::status::ChunkStatus,
    core::ids::{ChunkId, JobId, WorkerId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record per chunk attempt; never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub chunk_id: ChunkId,
    pub worker_id: Option<WorkerId>,
    pub attempt_number: u32,
    pub status: ChunkStatus,
    pub rows_processed: u64,
    pub source_row_count: Option<u64>,
    pub target_row_count: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

/// Periodic performance sample emitted with each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub worker_id: WorkerId,
    pub recorded_at: DateTime<Utc>,
    pub rows_per_sec: f64,
    pub mb_per_sec: f64,
    pub memory_mb: f64,
    pub insert_latency_ms: f64,
}

/// One row per adaptive-controller decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAdjustment {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub old_batch_size: u32,
    pub new_batch_size: u32,
    pub avg_latency_ms: f64,
    pub target_latency_ms: f64,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Index,
    ForeignKey,
}

/// Restoration record for one index or foreign key dropped ahead of a
/// bulk load. `updated_by` doubles as the job-global drop guard: the
/// first worker to stamp it owns the drop/restore cycle for the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintBackup {
    pub job_id: JobId,
    pub table_name: String,
    pub constraint_name: String,
    pub kind: ConstraintKind,
    pub restore_definition: String,
    pub updated_by: Option<WorkerId>,
    pub dropped_at: Option<DateTime<Utc>>,
    pub restored_at: Option<DateTime<Utc>>,
}
