use crate::{
    catalog::status::JobStatus,
    core::ids::JobId,
    spec::{connection::ConnectionDescriptor, job::JobSpec},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root aggregate for one migration. Counters are denormalized but kept
/// coherent by the catalog in the same atomic unit as every chunk
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: ConnectionDescriptor,
    pub target: ConnectionDescriptor,
    pub status: JobStatus,
    pub priority: i32,

    pub total_tables: u32,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    pub running_chunks: u64,
    pub validation_failed_chunks: u64,

    pub chunk_size: u64,
    pub batch_size: u32,
    pub max_retries: u32,
    pub failure_threshold_percent: u8,
    pub max_concurrent_workers: u32,
    pub drop_constraints: bool,
    pub validate: bool,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub auto_failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub optimization_method: Option<String>,

    pub peak_memory_mb: f64,
    pub total_bytes: u64,
    pub avg_throughput_rows_per_sec: f64,
}

impl Job {
    pub fn from_spec(spec: &JobSpec, now: DateTime<Utc>) -> Self {
        Job {
            id: JobId::generate(),
            source: spec.source.clone(),
            target: spec.target.clone(),
            status: JobStatus::Pending,
            priority: spec.priority,
            total_tables: 0,
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            running_chunks: 0,
            validation_failed_chunks: 0,
            chunk_size: spec.chunk_size,
            batch_size: spec.batch_size,
            max_retries: spec.max_retries,
            failure_threshold_percent: spec.failure_threshold_percent,
            max_concurrent_workers: spec.max_concurrent_workers,
            drop_constraints: spec.drop_constraints,
            validate: spec.validate,
            created_at: now,
            started_at: None,
            completed_at: None,
            auto_failed_at: None,
            last_error: None,
            optimization_method: spec
                .drop_constraints
                .then(|| "drop_constraints".to_string()),
            peak_memory_mb: 0.0,
            total_bytes: 0,
            avg_throughput_rows_per_sec: 0.0,
        }
    }

    /// failed / total, in percent. Guarded against zero-chunk jobs.
    pub fn failure_rate_percent(&self) -> f64 {
        self.failed_chunks as f64 * 100.0 / self.total_chunks.max(1) as f64
    }
}

/// Counter snapshot consumed by the failure supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobHealth {
    pub status: JobStatus,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    pub pending_chunks: u64,
    pub running_chunks: u64,
    pub failure_threshold_percent: u8,
}

impl JobHealth {
    pub fn failure_rate_percent(&self) -> f64 {
        self.failed_chunks as f64 * 100.0 / self.total_chunks.max(1) as f64
    }
}
