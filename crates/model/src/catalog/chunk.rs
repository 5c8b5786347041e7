use crate::{
    catalog::status::{ChunkStatus, ValidationStatus},
    core::ids::{ChunkId, JobId, TableId, WorkerId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One half-open pk range of one table; the unit of scheduling, retry,
/// and validation. The last chunk of a table is inclusive on its upper
/// bound so every source row belongs to exactly one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub job_id: JobId,
    pub table_id: TableId,
    pub table_name: String,
    pub pk_start: i64,
    pub pk_end: i64,
    pub upper_inclusive: bool,

    pub status: ChunkStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub worker_id: Option<WorkerId>,
    pub next_retry_at: Option<DateTime<Utc>>,

    pub rows_processed: u64,
    pub source_row_count: Option<u64>,
    pub target_row_count: Option<u64>,
    pub checksum: Option<u64>,
    pub duration_ms: Option<u64>,
    pub bytes_copied: u64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub validation_status: ValidationStatus,
    pub batch_size_used: Option<u32>,
    pub throughput_rows_per_sec: Option<f64>,
    pub throughput_mb_per_sec: Option<f64>,
    pub memory_peak_mb: Option<f64>,
    pub insert_latency_ms: Option<f64>,
}

impl Chunk {
    pub fn new(
        job_id: JobId,
        table_id: TableId,
        table_name: &str,
        pk_start: i64,
        pk_end: i64,
        upper_inclusive: bool,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Chunk {
            id: ChunkId::generate(),
            job_id,
            table_id,
            table_name: table_name.to_string(),
            pk_start,
            pk_end,
            upper_inclusive,
            status: ChunkStatus::Pending,
            retry_count: 0,
            max_retries,
            worker_id: None,
            next_retry_at: None,
            rows_processed: 0,
            source_row_count: None,
            target_row_count: None,
            checksum: None,
            duration_ms: None,
            bytes_copied: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            last_error: None,
            validation_status: ValidationStatus::Pending,
            batch_size_used: None,
            throughput_rows_per_sec: None,
            throughput_mb_per_sec: None,
            memory_peak_mb: None,
            insert_latency_ms: None,
        }
    }

    /// A failed chunk that has exhausted its retries accepts no further
    /// transitions except an explicit operator reset.
    pub fn is_terminal_failed(&self) -> bool {
        self.status == ChunkStatus::Failed && self.retry_count >= self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.status == ChunkStatus::Completed || self.is_terminal_failed()
    }

    /// Claim eligibility clock check; job-level checks live in the store.
    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_retry_at {
            None => true,
            Some(at) => at <= now,
        }
    }
}

/// Measured totals a worker reports when a chunk finishes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub rows_processed: u64,
    pub source_row_count: u64,
    pub target_row_count: u64,
    pub checksum: u64,
    pub duration_ms: u64,
    pub bytes_copied: u64,
    pub batch_size_used: u32,
    pub throughput_rows_per_sec: f64,
    pub throughput_mb_per_sec: f64,
    pub memory_peak_mb: f64,
    pub insert_latency_ms: f64,
    pub validation_enabled: bool,
}

impl ChunkOutcome {
    pub fn counts_match(&self) -> bool {
        self.source_row_count == self.target_row_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk::new(
            JobId::generate(),
            TableId::generate(),
            "users",
            1,
            100,
            false,
            3,
            Utc::now(),
        )
    }

    #[test]
    fn fresh_chunk_is_eligible_and_not_terminal() {
        let c = chunk();
        assert!(c.retry_due(Utc::now()));
        assert!(!c.is_terminal());
    }

    #[test]
    fn exhausted_retries_make_a_failed_chunk_terminal() {
        let mut c = chunk();
        c.status = ChunkStatus::Failed;
        c.retry_count = 2;
        assert!(!c.is_terminal_failed());
        c.retry_count = 3;
        assert!(c.is_terminal_failed());
    }
}
