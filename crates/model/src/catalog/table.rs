use crate::{
    catalog::status::TableStatus,
    core::ids::{JobId, TableId},
    spec::mapping::TableMapping,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One source table within a job. Counters mirror the job-level
/// invariants scoped to this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableState {
    pub id: TableId,
    pub job_id: JobId,
    pub table_name: String,
    pub target_table: String,
    pub pk_column: String,
    /// Column remapping and transforms applied when chunks of this
    /// table execute.
    pub mapping: TableMapping,
    pub total_rows_estimate: u64,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    pub status: TableStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl TableState {
    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.completed_chunks == self.total_chunks
    }
}
