use crate::{descriptor::ColumnDescriptor, error::DbError, requests::InsertReport};
use async_trait::async_trait;
use model::{
    catalog::audit::ConstraintBackup,
    core::ids::{JobId, WorkerId},
    records::row::RowData,
};

/// Write side of a relational adapter. One `bulk_insert` call is one
/// set-based statement inside one target transaction, so a chunk that
/// dies mid-range leaves a clean prefix behind.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, DbError>;

    async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[RowData],
    ) -> Result<InsertReport, DbError>;

    /// Row count inside a pk range, used for post-copy validation.
    async fn count_range(
        &self,
        table: &str,
        pk: &str,
        lo: i64,
        hi: i64,
        upper_inclusive: bool,
    ) -> Result<u64, DbError>;

    /// Capture restore definitions for the table's secondary indexes and
    /// foreign keys, then drop them. Idempotent: already-dropped objects
    /// are skipped.
    async fn drop_and_backup_constraints(
        &self,
        job_id: JobId,
        table: &str,
        worker_id: &WorkerId,
    ) -> Result<Vec<ConstraintBackup>, DbError>;

    /// Recreate dropped objects from their backups. Idempotent:
    /// already-restored objects are skipped.
    async fn restore_constraints(&self, records: &[ConstraintBackup]) -> Result<(), DbError>;
}
