use model::core::ids::{ChunkId, JobId, TableId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("table not found: {0}")]
    TableNotFound(TableId),

    #[error("chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    /// The heartbeating worker no longer owns the chunk. Callers must
    /// treat this as cancellation of the in-flight chunk.
    #[error("chunk {0} is no longer owned by this worker")]
    OwnershipLost(ChunkId),

    /// A transition was requested that the current state forbids, e.g.
    /// resetting a chunk that is not terminal-failed.
    #[error("invalid transition for chunk {chunk}: {reason}")]
    InvalidTransition { chunk: ChunkId, reason: String },

    #[error("job {0} is terminal; chunk transitions are frozen")]
    JobTerminal(JobId),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("storage transaction aborted: {0}")]
    Transaction(String),

    #[error("record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// Transient store failures the caller may back off and retry;
    /// everything else is a contract violation or a miss.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::Storage(_)
                | CatalogError::Transaction(_)
                | CatalogError::Postgres(_)
                | CatalogError::Unavailable(_)
        )
    }
}
