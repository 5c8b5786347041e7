use catalog::CatalogError;
use connectors::DbError;
use model::spec::job::SpecError;
use planner::PlanError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid job spec: {0}")]
    Spec(#[from] SpecError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// How one chunk execution ended, from the worker's point of view.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Ownership was lost or shutdown requested; the chunk was aborted
    /// and no catalog transition may be written for it.
    #[error("chunk execution cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}
