use catalog::CatalogError;
use connectors::DbError;
use model::spec::job::SpecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid job spec: {0}")]
    Spec(#[from] SpecError),

    #[error("source unreachable: {0}")]
    SourceUnreachable(DbError),

    #[error("target unreachable: {0}")]
    TargetUnreachable(DbError),

    #[error("every table in the job failed planning")]
    AllTablesFailed,

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("database error: {0}")]
    Database(#[from] DbError),
}
