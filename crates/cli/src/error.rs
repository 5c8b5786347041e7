use catalog::CatalogError;
use engine::EngineError;
use model::spec::job::SpecError;
use planner::PlanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("failed to read the job spec file: {0}")]
    SpecFileRead(#[from] std::io::Error),

    #[error("failed to parse the job spec: {0}")]
    SpecParse(#[from] serde_yaml::Error),

    #[error("invalid job spec: {0}")]
    Spec(#[from] SpecError),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to serialize to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Spec(spec) => CliError::Spec(spec),
            EngineError::Catalog(catalog) => CliError::Catalog(catalog),
            other => CliError::Engine(other),
        }
    }
}

impl CliError {
    /// Documented exit codes: 2 bad spec, 3 source unreachable, 4 not
    /// found, 1 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::SpecFileRead(_) | CliError::SpecParse(_) | CliError::Spec(_) => 2,
            CliError::Engine(EngineError::Plan(
                PlanError::SourceUnreachable(_) | PlanError::TargetUnreachable(_),
            )) => 3,
            CliError::Catalog(CatalogError::JobNotFound(_) | CatalogError::ChunkNotFound(_))
            | CliError::InvalidId(_) => 4,
            _ => 1,
        }
    }
}
