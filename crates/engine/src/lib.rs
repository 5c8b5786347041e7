pub mod adaptive;
pub mod api;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod progress;
pub mod worker;

pub use adaptive::BatchController;
pub use api::{JobService, JobStatusReport};
pub use config::EngineConfig;
pub use error::{EngineError, ExecError};
pub use maintenance::MaintenanceRunner;
pub use worker::{WorkerRuntime, generate_worker_id};
