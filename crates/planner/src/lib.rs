pub mod chunks;
pub mod error;
pub mod plan;

pub use chunks::{ChunkBounds, chunk_bounds};
pub use error::PlanError;
pub use plan::{PlanSummary, Planner};
