use crate::{
    catalog::status::WorkerStatus,
    core::ids::{ChunkId, WorkerId},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Best-effort presence record, created on first heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub last_seen: DateTime<Utc>,
    pub current_chunk: Option<ChunkId>,
    pub status: WorkerStatus,
}

impl WorkerRegistration {
    pub fn is_dead(&self, now: DateTime<Utc>, liveness_threshold: Duration) -> bool {
        now - self.last_seen > liveness_threshold
    }
}
