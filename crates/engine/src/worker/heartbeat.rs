use crate::progress::ExecutionProgress;
use catalog::{CatalogError, CatalogStore};
use model::core::ids::{ChunkId, WorkerId};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Periodic proof of life for one running chunk. On loss of ownership
/// the ticker cancels the chunk token; the executor must stop without
/// writing any further catalog state for this chunk.
pub struct HeartbeatTicker {
    handle: JoinHandle<()>,
}

impl HeartbeatTicker {
    pub fn spawn(
        catalog: Arc<dyn CatalogStore>,
        worker_id: WorkerId,
        chunk_id: ChunkId,
        period: Duration,
        progress: Arc<ExecutionProgress>,
        chunk_cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it, the claim just
            // stamped a heartbeat.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = chunk_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let sample = progress.sample();
                match catalog.heartbeat(&worker_id, chunk_id, sample).await {
                    Ok(()) => {}
                    Err(CatalogError::OwnershipLost(_)) => {
                        warn!(%worker_id, %chunk_id, "chunk ownership lost, cancelling execution");
                        chunk_cancel.cancel();
                        break;
                    }
                    Err(err) if err.is_transient() => {
                        warn!(%worker_id, %chunk_id, %err, "heartbeat failed, will retry next tick");
                    }
                    Err(err) => {
                        warn!(%worker_id, %chunk_id, %err, "heartbeat failed fatally");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }

    /// Stop ticking. Must be called before the chunk's final catalog
    /// transition commits.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
