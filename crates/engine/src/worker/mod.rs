use crate::{
    adaptive::BatchController,
    config::EngineConfig,
    error::{EngineError, ExecError},
    progress::ExecutionProgress,
};
use catalog::{CatalogError, CatalogStore};
use chrono::Utc;
use connectors::ConnectorFactory;
use model::{
    catalog::{chunk::Chunk, status::WorkerStatus, worker::WorkerRegistration},
    core::ids::WorkerId,
};
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod executor;
pub mod heartbeat;

use executor::ChunkExecution;
use heartbeat::HeartbeatTicker;

/// Stateless chunk-execution process: claim, execute, report, repeat.
/// All state lives in the catalog; killing a worker at any point loses
/// at most the in-flight chunk, which the reaper reschedules.
pub struct WorkerRuntime {
    worker_id: WorkerId,
    catalog: Arc<dyn CatalogStore>,
    factory: Arc<dyn ConnectorFactory>,
    config: EngineConfig,
}

/// `<hostname>-<uuid>`: stable enough to survive restarts of the same
/// process image, unique across hosts.
pub fn generate_worker_id() -> WorkerId {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    WorkerId::new(format!("{host}-{}", Uuid::new_v4()))
}

fn claim_jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(100..=500))
}

impl WorkerRuntime {
    pub fn new(
        worker_id: WorkerId,
        catalog: Arc<dyn CatalogStore>,
        factory: Arc<dyn ConnectorFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            worker_id,
            catalog,
            factory,
            config,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Main loop: runs until the token cancels. An in-flight chunk is
    /// finished (or aborted through its own token) before returning.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        info!(worker_id = %self.worker_id, "worker started");
        self.register(WorkerStatus::Idle, None).await;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.catalog.claim_next_chunk(&self.worker_id).await {
                Ok(Some(chunk)) => {
                    self.register(WorkerStatus::Busy, Some(&chunk)).await;
                    self.run_chunk(chunk, &cancel).await;
                    self.register(WorkerStatus::Idle, None).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(claim_jitter()) => {}
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(worker_id = %self.worker_id, %err, "catalog unavailable, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.register(WorkerStatus::Draining, None).await;
        info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }

    async fn run_chunk(&self, chunk: Chunk, shutdown: &CancellationToken) {
        let chunk_id = chunk.id;
        let started = std::time::Instant::now();

        let context = match self.load_context(&chunk).await {
            Ok(context) => context,
            Err(err) => {
                error!(%chunk_id, %err, "failed to load chunk context");
                let _ = self
                    .catalog
                    .fail_chunk(chunk_id, &err.to_string(), 0, false)
                    .await;
                return;
            }
        };
        let (job, table) = context;

        let progress = Arc::new(ExecutionProgress::new());
        let chunk_cancel = shutdown.child_token();
        let ticker = HeartbeatTicker::spawn(
            self.catalog.clone(),
            self.worker_id.clone(),
            chunk_id,
            self.config.heartbeat_interval,
            progress.clone(),
            chunk_cancel.clone(),
        );

        let mut controller =
            BatchController::new(job.batch_size, self.config.target_insert_latency_ms);
        let execution = ChunkExecution {
            catalog: self.catalog.clone(),
            factory: self.factory.clone(),
            job: &job,
            table: &table,
            chunk: &chunk,
            worker_id: &self.worker_id,
            controller: &mut controller,
            progress: progress.clone(),
            cancel: chunk_cancel.clone(),
        };
        let result = execution.run().await;

        // The ticker must be gone before the final transition commits.
        ticker.stop().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => match self.catalog.complete_chunk(chunk_id, outcome).await {
                Ok(()) => info!(%chunk_id, "chunk completed"),
                Err(CatalogError::OwnershipLost(_)) => {
                    warn!(%chunk_id, "chunk was reclaimed before completion could commit");
                }
                Err(err) => error!(%chunk_id, %err, "failed to record chunk completion"),
            },
            Err(ExecError::Cancelled) => {
                // Loss of ownership or shutdown: the reaper (or the new
                // owner) is responsible for this chunk now.
                info!(%chunk_id, "chunk execution cancelled, no state recorded");
            }
            Err(ExecError::Database(db_err)) => {
                let terminal = db_err.is_terminal_for_chunk();
                warn!(%chunk_id, err = %db_err, terminal, "chunk failed");
                if let Err(err) = self
                    .catalog
                    .fail_chunk(chunk_id, &db_err.to_string(), elapsed_ms, terminal)
                    .await
                {
                    error!(%chunk_id, %err, "failed to record chunk failure");
                }
            }
            Err(ExecError::Catalog(cat_err)) => {
                warn!(%chunk_id, err = %cat_err, "catalog error during execution");
                if let Err(err) = self
                    .catalog
                    .fail_chunk(chunk_id, &cat_err.to_string(), elapsed_ms, false)
                    .await
                {
                    error!(%chunk_id, %err, "failed to record chunk failure");
                }
            }
        }
    }

    async fn load_context(
        &self,
        chunk: &Chunk,
    ) -> Result<(model::catalog::job::Job, model::catalog::table::TableState), CatalogError> {
        let job = self.catalog.get_job(chunk.job_id).await?;
        let tables = self.catalog.get_tables(chunk.job_id).await?;
        let table = tables
            .into_iter()
            .find(|t| t.id == chunk.table_id)
            .ok_or(CatalogError::TableNotFound(chunk.table_id))?;
        Ok((job, table))
    }

    async fn register(&self, status: WorkerStatus, chunk: Option<&Chunk>) {
        let registration = WorkerRegistration {
            worker_id: self.worker_id.clone(),
            last_seen: Utc::now(),
            current_chunk: chunk.map(|c| c.id),
            status,
        };
        if let Err(err) = self.catalog.register_worker(&registration).await {
            warn!(worker_id = %self.worker_id, %err, "presence update failed");
        }
    }
}
