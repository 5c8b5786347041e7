use crate::config::EngineConfig;
use catalog::CatalogStore;
use connectors::ConnectorFactory;
use model::catalog::{job::Job, status::JobStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The dispatcher's periodic half: reaper, failure supervisor, and
/// post-job constraint restoration. Any node may run it; a catalog
/// lease elects a single active leader.
pub struct MaintenanceRunner {
    node_id: String,
    catalog: Arc<dyn CatalogStore>,
    factory: Arc<dyn ConnectorFactory>,
    config: EngineConfig,
}

impl MaintenanceRunner {
    pub fn new(
        node_id: String,
        catalog: Arc<dyn CatalogStore>,
        factory: Arc<dyn ConnectorFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            node_id,
            catalog,
            factory,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut reap_tick = tokio::time::interval(self.config.reap_interval);
        let mut supervisor_tick = tokio::time::interval(self.config.supervisor_interval);
        reap_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        supervisor_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = reap_tick.tick() => {
                    if self.is_leader().await {
                        self.reap().await;
                    }
                }
                _ = supervisor_tick.tick() => {
                    if self.is_leader().await {
                        self.supervise().await;
                    }
                }
            }
        }
    }

    async fn is_leader(&self) -> bool {
        // Lease twice as long as the slowest tick so leadership does not
        // flap between checks.
        let ttl = self.config.reap_interval * 2;
        match self.catalog.acquire_leader(&self.node_id, ttl).await {
            Ok(leader) => leader,
            Err(err) => {
                warn!(%err, "leader lease check failed");
                false
            }
        }
    }

    /// Fail running chunks whose owners stopped heart-beating (or blew
    /// the hard timeout); they re-enter the retry schedule.
    pub async fn reap(&self) {
        let reaped = match self
            .catalog
            .reap_dead_workers(self.config.liveness_threshold, self.config.chunk_hard_timeout)
            .await
        {
            Ok(reaped) => reaped,
            Err(err) => {
                warn!(%err, "reaper pass failed");
                return;
            }
        };
        for chunk in &reaped {
            info!(
                chunk_id = %chunk.chunk_id,
                job_id = %chunk.job_id,
                worker_id = chunk.worker_id.as_ref().map(|w| w.as_str()).unwrap_or("unknown"),
                retry_scheduled = chunk.retry_scheduled,
                "reaped abandoned chunk"
            );
        }
    }

    /// Evaluate each live job: re-enqueue validation failures, auto-fail
    /// when the failure ratio crosses the job's threshold, and restore
    /// dropped constraints once a job goes terminal.
    pub async fn supervise(&self) {
        let jobs = match self.catalog.list_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(%err, "supervisor pass failed to list jobs");
                return;
            }
        };

        for job in jobs {
            if job.status.is_terminal() {
                if job.drop_constraints {
                    self.restore_constraints(&job).await;
                }
                continue;
            }
            if job.status == JobStatus::Pending {
                continue;
            }

            match self.catalog.requeue_unvalidated_chunks(job.id).await {
                Ok(requeued) if !requeued.is_empty() => {
                    warn!(
                        job_id = %job.id,
                        count = requeued.len(),
                        "re-enqueued chunks with failed validation"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(job_id = %job.id, %err, "validation requeue failed"),
            }

            let health = match self.catalog.job_health(job.id).await {
                Ok(health) => health,
                Err(err) => {
                    warn!(job_id = %job.id, %err, "health check failed");
                    continue;
                }
            };

            let rate = health.failure_rate_percent();
            if health.total_chunks >= self.config.min_chunks_for_failure_rate
                && rate >= f64::from(health.failure_threshold_percent)
            {
                warn!(
                    job_id = %job.id,
                    failure_rate = format!("{rate:.1}%"),
                    threshold = health.failure_threshold_percent,
                    "failure threshold exceeded, auto-failing job"
                );
                let message = format!(
                    "auto-failed: {:.1}% of chunks failed (threshold {}%)",
                    rate, health.failure_threshold_percent
                );
                if let Err(err) = self.catalog.fail_job(job.id, &message, true).await {
                    warn!(job_id = %job.id, %err, "auto-fail transition failed");
                }
            }
        }
    }

    /// Put back what the bulk-load optimization took away. Idempotent:
    /// runs every tick until each backup is marked restored.
    async fn restore_constraints(&self, job: &Job) {
        let tables = match self.catalog.get_tables(job.id).await {
            Ok(tables) => tables,
            Err(err) => {
                warn!(job_id = %job.id, %err, "constraint restore: table listing failed");
                return;
            }
        };

        for table in tables {
            let backups = match self
                .catalog
                .constraint_backups_for(job.id, &table.target_table)
                .await
            {
                Ok(backups) => backups,
                Err(err) => {
                    warn!(job_id = %job.id, %err, "constraint restore: backup fetch failed");
                    continue;
                }
            };
            if backups.is_empty() || backups.iter().all(|b| b.restored_at.is_some()) {
                continue;
            }

            let target = match self.factory.target(&job.target).await {
                Ok(target) => target,
                Err(err) => {
                    warn!(job_id = %job.id, %err, "constraint restore: target unreachable");
                    return;
                }
            };
            match target.restore_constraints(&backups).await {
                Ok(()) => {
                    info!(
                        job_id = %job.id,
                        table = %table.target_table,
                        count = backups.len(),
                        "restored target constraints"
                    );
                    if let Err(err) = self
                        .catalog
                        .mark_constraints_restored(job.id, &table.target_table)
                        .await
                    {
                        warn!(job_id = %job.id, %err, "constraint restore: bookkeeping failed");
                    }
                }
                Err(err) => {
                    warn!(job_id = %job.id, %err, "constraint restore failed, will retry");
                }
            }
        }
    }
}
