use crate::error::EngineError;
use catalog::CatalogStore;
use chrono::{DateTime, Utc};
use connectors::ConnectorFactory;
use model::{
    catalog::{
        audit::{BatchAdjustment, ExecutionLogEntry, MetricSample},
        chunk::Chunk,
        job::Job,
        table::TableState,
        worker::WorkerRegistration,
    },
    core::ids::{ChunkId, JobId},
    spec::job::JobSpec,
};
use planner::{PlanSummary, Planner};
use std::sync::Arc;

/// Job state plus its per-table progress, as surfaced to operators.
#[derive(Debug)]
pub struct JobStatusReport {
    pub job: Job,
    pub tables: Vec<TableState>,
}

/// The thin imperative API the core exposes. REST/UI layers sit on top
/// of this; the CLI calls it directly.
pub struct JobService {
    catalog: Arc<dyn CatalogStore>,
    factory: Arc<dyn ConnectorFactory>,
}

impl JobService {
    pub fn new(catalog: Arc<dyn CatalogStore>, factory: Arc<dyn ConnectorFactory>) -> Self {
        Self { catalog, factory }
    }

    /// Create the job and plan its chunks in one step.
    pub async fn create_and_plan(&self, spec: &JobSpec) -> Result<(Job, PlanSummary), EngineError> {
        spec.validate_spec()?;
        let job = self.catalog.create_job(spec).await?;
        let mappings: Vec<_> = spec
            .tables
            .iter()
            .map(|(name, mapping)| (name.clone(), mapping.clone()))
            .collect();
        let planner = Planner::new(self.catalog.clone(), self.factory.clone());
        let summary = planner.plan(&job, &mappings).await?;
        let job = self.catalog.get_job(job.id).await?;
        Ok((job, summary))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, EngineError> {
        Ok(self.catalog.list_jobs().await?)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, EngineError> {
        Ok(self.catalog.get_job(job_id).await?)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusReport, EngineError> {
        let job = self.catalog.get_job(job_id).await?;
        let tables = self.catalog.get_tables(job_id).await?;
        Ok(JobStatusReport { job, tables })
    }

    pub async fn get_tables(&self, job_id: JobId) -> Result<Vec<TableState>, EngineError> {
        Ok(self.catalog.get_tables(job_id).await?)
    }

    pub async fn get_chunks(&self, job_id: JobId) -> Result<Vec<Chunk>, EngineError> {
        Ok(self.catalog.get_chunks(job_id).await?)
    }

    pub async fn retry_chunk(&self, chunk_id: ChunkId) -> Result<(), EngineError> {
        Ok(self.catalog.retry_chunk(chunk_id).await?)
    }

    pub async fn pause_job(&self, job_id: JobId) -> Result<(), EngineError> {
        Ok(self.catalog.pause_job(job_id).await?)
    }

    pub async fn resume_job(&self, job_id: JobId) -> Result<(), EngineError> {
        Ok(self.catalog.resume_job(job_id).await?)
    }

    pub async fn execution_log(
        &self,
        chunk_id: ChunkId,
    ) -> Result<Vec<ExecutionLogEntry>, EngineError> {
        Ok(self.catalog.execution_log(chunk_id).await?)
    }

    pub async fn metrics(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, EngineError> {
        Ok(self.catalog.metrics_for_job(job_id, since).await?)
    }

    pub async fn batch_history(&self, job_id: JobId) -> Result<Vec<BatchAdjustment>, EngineError> {
        Ok(self.catalog.batch_history(job_id).await?)
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, EngineError> {
        Ok(self.catalog.list_workers().await?)
    }
}
