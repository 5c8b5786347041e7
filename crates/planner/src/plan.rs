use crate::{chunks::chunk_bounds, error::PlanError};
use catalog::CatalogStore;
use chrono::Utc;
use connectors::{ConnectorFactory, SourceConnector, TableDescriptor, TargetConnector};
use model::{
    catalog::{chunk::Chunk, job::Job, status::TableStatus, table::TableState},
    core::ids::TableId,
    spec::mapping::TableMapping,
};
use std::sync::Arc;
use tracing::{info, warn};

/// What planning did, table by table.
#[derive(Debug, Default)]
pub struct PlanSummary {
    pub planned_tables: u32,
    pub skipped_empty_tables: u32,
    pub failed_tables: Vec<(String, String)>,
    pub total_chunks: u64,
}

/// Turns a created job into its initial tables and chunks without moving
/// any data. Tables that fail a prerequisite are recorded failed with a
/// reason; the job only fails when no table survives.
pub struct Planner {
    catalog: Arc<dyn CatalogStore>,
    factory: Arc<dyn ConnectorFactory>,
}

impl Planner {
    pub fn new(catalog: Arc<dyn CatalogStore>, factory: Arc<dyn ConnectorFactory>) -> Self {
        Self { catalog, factory }
    }

    pub async fn plan(&self, job: &Job, mappings: &[(String, TableMapping)]) -> Result<PlanSummary, PlanError> {
        self.catalog.mark_job_planning(job.id).await?;

        let source = self
            .factory
            .source(&job.source)
            .await
            .map_err(PlanError::SourceUnreachable)?;
        let target = self
            .factory
            .target(&job.target)
            .await
            .map_err(PlanError::TargetUnreachable)?;

        let mut summary = PlanSummary::default();
        let mut tables = Vec::new();
        let mut chunks = Vec::new();
        let now = Utc::now();

        for (source_table, mapping) in mappings {
            let state = self
                .plan_table(job, source_table, mapping, source.as_ref(), target.as_ref(), &mut chunks)
                .await;
            match state {
                Ok(table) => {
                    match table.status {
                        TableStatus::Completed => summary.skipped_empty_tables += 1,
                        _ => summary.planned_tables += 1,
                    }
                    tables.push(table);
                }
                Err(reason) => {
                    warn!(table = %source_table, %reason, "table failed planning");
                    summary
                        .failed_tables
                        .push((source_table.clone(), reason.clone()));
                    tables.push(TableState {
                        id: TableId::generate(),
                        job_id: job.id,
                        table_name: source_table.clone(),
                        target_table: mapping.target_table_or(source_table).to_string(),
                        pk_column: String::new(),
                        mapping: mapping.clone(),
                        total_rows_estimate: 0,
                        total_chunks: 0,
                        completed_chunks: 0,
                        failed_chunks: 0,
                        status: TableStatus::Failed,
                        created_at: now,
                        completed_at: None,
                        last_error: Some(reason),
                    });
                }
            }
        }

        summary.total_chunks = chunks.len() as u64;

        if summary.planned_tables == 0 && summary.skipped_empty_tables == 0 {
            self.catalog
                .insert_tables_and_chunks(job.id, tables, Vec::new())
                .await?;
            self.catalog
                .fail_job(job.id, "every table failed planning", false)
                .await?;
            return Err(PlanError::AllTablesFailed);
        }

        self.catalog
            .insert_tables_and_chunks(job.id, tables, chunks)
            .await?;

        info!(
            job_id = %job.id,
            planned = summary.planned_tables,
            skipped = summary.skipped_empty_tables,
            failed = summary.failed_tables.len(),
            chunks = summary.total_chunks,
            "planning complete"
        );
        Ok(summary)
    }

    /// Plan one table; `Err(reason)` fails the table, not the job.
    async fn plan_table(
        &self,
        job: &Job,
        source_table: &str,
        mapping: &TableMapping,
        source: &dyn SourceConnector,
        target: &dyn TargetConnector,
        chunks: &mut Vec<Chunk>,
    ) -> Result<TableState, String> {
        let descriptor = source
            .describe_table(source_table)
            .await
            .map_err(|e| format!("describe failed: {e}"))?;

        let pk_column = match (&descriptor.pk_column, descriptor.pk_integer) {
            (Some(pk), true) => pk.clone(),
            (Some(pk), false) => {
                return Err(format!(
                    "primary key {pk} is not a single integer-orderable column"
                ));
            }
            (None, _) => return Err("table has no single-column primary key".to_string()),
        };

        let target_table = mapping.target_table_or(source_table).to_string();
        self.check_required_columns(&descriptor, mapping, &target_table, target)
            .await?;

        let now = Utc::now();
        let table_id = TableId::generate();
        let bounds = source
            .pk_bounds(source_table, &pk_column)
            .await
            .map_err(|e| format!("pk bounds failed: {e}"))?;

        let Some((min_pk, max_pk)) = bounds else {
            // Empty source table: recorded complete, no chunks, so job
            // counters are not inflated.
            info!(table = %source_table, "source table is empty, skipping");
            return Ok(TableState {
                id: table_id,
                job_id: job.id,
                table_name: source_table.to_string(),
                target_table,
                pk_column,
                mapping: mapping.clone(),
                total_rows_estimate: 0,
                total_chunks: 0,
                completed_chunks: 0,
                failed_chunks: 0,
                status: TableStatus::Completed,
                created_at: now,
                completed_at: Some(now),
                last_error: None,
            });
        };

        // Catalog statistics can lag; bounds prove at least one row.
        let row_count = descriptor.row_count_estimate.max(1);
        let ranges = chunk_bounds(min_pk, max_pk, row_count, job.chunk_size);
        for range in &ranges {
            chunks.push(Chunk::new(
                job.id,
                table_id,
                source_table,
                range.pk_start,
                range.pk_end,
                range.upper_inclusive,
                job.max_retries,
                now,
            ));
        }

        Ok(TableState {
            id: table_id,
            job_id: job.id,
            table_name: source_table.to_string(),
            target_table,
            pk_column,
            mapping: mapping.clone(),
            total_rows_estimate: row_count,
            total_chunks: ranges.len() as u64,
            completed_chunks: 0,
            failed_chunks: 0,
            status: TableStatus::Pending,
            created_at: now,
            completed_at: None,
            last_error: None,
        })
    }

    /// Every NOT NULL target column without a default must be produced
    /// by the mapping.
    async fn check_required_columns(
        &self,
        descriptor: &TableDescriptor,
        mapping: &TableMapping,
        target_table: &str,
        target: &dyn TargetConnector,
    ) -> Result<(), String> {
        let target_columns = target
            .table_columns(target_table)
            .await
            .map_err(|e| format!("target describe failed: {e}"))?;

        let produced = mapping.mapped_target_columns(&descriptor.column_names());
        for column in &target_columns {
            if column.nullable || column.has_default {
                continue;
            }
            if !produced.iter().any(|p| p.eq_ignore_ascii_case(&column.name)) {
                return Err(format!(
                    "target column {}.{} is NOT NULL without default and not produced by the mapping",
                    target_table, column.name
                ));
            }
        }
        Ok(())
    }
}
