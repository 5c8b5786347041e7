use crate::{adaptive::BatchController, error::ExecError, progress::ExecutionProgress};
use catalog::{CatalogStore, ConstraintDropGate};
use connectors::{ConnectorFactory, RangeScan, ScanRequest, SelectColumn, TargetConnector};
use model::{
    catalog::{chunk::Chunk, chunk::ChunkOutcome, job::Job, table::TableState},
    core::ids::WorkerId,
    records::{
        batch::rolling_checksum,
        row::{FieldValue, RowData},
    },
    spec::mapping::TableMapping,
};
use std::{sync::Arc, time::Duration, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CONSTRAINT_GATE_POLL: Duration = Duration::from_millis(200);

pub struct ChunkExecution<'a> {
    pub catalog: Arc<dyn CatalogStore>,
    pub factory: Arc<dyn ConnectorFactory>,
    pub job: &'a Job,
    pub table: &'a TableState,
    pub chunk: &'a Chunk,
    pub worker_id: &'a WorkerId,
    pub controller: &'a mut BatchController,
    pub progress: Arc<ExecutionProgress>,
    pub cancel: CancellationToken,
}

/// Build the scan select list: plain columns pass through, mapped
/// transform expressions are evaluated by the source database.
fn select_columns(source_columns: &[String], mapping: &TableMapping) -> Vec<SelectColumn> {
    source_columns
        .iter()
        .map(|column| match mapping.transform_for(column) {
            Some(expr) => SelectColumn::transformed(expr, column),
            None => SelectColumn::plain(column),
        })
        .collect()
}

/// Rename source fields to their target columns, dropping nothing: an
/// unmapped column keeps its own name.
fn remap_row(row: &RowData, mapping: &TableMapping, target_table: &str) -> RowData {
    let field_values = row
        .field_values
        .iter()
        .map(|field| FieldValue {
            name: mapping.target_column(&field.name).to_string(),
            value: field.value.clone(),
        })
        .collect();
    RowData::new(target_table, field_values)
}

impl ChunkExecution<'_> {
    /// Move one chunk's rows source → target. Streams pages bounded by
    /// the controller's batch size, one target transaction per batch, a
    /// rolling checksum over everything read.
    pub async fn run(mut self) -> Result<ChunkOutcome, ExecError> {
        let started = Instant::now();
        let chunk = self.chunk;

        let source = self
            .factory
            .source(&self.job.source)
            .await
            .map_err(ExecError::Database)?;
        let target = self
            .factory
            .target(&self.job.target)
            .await
            .map_err(ExecError::Database)?;

        if self.job.drop_constraints {
            self.coordinate_constraint_drop(target.as_ref()).await?;
        }

        let descriptor = source.describe_table(&chunk.table_name).await?;
        let source_columns = descriptor.column_names();
        let mapping = &self.table.mapping;
        let target_columns = mapping.mapped_target_columns(&source_columns);

        let request = ScanRequest {
            table: chunk.table_name.clone(),
            pk_column: self.table.pk_column.clone(),
            columns: select_columns(&source_columns, mapping),
            pk_start: chunk.pk_start,
            pk_end: chunk.pk_end,
            upper_inclusive: chunk.upper_inclusive,
            cursor: None,
            limit: self.controller.current() as usize,
        };
        let mut scan = RangeScan::new(source.clone(), request);

        let mut source_rows: u64 = 0;
        let mut rows_inserted: u64 = 0;
        let mut bytes_copied: u64 = 0;
        let mut checksum: u64 = 0;
        let mut latency_total = 0.0;
        let mut batches: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let batch_size = self.controller.current() as usize;
            let Some(rows) = scan.next_page(batch_size).await? else {
                break;
            };

            source_rows += rows.len() as u64;
            checksum = rolling_checksum(checksum, &rows);
            let page_bytes: u64 = rows.iter().map(|r| r.size_bytes() as u64).sum();
            bytes_copied += page_bytes;

            let outgoing: Vec<RowData> = rows
                .iter()
                .map(|row| remap_row(row, mapping, &self.table.target_table))
                .collect();

            // A cancelled chunk must not keep writing to the target.
            if self.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let report = target
                .bulk_insert(&self.table.target_table, &target_columns, &outgoing)
                .await?;
            rows_inserted += report.rows_inserted;
            batches += 1;
            latency_total += report.latency_ms;

            self.progress
                .record_batch(rows.len() as u64, page_bytes, report.peak_memory_mb, report.latency_ms);

            if let Some(adjustment) =
                self.controller
                    .observe(report.latency_ms, self.job.id, self.worker_id)
            {
                debug!(
                    old = adjustment.old_batch_size,
                    new = adjustment.new_batch_size,
                    "adaptive batch adjustment"
                );
                self.catalog.record_batch_adjustment(&adjustment).await?;
            }
        }

        let target_row_count = if self.job.validate {
            let target_pk = mapping.target_column(&self.table.pk_column);
            target
                .count_range(
                    &self.table.target_table,
                    target_pk,
                    chunk.pk_start,
                    chunk.pk_end,
                    chunk.upper_inclusive,
                )
                .await?
        } else {
            rows_inserted
        };

        let elapsed = started.elapsed();
        let elapsed_secs = elapsed.as_secs_f64().max(1e-6);
        info!(
            chunk_id = %chunk.id,
            rows = source_rows,
            duration_ms = elapsed.as_millis() as u64,
            "chunk copy finished"
        );

        Ok(ChunkOutcome {
            rows_processed: rows_inserted,
            source_row_count: source_rows,
            target_row_count,
            checksum,
            duration_ms: elapsed.as_millis() as u64,
            bytes_copied,
            batch_size_used: self.controller.current(),
            throughput_rows_per_sec: source_rows as f64 / elapsed_secs,
            throughput_mb_per_sec: bytes_copied as f64 / (1024.0 * 1024.0) / elapsed_secs,
            memory_peak_mb: self.progress.memory_peak_mb(),
            insert_latency_ms: if batches > 0 {
                latency_total / batches as f64
            } else {
                0.0
            },
            validation_enabled: self.job.validate,
        })
    }

    /// One worker per (job, target table) performs the drop; the rest
    /// wait until the gate reports it done.
    async fn coordinate_constraint_drop(
        &self,
        target: &dyn TargetConnector,
    ) -> Result<(), ExecError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let gate = self
                .catalog
                .begin_constraint_drop(self.job.id, &self.table.target_table, self.worker_id)
                .await?;
            match gate {
                ConstraintDropGate::Owner => {
                    info!(
                        table = %self.table.target_table,
                        "dropping target constraints for bulk load"
                    );
                    let records = target
                        .drop_and_backup_constraints(
                            self.job.id,
                            &self.table.target_table,
                            self.worker_id,
                        )
                        .await?;
                    self.catalog
                        .finish_constraint_drop(self.job.id, &self.table.target_table, &records)
                        .await?;
                    return Ok(());
                }
                ConstraintDropGate::Dropped => return Ok(()),
                ConstraintDropGate::InProgress => {
                    tokio::time::sleep(CONSTRAINT_GATE_POLL).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn transforms_replace_the_column_expression() {
        let mapping = TableMapping {
            target_table: None,
            column_mapping: BTreeMap::new(),
            transforms: BTreeMap::from([("name".to_string(), "UPPER(name)".to_string())]),
        };
        let columns = vec!["id".to_string(), "name".to_string()];
        let select = select_columns(&columns, &mapping);
        assert!(select[0].is_plain());
        assert_eq!(select[1].expr, "UPPER(name)");
        assert_eq!(select[1].alias, "name");
    }

    #[test]
    fn remap_renames_mapped_fields_only() {
        let mapping = TableMapping {
            target_table: Some("customers".into()),
            column_mapping: BTreeMap::from([("email".to_string(), "email_address".to_string())]),
            transforms: BTreeMap::new(),
        };
        let row = RowData::new(
            "users",
            vec![
                FieldValue {
                    name: "id".into(),
                    value: Some(model::core::value::Value::Int(7)),
                },
                FieldValue {
                    name: "email".into(),
                    value: None,
                },
            ],
        );
        let remapped = remap_row(&row, &mapping, "customers");
        assert_eq!(remapped.table, "customers");
        assert_eq!(remapped.field_values[0].name, "id");
        assert_eq!(remapped.field_values[1].name, "email_address");
    }
}
