use crate::{
    descriptor::{ColumnDescriptor, TableDescriptor},
    error::{ConnectorError, DbError},
    query::{Dialect, QueryRenderer},
    requests::{FetchResult, InsertReport, ScanRequest},
    retry::RetryPolicy,
    row::DbRow,
    source::SourceConnector,
    target::TargetConnector,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::{SinkExt, pin_mut};
use model::{
    catalog::audit::{ConstraintBackup, ConstraintKind},
    core::ids::{JobId, WorkerId},
    records::row::RowData,
};
use std::{sync::Arc, time::Instant};
use tokio::sync::RwLock;
use tokio_postgres::Client;
use tracing::debug;

pub mod encoder;
pub mod utils;

use encoder::PgCopyValueEncoder;

const QUERY_TABLE_NAMES_SQL: &str = include_str!("sql/table_names.sql");
const QUERY_TABLE_COLUMNS_SQL: &str = include_str!("sql/table_columns.sql");
const QUERY_PK_COLUMNS_SQL: &str = include_str!("sql/pk_columns.sql");
const QUERY_ROW_ESTIMATE_SQL: &str = include_str!("sql/row_estimate.sql");
const QUERY_INDEX_BACKUPS_SQL: &str = include_str!("sql/index_backups.sql");
const QUERY_FK_BACKUPS_SQL: &str = include_str!("sql/fk_backups.sql");
const QUERY_INDEX_EXISTS_SQL: &str = include_str!("sql/index_exists.sql");
const QUERY_CONSTRAINT_EXISTS_SQL: &str = include_str!("sql/constraint_exists.sql");

const PG_INTEGER_TYPES: [&str; 3] = ["smallint", "integer", "bigint"];

#[derive(Clone)]
pub struct PgConnector {
    client: Arc<RwLock<Client>>,
    renderer: Arc<QueryRenderer>,
    retry: RetryPolicy,
}

impl PgConnector {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let client = utils::connect_client(url).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
            renderer: Arc::new(QueryRenderer::new(Dialect::Postgres)),
            retry: RetryPolicy::for_database(),
        })
    }

    fn quote_ident(&self, name: &str) -> String {
        Dialect::Postgres.quote_ident(name)
    }
}

#[async_trait]
impl SourceConnector for PgConnector {
    async fn discover_tables(&self) -> Result<Vec<String>, DbError> {
        let client = self.client.read().await;
        let rows = client.query(QUERY_TABLE_NAMES_SQL, &[]).await?;
        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, DbError> {
        let client = self.client.read().await;

        let column_rows = client.query(QUERY_TABLE_COLUMNS_SQL, &[&table]).await?;
        if column_rows.is_empty() {
            return Err(DbError::NotFound(format!("table {table} does not exist")));
        }
        let columns = column_rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get("nullable"),
                has_default: row.get("has_default"),
            })
            .collect();

        let pk_rows = client.query(QUERY_PK_COLUMNS_SQL, &[&table]).await?;
        let (pk_column, pk_integer) = match pk_rows.as_slice() {
            [only] => {
                let data_type: String = only.get("data_type");
                (
                    Some(only.get::<_, String>("column_name")),
                    PG_INTEGER_TYPES.contains(&data_type.as_str()),
                )
            }
            // No pk, or a composite one: either way not chunkable.
            _ => (None, false),
        };

        let estimate_row = client.query_opt(QUERY_ROW_ESTIMATE_SQL, &[&table]).await?;
        let row_count_estimate = estimate_row
            .map(|row| row.get::<_, i64>("estimate").max(0) as u64)
            .unwrap_or(0);

        Ok(TableDescriptor {
            name: table.to_string(),
            pk_column,
            pk_integer,
            columns,
            row_count_estimate,
        })
    }

    async fn pk_bounds(&self, table: &str, pk: &str) -> Result<Option<(i64, i64)>, DbError> {
        let sql = self.renderer.pk_bounds(table, pk);
        let client = self.client.read().await;
        let row = client.query_one(&sql, &[]).await?;
        let min: Option<i64> = row.get("min_pk");
        let max: Option<i64> = row.get("max_pk");
        Ok(min.zip(max))
    }

    async fn fetch_range(&self, request: &ScanRequest) -> Result<FetchResult, DbError> {
        let sql = self.renderer.scan(request);
        debug!(table = %request.table, "range scan: {sql}");

        let sql = &sql;
        let rows = self
            .retry
            .run(|| async move {
                let client = self.client.read().await;
                match request.cursor {
                    Some(cursor) => client
                        .query(sql.as_str(), &[&request.pk_start, &request.pk_end, &cursor])
                        .await
                        .map_err(DbError::from),
                    None => client
                        .query(sql.as_str(), &[&request.pk_start, &request.pk_end])
                        .await
                        .map_err(DbError::from),
                }
            })
            .await?;

        let reached_end = rows.len() < request.limit;
        let data: Vec<RowData> = rows
            .iter()
            .map(|row| DbRow::Postgres(row).to_row_data(&request.table))
            .collect();
        let next_cursor = data
            .last()
            .and_then(|row| row.get_value(&request.pk_column).as_i64());

        Ok(FetchResult {
            rows: data,
            next_cursor,
            reached_end,
        })
    }
}

#[async_trait]
impl TargetConnector for PgConnector {
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, DbError> {
        let client = self.client.read().await;
        let rows = client.query(QUERY_TABLE_COLUMNS_SQL, &[&table]).await?;
        if rows.is_empty() {
            return Err(DbError::NotFound(format!("table {table} does not exist")));
        }
        Ok(rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get("nullable"),
                has_default: row.get("has_default"),
            })
            .collect())
    }

    async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[RowData],
    ) -> Result<InsertReport, DbError> {
        if rows.is_empty() {
            return Ok(InsertReport {
                rows_inserted: 0,
                latency_ms: 0.0,
                peak_memory_mb: 0.0,
            });
        }

        let column_list = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "COPY {} ({column_list}) FROM STDIN WITH (FORMAT csv, NULL '\\N')",
            self.quote_ident(table)
        );
        let encoder = PgCopyValueEncoder::new();
        let payload_bytes: usize = rows.iter().map(RowData::size_bytes).sum();

        let started = Instant::now();
        let statement = &statement;
        let encoder = &encoder;
        self.retry
            .run(|| async move {
                let mut client = self.client.write().await;
                let tx = client.transaction().await?;
                let sink = tx.copy_in(statement.as_str()).await?;
                pin_mut!(sink);

                for row in rows {
                    let mut line = String::new();
                    for (i, column) in columns.iter().enumerate() {
                        if i > 0 {
                            line.push(',');
                        }
                        let field = row.get(column).and_then(|f| f.value.as_ref());
                        let encoded = match field {
                            Some(value) => encoder.encode_value(value),
                            None => encoder.encode_null(),
                        };
                        line.push_str(&encoded);
                    }
                    line.push('\n');
                    sink.as_mut()
                        .send(Bytes::from(line))
                        .await
                        .map_err(DbError::from)?;
                }

                sink.as_mut().finish().await.map_err(DbError::from)?;
                tx.commit().await.map_err(DbError::from)
            })
            .await?;

        Ok(InsertReport {
            rows_inserted: rows.len() as u64,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            peak_memory_mb: payload_bytes as f64 / (1024.0 * 1024.0),
        })
    }

    async fn count_range(
        &self,
        table: &str,
        pk: &str,
        lo: i64,
        hi: i64,
        upper_inclusive: bool,
    ) -> Result<u64, DbError> {
        let sql = self.renderer.count_range(table, pk, upper_inclusive);
        let client = self.client.read().await;
        let row = client.query_one(&sql, &[&lo, &hi]).await?;
        Ok(row.get::<_, i64>("n").max(0) as u64)
    }

    async fn drop_and_backup_constraints(
        &self,
        job_id: JobId,
        table: &str,
        worker_id: &WorkerId,
    ) -> Result<Vec<ConstraintBackup>, DbError> {
        let now = Utc::now();
        let mut records = Vec::new();

        let (fk_rows, index_rows) = {
            let client = self.client.read().await;
            let fk_rows = client.query(QUERY_FK_BACKUPS_SQL, &[&table]).await?;
            let index_rows = client.query(QUERY_INDEX_BACKUPS_SQL, &[&table]).await?;
            (fk_rows, index_rows)
        };

        // Foreign keys first so index drops do not break referencing
        // constraints.
        for row in &fk_rows {
            let name: String = row.get("name");
            let definition: String = row.get("definition");
            let restore = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {definition}",
                self.quote_ident(table),
                self.quote_ident(&name)
            );
            let drop = format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                self.quote_ident(table),
                self.quote_ident(&name)
            );
            let client = self.client.read().await;
            client.batch_execute(&drop).await?;
            records.push(ConstraintBackup {
                job_id,
                table_name: table.to_string(),
                constraint_name: name,
                kind: ConstraintKind::ForeignKey,
                restore_definition: restore,
                updated_by: Some(worker_id.clone()),
                dropped_at: Some(now),
                restored_at: None,
            });
        }

        for row in &index_rows {
            let name: String = row.get("name");
            let definition: String = row.get("definition");
            let drop = format!("DROP INDEX IF EXISTS {}", self.quote_ident(&name));
            let client = self.client.read().await;
            client.batch_execute(&drop).await?;
            records.push(ConstraintBackup {
                job_id,
                table_name: table.to_string(),
                constraint_name: name,
                kind: ConstraintKind::Index,
                restore_definition: definition,
                updated_by: Some(worker_id.clone()),
                dropped_at: Some(now),
                restored_at: None,
            });
        }

        Ok(records)
    }

    async fn restore_constraints(&self, records: &[ConstraintBackup]) -> Result<(), DbError> {
        // Indexes back first: FK validation wants them in place.
        let mut ordered: Vec<&ConstraintBackup> = records.iter().collect();
        ordered.sort_by_key(|r| match r.kind {
            ConstraintKind::Index => 0,
            ConstraintKind::ForeignKey => 1,
        });

        for record in ordered {
            let client = self.client.read().await;
            let present = match record.kind {
                ConstraintKind::Index => {
                    let row = client
                        .query_one(QUERY_INDEX_EXISTS_SQL, &[&record.constraint_name])
                        .await?;
                    row.get::<_, bool>("present")
                }
                ConstraintKind::ForeignKey => {
                    let row = client
                        .query_one(
                            QUERY_CONSTRAINT_EXISTS_SQL,
                            &[&record.table_name, &record.constraint_name],
                        )
                        .await?;
                    row.get::<_, bool>("present")
                }
            };
            if present {
                continue;
            }
            client.batch_execute(&record.restore_definition).await?;
        }
        Ok(())
    }
}
