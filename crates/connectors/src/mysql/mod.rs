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
use chrono::Utc;
use model::{
    catalog::audit::{ConstraintBackup, ConstraintKind},
    core::{ids::{JobId, WorkerId}, value::Value},
    records::row::RowData,
};
use mysql_async::{Pool, Row as MySqlRow, TxOpts, prelude::Queryable};
use std::{sync::Arc, time::Instant};
use tracing::debug;

pub mod params;

use params::MySqlParamStore;

const QUERY_TABLE_NAMES_SQL: &str = include_str!("sql/table_names.sql");
const QUERY_TABLE_COLUMNS_SQL: &str = include_str!("sql/table_columns.sql");
const QUERY_PK_COLUMNS_SQL: &str = include_str!("sql/pk_columns.sql");
const QUERY_ROW_ESTIMATE_SQL: &str = include_str!("sql/row_estimate.sql");
const QUERY_INDEX_BACKUPS_SQL: &str = include_str!("sql/index_backups.sql");
const QUERY_FK_BACKUPS_SQL: &str = include_str!("sql/fk_backups.sql");
const QUERY_INDEX_EXISTS_SQL: &str = include_str!("sql/index_exists.sql");
const QUERY_FK_EXISTS_SQL: &str = include_str!("sql/fk_exists.sql");

const MYSQL_INTEGER_TYPES: [&str; 5] = ["tinyint", "smallint", "mediumint", "int", "bigint"];

#[derive(Clone)]
pub struct MySqlConnector {
    pool: Pool,
    renderer: Arc<QueryRenderer>,
    retry: RetryPolicy,
}

fn row_bool(row: &MySqlRow, column: &str) -> bool {
    row.get_opt::<i64, _>(column)
        .and_then(|res| res.ok())
        .map(|v| v != 0)
        .unwrap_or(false)
}

fn row_string(row: &MySqlRow, column: &str) -> Result<String, DbError> {
    row.get_opt::<String, _>(column)
        .and_then(|res| res.ok())
        .ok_or_else(|| DbError::Unknown(format!("missing column {column} in metadata row")))
}

impl MySqlConnector {
    pub fn connect(url: &str) -> Result<Self, ConnectorError> {
        let pool = Pool::from_url(url)?;
        Ok(Self {
            pool,
            renderer: Arc::new(QueryRenderer::new(Dialect::MySql)),
            retry: RetryPolicy::for_database(),
        })
    }

    fn quote_ident(&self, name: &str) -> String {
        Dialect::MySql.quote_ident(name)
    }

    async fn column_descriptors(&self, table: &str) -> Result<Vec<ColumnDescriptor>, DbError> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<MySqlRow> = conn.exec(QUERY_TABLE_COLUMNS_SQL, (table,)).await?;
        if rows.is_empty() {
            return Err(DbError::NotFound(format!("table {table} does not exist")));
        }
        rows.iter()
            .map(|row| {
                Ok(ColumnDescriptor {
                    name: row_string(row, "column_name")?,
                    data_type: row_string(row, "data_type")?,
                    nullable: row_bool(row, "nullable"),
                    has_default: row_bool(row, "has_default"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for MySqlConnector {
    async fn discover_tables(&self) -> Result<Vec<String>, DbError> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<MySqlRow> = conn.query(QUERY_TABLE_NAMES_SQL).await?;
        rows.iter().map(|row| row_string(row, "table_name")).collect()
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, DbError> {
        let columns = self.column_descriptors(table).await?;

        let mut conn = self.pool.get_conn().await?;
        let pk_rows: Vec<MySqlRow> = conn.exec(QUERY_PK_COLUMNS_SQL, (table,)).await?;
        let (pk_column, pk_integer) = match pk_rows.as_slice() {
            [only] => {
                let data_type = row_string(only, "data_type")?.to_ascii_lowercase();
                (
                    Some(row_string(only, "column_name")?),
                    MYSQL_INTEGER_TYPES.contains(&data_type.as_str()),
                )
            }
            _ => (None, false),
        };

        let estimate: Option<i64> = conn.exec_first(QUERY_ROW_ESTIMATE_SQL, (table,)).await?;
        let row_count_estimate = estimate.unwrap_or(0).max(0) as u64;

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
        let mut conn = self.pool.get_conn().await?;
        let row: Option<(Option<i64>, Option<i64>)> = conn.query_first(sql).await?;
        Ok(row.and_then(|(min, max)| min.zip(max)))
    }

    async fn fetch_range(&self, request: &ScanRequest) -> Result<FetchResult, DbError> {
        let sql = self.renderer.scan(request);
        debug!(table = %request.table, "range scan: {sql}");

        let mut values = vec![Value::Int(request.pk_start), Value::Int(request.pk_end)];
        if let Some(cursor) = request.cursor {
            values.push(Value::Int(cursor));
        }

        let sql = &sql;
        let values = &values;
        let rows: Vec<MySqlRow> = self
            .retry
            .run(|| async move {
                let params = MySqlParamStore::from_values(values).params();
                let mut conn = self.pool.get_conn().await?;
                conn.exec(sql.as_str(), params).await.map_err(DbError::from)
            })
            .await?;

        let reached_end = rows.len() < request.limit;
        let data: Vec<RowData> = rows
            .iter()
            .map(|row| DbRow::MySql(row).to_row_data(&request.table))
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
impl TargetConnector for MySqlConnector {
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, DbError> {
        self.column_descriptors(table).await
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

        let sql = self.renderer.insert(table, columns, rows.len());
        let payload_bytes: usize = rows.iter().map(RowData::size_bytes).sum();

        let mut values = Vec::with_capacity(rows.len() * columns.len());
        for row in rows {
            for column in columns {
                values.push(row.get_value(column));
            }
        }

        let started = Instant::now();
        let sql = &sql;
        let values = &values;
        self.retry
            .run(|| async move {
                let params = MySqlParamStore::from_values(values).params();
                let mut conn = self.pool.get_conn().await?;
                let mut tx = conn.start_transaction(TxOpts::default()).await?;
                tx.exec_drop(sql.as_str(), params).await?;
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
        let mut conn = self.pool.get_conn().await?;
        let count: Option<i64> = conn.exec_first(sql, (lo, hi)).await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn drop_and_backup_constraints(
        &self,
        job_id: JobId,
        table: &str,
        worker_id: &WorkerId,
    ) -> Result<Vec<ConstraintBackup>, DbError> {
        let now = Utc::now();
        let mut records = Vec::new();
        let mut conn = self.pool.get_conn().await?;

        // Foreign keys first: their backing indexes cannot be dropped
        // while the constraint exists.
        let fk_rows: Vec<MySqlRow> = conn.exec(QUERY_FK_BACKUPS_SQL, (table,)).await?;
        for row in &fk_rows {
            let name = row_string(row, "constraint_name")?;
            let fk_columns = row_string(row, "fk_columns")?;
            let referenced_table = row_string(row, "referenced_table_name")?;
            let ref_columns = row_string(row, "ref_columns")?;
            let update_rule = row_string(row, "update_rule")?;
            let delete_rule = row_string(row, "delete_rule")?;

            let restore = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) \
                 ON UPDATE {update_rule} ON DELETE {delete_rule}",
                self.quote_ident(table),
                self.quote_ident(&name),
                quote_column_list(&fk_columns),
                self.quote_ident(&referenced_table),
                quote_column_list(&ref_columns),
            );
            let drop = format!(
                "ALTER TABLE {} DROP FOREIGN KEY {}",
                self.quote_ident(table),
                self.quote_ident(&name)
            );
            conn.query_drop(drop).await?;
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

        let index_rows: Vec<MySqlRow> = conn.exec(QUERY_INDEX_BACKUPS_SQL, (table,)).await?;
        for row in &index_rows {
            let name = row_string(row, "index_name")?;
            let index_columns = row_string(row, "index_columns")?;
            let unique = if row_bool(row, "is_unique") {
                "UNIQUE "
            } else {
                ""
            };
            let restore = format!(
                "CREATE {unique}INDEX {} ON {} ({})",
                self.quote_ident(&name),
                self.quote_ident(table),
                quote_column_list(&index_columns),
            );
            let drop = format!(
                "DROP INDEX {} ON {}",
                self.quote_ident(&name),
                self.quote_ident(table)
            );
            conn.query_drop(drop).await?;
            records.push(ConstraintBackup {
                job_id,
                table_name: table.to_string(),
                constraint_name: name,
                kind: ConstraintKind::Index,
                restore_definition: restore,
                updated_by: Some(worker_id.clone()),
                dropped_at: Some(now),
                restored_at: None,
            });
        }

        Ok(records)
    }

    async fn restore_constraints(&self, records: &[ConstraintBackup]) -> Result<(), DbError> {
        let mut ordered: Vec<&ConstraintBackup> = records.iter().collect();
        ordered.sort_by_key(|r| match r.kind {
            ConstraintKind::Index => 0,
            ConstraintKind::ForeignKey => 1,
        });

        let mut conn = self.pool.get_conn().await?;
        for record in ordered {
            let present = match record.kind {
                ConstraintKind::Index => conn
                    .exec_first::<i64, _, _>(
                        QUERY_INDEX_EXISTS_SQL,
                        (&record.table_name, &record.constraint_name),
                    )
                    .await?
                    .unwrap_or(0)
                    != 0,
                ConstraintKind::ForeignKey => conn
                    .exec_first::<i64, _, _>(
                        QUERY_FK_EXISTS_SQL,
                        (&record.table_name, &record.constraint_name),
                    )
                    .await?
                    .unwrap_or(0)
                    != 0,
            };
            if present {
                continue;
            }
            conn.query_drop(record.restore_definition.as_str()).await?;
        }
        Ok(())
    }
}

/// `a, b` -> `` `a`, `b` `` for DDL rebuilt from information_schema
/// column lists.
fn quote_column_list(raw: &str) -> String {
    raw.split(',')
        .map(|part| Dialect::MySql.quote_ident(part.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
