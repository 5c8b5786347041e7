use async_trait::async_trait;
use connectors::{
    ColumnDescriptor, ConnectorFactory, DbError, FetchResult, InsertReport, ScanRequest,
    SourceConnector, TableDescriptor, TargetConnector,
};
use model::{
    catalog::audit::ConstraintBackup,
    core::{
        ids::{JobId, WorkerId},
        value::Value,
    },
    records::row::{FieldValue, RowData},
    spec::connection::{ConnectionDescriptor, Driver, Secret},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

/// In-memory relational endpoint: BTreeMap per table keyed by pk, with
/// the same range/insert semantics the SQL connectors provide.
#[derive(Default)]
pub struct MemoryDb {
    tables: Mutex<HashMap<String, MemTable>>,
}

pub struct MemTable {
    pub pk_column: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: BTreeMap<i64, RowData>,
}

impl MemoryDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_table(&self, name: &str, pk_column: &str, columns: &[&str]) {
        let descriptors = columns
            .iter()
            .map(|c| ColumnDescriptor {
                name: c.to_string(),
                data_type: if *c == pk_column { "bigint" } else { "text" }.to_string(),
                nullable: *c != pk_column,
                has_default: false,
            })
            .collect();
        self.tables.lock().unwrap().insert(
            name.to_string(),
            MemTable {
                pk_column: pk_column.to_string(),
                columns: descriptors,
                rows: BTreeMap::new(),
            },
        );
    }

    /// Seed `count` rows with pks 1..=count.
    pub fn seed_rows(&self, table: &str, count: i64) {
        let mut tables = self.tables.lock().unwrap();
        let mem = tables.get_mut(table).expect("table must exist");
        for pk in 1..=count {
            let row = RowData::new(
                table,
                vec![
                    FieldValue {
                        name: mem.pk_column.clone(),
                        value: Some(Value::Int(pk)),
                    },
                    FieldValue {
                        name: "email".to_string(),
                        value: Some(Value::String(format!("user{pk}@example.com"))),
                    },
                ],
            );
            mem.rows.insert(pk, row);
        }
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }
}

/// Connector over a MemoryDb. `fail_inserts_remaining` injects one
/// DbError per pending count, for failure-path tests.
pub struct MemoryConnector {
    db: Arc<MemoryDb>,
    fail_inserts_remaining: Arc<AtomicU32>,
    injected_error: DbError,
}

impl MemoryConnector {
    fn new(db: Arc<MemoryDb>, failures: Arc<AtomicU32>, injected_error: DbError) -> Self {
        Self {
            db,
            fail_inserts_remaining: failures,
            injected_error,
        }
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn discover_tables(&self) -> Result<Vec<String>, DbError> {
        Ok(self.db.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, DbError> {
        let tables = self.db.tables.lock().unwrap();
        let mem = tables
            .get(table)
            .ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        Ok(TableDescriptor {
            name: table.to_string(),
            pk_column: Some(mem.pk_column.clone()),
            pk_integer: true,
            columns: mem.columns.clone(),
            row_count_estimate: mem.rows.len() as u64,
        })
    }

    async fn pk_bounds(&self, table: &str, _pk: &str) -> Result<Option<(i64, i64)>, DbError> {
        let tables = self.db.tables.lock().unwrap();
        let mem = tables
            .get(table)
            .ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        let min = mem.rows.keys().next().copied();
        let max = mem.rows.keys().next_back().copied();
        Ok(min.zip(max))
    }

    async fn fetch_range(&self, request: &ScanRequest) -> Result<FetchResult, DbError> {
        let tables = self.db.tables.lock().unwrap();
        let mem = tables
            .get(&request.table)
            .ok_or_else(|| DbError::NotFound(format!("table {}", request.table)))?;

        let lower = match request.cursor {
            Some(cursor) => (cursor + 1).max(request.pk_start),
            None => request.pk_start,
        };
        let rows: Vec<RowData> = mem
            .rows
            .range(lower..)
            .take_while(|(pk, _)| {
                if request.upper_inclusive {
                    **pk <= request.pk_end
                } else {
                    **pk < request.pk_end
                }
            })
            .take(request.limit)
            .map(|(_, row)| row.clone())
            .collect();

        let next_cursor = rows
            .last()
            .and_then(|row| row.get_value(&request.pk_column).as_i64());
        let reached_end = rows.len() < request.limit;
        Ok(FetchResult {
            rows,
            next_cursor,
            reached_end,
        })
    }
}

#[async_trait]
impl TargetConnector for MemoryConnector {
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, DbError> {
        let tables = self.db.tables.lock().unwrap();
        let mem = tables
            .get(table)
            .ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        Ok(mem.columns.clone())
    }

    async fn bulk_insert(
        &self,
        table: &str,
        _columns: &[String],
        rows: &[RowData],
    ) -> Result<InsertReport, DbError> {
        let remaining = self.fail_inserts_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_inserts_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(self.injected_error.clone());
        }

        let mut tables = self.db.tables.lock().unwrap();
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        let payload: usize = rows.iter().map(RowData::size_bytes).sum();
        for row in rows {
            let pk = row
                .get_value(&mem.pk_column)
                .as_i64()
                .ok_or_else(|| DbError::TypeMismatch("pk is not an integer".into()))?;
            if mem.rows.contains_key(&pk) {
                return Err(DbError::ConstraintViolation(format!(
                    "duplicate key {pk} in {table}"
                )));
            }
            mem.rows.insert(pk, row.clone());
        }
        Ok(InsertReport {
            rows_inserted: rows.len() as u64,
            latency_ms: 1.0,
            peak_memory_mb: payload as f64 / (1024.0 * 1024.0),
        })
    }

    async fn count_range(
        &self,
        table: &str,
        _pk: &str,
        lo: i64,
        hi: i64,
        upper_inclusive: bool,
    ) -> Result<u64, DbError> {
        let tables = self.db.tables.lock().unwrap();
        let mem = tables
            .get(table)
            .ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        let count = if upper_inclusive {
            mem.rows.range(lo..=hi).count()
        } else {
            mem.rows.range(lo..hi).count()
        };
        Ok(count as u64)
    }

    async fn drop_and_backup_constraints(
        &self,
        _job_id: JobId,
        _table: &str,
        _worker_id: &WorkerId,
    ) -> Result<Vec<ConstraintBackup>, DbError> {
        Ok(Vec::new())
    }

    async fn restore_constraints(&self, _records: &[ConstraintBackup]) -> Result<(), DbError> {
        Ok(())
    }
}

/// Factory wiring the worker and planner to the in-memory endpoints.
pub struct MemoryFactory {
    pub source_db: Arc<MemoryDb>,
    pub target_db: Arc<MemoryDb>,
    pub fail_inserts_remaining: Arc<AtomicU32>,
    pub injected_error: DbError,
}

impl MemoryFactory {
    pub fn new(source_db: Arc<MemoryDb>, target_db: Arc<MemoryDb>) -> Self {
        Self {
            source_db,
            target_db,
            fail_inserts_remaining: Arc::new(AtomicU32::new(0)),
            injected_error: DbError::ConnectionLost("injected".into()),
        }
    }

    pub fn failing_with(mut self, error: DbError, times: u32) -> Self {
        self.injected_error = error;
        self.fail_inserts_remaining = Arc::new(AtomicU32::new(times));
        self
    }
}

#[async_trait]
impl ConnectorFactory for MemoryFactory {
    async fn source(
        &self,
        _descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn SourceConnector>, DbError> {
        Ok(Arc::new(MemoryConnector::new(
            self.source_db.clone(),
            Arc::new(AtomicU32::new(0)),
            DbError::Unknown("unused".into()),
        )))
    }

    async fn target(
        &self,
        _descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn TargetConnector>, DbError> {
        Ok(Arc::new(MemoryConnector::new(
            self.target_db.clone(),
            self.fail_inserts_remaining.clone(),
            self.injected_error.clone(),
        )))
    }
}

pub fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        host: "memory".into(),
        port: None,
        database: "test".into(),
        username: "tester".into(),
        password: Secret::new("secret"),
        tls: false,
        driver: Some(Driver::Postgres),
    }
}
