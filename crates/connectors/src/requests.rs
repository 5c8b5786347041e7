use model::records::row::RowData;

/// One select-list entry of a range scan. `expr` is either a plain
/// column reference or an opaque transform expression from the table
/// mapping, evaluated by the source database.
#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub expr: String,
    pub alias: String,
}

impl SelectColumn {
    pub fn plain(name: &str) -> Self {
        Self {
            expr: name.to_string(),
            alias: name.to_string(),
        }
    }

    pub fn transformed(expr: &str, alias: &str) -> Self {
        Self {
            expr: expr.to_string(),
            alias: alias.to_string(),
        }
    }

    pub fn is_plain(&self) -> bool {
        self.expr == self.alias
    }
}

/// Keyset-paginated scan over one chunk's pk range. `cursor` is the last
/// pk already delivered; pages arrive in pk order.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub pk_column: String,
    pub columns: Vec<SelectColumn>,
    pub pk_start: i64,
    pub pk_end: i64,
    pub upper_inclusive: bool,
    pub cursor: Option<i64>,
    pub limit: usize,
}

/// One page of a range scan.
#[derive(Debug)]
pub struct FetchResult {
    pub rows: Vec<RowData>,
    pub next_cursor: Option<i64>,
    pub reached_end: bool,
}

/// Measured outcome of one bulk-insert batch.
#[derive(Debug, Clone, Copy)]
pub struct InsertReport {
    pub rows_inserted: u64,
    pub latency_ms: f64,
    pub peak_memory_mb: f64,
}
