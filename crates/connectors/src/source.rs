use crate::{
    descriptor::TableDescriptor,
    error::DbError,
    requests::{FetchResult, ScanRequest},
};
use async_trait::async_trait;
use model::records::row::RowData;
use std::sync::Arc;

/// Read side of a relational adapter.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn discover_tables(&self) -> Result<Vec<String>, DbError>;

    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, DbError>;

    /// Min/max of the pk over the whole table; `None` when it is empty.
    async fn pk_bounds(&self, table: &str, pk: &str) -> Result<Option<(i64, i64)>, DbError>;

    /// One page of rows in pk order. The caller drives pagination with
    /// the returned cursor, so memory stays bounded by `limit`.
    async fn fetch_range(&self, request: &ScanRequest) -> Result<FetchResult, DbError>;
}

/// Streaming view of one chunk's range: repeated `next_page` calls walk
/// the range to exhaustion, each page at most `limit` rows.
pub struct RangeScan {
    connector: Arc<dyn SourceConnector>,
    request: ScanRequest,
    done: bool,
}

impl RangeScan {
    pub fn new(connector: Arc<dyn SourceConnector>, request: ScanRequest) -> Self {
        Self {
            connector,
            request,
            done: false,
        }
    }

    /// `None` once the range is exhausted.
    pub async fn next_page(&mut self, limit: usize) -> Result<Option<Vec<RowData>>, DbError> {
        if self.done {
            return Ok(None);
        }
        self.request.limit = limit;
        let page = self.connector.fetch_range(&self.request).await?;
        if page.reached_end {
            self.done = true;
        }
        self.request.cursor = page.next_cursor.or(self.request.cursor);
        if page.rows.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(page.rows))
    }
}
