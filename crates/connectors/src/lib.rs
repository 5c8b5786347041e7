pub mod descriptor;
pub mod error;
pub mod factory;
pub mod mysql;
pub mod postgres;
pub mod query;
pub mod requests;
pub mod retry;
pub mod row;
pub mod source;
pub mod target;

pub use descriptor::{ColumnDescriptor, TableDescriptor};
pub use error::{ConnectorError, DbError};
pub use factory::{ConnectorFactory, SqlConnectorFactory};
pub use requests::{FetchResult, InsertReport, ScanRequest, SelectColumn};
pub use source::{RangeScan, SourceConnector};
pub use target::TargetConnector;
