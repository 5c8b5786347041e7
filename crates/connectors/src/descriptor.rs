use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

/// What the planner needs to know about one source table. The row count
/// comes from catalog statistics, never a full scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub pk_column: Option<String>,
    /// Whether the pk is a single integer-orderable column; chunking
    /// requires it.
    pub pk_integer: bool,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count_estimate: u64,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
