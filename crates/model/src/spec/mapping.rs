use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-table mapping. A missing entry in the job spec means "map
/// one-to-one with identical names"; a source column absent from
/// `column_mapping` passes through under its own name; a `transforms`
/// entry replaces the source column with an opaque expression evaluated
/// by the source adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMapping {
    #[serde(default)]
    pub target_table: Option<String>,
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub transforms: BTreeMap<String, String>,
}

impl TableMapping {
    pub fn target_table_or<'a>(&'a self, source_table: &'a str) -> &'a str {
        self.target_table.as_deref().unwrap_or(source_table)
    }

    pub fn target_column<'a>(&'a self, source_column: &'a str) -> &'a str {
        self.column_mapping
            .get(source_column)
            .map(String::as_str)
            .unwrap_or(source_column)
    }

    pub fn transform_for(&self, source_column: &str) -> Option<&str> {
        self.transforms.get(source_column).map(String::as_str)
    }

    /// Target columns this mapping will populate for the given source
    /// column list, in source order.
    pub fn mapped_target_columns(&self, source_columns: &[String]) -> Vec<String> {
        source_columns
            .iter()
            .map(|c| self.target_column(c).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> TableMapping {
        TableMapping {
            target_table: Some("customers".into()),
            column_mapping: BTreeMap::from([("email".to_string(), "email_address".to_string())]),
            transforms: BTreeMap::from([("name".to_string(), "UPPER(name)".to_string())]),
        }
    }

    #[test]
    fn unmapped_columns_pass_through() {
        let m = mapping();
        assert_eq!(m.target_column("email"), "email_address");
        assert_eq!(m.target_column("id"), "id");
        assert_eq!(m.target_table_or("users"), "customers");
        assert_eq!(TableMapping::default().target_table_or("users"), "users");
    }

    #[test]
    fn transforms_are_per_source_column() {
        let m = mapping();
        assert_eq!(m.transform_for("name"), Some("UPPER(name)"));
        assert_eq!(m.transform_for("email"), None);
    }
}
