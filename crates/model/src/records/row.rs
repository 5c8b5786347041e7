use crate::core::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowData {
    pub table: String,
    pub field_values: Vec<FieldValue>,
}

impl RowData {
    pub fn new(table: &str, field_values: Vec<FieldValue>) -> Self {
        RowData {
            table: table.to_string(),
            field_values,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .and_then(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn size_bytes(&self) -> usize {
        let mut size = self.table.len();
        for field_value in &self.field_values {
            size += field_value.name.len();
            size += match &field_value.value {
                Some(v) => v.size_bytes(),
                None => 0,
            };
        }
        size
    }

    /// Canonical byte form of the whole row, field order preserved as
    /// delivered by the source scan.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field_value in &self.field_values {
            bytes.extend_from_slice(field_value.name.as_bytes());
            bytes.push(0x1f);
            if let Some(value) = &field_value.value {
                bytes.extend_from_slice(&value.canonical_bytes());
            }
            bytes.push(0x1e);
        }
        bytes
    }
}
