use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
    Boolean(bool),
    Json(serde_json::Value),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    TimestampNaive(NaiveDateTime),
    Null,
}

impl Value {
    /// Integer view used for primary-key arithmetic. Only integer-family
    /// values qualify; everything else is not a chunkable key.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            Value::Decimal(v) => v.to_i64(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Approximate in-memory footprint, used to bound worker buffers.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => 8,
            Value::Decimal(v) => v.to_string().len(),
            Value::String(s) => s.len(),
            Value::Boolean(_) => 1,
            Value::Json(v) => serde_json::to_string(v).map(|s| s.len()).unwrap_or(0),
            Value::Uuid(_) => 16,
            Value::Bytes(b) => b.len(),
            Value::Date(_) => 4,
            Value::Timestamp(_) | Value::TimestampNaive(_) => 8,
            Value::Null => 0,
        }
    }

    /// Canonical byte form fed into the chunk checksum. Stable across runs
    /// for the same logical value.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_be_bytes().to_vec(),
            Value::Uint(v) => v.to_be_bytes().to_vec(),
            Value::Float(v) => v.to_bits().to_be_bytes().to_vec(),
            Value::Decimal(v) => v.normalized().to_string().into_bytes(),
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Boolean(v) => vec![u8::from(*v)],
            Value::Json(v) => v.to_string().into_bytes(),
            Value::Uuid(v) => v.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
            Value::Date(d) => d.to_string().into_bytes(),
            Value::Timestamp(ts) => ts.timestamp_micros().to_be_bytes().to_vec(),
            Value::TimestampNaive(ts) => ts.and_utc().timestamp_micros().to_be_bytes().to_vec(),
            Value::Null => Vec::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Json(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::TimestampNaive(ts) => write!(f, "{ts}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_i64_covers_integer_family() {
        assert_eq!(Value::Int(-7).as_i64(), Some(-7));
        assert_eq!(Value::Uint(42).as_i64(), Some(42));
        assert_eq!(Value::String("42".into()).as_i64(), None);
    }

    #[test]
    fn canonical_bytes_distinguishes_values() {
        assert_ne!(
            Value::Int(1).canonical_bytes(),
            Value::Int(2).canonical_bytes()
        );
        assert_eq!(
            Value::String("a".into()).canonical_bytes(),
            Value::String("a".into()).canonical_bytes()
        );
    }
}
