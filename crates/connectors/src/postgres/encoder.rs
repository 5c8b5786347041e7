use chrono::SecondsFormat;
use model::core::{
    utils::{encode_bytea, escape_csv_string},
    value::Value,
};

/// Encodes values into the CSV text form consumed by COPY FROM STDIN.
pub struct PgCopyValueEncoder;

impl PgCopyValueEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode_value(&self, value: &Value) -> String {
        match value {
            Value::Null => self.encode_null(),
            Value::String(s) => escape_csv_string(s),
            Value::Json(v) => escape_csv_string(&v.to_string()),
            Value::Bytes(bytes) => {
                let hex = encode_bytea(bytes);
                escape_csv_string(&hex)
            }
            Value::Boolean(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Uint(v) => v.to_string(),
            Value::Float(v) => ryu::Buffer::new().format(*v).to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Uuid(v) => v.to_string(),
            Value::Date(d) => d.to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            Value::TimestampNaive(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        }
    }

    pub fn encode_null(&self) -> String {
        "\\N".to_string()
    }
}

impl Default for PgCopyValueEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_csv_quoted_and_nulls_marked() {
        let encoder = PgCopyValueEncoder::new();
        assert_eq!(encoder.encode_value(&Value::String("a,\"b\"".into())), "\"a,\"\"b\"\"\"");
        assert_eq!(encoder.encode_null(), "\\N");
        assert_eq!(encoder.encode_value(&Value::Int(-3)), "-3");
    }
}
