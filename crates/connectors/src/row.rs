use bigdecimal::BigDecimal;
use model::{
    core::value::Value,
    records::row::{FieldValue, RowData},
};
use mysql_async::{Row as MySqlRow, Value as MySqlValue, consts::ColumnType};
use std::str::FromStr;
use tokio_postgres::Row as PgRow;
use tracing::warn;

/// Uniform row decoding across drivers; unknown column types degrade to
/// string with a warning rather than failing the whole page.
pub enum DbRow<'a> {
    MySql(&'a MySqlRow),
    Postgres(&'a PgRow),
}

impl DbRow<'_> {
    pub fn to_row_data(&self, table: &str) -> RowData {
        match self {
            DbRow::MySql(row) => mysql_row_data(row, table),
            DbRow::Postgres(row) => pg_row_data(row, table),
        }
    }
}

fn pg_row_data(row: &PgRow, table: &str) -> RowData {
    let field_values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| FieldValue {
            name: col.name().to_string(),
            value: pg_value(row, idx, col.type_().name()),
        })
        .collect();
    RowData::new(table, field_values)
}

fn pg_value(row: &PgRow, idx: usize, type_name: &str) -> Option<Value> {
    match type_name {
        "int2" => row.try_get::<_, Option<i16>>(idx).ok()?.map(|v| Value::Int(v as i64)),
        "int4" => row.try_get::<_, Option<i32>>(idx).ok()?.map(|v| Value::Int(v as i64)),
        "int8" => row.try_get::<_, Option<i64>>(idx).ok()?.map(Value::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()?
            .map(|v| Value::Float(v as f64)),
        "float8" => row.try_get::<_, Option<f64>>(idx).ok()?.map(Value::Float),
        "numeric" => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .ok()?
            .and_then(|v| BigDecimal::from_str(&v.to_string()).ok())
            .map(Value::Decimal),
        "bool" => row.try_get::<_, Option<bool>>(idx).ok()?.map(Value::Boolean),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()?
            .map(Value::Json),
        "uuid" => row.try_get::<_, Option<uuid::Uuid>>(idx).ok()?.map(Value::Uuid),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx).ok()?.map(Value::Bytes),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()?
            .map(Value::Date),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()?
            .map(Value::TimestampNaive),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()?
            .map(Value::Timestamp),
        "text" | "varchar" | "bpchar" | "name" | "char" => row
            .try_get::<_, Option<String>>(idx)
            .ok()?
            .map(Value::String),
        other => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => {
                warn!("unsupported Postgres column type {other}, passing NULL");
                None
            }
        },
    }
}

fn mysql_row_data(row: &MySqlRow, table: &str) -> RowData {
    let columns = row.columns_ref().to_vec();
    let field_values = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let raw = row.as_ref(idx).cloned().unwrap_or(MySqlValue::NULL);
            FieldValue {
                name: col.name_str().into_owned(),
                value: mysql_value(raw, col.column_type()),
            }
        })
        .collect();
    RowData::new(table, field_values)
}

fn mysql_value(raw: MySqlValue, column_type: ColumnType) -> Option<Value> {
    match raw {
        MySqlValue::NULL => None,
        MySqlValue::Int(v) => Some(Value::Int(v)),
        MySqlValue::UInt(v) => Some(Value::Uint(v)),
        MySqlValue::Float(v) => Some(Value::Float(v as f64)),
        MySqlValue::Double(v) => Some(Value::Float(v)),
        MySqlValue::Date(y, m, d, hh, mm, ss, us) => {
            let date = chrono::NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)?;
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                return Some(Value::Date(date));
            }
            let time =
                chrono::NaiveTime::from_hms_micro_opt(hh as u32, mm as u32, ss as u32, us)?;
            Some(Value::TimestampNaive(date.and_time(time)))
        }
        MySqlValue::Time(neg, days, hh, mm, ss, us) => {
            // Durations have no Value representation; keep them textual.
            let sign = if neg { "-" } else { "" };
            Some(Value::String(format!(
                "{sign}{}:{:02}:{:02}.{:06}",
                u32::from(hh) + days * 24,
                mm,
                ss,
                us
            )))
        }
        MySqlValue::Bytes(bytes) => match column_type {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                let text = String::from_utf8(bytes).ok()?;
                BigDecimal::from_str(&text).ok().map(Value::Decimal)
            }
            ColumnType::MYSQL_TYPE_JSON => {
                let text = String::from_utf8(bytes).ok()?;
                serde_json::from_str(&text).ok().map(Value::Json)
            }
            ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_GEOMETRY => match String::from_utf8(bytes) {
                Ok(text) => Some(Value::String(text)),
                Err(err) => Some(Value::Bytes(err.into_bytes())),
            },
            _ => match String::from_utf8(bytes) {
                Ok(text) => Some(Value::String(text)),
                Err(err) => Some(Value::Bytes(err.into_bytes())),
            },
        },
    }
}
