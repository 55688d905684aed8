//! MySQL row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column type name reported by the server
//! 2. a per-category decoder extracts the value into a [`Value`]
//!
//! Classification happens once per result set, from the first row.

use crate::models::{Columns, Results, Row as ResultRow, Value};
use sqlx::mysql::{MySqlColumn, MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use std::sync::Arc;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Unsigned,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    DateTime,
    Date,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower == "year" {
        if lower.contains("unsigned") {
            return TypeCategory::Unsigned;
        }
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" {
        return TypeCategory::Json;
    }

    if lower == "datetime" || lower == "timestamp" {
        return TypeCategory::DateTime;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bit" {
        return TypeCategory::Binary;
    }

    // varchar, text, char, enum, set, time, ...
    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Column names in statement order.
pub fn column_names(columns: &[MySqlColumn]) -> Arc<Columns> {
    Arc::new(Columns::new(
        columns.iter().map(|c| c.name().to_string()).collect(),
    ))
}

/// Convert fetched rows into one result set.
///
/// Rows carry their own column list, so an empty slice yields a result set
/// with no columns; callers that know the statement fill them in.
pub fn results_from_rows(rows: &[MySqlRow]) -> Results {
    let Some(first) = rows.first() else {
        return Results::default();
    };

    let columns = column_names(first.columns());
    let categories: Vec<TypeCategory> = first
        .columns()
        .iter()
        .map(|c| categorize_type(c.type_info().name()))
        .collect();

    let rows = rows
        .iter()
        .map(|row| {
            let values = categories
                .iter()
                .enumerate()
                .map(|(idx, category)| decode_column(row, idx, *category))
                .collect();
            ResultRow::new(Arc::clone(&columns), values)
        })
        .collect();

    Results::new(columns, rows)
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
    if row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true) {
        return Value::Null;
    }
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Unsigned => decode_unsigned(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::DateTime => decode_datetime(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::Text => decode_text(row, idx),
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get::<RawDecimal, _>(idx) {
        Ok(v) => Value::Text(v.0),
        Err(e) => {
            tracing::error!("Failed to decode DECIMAL: {:?}", e);
            Value::Null
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::Int(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return Value::UInt(v);
    }
    // YEAR and friends
    decode_text(row, idx)
}

fn decode_unsigned(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return Value::UInt(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::Int(v);
    }
    decode_text(row, idx)
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
    row.try_get::<bool, _>(idx)
        .map(|v| Value::Int(i64::from(v)))
        .unwrap_or_else(|_| decode_integer(row, idx))
}

fn decode_float(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::Float(v);
    }
    if let Ok(v) = row.try_get::<f32, _>(idx) {
        return Value::Float(f64::from(v));
    }
    Value::Null
}

fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
    row.try_get::<Vec<u8>, _>(idx)
        .map(Value::Bytes)
        .unwrap_or(Value::Null)
}

fn decode_json(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get::<serde_json::Value, _>(idx) {
        Ok(v) => Value::Text(v.to_string()),
        Err(_) => decode_text(row, idx),
    }
}

fn decode_datetime(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get::<chrono::NaiveDateTime, _>(idx) {
        Ok(v) => Value::Time(v),
        Err(e) => {
            tracing::error!("Failed to decode DATETIME: {:?}", e);
            decode_text(row, idx)
        }
    }
}

fn decode_date(row: &MySqlRow, idx: usize) -> Value {
    row.try_get::<chrono::NaiveDate, _>(idx)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(Value::Time)
        .unwrap_or_else(|| decode_text(row, idx))
}

fn decode_text(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::Text(v);
    }
    // binary collations come back as bytes
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Value::Text(String::from_utf8_lossy(&v).into_owned());
    }
    Value::Null
}
