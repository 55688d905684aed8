//! Decoded result sets.
//!
//! A result set is a list of [`Row`]s sharing one [`Columns`] index. Each cell is a
//! [`Value`], a tagged variant with one case per scalar kind the relay decodes.

use crate::error::{DbError, DbResult};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Time(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            Value::Text(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Time(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to JSON. Binary data is base64 encoded; times use ISO 8601.
    pub fn to_json(&self) -> JsonValue {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            Value::Null => JsonValue::Null,
            Value::Int(v) => JsonValue::Number((*v).into()),
            Value::UInt(v) => JsonValue::Number((*v).into()),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            Value::Text(v) => JsonValue::String(v.clone()),
            Value::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
            Value::Time(v) => JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Column names of a result set with a name lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    names: Vec<String>,
    indexes: HashMap<String, usize>,
}

impl Columns {
    pub fn new(names: Vec<String>) -> Self {
        let mut indexes = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            // first occurrence wins for duplicated names
            indexes.entry(name.clone()).or_insert(idx);
        }
        Self { names, indexes }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.indexes.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<Columns>,
}

impl Row {
    pub fn new(columns: Arc<Columns>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Value of the named column, `None` if there is no such column.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.index(name).and_then(|idx| self.values.get(idx))
    }

    pub fn get_by_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .names()
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_map().serialize(serializer)
    }
}

/// Rows returned by a single statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Results {
    #[serde(serialize_with = "serialize_columns")]
    pub columns: Arc<Columns>,
    pub rows: Vec<Row>,
    pub query_time: Duration,
}

fn serialize_columns<S: Serializer>(
    columns: &Arc<Columns>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    columns.names().serialize(serializer)
}

impl Results {
    pub fn new(columns: Arc<Columns>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            query_time: Duration::ZERO,
        }
    }

    /// Number of rows.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cast every row into `T`, matching columns to fields by name.
    ///
    /// Field names (or `#[serde(rename = "...")]`) must match column names;
    /// columns without a matching field are ignored.
    ///
    /// ```
    /// use db_relay::models::{Columns, Results, Row, Value};
    /// use std::sync::Arc;
    ///
    /// #[derive(serde::Deserialize)]
    /// struct Foo {
    ///     size: i64,
    ///     name: String,
    /// }
    ///
    /// let columns = Arc::new(Columns::new(vec!["size".into(), "name".into()]));
    /// let row = Row::new(columns.clone(), vec![Value::Int(3), Value::Text("a".into())]);
    /// let foos: Vec<Foo> = Results::new(columns, vec![row]).cast_to().unwrap();
    /// assert_eq!(foos[0].size, 3);
    /// ```
    pub fn cast_to<T: DeserializeOwned>(&self) -> DbResult<Vec<T>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                serde_json::from_value(JsonValue::Object(row.to_json_map())).map_err(|e| {
                    DbError::decode(format!("Failed to cast row {}: {}", idx, e))
                })
            })
            .collect()
    }
}

/// Every result set produced by one multi-statement batch, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultiResults {
    pub results: Vec<Results>,
    pub query_time: Duration,
}

impl MultiResults {
    /// Collect result sets from one batch; each set reports the batch time.
    pub fn from_sets(mut results: Vec<Results>, query_time: Duration) -> Self {
        for set in &mut results {
            set.query_time = query_time;
        }
        Self {
            results,
            query_time,
        }
    }

    /// Number of result sets.
    pub fn count(&self) -> usize {
        self.results.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Results> {
        self.results.get(idx)
    }
}
