//! Statement inputs and write metadata.

use serde::Serialize;
use std::time::Duration;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    /// NULL value
    Null,
    Bool(bool),
    /// Signed integer (stored as i64 for maximum range)
    Int(i64),
    /// Unsigned integer, for BIGINT UNSIGNED columns
    UInt(u64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Bound as a MySQL JSON value
    Json(serde_json::Value),
}

impl Param {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

macro_rules! impl_from_param {
    ($variant:ident => $($ty:ty),+) => {
        $(
            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Param::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_param!(Bool => bool);
impl_from_param!(Int => i8, i16, i32, i64);
impl_from_param!(UInt => u8, u16, u32, u64);
impl_from_param!(Float => f32, f64);
impl_from_param!(String => String, &str);
impl_from_param!(Bytes => Vec<u8>, &[u8]);
impl_from_param!(Json => serde_json::Value);

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Param::Null)
    }
}

/// Build a `Vec<Param>` from heterogeneous values.
///
/// ```
/// use db_relay::params;
/// use db_relay::models::Param;
///
/// let params = params![1, "name", None::<i64>];
/// assert_eq!(params[1], Param::String("name".to_string()));
/// assert!(params[2].is_null());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::Param>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::Param::from($value)),+]
    };
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

/// Build the statement for a stored procedure call with `args` placeholders.
pub fn call_statement(procedure: &str, args: usize) -> String {
    let placeholders = vec!["?"; args].join(", ");
    format!("CALL {}({});", procedure, placeholders)
}

/// Metadata returned by every write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Meta {
    pub last_insert_id: u64,
    pub rows_affected: u64,
    /// Time spent in the database, retries included
    pub query_time: Duration,
}

/// Options for opening a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Read-only transactions are routed to the replica when one is attached
    pub read_only: bool,
}

impl TxOptions {
    pub fn read_only() -> Self {
        Self { read_only: true }
    }
}
