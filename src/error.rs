//! Error types for db-relay.
//!
//! All failures surfaced by the relay are values of [`DbError`]. Driver errors are
//! classified on conversion so callers (and the retry policy) can match on MySQL
//! error numbers without reaching into sqlx.

use std::time::Duration;
use thiserror::Error;

/// MySQL server error numbers the relay recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// ER_LOCK_DEADLOCK
    Deadlock = 1213,
    /// ER_DUP_ENTRY
    DupEntry = 1062,
    /// ER_NO_REFERENCED_ROW_2
    ForeignKeyConstraint = 1452,
}

impl ErrorCode {
    pub fn number(self) -> u16 {
        self as u16
    }
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Queue overloaded: {in_progress} queries in progress (limit {limit})")]
    Overloaded { in_progress: i64, limit: i64 },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "40001" for serialization failures
        sql_state: Option<String>,
        /// MySQL error number, e.g. 1213 for deadlocks
        number: Option<u16>,
        suggestion: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Transaction rolled back")]
    RolledBack,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an overload error.
    pub fn overloaded(in_progress: i64, limit: i64) -> Self {
        Self::Overloaded { in_progress, limit }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            number: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error carrying a MySQL error number.
    pub fn mysql(number: u16, message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state: None,
            number: Some(number),
            suggestion: suggestion_for_number(number).to_string(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Overloaded { .. } => Some("Reduce concurrency or raise max_queued_queries"),
            _ => None,
        }
    }

    /// MySQL error number, when the failure came from the server.
    pub fn number(&self) -> Option<u16> {
        match self {
            Self::Database { number, .. } => *number,
            _ => None,
        }
    }

    /// Check whether this error carries the given MySQL error code.
    ///
    /// ```
    /// use db_relay::error::{DbError, ErrorCode};
    ///
    /// let err = DbError::mysql(1062, "Duplicate entry '1' for key 'PRIMARY'");
    /// assert!(err.is_error_code(ErrorCode::DupEntry));
    /// ```
    pub fn is_error_code(&self, code: ErrorCode) -> bool {
        self.number() == Some(code.number())
    }

    /// Check if this error is a deadlock reported by the server.
    pub fn is_deadlock(&self) -> bool {
        self.is_error_code(ErrorCode::Deadlock)
    }

    /// Check if this error is retryable by the caller.
    ///
    /// The relay itself only retries deadlocks; connection failures and timeouts
    /// are returned as-is but may succeed on a later call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. }) || self.is_deadlock()
    }
}

fn suggestion_for_number(number: u16) -> &'static str {
    match number {
        n if n == ErrorCode::Deadlock.number() => "Retry the statement or transaction",
        n if n == ErrorCode::DupEntry.number() => "A row with the same unique key already exists",
        n if n == ErrorCode::ForeignKeyConstraint.number() => {
            "The referenced parent row does not exist"
        }
        _ => "Check the SQL syntax and referenced objects",
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                let number = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number());
                DbError::Database {
                    message: db_err.message().to_string(),
                    sql_state,
                    number,
                    suggestion: suggestion_for_number(number.unwrap_or_default()).to_string(),
                }
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::Timeout {
                operation: "connection pool acquire".to_string(),
                timeout_ms: 0,
            },
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::decode(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
