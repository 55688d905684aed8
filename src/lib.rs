//! db-relay
//!
//! A resilient MySQL access layer: bounded admission with overload fast-reject,
//! automatic deadlock retry, transactions whose outcome can be observed by any
//! number of parties, lock-free counters with timing samples, and a client that
//! routes reads to a replica and reuses the transaction carried by a context.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use context::Context;
pub use db::{Client, Transaction};
pub use error::{DbError, DbResult, ErrorCode};
