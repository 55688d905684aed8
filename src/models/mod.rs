//! Data models for db-relay.
//!
//! This module re-exports the statement inputs and decoded result types.

pub mod query;
pub mod results;

pub use query::{Meta, Param, TxOptions, call_statement};
pub use results::{Columns, MultiResults, Results, Row, Value};
