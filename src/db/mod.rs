//! Database access layer.
//!
//! This module provides:
//! - The client facade with admission control and replica routing
//! - The admission relay and deadlock retry policy
//! - Transaction handles with completion broadcast
//! - Query counters and timing samples
//! - The driver boundary and its MySQL implementation

pub mod client;
pub mod completion;
pub mod driver;
pub mod mysql;
mod params;
pub mod relay;
pub mod retry;
pub mod stats;
pub mod transaction;
pub mod types;

pub use client::{Client, ClientBuilder};
pub use completion::Completion;
pub use driver::{Driver, DriverTransaction, PoolStats};
pub use mysql::MySqlDriver;
pub use relay::{Relay, Ticket};
pub use retry::RetryPolicy;
pub use stats::{QueryStats, SampleReceiver, Stats, StatsSampler};
pub use transaction::{Done, Transaction, TransactionMetadata, TxOutcome, TxState};
