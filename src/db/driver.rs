//! Driver boundary.
//!
//! The relay never talks to the wire itself. Everything it needs from the pool
//! is behind [`Driver`], and everything it needs from an open transaction is
//! behind [`DriverTransaction`]. [`crate::db::mysql::MySqlDriver`] is the sqlx
//! implementation.

use crate::error::DbResult;
use crate::models::{Meta, Param, Results, TxOptions};
use async_trait::async_trait;
use serde::Serialize;

/// Connection counts reported by the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_open_connections: u32,
    pub open_connections: u32,
    pub in_use: u32,
    pub idle: u32,
}

#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Run a statement returning one result set.
    ///
    /// With `sync_wait` set, the session is told to wait for replication to
    /// catch up before reading, and reset afterwards, on the same connection.
    async fn query(&self, sql: &str, params: &[Param], sync_wait: bool) -> DbResult<Results>;

    /// Run a statement and drain every result set it produces, in order.
    async fn multi_query(&self, sql: &str, params: &[Param]) -> DbResult<Vec<Results>>;

    /// Run a statement that returns no rows.
    async fn exec(&self, sql: &str, params: &[Param]) -> DbResult<Meta>;

    /// Open a transaction on a dedicated connection.
    async fn begin(&self, options: TxOptions) -> DbResult<Box<dyn DriverTransaction>>;

    fn pool_stats(&self) -> PoolStats;

    async fn close(&self);
}

/// An open transaction holding one pooled connection.
///
/// Dropping it without commit or rollback rolls it back.
#[async_trait]
pub trait DriverTransaction: Send {
    async fn query(&mut self, sql: &str, params: &[Param]) -> DbResult<Results>;

    async fn multi_query(&mut self, sql: &str, params: &[Param]) -> DbResult<Vec<Results>>;

    async fn exec(&mut self, sql: &str, params: &[Param]) -> DbResult<Meta>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
