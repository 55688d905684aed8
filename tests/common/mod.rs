//! Scripted in-memory driver shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use db_relay::config::Config;
use db_relay::db::{Client, Driver, DriverTransaction, PoolStats};
use db_relay::error::{DbError, DbResult};
use db_relay::models::{Columns, Meta, Param, Results, Row, TxOptions, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockState {
    pub max_open: u32,
    pub delay: Duration,
    pub commit_delay: Duration,
    pub result_sets: usize,
    /// Errors handed out, in order, by the next calls
    pub script: Mutex<VecDeque<DbError>>,
    pub commit_error: Mutex<Option<DbError>>,
    pub statements: Mutex<Vec<String>>,
    pub tx_statements: Mutex<Vec<String>>,
    pub calls: AtomicU32,
    pub active: AtomicU32,
    pub peak: AtomicU32,
    pub sync_waits: AtomicU32,
    pub begins: AtomicU32,
    pub commits: AtomicU32,
    pub rollbacks: AtomicU32,
    pub dropped: AtomicU32,
    pub closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn new(max_open: u32) -> Self {
        Self {
            state: Arc::new(MockState {
                max_open,
                result_sets: 1,
                ..MockState::default()
            }),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.state_mut().delay = delay;
        self
    }

    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.state_mut().commit_delay = delay;
        self
    }

    pub fn with_result_sets(mut self, sets: usize) -> Self {
        self.state_mut().result_sets = sets;
        self
    }

    pub fn failing_with(self, errors: Vec<DbError>) -> Self {
        self.state.script.lock().extend(errors);
        self
    }

    pub fn with_commit_error(self, err: DbError) -> Self {
        *self.state.commit_error.lock() = Some(err);
        self
    }

    fn state_mut(&mut self) -> &mut MockState {
        Arc::get_mut(&mut self.state).expect("configure the mock before sharing it")
    }

    pub fn calls(&self) -> u32 {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> u32 {
        self.state.peak.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().clone()
    }

    pub fn tx_statements(&self) -> Vec<String> {
        self.state.tx_statements.lock().clone()
    }

    pub fn client(&self, config: Config) -> Client {
        Client::new(Arc::new(self.clone()), config).unwrap()
    }

    async fn step(&self, sql: &str) -> DbResult<()> {
        self.state.statements.lock().push(sql.to_string());
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        let _active = Active::enter(&self.state);
        if !self.state.delay.is_zero() {
            tokio::time::sleep(self.state.delay).await;
        }
        match self.state.script.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Active<'a>(&'a MockState);

impl<'a> Active<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One row with a single `n` column.
pub fn single_row(n: i64) -> Results {
    let columns = Arc::new(Columns::new(vec!["n".to_string()]));
    Results::new(columns.clone(), vec![Row::new(columns, vec![Value::Int(n)])])
}

#[async_trait]
impl Driver for MockDriver {
    async fn query(&self, sql: &str, _params: &[Param], sync_wait: bool) -> DbResult<Results> {
        if sync_wait {
            self.state.sync_waits.fetch_add(1, Ordering::SeqCst);
        }
        self.step(sql).await?;
        Ok(single_row(1))
    }

    async fn multi_query(&self, sql: &str, _params: &[Param]) -> DbResult<Vec<Results>> {
        self.step(sql).await?;
        Ok((0..self.state.result_sets as i64).map(single_row).collect())
    }

    async fn exec(&self, sql: &str, _params: &[Param]) -> DbResult<Meta> {
        self.step(sql).await?;
        Ok(Meta {
            last_insert_id: 42,
            rows_affected: 1,
            query_time: Duration::ZERO,
        })
    }

    async fn begin(&self, _options: TxOptions) -> DbResult<Box<dyn DriverTransaction>> {
        self.step("BEGIN").await?;
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            finished: false,
        }))
    }

    fn pool_stats(&self) -> PoolStats {
        let active = self.state.active.load(Ordering::SeqCst);
        PoolStats {
            max_open_connections: self.state.max_open,
            open_connections: active,
            in_use: active,
            idle: 0,
        }
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockTransaction {
    state: Arc<MockState>,
    finished: bool,
}

impl MockTransaction {
    fn record(&self, sql: &str) -> DbResult<()> {
        self.state.tx_statements.lock().push(sql.to_string());
        match self.state.script.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DriverTransaction for MockTransaction {
    async fn query(&mut self, sql: &str, _params: &[Param]) -> DbResult<Results> {
        self.record(sql)?;
        Ok(single_row(7))
    }

    async fn multi_query(&mut self, sql: &str, _params: &[Param]) -> DbResult<Vec<Results>> {
        self.record(sql)?;
        Ok(vec![single_row(1), single_row(2)])
    }

    async fn exec(&mut self, sql: &str, _params: &[Param]) -> DbResult<Meta> {
        self.record(sql)?;
        Ok(Meta {
            last_insert_id: 7,
            rows_affected: 1,
            query_time: Duration::ZERO,
        })
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let mut this = self;
        if !this.state.commit_delay.is_zero() {
            tokio::time::sleep(this.state.commit_delay).await;
        }
        this.finished = true;
        this.state.commits.fetch_add(1, Ordering::SeqCst);
        let err = this.state.commit_error.lock().take();
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        let mut this = self;
        this.finished = true;
        this.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.state.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Relay config sized for tests, with a short deadlock retry delay.
pub fn test_config(max_open: u32) -> Config {
    Config {
        max_open_conns: max_open,
        max_idle_conns: max_open,
        retry_on_deadlock_delay: Duration::from_millis(1),
        ..Config::default()
    }
}

pub fn deadlock() -> DbError {
    DbError::mysql(1213, "Deadlock found when trying to get lock; try restarting transaction")
}
