//! Transaction handles.
//!
//! A [`Transaction`] owns one driver transaction plus the admission ticket and
//! in-flight slot acquired by `begin`. Handles are cheap clones of a shared
//! core. The handle returned by a fresh `begin` is the owner; handles obtained
//! from a [`Context`] (or from `begin` while a context already carries a
//! transaction) are inherited, and their commit and rollback are no-ops so the
//! outermost caller decides the outcome.
//!
//! Completion is broadcast to every observer registered with
//! [`Transaction::done`], before or after the fact.

use crate::config::Config;
use crate::context::Context;
use crate::db::client::with_timeout;
use crate::db::completion::Completion;
use crate::db::driver::DriverTransaction;
use crate::db::relay::Ticket;
use crate::db::stats::{InFlight, QueryStats, StatsSampler};
use crate::error::{DbError, DbResult};
use crate::models::{Meta, MultiResults, Param, Results, TxOptions, call_statement};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard, oneshot};
use tracing::{Span, debug, error, info, warn};

/// What observers of a transaction receive.
///
/// `Ok(())` after a commit, [`DbError::RolledBack`] after a successful
/// rollback, otherwise the error that ended the transaction.
pub type TxOutcome = Result<(), DbError>;

/// Receiver side of [`Transaction::done`].
pub type Done = oneshot::Receiver<TxOutcome>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Open,
    Committing,
    RollingBack,
    Closed,
}

/// Metadata about a transaction, readable without touching the connection.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionMetadata {
    pub transaction_id: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub state: TxState,
    pub read_only: bool,
    pub owner: bool,
}

type DriverSlot = Mutex<Option<Box<dyn DriverTransaction>>>;

struct TxInner {
    id: String,
    options: TxOptions,
    driver: DriverSlot,
    state: parking_lot::Mutex<TxState>,
    completion: Completion<TxOutcome>,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    ticket: parking_lot::Mutex<Option<Ticket>>,
    in_flight: parking_lot::Mutex<Option<InFlight>>,
    stats: Arc<StatsSampler>,
    config: Arc<Config>,
    span: Span,
}

#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
    owner: bool,
}

impl Transaction {
    /// Wrap a freshly opened driver transaction. The returned handle is the owner.
    pub(crate) fn start(
        driver: Box<dyn DriverTransaction>,
        options: TxOptions,
        ticket: Ticket,
        in_flight: InFlight,
        stats: Arc<StatsSampler>,
        config: Arc<Config>,
        parent: &Span,
    ) -> Self {
        let id = generate_transaction_id();
        let span = tracing::info_span!(parent: parent, "transaction", transaction_id = %id);
        Self {
            inner: Arc::new(TxInner {
                id,
                options,
                driver: Mutex::new(Some(driver)),
                state: parking_lot::Mutex::new(TxState::Open),
                completion: Completion::new(),
                started_at: Instant::now(),
                started_at_utc: Utc::now(),
                ticket: parking_lot::Mutex::new(Some(ticket)),
                in_flight: parking_lot::Mutex::new(Some(in_flight)),
                stats,
                config,
                span,
            }),
            owner: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Whether commit and rollback on this handle end the transaction.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn state(&self) -> TxState {
        *self.inner.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TxState::Open
    }

    pub fn options(&self) -> TxOptions {
        self.inner.options
    }

    /// Time since the transaction began.
    pub fn elapsed(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    pub fn metadata(&self) -> TransactionMetadata {
        TransactionMetadata {
            transaction_id: self.inner.id.clone(),
            started_at: self.inner.started_at_utc,
            duration: self.elapsed(),
            state: self.state(),
            read_only: self.inner.options.read_only,
            owner: self.owner,
        }
    }

    /// Whether both handles refer to the same transaction.
    pub fn same_as(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A non-owning handle to the same transaction.
    pub fn inherited(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            owner: false,
        }
    }

    /// Derive a context carrying this transaction.
    pub fn with_context(&self, ctx: &Context) -> Context {
        ctx.with_transaction(self)
    }

    /// Register an observer of the outcome.
    ///
    /// Every observer receives exactly one value. Observers registered after
    /// completion receive the outcome immediately.
    pub fn done(&self) -> Done {
        self.inner.completion.subscribe()
    }

    pub async fn query(&self, sql: &str, params: &[Param]) -> DbResult<Results> {
        let start = Instant::now();
        let result = async {
            let mut slot = self.open_slot().await?;
            let tx = slot.as_mut().ok_or_else(|| self.inactive())?;
            with_timeout(self.inner.config.call_timeout(), "query", tx.query(sql, params)).await
        }
        .await;
        let (mut results, elapsed) = self.finish(sql, start, result)?;
        results.query_time = elapsed;
        Ok(results)
    }

    pub async fn multi_query(&self, sql: &str, params: &[Param]) -> DbResult<MultiResults> {
        let start = Instant::now();
        let result = async {
            let mut slot = self.open_slot().await?;
            let tx = slot.as_mut().ok_or_else(|| self.inactive())?;
            with_timeout(
                self.inner.config.call_timeout(),
                "multi_query",
                tx.multi_query(sql, params),
            )
            .await
        }
        .await;
        let (sets, elapsed) = self.finish(sql, start, result)?;
        Ok(MultiResults::from_sets(sets, elapsed))
    }

    pub async fn exec(&self, sql: &str, params: &[Param]) -> DbResult<Meta> {
        let start = Instant::now();
        let result = async {
            let mut slot = self.open_slot().await?;
            let tx = slot.as_mut().ok_or_else(|| self.inactive())?;
            with_timeout(self.inner.config.call_timeout(), "exec", tx.exec(sql, params)).await
        }
        .await;
        let (mut meta, elapsed) = self.finish(sql, start, result)?;
        meta.query_time = elapsed;
        Ok(meta)
    }

    /// Call a stored procedure returning one result set.
    pub async fn call(&self, procedure: &str, args: &[Param]) -> DbResult<Results> {
        self.query(&call_statement(procedure, args.len()), args).await
    }

    /// Call a stored procedure returning several result sets.
    pub async fn multi_call(&self, procedure: &str, args: &[Param]) -> DbResult<MultiResults> {
        self.multi_query(&call_statement(procedure, args.len()), args)
            .await
    }

    /// Commit the transaction.
    ///
    /// No-op on an inherited handle. When read-after-write sync is configured,
    /// a successful commit marks `ctx` so later reads wait for replication.
    pub async fn commit(&self, ctx: &Context) -> DbResult<()> {
        if !self.owner {
            debug!(parent: &self.inner.span, "Commit left to the owning handle");
            return Ok(());
        }
        self.transition(TxState::Committing)?;

        let closing = Closing::new(self, "COMMIT");
        let driver = self.inner.driver.lock().await.take();
        let result = match driver {
            Some(tx) => tx.commit().await,
            None => Err(self.inactive()),
        };
        self.close("COMMIT", closing.disarm(), &result);

        if result.is_ok() && self.inner.config.sync_after_transaction {
            ctx.mark_sync_needed();
        }
        self.inner.completion.complete(result.clone());
        result
    }

    /// Roll the transaction back.
    ///
    /// No-op on an inherited handle. Observers see [`DbError::RolledBack`]
    /// when the rollback itself succeeds.
    pub async fn rollback(&self) -> DbResult<()> {
        if !self.owner {
            debug!(parent: &self.inner.span, "Rollback left to the owning handle");
            return Ok(());
        }
        self.transition(TxState::RollingBack)?;

        let closing = Closing::new(self, "ROLLBACK");
        let driver = self.inner.driver.lock().await.take();
        let result = match driver {
            Some(tx) => tx.rollback().await,
            None => Err(self.inactive()),
        };
        self.close("ROLLBACK", closing.disarm(), &result);

        let outcome = match &result {
            Ok(()) => Err(DbError::RolledBack),
            Err(e) => Err(e.clone()),
        };
        self.inner.completion.complete(outcome);
        result
    }

    fn transition(&self, next: TxState) -> DbResult<()> {
        let mut state = self.inner.state.lock();
        if *state != TxState::Open {
            return Err(DbError::transaction(
                "Transaction already completed",
                &self.inner.id,
            ));
        }
        *state = next;
        Ok(())
    }

    async fn open_slot(&self) -> DbResult<MutexGuard<'_, Option<Box<dyn DriverTransaction>>>> {
        if !self.is_open() {
            return Err(self.inactive());
        }
        Ok(self.inner.driver.lock().await)
    }

    fn inactive(&self) -> DbError {
        DbError::transaction("Transaction is no longer active", &self.inner.id)
    }

    /// Count, sample and log a statement run inside the transaction.
    fn finish<T>(&self, sql: &str, start: Instant, result: DbResult<T>) -> DbResult<(T, Duration)> {
        let elapsed = start.elapsed();
        self.inner
            .stats
            .sample(QueryStats::new(sql, elapsed, Duration::ZERO));
        self.inner.stats.record(&result);
        match result {
            Ok(value) => {
                debug!(
                    parent: &self.inner.span,
                    sql = %sql,
                    execution_ms = elapsed.as_millis() as u64,
                    "Executed in transaction"
                );
                Ok((value, elapsed))
            }
            Err(e) => {
                error!(
                    parent: &self.inner.span,
                    sql = %sql,
                    error = %e,
                    "Statement failed in transaction"
                );
                Err(e)
            }
        }
    }

    /// Release everything held since begin and record the terminal statement.
    fn close(&self, label: &'static str, start: Instant, result: &DbResult<()>) {
        let elapsed = start.elapsed();
        let lifetime = self.inner.started_at.elapsed();
        *self.inner.state.lock() = TxState::Closed;

        if let Some(mut ticket) = self.inner.ticket.lock().take() {
            ticket.end();
        }
        drop(self.inner.in_flight.lock().take());

        self.inner.stats.sample(
            QueryStats::new(label, elapsed, Duration::ZERO).with_transaction_time(lifetime),
        );
        self.inner.stats.record(result);

        match result {
            Ok(()) => info!(
                parent: &self.inner.span,
                statement = label,
                transaction_ms = lifetime.as_millis() as u64,
                "Transaction closed"
            ),
            Err(e) => error!(
                parent: &self.inner.span,
                statement = label,
                error = %e,
                "Transaction close failed"
            ),
        }
    }
}

/// Armed while a commit or rollback is in progress.
///
/// If the caller's future is dropped before the driver answers, the
/// transaction is closed as failed: resources are released and observers are
/// told. The driver transaction, owned by the dropped future, rolls back.
struct Closing<'a> {
    tx: &'a Transaction,
    label: &'static str,
    start: Instant,
    armed: bool,
}

impl<'a> Closing<'a> {
    fn new(tx: &'a Transaction, label: &'static str) -> Self {
        Self {
            tx,
            label,
            start: Instant::now(),
            armed: true,
        }
    }

    /// The driver answered; returns when the statement started.
    fn disarm(mut self) -> Instant {
        self.armed = false;
        self.start
    }
}

impl Drop for Closing<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let err = DbError::transaction(
            format!("{} cancelled before completion", self.label),
            &self.tx.inner.id,
        );
        self.tx.close(self.label, self.start, &Err(err.clone()));
        self.tx.inner.completion.complete(Err(err));
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        if *self.state.get_mut() == TxState::Closed {
            return;
        }
        // the driver transaction rolls back when dropped below
        warn!(parent: &self.span, "Transaction dropped before commit or rollback");
        self.stats.record::<(), ()>(&Err(()));
        self.completion.complete(Err(DbError::transaction(
            "Transaction dropped before commit or rollback",
            self.id.clone(),
        )));
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
        assert_ne!(id, generate_transaction_id());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&TxState::RollingBack).unwrap();
        assert_eq!(json, "\"rolling_back\"");
    }
}
