//! Client facade.
//!
//! Every call made through a [`Client`] goes through the same pipeline:
//!
//! 1. increment the in-progress counter and fast-reject when more calls are
//!    waiting than `max_queued_queries` allows beyond the pool size;
//! 2. wait for an admission ticket from the relay;
//! 3. run the statement, retrying deadlocks;
//! 4. sample the timings and count the outcome.
//!
//! Steps 2 and 3 share one deadline of `Config::timeout`.
//!
//! Reads (`query`, `multi_query`, `call`, `multi_call`, read-only `begin`) are
//! routed to the replica when one is attached; `exec` always runs on the primary.

use crate::config::Config;
use crate::context::Context;
use crate::db::driver::{Driver, PoolStats};
use crate::db::mysql::MySqlDriver;
use crate::db::relay::Relay;
use crate::db::retry::RetryPolicy;
use crate::db::stats::{InFlight, QueryStats, SampleReceiver, Stats, StatsSampler};
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{Meta, MultiResults, Param, Results, TxOptions, call_statement};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Span, debug, error, info, warn};

/// Run `fut` under an optional deadline.
pub(crate) async fn with_timeout<T, Fut>(
    limit: Option<Duration>,
    operation: &str,
    fut: Fut,
) -> DbResult<T>
where
    Fut: Future<Output = DbResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(DbError::timeout(operation, limit))),
        None => fut.await,
    }
}

struct ClientInner {
    driver: Arc<dyn Driver>,
    replica: Option<Client>,
    config: Arc<Config>,
    stats: Arc<StatsSampler>,
    relay: Relay,
    retry: RetryPolicy,
    span: Span,
}

/// Resilient access to one MySQL pool, optionally paired with a read replica.
///
/// Cloning is cheap; clones share counters, the relay and the pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    driver: Arc<dyn Driver>,
    config: Config,
    replica: Option<Client>,
    span: Span,
}

impl ClientBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Route reads to `replica`.
    pub fn replica(mut self, replica: Client) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Parent span for every event this client emits.
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn build(self) -> DbResult<Client> {
        self.config.validate().map_err(DbError::invalid_input)?;
        let relay = Relay::new(self.config.relay_size());
        let retry = RetryPolicy::from_config(&self.config);
        Ok(Client {
            inner: Arc::new(ClientInner {
                driver: self.driver,
                replica: self.replica,
                config: Arc::new(self.config),
                stats: Arc::new(StatsSampler::new()),
                relay,
                retry,
                span: self.span,
            }),
        })
    }
}

impl Client {
    pub fn builder(driver: Arc<dyn Driver>) -> ClientBuilder {
        ClientBuilder {
            driver,
            config: Config::default(),
            replica: None,
            span: Span::none(),
        }
    }

    /// Create a client over an existing driver.
    pub fn new(driver: Arc<dyn Driver>, config: Config) -> DbResult<Self> {
        Self::builder(driver).config(config).build()
    }

    /// Open a MySQL pool at `url` and wrap it.
    pub async fn connect(url: &str, config: Config) -> DbResult<Self> {
        config.validate().map_err(DbError::invalid_input)?;
        let driver = MySqlDriver::connect(url, &config).await?;
        Self::new(Arc::new(driver), config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn replica(&self) -> Option<&Client> {
        self.inner.replica.as_ref()
    }

    /// Counters of this client; a replica keeps its own.
    pub fn stats(&self) -> Stats {
        self.inner.stats.snapshot(self.inner.driver.pool_stats())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.driver.pool_stats()
    }

    /// Take the per-statement sample stream. Only the first caller gets it.
    pub fn take_samples(&self) -> Option<SampleReceiver> {
        self.inner.stats.take_receiver()
    }

    /// Run a statement returning one result set.
    ///
    /// When `ctx` was marked by a committed transaction, the read waits for
    /// replication to catch up first.
    pub async fn query(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Results> {
        self.reader().query_direct(ctx, sql, params).await
    }

    /// Run a batch and return every result set it produces.
    pub async fn multi_query(
        &self,
        _ctx: &Context,
        sql: &str,
        params: &[Param],
    ) -> DbResult<MultiResults> {
        let target = self.reader();
        let driver = &target.inner.driver;
        let (sets, elapsed) = target
            .run("multi_query", sql, move || driver.multi_query(sql, params))
            .await?;
        Ok(MultiResults::from_sets(sets, elapsed))
    }

    /// Run a statement that returns no rows. Always runs on the primary.
    pub async fn exec(&self, _ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Meta> {
        let driver = &self.inner.driver;
        let (mut meta, elapsed) = self
            .run("exec", sql, move || driver.exec(sql, params))
            .await?;
        meta.query_time = elapsed;
        Ok(meta)
    }

    /// Call a stored procedure returning one result set.
    pub async fn call(&self, ctx: &Context, procedure: &str, args: &[Param]) -> DbResult<Results> {
        self.query(ctx, &call_statement(procedure, args.len()), args)
            .await
    }

    /// Call a stored procedure returning several result sets.
    pub async fn multi_call(
        &self,
        ctx: &Context,
        procedure: &str,
        args: &[Param],
    ) -> DbResult<MultiResults> {
        self.multi_query(ctx, &call_statement(procedure, args.len()), args)
            .await
    }

    /// Begin a transaction.
    ///
    /// If `ctx` already carries a transaction, a non-owning handle to it is
    /// returned and no new transaction is opened. Read-only transactions go to
    /// the replica when one is attached.
    pub async fn begin(&self, ctx: &Context, options: TxOptions) -> DbResult<Transaction> {
        let target = if options.read_only { self.reader() } else { self };
        target.begin_direct(ctx, options).await
    }

    /// Like [`Client::query`], but inside the context transaction if there is one.
    pub async fn query_tx(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Results> {
        match ctx.transaction() {
            Some(tx) => tx.query(sql, params).await,
            None => self.query(ctx, sql, params).await,
        }
    }

    /// Like [`Client::exec`], but inside the context transaction if there is one.
    pub async fn exec_tx(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Meta> {
        match ctx.transaction() {
            Some(tx) => tx.exec(sql, params).await,
            None => self.exec(ctx, sql, params).await,
        }
    }

    /// Close the pool. Attached replicas are left open.
    pub async fn close(&self) {
        self.inner.driver.close().await;
        info!(parent: &self.inner.span, "Client closed");
    }

    /// The client reads are sent to: the innermost attached replica, or self.
    fn reader(&self) -> &Client {
        let mut target = self;
        while let Some(replica) = &target.inner.replica {
            target = replica;
        }
        target
    }

    async fn query_direct(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Results> {
        let driver = &self.inner.driver;
        let sync_wait = ctx.sync_needed();
        if sync_wait {
            debug!(parent: &self.inner.span, sql = %sql, "Waiting for replication before read");
        }
        let (mut results, elapsed) = self
            .run("query", sql, move || driver.query(sql, params, sync_wait))
            .await?;
        results.query_time = elapsed;
        Ok(results)
    }

    async fn begin_direct(&self, ctx: &Context, options: TxOptions) -> DbResult<Transaction> {
        if let Some(tx) = ctx.transaction() {
            debug!(
                parent: &self.inner.span,
                transaction_id = %tx.id(),
                "Reusing context transaction"
            );
            return Ok(tx.inherited());
        }

        let result: DbResult<Transaction> = async {
            let in_flight = self.admit()?;
            let (driver_tx, ticket) =
                with_timeout(self.inner.config.call_timeout(), "begin", async {
                    let (mut ticket, queue_time) = self.inner.relay.start().await?;
                    let start = Instant::now();
                    let result = self.inner.driver.begin(options).await;
                    ticket.conditional_end(result.is_err());
                    self.inner
                        .stats
                        .sample(QueryStats::new("BEGIN", start.elapsed(), queue_time));
                    result.map(|tx| (tx, ticket))
                })
                .await?;
            Ok(Transaction::start(
                driver_tx,
                options,
                ticket,
                in_flight,
                Arc::clone(&self.inner.stats),
                Arc::clone(&self.inner.config),
                &self.inner.span,
            ))
        }
        .await;

        match &result {
            Ok(tx) => info!(
                parent: &self.inner.span,
                transaction_id = %tx.id(),
                read_only = options.read_only,
                "Transaction started"
            ),
            Err(e) => {
                // success is counted once, at commit or rollback
                self.inner.stats.record(&result);
                error!(parent: &self.inner.span, error = %e, "Failed to begin transaction");
            }
        }
        result
    }

    /// Take an in-progress slot, rejecting when the backlog is too deep.
    fn admit(&self) -> DbResult<InFlight> {
        let (in_flight, in_progress) = self.inner.stats.enter();
        let max_open = i64::from(self.inner.driver.pool_stats().max_open_connections);
        let max_queued = self.inner.config.max_queued_queries;
        if in_progress - max_open > max_queued {
            return Err(DbError::overloaded(in_progress, max_open + max_queued));
        }
        Ok(in_flight)
    }

    /// Admission, relay wait and deadlock retry under one deadline.
    ///
    /// Returns the value and the execution time, retries included. Every call
    /// that got past admission is sampled, including ones that timed out.
    async fn run<T, F, Fut>(&self, operation: &str, sql: &str, op: F) -> DbResult<(T, Duration)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let called = Instant::now();
        let mut admitted: Option<(Instant, Duration)> = None;
        let result = async {
            let _in_flight = self.admit()?;
            with_timeout(self.inner.config.call_timeout(), operation, async {
                let (_ticket, queue_time) = self.inner.relay.start().await?;
                admitted = Some((Instant::now(), queue_time));
                self.inner.retry.run(sql, op).await
            })
            .await
        }
        .await;

        // no ticket means the whole wait was spent in the relay queue
        let (elapsed, queue_time) = match admitted {
            Some((start, queue_time)) => (start.elapsed(), queue_time),
            None => (Duration::ZERO, called.elapsed()),
        };
        if !matches!(result, Err(DbError::Overloaded { .. })) {
            self.inner
                .stats
                .sample(QueryStats::new(sql, elapsed, queue_time));
        }
        let result = result.map(|value| (value, elapsed, queue_time));

        self.inner.stats.record(&result);
        match result {
            Ok((value, elapsed, queue_time)) => {
                debug!(
                    parent: &self.inner.span,
                    sql = %sql,
                    execution_ms = elapsed.as_millis() as u64,
                    queue_ms = queue_time.as_millis() as u64,
                    "Query executed"
                );
                Ok((value, elapsed))
            }
            Err(e @ DbError::Overloaded { .. }) => {
                warn!(parent: &self.inner.span, sql = %sql, error = %e, "Query rejected");
                Err(e)
            }
            Err(e) => {
                error!(parent: &self.inner.span, sql = %sql, error = %e, "Query failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("relay_capacity", &self.inner.relay.capacity())
            .field("has_replica", &self.inner.replica.is_some())
            .finish_non_exhaustive()
    }
}
