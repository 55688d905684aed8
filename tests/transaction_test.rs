//! Integration tests for transaction lifecycle and completion observers.

mod common;

use common::{MockDriver, test_config};
use db_relay::Context;
use db_relay::config::Config;
use db_relay::db::TxState;
use db_relay::error::DbError;
use db_relay::models::TxOptions;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_commit_notifies_every_observer() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let observers: Vec<_> = (0..3).map(|_| tx.done()).collect();

    tx.exec("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit(&ctx).await.unwrap();

    for observer in observers {
        assert!(observer.await.unwrap().is_ok());
    }
    assert_eq!(driver.state.commits.load(Ordering::SeqCst), 1);
    assert_eq!(tx.state(), TxState::Closed);
}

#[tokio::test]
async fn test_late_observer_receives_outcome() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    tx.commit(&ctx).await.unwrap();

    let late = tx.done();
    let outcome = tokio::time::timeout(Duration::from_millis(100), late)
        .await
        .expect("late observer must not block")
        .unwrap();
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_rollback_reports_rolled_back() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let first = tx.done();
    let second = tx.done();

    // the rollback call itself succeeds
    tx.rollback().await.unwrap();

    assert!(matches!(first.await.unwrap(), Err(DbError::RolledBack)));
    assert!(matches!(second.await.unwrap(), Err(DbError::RolledBack)));
    assert_eq!(driver.state.rollbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_commit_failure_fans_out() {
    let driver = MockDriver::new(2).with_commit_error(DbError::mysql(1213, "Deadlock"));
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let observer = tx.done();

    let err = tx.commit(&ctx).await.unwrap_err();
    assert!(err.is_deadlock());
    assert!(observer.await.unwrap().unwrap_err().is_deadlock());
    assert_eq!(client.stats().total_failed_queries, 1);
}

#[tokio::test]
async fn test_begin_reuses_context_transaction() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let outer = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let tx_ctx = outer.with_context(&ctx);

    let inner = client.begin(&tx_ctx, TxOptions::default()).await.unwrap();
    assert!(inner.same_as(&outer));
    assert!(outer.is_owner());
    assert!(!inner.is_owner());
    assert_eq!(driver.state.begins.load(Ordering::SeqCst), 1);

    // nested commit is left to the owner
    inner.commit(&tx_ctx).await.unwrap();
    inner.rollback().await.unwrap();
    assert!(outer.is_open());
    assert_eq!(driver.state.commits.load(Ordering::SeqCst), 0);

    outer.commit(&ctx).await.unwrap();
    assert_eq!(driver.state.commits.load(Ordering::SeqCst), 1);
    assert!(!inner.is_open());
}

#[tokio::test]
async fn test_statements_through_context_transaction() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let tx_ctx = tx.with_context(&ctx);

    let meta = client
        .exec_tx(&tx_ctx, "UPDATE t SET a = 1", &[])
        .await
        .unwrap();
    assert_eq!(meta.last_insert_id, 7);
    let results = client.query_tx(&tx_ctx, "SELECT a FROM t", &[]).await.unwrap();
    assert_eq!(results.rows[0].get("n").and_then(|v| v.as_i64()), Some(7));
    let multi = tx.multi_call("SP_Both", &[]).await.unwrap();
    assert_eq!(multi.count(), 2);

    tx.commit(&ctx).await.unwrap();

    assert_eq!(
        driver.tx_statements(),
        vec!["UPDATE t SET a = 1", "SELECT a FROM t", "CALL SP_Both();"]
    );
    // only BEGIN went through the pool
    assert_eq!(driver.statements(), vec!["BEGIN"]);
}

#[tokio::test]
async fn test_second_commit_rejected() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    tx.commit(&ctx).await.unwrap();

    assert!(matches!(
        tx.commit(&ctx).await,
        Err(DbError::Transaction { .. })
    ));
    assert!(matches!(tx.rollback().await, Err(DbError::Transaction { .. })));
    assert!(tx.query("SELECT 1", &[]).await.is_err());
    assert_eq!(driver.state.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transaction_holds_slot_until_commit() {
    let driver = MockDriver::new(1);
    let client = driver.client(test_config(1));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    assert_eq!(client.stats().in_progress_queries, 1);

    tx.exec("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    assert_eq!(client.stats().in_progress_queries, 1);

    tx.commit(&ctx).await.unwrap();
    assert_eq!(client.stats().in_progress_queries, 0);
}

#[tokio::test]
async fn test_dropped_transaction_releases_resources() {
    let driver = MockDriver::new(1);
    let config = Config {
        max_queued_queries: 0,
        ..test_config(1)
    };
    let client = driver.client(config);
    let ctx = Context::new();

    let observer = {
        let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
        assert_eq!(client.stats().in_progress_queries, 1);
        tx.done()
    };

    let outcome = observer.await.unwrap();
    assert!(matches!(outcome, Err(DbError::Transaction { .. })));
    assert_eq!(client.stats().in_progress_queries, 0);
    assert_eq!(driver.state.dropped.load(Ordering::SeqCst), 1);

    // the slot is free again
    client.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_commit_closes_transaction() {
    let driver = MockDriver::new(1).with_commit_delay(Duration::from_millis(200));
    let config = Config {
        max_queued_queries: 0,
        ..test_config(1)
    };
    let client = driver.client(config);
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let observer = tx.done();

    let cancelled = tokio::time::timeout(Duration::from_millis(20), tx.commit(&ctx)).await;
    assert!(cancelled.is_err());

    assert_eq!(tx.state(), TxState::Closed);
    let stats = client.stats();
    assert_eq!(stats.in_progress_queries, 0);
    assert_eq!(stats.total_failed_queries, 1);
    assert!(matches!(observer.await.unwrap(), Err(DbError::Transaction { .. })));
    // the driver transaction went away unfinished, so it rolled back
    assert_eq!(driver.state.dropped.load(Ordering::SeqCst), 1);
    assert_eq!(driver.state.commits.load(Ordering::SeqCst), 0);

    assert!(matches!(tx.rollback().await, Err(DbError::Transaction { .. })));
    client.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_commit_emits_one_outcome() {
    let driver = MockDriver::new(2).with_commit_delay(Duration::from_millis(200));
    let client = driver.client(test_config(2));
    let mut samples = client.take_samples().unwrap();
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_millis(20), tx.commit(&ctx)).await;
    drop(tx);

    let labels: Vec<String> = std::iter::from_fn(|| samples.try_recv().ok())
        .map(|s| s.query)
        .collect();
    assert_eq!(labels, vec!["BEGIN", "COMMIT"]);
    // dropping the last handle after the cancel does not count it again
    assert_eq!(client.stats().total_failed_queries, 1);
}

#[tokio::test]
async fn test_begin_failure_counted() {
    let driver = MockDriver::new(2).failing_with(vec![DbError::connection(
        "Connection refused",
        "Check that the MySQL server is running",
    )]);
    let client = driver.client(test_config(2));

    let err = client
        .begin(&Context::new(), TxOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));

    let stats = client.stats();
    assert_eq!(stats.total_failed_queries, 1);
    assert_eq!(stats.total_success_queries, 0);
    assert_eq!(stats.in_progress_queries, 0);
}

#[tokio::test]
async fn test_commit_sample_carries_transaction_time() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let mut samples = client.take_samples().unwrap();
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.exec("UPDATE t SET a = 1", &[]).await.unwrap();
    tx.commit(&ctx).await.unwrap();

    let mut queries = Vec::new();
    while let Ok(sample) = samples.try_recv() {
        queries.push(sample);
    }
    let labels: Vec<&str> = queries.iter().map(|s| s.query.as_str()).collect();
    assert_eq!(labels, vec!["BEGIN", "UPDATE t SET a = 1", "COMMIT"]);

    let statement = &queries[1];
    assert_eq!(statement.queue_time, Duration::ZERO);
    let commit = &queries[2];
    assert!(commit.transaction_time >= Duration::from_millis(20));
}

#[tokio::test]
async fn test_metadata_reflects_handle() {
    let driver = MockDriver::new(2);
    let client = driver.client(test_config(2));
    let ctx = Context::new();

    let tx = client.begin(&ctx, TxOptions::read_only()).await.unwrap();
    let meta = tx.metadata();
    assert_eq!(meta.transaction_id, tx.id());
    assert!(meta.transaction_id.starts_with("tx_"));
    assert!(meta.read_only);
    assert!(meta.owner);
    assert_eq!(meta.state, TxState::Open);
    assert!(!tx.inherited().metadata().owner);

    tx.rollback().await.unwrap();
    assert_eq!(tx.metadata().state, TxState::Closed);
}
