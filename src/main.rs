//! db-relay - run a statement through the relay and print the outcome as JSON.

use clap::Parser;
use db_relay::config::Args;
use db_relay::db::{MySqlDriver, QueryStats, SampleReceiver};
use db_relay::models::TxOptions;
use db_relay::{Client, Context, DbError};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if args.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(args: &Args, client: &Client) -> Result<serde_json::Value, DbError> {
    let ctx = Context::new().with_sync();

    if args.transaction {
        let options = if args.write {
            TxOptions::default()
        } else {
            TxOptions::read_only()
        };
        let tx = client.begin(&ctx, options).await?;
        let done = tx.done();
        let tx_ctx = tx.with_context(&ctx);

        let output = if args.write {
            client
                .exec_tx(&tx_ctx, &args.statement, &[])
                .await
                .map(|meta| json!(meta))
        } else {
            client
                .query_tx(&tx_ctx, &args.statement, &[])
                .await
                .map(|results| json!(results))
        };

        match output {
            Ok(value) => {
                tx.commit(&ctx).await?;
                let outcome = done.await.unwrap_or(Ok(()));
                info!(
                    transaction_id = %tx.id(),
                    committed = outcome.is_ok(),
                    "Transaction finished"
                );
                Ok(value)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    } else if args.write {
        let meta = client.exec(&ctx, &args.statement, &[]).await?;
        Ok(json!(meta))
    } else {
        let results = client.multi_query(&ctx, &args.statement, &[]).await?;
        Ok(json!(results))
    }
}

fn drain(samples: Option<SampleReceiver>) -> Vec<QueryStats> {
    let mut drained = Vec::new();
    if let Some(mut rx) = samples {
        while let Ok(sample) = rx.try_recv() {
            drained.push(sample);
        }
    }
    drained
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args);

    let config = args.relay_config();
    config.validate().map_err(DbError::invalid_input)?;
    info!("Starting db-relay v{}", env!("CARGO_PKG_VERSION"));

    let replica = match &args.replica {
        Some(url) => Some(Client::connect(url, config.clone()).await?),
        None => None,
    };
    let primary = MySqlDriver::connect(&args.database, &config).await?;
    let mut builder = Client::builder(Arc::new(primary)).config(config);
    if let Some(replica) = replica.clone() {
        builder = builder.replica(replica);
    }
    let client = builder.build()?;
    let samples = client.take_samples();
    let replica_samples = replica.as_ref().and_then(Client::take_samples);

    let result = run(&args, &client).await;

    let mut drained = drain(samples);
    drained.extend(drain(replica_samples));

    let output = json!({
        "result": result.as_ref().ok(),
        "error": result.as_ref().err().map(|e| e.to_string()),
        "stats": client.stats(),
        "replica_stats": replica.as_ref().map(Client::stats),
        "samples": drained,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    client.close().await;
    if let Some(replica) = &replica {
        replica.close().await;
    }

    if let Err(e) = result {
        error!(error = %e, "Statement failed");
        return Err(e.into());
    }
    Ok(())
}
