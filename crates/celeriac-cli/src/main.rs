use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{Duration, timeout};

use celeriac_core::config::CeleriacConfig;
use celeriac_core::observability::init_tracing;
use celeriac_core::{
    CeleriacError, Client, MemoryHub, MethodTable, TaskError, TaskRegistry, WorkerGroup,
    default_transports,
};

const RESULT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct Summary {
    count: usize,
    total: i64,
}

/// demo handler：`calc#sum` / `calc#summary` / `calc#fail`
fn calc() -> Result<MethodTable, CeleriacError> {
    let table = MethodTable::new("calc")
        .method("sum", |(a, b): (i64, i64)| async move { Ok(a + b) })?
        .method("summary", |(values,): (Vec<i64>,)| async move {
            Ok(Summary {
                count: values.len(),
                total: values.iter().sum(),
            })
        })?
        .method("fail", |(message,): (String,)| async move {
            Err::<(), _>(TaskError::runtime(message))
        })?;
    Ok(table)
}

/// AsyncResult has no built-in timeout.
async fn wait<T>(
    result: impl Future<Output = Result<T, CeleriacError>>,
) -> Result<T, CeleriacError> {
    timeout(RESULT_WAIT, result)
        .await
        .map_err(|_| CeleriacError::transport("timed out waiting for result"))?
}

async fn run(config: CeleriacConfig) -> Result<(), CeleriacError> {
    // (A) 同一プロセス内の transport と handler registry
    let hub = MemoryHub::new();
    let tasks = Arc::new(TaskRegistry::new().with(calc()?)?);

    // (B) worker group を起動
    let group = WorkerGroup::start(&config.worker, &default_transports(&hub)?, tasks).await?;
    tracing::info!(workers = group.len(), queue = %config.worker.queue, "worker group started");

    // (C) client から投入（結果を受け取るため backend を有効にする）
    let mut client_config = config.client.clone();
    if client_config.backend_uri.is_none() {
        client_config.backend_uri = Some(config.worker.backend_uri.clone());
    }
    let client = Client::from_config(&client_config, default_transports(&hub)?)?;

    let sum = client.submit("calc#sum", vec![json!(2), json!(3)]).await?;
    let summary = client.submit_with("calc#summary", &(vec![4, 5, 6],)).await?;
    let failed = client.submit_with("calc#fail", &("boom",)).await?;

    // (D) 結果を待つ
    let sum: Option<i64> = wait(sum.get_as()).await?;
    println!("calc#sum(2, 3) = {}", sum.unwrap_or_default());

    let summary: Option<Summary> = wait(summary.get_as()).await?;
    println!("calc#summary([4, 5, 6]) = {summary:?}");

    match wait(failed.get()).await {
        Err(CeleriacError::RemoteTask(remote)) => {
            println!("calc#fail(\"boom\") raised {}: {}", remote.exc_type, remote.exc_message);
        }
        other => println!("calc#fail(\"boom\") returned {other:?}"),
    }

    // (E) 後始末：client → workers（drain）→ transport
    client.close().await?;
    let counts = group.counts();
    group.shutdown_and_join().await?;
    println!(
        "received={} succeeded={} failed={} dropped={}",
        counts.received, counts.succeeded, counts.failed, counts.dropped
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = match CeleriacConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&config.logging);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, kind = ?e.kind(), "demo failed");
        std::process::exit(1);
    }
}
