//! CLI command implementations.
//!
//! Every command opens the file store at `--path`, runs one operation and
//! exits; `tail` keeps a polling subscription alive until Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::backend::FileStore;
use crate::store::{AppendOutcome, Chunk, ChunkStore, Collector, FnSubscriber, AUTO_INDEX};
use crate::subscription::{PollingClient, PollingConfig};

use super::args::{Cli, Command};
use super::errors::CliResult;
use super::io::{write_json, write_record};

/// Main CLI entry point
///
/// Parses arguments, wires logging to stderr and runs the selected
/// command on a fresh runtime. This is the only function main.rs calls.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_command(cli.command))
}

/// Run the appropriate command based on CLI args
pub async fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Stats { path } => stats(&path).await,
        Command::Partitions { path } => partitions(&path).await,
        Command::Read {
            path,
            partition,
            from,
            to,
            limit,
        } => read(&path, &partition, from, to, limit).await,
        Command::Append {
            path,
            partition,
            payload,
            operation_id,
        } => append(&path, &partition, &payload, operation_id).await,
        Command::Tail { path, from } => tail(&path, from).await,
    }
}

async fn stats(path: &Path) -> CliResult<()> {
    let store = FileStore::open(path).await?;
    let stats = store.stats().await?;
    write_json(&serde_json::to_value(&stats)?)
}

async fn partitions(path: &Path) -> CliResult<()> {
    let store = FileStore::open(path).await?;
    let partitions = store.partitions().await?;
    write_json(&serde_json::to_value(&partitions)?)
}

async fn read(
    path: &Path,
    partition: &str,
    from: i64,
    to: Option<i64>,
    limit: Option<usize>,
) -> CliResult<()> {
    let store = FileStore::open(path).await?;
    let mut collector = Collector::new();
    store
        .read_forward(
            partition,
            from,
            to.unwrap_or(i64::MAX),
            limit,
            &mut collector,
            &CancellationToken::new(),
        )
        .await?;
    for chunk in collector.chunks() {
        write_record(&serde_json::to_value(chunk)?)?;
    }
    Ok(())
}

async fn append(
    path: &Path,
    partition: &str,
    payload: &str,
    operation_id: Option<String>,
) -> CliResult<()> {
    let payload: Value = serde_json::from_str(payload)?;
    let store = FileStore::open(path).await?;
    match store
        .append(partition, AUTO_INDEX, payload, operation_id)
        .await?
    {
        AppendOutcome::Applied(chunk) => write_json(&json!({
            "applied": true,
            "position": chunk.position,
            "index": chunk.index,
        })),
        AppendOutcome::AlreadyApplied => write_json(&json!({
            "applied": false,
            "reason": "operation already applied",
        })),
    }
}

async fn tail(path: &Path, from: i64) -> CliResult<()> {
    let store: Arc<dyn ChunkStore> = Arc::new(FileStore::open(path).await?);
    let subscriber = FnSubscriber::new(|chunk: Chunk| match serde_json::to_value(&chunk) {
        Ok(value) => write_record(&value).is_ok(),
        Err(_) => false,
    });
    let client = PollingClient::new(
        store,
        subscriber,
        PollingConfig {
            from_position: from,
            ..PollingConfig::default()
        },
    );

    client.start()?;
    tokio::signal::ctrl_c().await?;
    client.stop().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_writes_through_to_the_store() {
        let dir = TempDir::new().unwrap();

        append(dir.path(), "orders", r#"{"qty": 2}"#, None)
            .await
            .unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        let chunk = store
            .read_last_chunk("orders", i64::MAX)
            .await
            .unwrap()
            .expect("appended chunk");
        assert_eq!(chunk.index, 1);
        assert_eq!(chunk.payload, json!({ "qty": 2 }));
    }

    #[tokio::test]
    async fn test_append_rejects_malformed_payload() {
        let dir = TempDir::new().unwrap();
        let result = append(dir.path(), "orders", "{not json", None).await;
        assert!(matches!(result, Err(super::super::errors::CliError::Json(_))));
    }

    #[tokio::test]
    async fn test_read_on_fresh_store_prints_nothing() {
        let dir = TempDir::new().unwrap();
        read(dir.path(), "orders", 1, None, None).await.unwrap();
    }
}
