use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use stream_api::Record;
use stream_client::{Publisher, ReceivedRecord};

use crate::config::{Effective, SmokeArgs};
use crate::error::CliError;
use crate::registry::TransportRegistry;

/// 1 direct + 1 retry + 5 batch.
const SENT: usize = 7;
const BATCH_SIZE: usize = 5;

#[derive(Debug)]
pub struct SmokeSummary {
    pub sent: usize,
    pub received_ids: Vec<String>,
}

pub async fn run(eff: &Effective, registry: &TransportRegistry, args: SmokeArgs) -> Result<(), CliError> {
    let summary = execute(eff, registry, &args).await?;

    println!("Messages sent: {}", summary.sent);
    println!("Messages received: {}", summary.received_ids.len());
    println!("Received message IDs: {:?}", summary.received_ids);
    if summary.received_ids.len() != summary.sent {
        tracing::warn!(sent = summary.sent, received = summary.received_ids.len(), "delivery mismatch");
    }
    Ok(())
}

pub(crate) async fn execute(
    eff: &Effective,
    registry: &TransportRegistry,
    args: &SmokeArgs,
) -> Result<SmokeSummary, CliError> {
    let mut config = eff.client.subscriber.to_config();
    config.partition_key_filter = None;
    let subscriber = Arc::new(super::subscriber(eff, registry, config)?);
    let publisher = super::publisher(eff, registry)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ReceivedRecord>();
    let handler = move |record: ReceivedRecord| {
        tracing::info!(shard = %record.shard_id, key = %record.partition_key, value = %record.value, "received message");
        std::future::ready(tx.send(record).map_err(|e| e.to_string()))
    };
    let running = subscriber.clone();
    let run = tokio::spawn(async move { running.start(handler).await });

    tokio::time::sleep(Duration::from_millis(args.warmup_ms)).await;

    let published = publish_all(&publisher, &args.key).await;

    if published.is_ok() {
        tracing::info!(settle_ms = args.settle_ms, "waiting for messages to be processed...");
        tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;
    }

    subscriber.stop();
    let report = run.await.map_err(|e| CliError::Config(format!("subscriber task: {e}")));
    subscriber.close().await?;
    publisher.close().await?;
    published?;
    report??;

    let mut received_ids = Vec::new();
    while let Ok(record) = rx.try_recv() {
        let id = match record.value.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "?".to_string(),
        };
        received_ids.push(id);
    }
    Ok(SmokeSummary { sent: SENT, received_ids })
}

#[derive(Serialize)]
struct SmokeMessage {
    id: String,
    test: String,
    timestamp: String,
}

fn message(id: impl Into<String>, test: impl Into<String>, key: Option<&str>) -> Result<Record, CliError> {
    let payload = SmokeMessage { id: id.into(), test: test.into(), timestamp: timestamp() };
    Ok(Record::from_serialize(&payload, key.map(str::to_string))?)
}

async fn publish_all(publisher: &Publisher, key: &str) -> Result<(), CliError> {
    tracing::info!("test 1: direct publish");
    publisher.publish_one(&message("1", "direct-message", None)?).await?;

    tracing::info!("test 2: publish with retry");
    publisher.publish_one_with_retry(&message("2", "retry-message", None)?, None).await?;

    tracing::info!("test 3: batch publish");
    let batch = (1..=BATCH_SIZE)
        .map(|i| message(format!("batch-{i}"), format!("batch-message-{i}"), Some(key)))
        .collect::<Result<Vec<_>, _>>()?;
    publisher.publish_batch(&batch).await?;
    Ok(())
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommonArgs, FileConfig};
    use transport_memory::MemoryConfig;

    fn memory_effective(shards: usize) -> Effective {
        let args = CommonArgs { stream: Some("liquidity-master".into()), ..CommonArgs::default() };
        let mut eff = Effective::merge(&args, FileConfig::default()).unwrap();
        eff.client.subscriber.poll_interval_ms = 10;
        eff.memory.shards = shards;
        eff
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_smoke_over_memory_receives_everything() {
        let eff = memory_effective(2);
        let registry = TransportRegistry::with_defaults(eff.memory.clone());
        let args = SmokeArgs { warmup_ms: 100, settle_ms: 300, key: "source1".into() };

        let summary = execute(&eff, &registry, &args).await.unwrap();

        assert_eq!(summary.sent, 7);
        let mut ids = summary.received_ids.clone();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "batch-1", "batch-2", "batch-3", "batch-4", "batch-5"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_smoke_ignores_configured_filter() {
        let mut eff = memory_effective(1);
        eff.client.subscriber.partition_key_filter = Some("other".into());
        let registry = TransportRegistry::with_defaults(eff.memory.clone());
        let args = SmokeArgs { warmup_ms: 100, settle_ms: 300, key: "source1".into() };

        let summary = execute(&eff, &registry, &args).await.unwrap();
        assert_eq!(summary.received_ids.len(), 7);
    }
}
