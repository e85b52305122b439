use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tokio::io::AsyncReadExt;

use stream_api::Record;
use stream_client::{BatchProducer, Publisher};

use crate::config::{Effective, PublishArgs, PublishMode};
use crate::error::CliError;
use crate::registry::TransportRegistry;

pub async fn run(eff: &Effective, registry: &TransportRegistry, args: PublishArgs) -> Result<(), CliError> {
    let input = match &args.data {
        Some(data) => data.clone(),
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let records = parse_records(&input, args.key.as_deref())?;
    if records.is_empty() {
        tracing::warn!("nothing to publish");
        return Ok(());
    }

    let publisher = Arc::new(super::publisher(eff, registry)?);
    tracing::info!(
        provider = %eff.provider,
        stream = %eff.client.destination.name(),
        mode = ?args.mode,
        records = records.len(),
        "publishing"
    );

    let result = publish(&publisher, eff, &args, records).await;
    publisher.close().await?;
    result
}

async fn publish(
    publisher: &Arc<Publisher>,
    eff: &Effective,
    args: &PublishArgs,
    records: Vec<Record>,
) -> Result<(), CliError> {
    let mut out = std::io::stdout();
    match args.mode {
        PublishMode::One | PublishMode::Retry => {
            for record in &records {
                let ack = if args.mode == PublishMode::Retry {
                    publisher.publish_one_with_retry(record, None).await?
                } else {
                    publisher.publish_one(record).await?
                };
                let line = json!({"shard_id": ack.shard_id.as_str(), "sequence_number": ack.sequence_number});
                writeln!(out, "{line}")?;
            }
        }
        PublishMode::Batch => {
            let max = args.batch_size.unwrap_or(eff.client.producer.max_batch_records);
            let mut producer = BatchProducer::new(publisher.clone(), eff.client.producer.backlog)?
                .with_max_batch_records(max);
            for record in records {
                producer.push(record);
            }
            match producer.flush().await {
                Ok(published) => writeln!(out, "{}", json!({"published": published}))?,
                Err(e) => {
                    tracing::error!(
                        pending = producer.pending(),
                        dropped = producer.dropped_total(),
                        "batch publish incomplete"
                    );
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

/// JSON lines → записи. Пустые строки пропускаются; `key` применяется ко всем.
fn parse_records(input: &str, key: Option<&str>) -> Result<Vec<Record>, CliError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let value: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| CliError::Input(format!("line {}: {e}", i + 1)))?;
            Ok(Record { value, partition_key: key.map(str::to_string) })
        })
        .collect()
}
