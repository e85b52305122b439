use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use stream_client::ReceivedRecord;

use crate::config::{Effective, SubscribeArgs};
use crate::error::CliError;
use crate::registry::TransportRegistry;

pub async fn run(eff: &Effective, registry: &TransportRegistry, args: SubscribeArgs) -> Result<(), CliError> {
    let mut config = eff.client.subscriber.to_config();
    if args.filter.is_some() {
        config.partition_key_filter = args.filter;
    }
    let subscriber = Arc::new(super::subscriber(eff, registry, config)?);

    let stop = subscriber.stop_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down...");
            stop.stop();
        }
    });

    tracing::info!(provider = %eff.provider, stream = %eff.client.destination.name(), "subscribing, Ctrl+C to stop");
    let handler = |record: ReceivedRecord| {
        let line = json!({
            "shard_id": record.shard_id.as_str(),
            "partition_key": record.partition_key,
            "value": record.value,
        });
        std::future::ready(writeln!(std::io::stdout(), "{line}"))
    };
    let result = subscriber.start(handler).await;
    watcher.abort();

    if let Ok(report) = &result {
        for outcome in &report.shards {
            tracing::info!(
                shard = %outcome.shard_id,
                exit = outcome.exit.label(),
                delivered = outcome.stats.delivered,
                filtered = outcome.stats.filtered,
                skipped = outcome.stats.skipped,
                transport_errors = outcome.stats.transport_errors,
                "shard finished"
            );
        }
    }
    subscriber.close().await?;
    result?;
    Ok(())
}
