use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stream_api::{
    BatchAck, Record, RetryPolicy, StreamDestination, StreamError, StreamTransport,
    WireRecord, WriteAck, MAX_BATCH_BYTES, MAX_BATCH_RECORDS, MAX_RECORD_BYTES,
    time_partition_key,
};

use crate::clock::{Sleeper, TokioSleeper};
use crate::error::ClientError;

/// Запись прикладных record'ов в stream с явно выбранной гарантией доставки:
///
/// - [`Publisher::publish_one`]: одна попытка, ошибка транспорта наружу как есть;
/// - [`Publisher::publish_one_with_retry`]: exponential backoff по [`RetryPolicy`];
/// - [`Publisher::publish_batch`]: один batch-запрос, без retry.
pub struct Publisher {
    destination: StreamDestination,
    transport: Arc<dyn StreamTransport>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    closed: AtomicBool,
}

impl Publisher {
    pub fn new(destination: StreamDestination, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            destination,
            transport,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            closed: AtomicBool::new(false),
        }
    }

    /// Policy used by `publish_one_with_retry` when the caller passes none.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn destination(&self) -> &StreamDestination {
        &self.destination
    }

    /// Одна попытка записи. Ошибка транспорта возвращается без изменений.
    pub async fn publish_one(&self, record: &Record) -> Result<WriteAck, ClientError> {
        self.ensure_open()?;
        let wire = encode(record)?;
        let ack = self.transport.write_one(&self.destination, wire).await?;
        tracing::debug!(
            stream = %self.destination.name(),
            shard = %ack.shard_id,
            sequence = %ack.sequence_number,
            "record published"
        );
        Ok(ack)
    }

    /// До `max_retries + 1` попыток. Перед попыткой `k` (k ≥ 1): пауза
    /// `policy.delay_before(k)`; перед первой паузы нет.
    ///
    /// Payload и partition key вычисляются один раз: все попытки пишут
    /// одинаковые байты с одинаковым ключом.
    pub async fn publish_one_with_retry(
        &self,
        record: &Record,
        policy: Option<&RetryPolicy>,
    ) -> Result<WriteAck, ClientError> {
        self.ensure_open()?;
        let policy = policy.copied().unwrap_or(self.retry);
        let total = policy.total_attempts();
        let wire = encode(record)?;

        let mut attempts = 0u32;
        loop {
            match self.transport.write_one(&self.destination, wire.clone()).await {
                Ok(ack) => {
                    if attempts > 0 {
                        tracing::info!(
                            stream = %self.destination.name(),
                            attempt = attempts + 1,
                            "publish succeeded after retry"
                        );
                    }
                    return Ok(ack);
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= total {
                        tracing::error!(
                            stream = %self.destination.name(),
                            attempts,
                            error = %e,
                            "publish retries exhausted"
                        );
                        return Err(ClientError::ExhaustedRetries { attempts, last_error: e });
                    }
                    let delay = policy.delay_before(attempts);
                    tracing::warn!(
                        stream = %self.destination.name(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        retryable = e.is_retryable(),
                        error = %e,
                        "publish attempt failed, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    /// Один batch-запрос со всеми записями в исходном порядке, каждая со своим
    /// partition key. Retry нет; batch больше лимитов провайдера отклоняется
    /// до записи (разбивает вызывающий).
    ///
    /// Пустой batch: no-op. Частичный отказ провайдера считается ошибкой.
    pub async fn publish_batch(&self, records: &[Record]) -> Result<BatchAck, ClientError> {
        self.ensure_open()?;
        if records.is_empty() {
            return Ok(BatchAck::default());
        }

        let wire = records.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        let count = wire.len();
        let bytes: usize = wire.iter().map(WireRecord::billed_size).sum();
        let oversized = wire.iter().any(|r| r.billed_size() > MAX_RECORD_BYTES);
        if count > MAX_BATCH_RECORDS || bytes > MAX_BATCH_BYTES || oversized {
            return Err(ClientError::BatchLimit { records: count, bytes });
        }

        let ack = match self.transport.write_batch(&self.destination, wire).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(stream = %self.destination.name(), records = count, error = %e, "batch publish failed");
                return Err(e.into());
            }
        };

        if !ack.is_complete() {
            let mut err = StreamError::io(format!(
                "{} of {count} records rejected by provider",
                ack.failed_record_count
            ));
            if let Some(code) = &ack.first_error {
                err = err.with_code(code.clone());
            }
            tracing::error!(stream = %self.destination.name(), failed = ack.failed_record_count, records = count, "batch partially rejected");
            return Err(err.into());
        }

        tracing::debug!(stream = %self.destination.name(), records = count, bytes, "batch published");
        Ok(ack)
    }

    /// Освободить транспорт. Повторный вызов: no-op.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.transport.close().await?;
        tracing::info!(stream = %self.destination.name(), "publisher closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed("publisher"));
        }
        Ok(())
    }
}

/// JSON-байты + partition key (ключ вызывающего или производный от времени).
pub(crate) fn encode(record: &Record) -> Result<WireRecord, ClientError> {
    let data = serde_json::to_vec(&record.value)?;
    let partition_key = record
        .partition_key
        .clone()
        .unwrap_or_else(time_partition_key);
    Ok(WireRecord { data, partition_key })
}
