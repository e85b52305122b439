use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;

use stream_api::{Record, MAX_BATCH_BYTES, MAX_BATCH_RECORDS, MAX_RECORD_BYTES};

use crate::error::ClientError;
use crate::publisher::{encode, Publisher};

// ═══════════════════════════════════════════════════════════════
//  Backlog policy
// ═══════════════════════════════════════════════════════════════

/// Что делать с неотправленным backlog'ом после неудачного flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BacklogPolicy {
    /// Хранить всё до успешной отправки. Память не ограничена.
    #[default]
    Unbounded,
    /// Когда backlog превышает `high_water`, выбросить самые старые записи,
    /// оставив `retain` последних.
    DropOldest { high_water: usize, retain: usize },
}

impl BacklogPolicy {
    pub fn validate(&self) -> Result<(), ClientError> {
        match *self {
            BacklogPolicy::Unbounded => Ok(()),
            BacklogPolicy::DropOldest { high_water, retain } => {
                if retain > high_water {
                    return Err(ClientError::Config(format!(
                        "backlog retain ({retain}) must not exceed high_water ({high_water})"
                    )));
                }
                Ok(())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  BatchProducer
// ═══════════════════════════════════════════════════════════════

/// Накопитель записей поверх [`Publisher::publish_batch`].
///
/// `push` кладёт запись в FIFO backlog, `flush` отправляет его batch'ами
/// не больше `max_batch_records` записей и `MAX_BATCH_BYTES` байт. Batch,
/// отправленный успешно, удаляется; на первой ошибке неотправленный остаток
/// сохраняется, применяется [`BacklogPolicy`], ошибка возвращается вызывающему.
///
/// Запись больше `MAX_RECORD_BYTES` провайдер не примет никогда: `flush`
/// выбрасывает её из backlog'а и считает в [`BatchProducer::rejected_total`].
///
/// Доставка at-least-once: при частичном отказе провайдера batch остаётся в
/// backlog'е целиком, и следующий `flush` повторно отправит записи, которые
/// провайдер уже принял.
pub struct BatchProducer {
    publisher: Arc<Publisher>,
    pending: VecDeque<Record>,
    policy: BacklogPolicy,
    max_batch_records: usize,
    dropped_total: u64,
    rejected_total: u64,
}

impl BatchProducer {
    pub fn new(publisher: Arc<Publisher>, policy: BacklogPolicy) -> Result<Self, ClientError> {
        policy.validate()?;
        Ok(Self {
            publisher,
            pending: VecDeque::new(),
            policy,
            max_batch_records: MAX_BATCH_RECORDS,
            dropped_total: 0,
            rejected_total: 0,
        })
    }

    /// Clamped to `1..=MAX_BATCH_RECORDS`.
    pub fn with_max_batch_records(mut self, max: usize) -> Self {
        self.max_batch_records = max.clamp(1, MAX_BATCH_RECORDS);
        self
    }

    pub fn push(&mut self, record: Record) {
        self.pending.push_back(record);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Records discarded by the backlog policy since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Records discarded because the provider can never accept them.
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total
    }

    /// Отправить backlog. Возвращает число опубликованных записей.
    pub async fn flush(&mut self) -> Result<usize, ClientError> {
        let mut published = 0;
        while !self.pending.is_empty() {
            let n = self.next_chunk_len();
            if n == 0 {
                break;
            }
            let chunk = &self.pending.make_contiguous()[..n];
            match self.publisher.publish_batch(chunk).await {
                Ok(_) => {
                    self.pending.drain(..n);
                    published += n;
                }
                Err(e) => {
                    tracing::warn!(
                        stream = %self.publisher.destination().name(),
                        pending = self.pending.len(),
                        error = %e,
                        "flush failed, keeping backlog"
                    );
                    self.enforce_backlog();
                    return Err(e);
                }
            }
        }
        Ok(published)
    }

    /// Длина следующего batch'а от головы backlog'а в пределах лимитов.
    /// Записи, которые не пройдут лимит никогда, удаляются по пути.
    fn next_chunk_len(&mut self) -> usize {
        let mut count = 0;
        let mut bytes = 0;
        while count < self.pending.len() && count < self.max_batch_records {
            let size = match encode(&self.pending[count]) {
                Ok(wire) if wire.billed_size() <= MAX_RECORD_BYTES => wire.billed_size(),
                outcome => {
                    let reason = match outcome {
                        Ok(wire) => format!("{} bytes over the {MAX_RECORD_BYTES} byte record limit", wire.billed_size()),
                        Err(e) => e.to_string(),
                    };
                    self.pending.remove(count);
                    self.rejected_total += 1;
                    tracing::error!(
                        stream = %self.publisher.destination().name(),
                        reason = %reason,
                        "record can never be published, discarding"
                    );
                    continue;
                }
            };
            if bytes + size > MAX_BATCH_BYTES {
                break;
            }
            bytes += size;
            count += 1;
        }
        count
    }

    fn enforce_backlog(&mut self) {
        let BacklogPolicy::DropOldest { high_water, retain } = self.policy else {
            return;
        };
        if self.pending.len() <= high_water {
            return;
        }
        let dropped = self.pending.len() - retain;
        self.pending.drain(..dropped);
        self.dropped_total += dropped as u64;
        tracing::warn!(
            stream = %self.publisher.destination().name(),
            dropped,
            retained = retain,
            high_water,
            "backlog over high-water mark, dropped oldest records"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            backlog: BacklogPolicy,
        }
        let w: Wrapper =
            toml::from_str("backlog = { policy = \"drop_oldest\", high_water = 30, retain = 9 }")
                .unwrap();
        assert_eq!(w.backlog, BacklogPolicy::DropOldest { high_water: 30, retain: 9 });

        let w: Wrapper = toml::from_str("backlog = { policy = \"unbounded\" }").unwrap();
        assert_eq!(w.backlog, BacklogPolicy::Unbounded);
    }

    #[test]
    fn test_retain_above_high_water_is_rejected() {
        let policy = BacklogPolicy::DropOldest { high_water: 5, retain: 10 };
        assert!(matches!(policy.validate(), Err(ClientError::Config(_))));
    }
}
