use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StreamError;

// ════════════════════════════════════════════════════════════════
//  Provider limits
// ════════════════════════════════════════════════════════════════

/// Максимум записей в одном batch write.
pub const MAX_BATCH_RECORDS: usize = 500;
/// Максимальный суммарный размер batch write (data + partition keys).
pub const MAX_BATCH_BYTES: usize = 5 * 1024 * 1024;
/// Максимальный размер одной записи (data + partition key).
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
/// Сколько записей запрашивать за один fetch по умолчанию.
pub const DEFAULT_FETCH_LIMIT: usize = 100;

// ════════════════════════════════════════════════════════════════
//  StreamDestination
// ════════════════════════════════════════════════════════════════

/// Целевой stream: имя + регион/локатор. Неизменяем после создания.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DestinationParts")]
pub struct StreamDestination {
    name: String,
    region: String,
}

#[derive(Deserialize)]
struct DestinationParts {
    name: String,
    region: String,
}

impl TryFrom<DestinationParts> for StreamDestination {
    type Error = StreamError;

    fn try_from(parts: DestinationParts) -> Result<Self, Self::Error> {
        Self::new(parts.name, parts.region)
    }
}

impl StreamDestination {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Result<Self, StreamError> {
        let name = name.into();
        let region = region.into();
        if name.trim().is_empty() {
            return Err(StreamError::config("destination.name must not be empty"));
        }
        if region.trim().is_empty() {
            return Err(StreamError::config("destination.region must not be empty"));
        }
        Ok(Self { name, region })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl std::fmt::Display for StreamDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.region)
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Прикладная запись: произвольный JSON payload + partition key.
///
/// Без ключа publisher подставляет ключ, производный от времени
/// (см. [`crate::time_partition_key`]). Ключ определяет shard, а значит и
/// порядок записей внутри shard'а.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
}

impl Record {
    pub fn keyed(value: serde_json::Value, partition_key: impl Into<String>) -> Self {
        Self { value, partition_key: Some(partition_key.into()) }
    }

    pub fn unkeyed(value: serde_json::Value) -> Self {
        Self { value, partition_key: None }
    }

    /// Build a record from any serializable payload.
    pub fn from_serialize<T: Serialize>(
        payload: &T,
        partition_key: Option<String>,
    ) -> Result<Self, StreamError> {
        Ok(Self { value: serde_json::to_value(payload)?, partition_key })
    }
}

/// Сериализованная запись на границе с транспортом.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub data: Vec<u8>,
    pub partition_key: String,
}

impl WireRecord {
    pub fn new(data: Vec<u8>, partition_key: impl Into<String>) -> Self {
        Self { data, partition_key: partition_key.into() }
    }

    /// Size the provider accounts for: payload plus partition key.
    pub fn billed_size(&self) -> usize {
        self.data.len() + self.partition_key.len()
    }
}

// ════════════════════════════════════════════════════════════════
//  Shards & cursors
// ════════════════════════════════════════════════════════════════

/// Идентификатор shard'а, как его возвращает провайдер.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Непрозрачная позиция чтения внутри одного shard'а ("shard iterator").
///
/// Принадлежит только polling loop'у своего shard'а и заменяется
/// после каждого успешного fetch.
#[derive(Clone, PartialEq, Eq)]
pub struct ShardCursor(String);

impl ShardCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ShardCursor {
    // Iterator tokens are long opaque blobs; keep logs readable.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head: String = self.0.chars().take(16).collect();
        if head.len() < self.0.len() {
            write!(f, "ShardCursor({head}…)")
        } else {
            write!(f, "ShardCursor({head})")
        }
    }
}

/// Результат одного fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    /// Записи в порядке, назначенном провайдером.
    pub records: Vec<WireRecord>,
    /// Следующий cursor. `None`: shard исчерпан (закрыт и дочитан).
    pub next_cursor: Option<ShardCursor>,
    /// Отставание от головы shard'а, если провайдер его сообщает.
    pub millis_behind_latest: Option<u64>,
}

/// Подтверждение одиночной записи.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub shard_id: ShardId,
    pub sequence_number: String,
}

/// Подтверждение batch write. Провайдер может отклонить часть записей.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchAck {
    pub failed_record_count: usize,
    pub first_error: Option<String>,
}

impl BatchAck {
    pub fn is_complete(&self) -> bool {
        self.failed_record_count == 0
    }
}

// ════════════════════════════════════════════════════════════════
//  RetryPolicy
// ════════════════════════════════════════════════════════════════

/// Exponential backoff with a cap, no jitter.
///
/// The first attempt runs immediately; before attempt `k` (k ≥ 1) the
/// caller waits `min(max_delay, initial_delay × 2^(k-1))`.
///
/// ```
/// use std::time::Duration;
/// use stream_api::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.total_attempts(), 4);
/// assert_eq!(policy.delay_before(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_before(3), Duration::from_millis(400));
/// assert_eq!(policy.delay_before(20), Duration::from_millis(5000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, initial_delay, max_delay }
    }

    /// Total number of attempts including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `attempt` (0-indexed). Attempt 0 has no delay.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = 1u32
            .checked_shl(attempt - 1)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}
