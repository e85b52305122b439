use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use stream_api::{
    BatchAck, FetchedBatch, ShardCursor, ShardId, StreamDestination, StreamError,
    StreamTransport, WireRecord, WriteAck,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryConfig
// ═══════════════════════════════════════════════════════════════

fn default_shards() -> usize {
    1
}

fn default_max_records_per_shard() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryConfig {
    /// Shard count for streams created on first use.
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_max_records_per_shard")]
    pub max_records_per_shard: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            max_records_per_shard: default_max_records_per_shard(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Shard log
// ═══════════════════════════════════════════════════════════════

struct StoredRecord {
    seq: u64,
    data: Vec<u8>,
    partition_key: String,
}

/// Ring buffer одного shard'а. Sequence numbers растут монотонно и
/// переживают вытеснение старых записей.
struct ShardLog {
    records: VecDeque<StoredRecord>,
    next_seq: u64,
    max_records: usize,
    closed: bool,
}

impl ShardLog {
    fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_records.min(65536)),
            next_seq: 0,
            max_records: max_records.max(1),
            closed: false,
        }
    }

    fn append(&mut self, record: WireRecord) -> u64 {
        if self.records.len() >= self.max_records {
            self.records.pop_front();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push_back(StoredRecord {
            seq,
            data: record.data,
            partition_key: record.partition_key,
        });
        seq
    }

    /// Records from `seq` on (or from the oldest retained one if `seq` was
    /// evicted), plus the sequence to resume from.
    fn read_from(&self, seq: u64, max: usize) -> (Vec<WireRecord>, u64) {
        let oldest = self.records.front().map_or(self.next_seq, |r| r.seq);
        let start = seq.max(oldest);
        let records: Vec<WireRecord> = self
            .records
            .iter()
            .skip((start - oldest) as usize)
            .take(max)
            .map(|r| WireRecord::new(r.data.clone(), r.partition_key.clone()))
            .collect();
        let next = start + records.len() as u64;
        (records, next)
    }
}

struct MemoryStream {
    shards: Vec<RwLock<ShardLog>>,
}

impl MemoryStream {
    fn new(shards: usize, max_records: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::new(ShardLog::new(max_records))).collect(),
        }
    }

    /// Deterministic partition key → shard index.
    fn route(&self, partition_key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

fn shard_id(index: usize) -> ShardId {
    ShardId::new(format!("shardId-{index:012}"))
}

fn shard_index(shard: &ShardId) -> Result<usize, StreamError> {
    shard
        .as_str()
        .strip_prefix("shardId-")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StreamError::new(format!("malformed shard id '{shard}'")).with_code("InvalidArgumentException"))
}

fn cursor_token(stream: &str, index: usize, seq: u64) -> ShardCursor {
    ShardCursor::new(format!("{stream}/{index}/{seq}"))
}

/// `"{stream}/{index}/{seq}"`; stream names may contain `/`.
fn parse_cursor(cursor: &ShardCursor) -> Result<(String, usize, u64), StreamError> {
    let malformed = || StreamError::new("malformed shard iterator").with_code("InvalidArgumentException");
    let mut parts = cursor.as_str().rsplitn(3, '/');
    let seq = parts.next().and_then(|s| s.parse().ok()).ok_or_else(malformed)?;
    let index = parts.next().and_then(|s| s.parse().ok()).ok_or_else(malformed)?;
    let stream = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    Ok((stream.to_string(), index, seq))
}

fn not_found(stream: &str) -> StreamError {
    StreamError::new(format!("stream {stream} not found")).with_code("ResourceNotFoundException")
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

struct BrokerInner {
    streams: RwLock<HashMap<String, Arc<MemoryStream>>>,
    config: MemoryConfig,
}

impl BrokerInner {
    async fn stream(&self, name: &str) -> Result<Arc<MemoryStream>, StreamError> {
        self.streams.read().await.get(name).cloned().ok_or_else(|| not_found(name))
    }

    async fn stream_or_create(&self, name: &str) -> Arc<MemoryStream> {
        if let Some(stream) = self.streams.read().await.get(name) {
            return stream.clone();
        }
        let mut streams = self.streams.write().await;
        streams
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(stream = name, shards = self.config.shards, "memory stream created on first use");
                Arc::new(MemoryStream::new(self.config.shards, self.config.max_records_per_shard))
            })
            .clone()
    }
}

/// In-process sharded stream. Для локальных прогонов и тестов: publisher и
/// subscriber, подключённые к одному broker'у, видят одни и те же данные.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryBroker {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                streams: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Independent handle; closing it leaves other handles and the data intact.
    pub fn connect(&self) -> MemoryTransport {
        MemoryTransport {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn create_stream(&self, name: &str, shards: usize) -> Result<(), StreamError> {
        let mut streams = self.inner.streams.write().await;
        if streams.contains_key(name) {
            return Err(StreamError::new(format!("stream {name} already exists")).with_code("ResourceInUseException"));
        }
        streams.insert(
            name.to_string(),
            Arc::new(MemoryStream::new(shards, self.inner.config.max_records_per_shard)),
        );
        tracing::debug!(stream = name, shards, "memory stream created");
        Ok(())
    }

    /// Закрыть shard: новые записи в него отклоняются, а после дочитывания
    /// оставшихся fetch больше не выдаёт cursor.
    pub async fn close_shard(&self, name: &str, index: usize) -> Result<ShardId, StreamError> {
        let stream = self.inner.stream(name).await?;
        let shard = stream
            .shards
            .get(index)
            .ok_or_else(|| StreamError::new(format!("stream {name} has no shard {index}")))?;
        shard.write().await.closed = true;
        tracing::info!(stream = name, shard = index, "memory shard closed");
        Ok(shard_id(index))
    }

    /// Records currently retained across all shards of `name`.
    pub async fn record_count(&self, name: &str) -> usize {
        let Ok(stream) = self.inner.stream(name).await else {
            return 0;
        };
        let mut total = 0;
        for shard in &stream.shards {
            total += shard.read().await.records.len();
        }
        total
    }

    /// Shard a partition key routes to, if the stream exists.
    pub async fn shard_for_key(&self, name: &str, partition_key: &str) -> Option<ShardId> {
        let stream = self.inner.stream(name).await.ok()?;
        Some(shard_id(stream.route(partition_key)))
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransport
// ═══════════════════════════════════════════════════════════════

pub struct MemoryTransport {
    inner: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::io("memory transport is closed"));
        }
        Ok(())
    }
}

impl StreamTransport for MemoryTransport {
    fn discover_shards(
        &self,
        destination: &StreamDestination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ShardId>, StreamError>> + Send + '_>> {
        let name = destination.name().to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let stream = self.inner.stream_or_create(&name).await;
            Ok((0..stream.shards.len()).map(shard_id).collect())
        })
    }

    fn latest_cursor(
        &self,
        destination: &StreamDestination,
        shard: &ShardId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ShardCursor>, StreamError>> + Send + '_>> {
        let name = destination.name().to_string();
        let shard = shard.clone();
        Box::pin(async move {
            self.ensure_open()?;
            let stream = self.inner.stream(&name).await?;
            let index = shard_index(&shard)?;
            let log = stream
                .shards
                .get(index)
                .ok_or_else(|| StreamError::new(format!("shard {shard} not found")).with_code("ResourceNotFoundException"))?
                .read()
                .await;
            if log.closed {
                return Ok(None);
            }
            Ok(Some(cursor_token(&name, index, log.next_seq)))
        })
    }

    fn fetch(
        &self,
        cursor: &ShardCursor,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedBatch, StreamError>> + Send + '_>> {
        let cursor = cursor.clone();
        Box::pin(async move {
            self.ensure_open()?;
            let (name, index, seq) = parse_cursor(&cursor)?;
            let stream = self.inner.stream(&name).await?;
            let log = stream
                .shards
                .get(index)
                .ok_or_else(|| StreamError::new("shard iterator points at unknown shard").with_code("InvalidArgumentException"))?
                .read()
                .await;
            if seq > log.next_seq {
                return Err(StreamError::new("shard iterator is ahead of the shard").with_code("InvalidArgumentException"));
            }

            let (records, next_seq) = log.read_from(seq, max_records);
            let caught_up = next_seq == log.next_seq;
            let next_cursor = if log.closed && caught_up {
                None
            } else {
                Some(cursor_token(&name, index, next_seq))
            };
            Ok(FetchedBatch {
                records,
                next_cursor,
                millis_behind_latest: caught_up.then_some(0),
            })
        })
    }

    fn write_one(
        &self,
        destination: &StreamDestination,
        record: WireRecord,
    ) -> Pin<Box<dyn Future<Output = Result<WriteAck, StreamError>> + Send + '_>> {
        let name = destination.name().to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let stream = self.inner.stream_or_create(&name).await;
            let index = stream.route(&record.partition_key);
            let mut log = stream.shards[index].write().await;
            if log.closed {
                return Err(StreamError::new(format!("shard {} is closed", shard_id(index))));
            }
            let seq = log.append(record);
            Ok(WriteAck {
                shard_id: shard_id(index),
                sequence_number: seq.to_string(),
            })
        })
    }

    fn write_batch(
        &self,
        destination: &StreamDestination,
        records: Vec<WireRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchAck, StreamError>> + Send + '_>> {
        let name = destination.name().to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let stream = self.inner.stream_or_create(&name).await;
            let mut ack = BatchAck::default();
            for record in records {
                let index = stream.route(&record.partition_key);
                let mut log = stream.shards[index].write().await;
                if log.closed {
                    ack.failed_record_count += 1;
                    ack.first_error
                        .get_or_insert_with(|| format!("shard {} is closed", shard_id(index)));
                    continue;
                }
                log.append(record);
            }
            Ok(ack)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                tracing::debug!("memory transport closed");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_api::ErrorKind;

    fn dest(name: &str) -> StreamDestination {
        StreamDestination::new(name, "local").unwrap()
    }

    fn rec(key: &str, n: u64) -> WireRecord {
        WireRecord::new(serde_json::to_vec(&n).unwrap(), key)
    }

    fn values(batch: &FetchedBatch) -> Vec<u64> {
        batch.records.iter().map(|r| serde_json::from_slice(&r.data).unwrap()).collect()
    }

    async fn latest(transport: &MemoryTransport, d: &StreamDestination, index: usize) -> ShardCursor {
        transport.latest_cursor(d, &shard_id(index)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_latest_cursor_sees_only_new_records() {
        let broker = MemoryBroker::default();
        let t = broker.connect();
        let d = dest("ticks");

        t.write_one(&d, rec("k", 1)).await.unwrap();
        t.discover_shards(&d).await.unwrap();
        let cursor = latest(&t, &d, 0).await;
        t.write_one(&d, rec("k", 2)).await.unwrap();
        t.write_one(&d, rec("k", 3)).await.unwrap();

        let batch = t.fetch(&cursor, 100).await.unwrap();
        assert_eq!(values(&batch), vec![2, 3]);
        assert_eq!(batch.millis_behind_latest, Some(0));

        let next = t.fetch(batch.next_cursor.as_ref().unwrap(), 100).await.unwrap();
        assert!(next.records.is_empty());
        assert!(next.next_cursor.is_some());
    }

    #[tokio::test]
    async fn test_fetch_respects_max_records() {
        let broker = MemoryBroker::default();
        let t = broker.connect();
        let d = dest("ticks");
        t.discover_shards(&d).await.unwrap();
        let cursor = latest(&t, &d, 0).await;
        for n in 0..5 {
            t.write_one(&d, rec("k", n)).await.unwrap();
        }

        let first = t.fetch(&cursor, 2).await.unwrap();
        assert_eq!(values(&first), vec![0, 1]);
        assert_eq!(first.millis_behind_latest, None);
        let second = t.fetch(first.next_cursor.as_ref().unwrap(), 10).await.unwrap();
        assert_eq!(values(&second), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_same_key_routes_to_same_shard() {
        let broker = MemoryBroker::new(MemoryConfig { shards: 4, ..MemoryConfig::default() });
        let t = broker.connect();
        let d = dest("ticks");

        let a = t.write_one(&d, rec("source1", 1)).await.unwrap();
        let b = t.write_one(&d, rec("source1", 2)).await.unwrap();
        assert_eq!(a.shard_id, b.shard_id);
        assert_eq!(broker.shard_for_key("ticks", "source1").await, Some(a.shard_id));
        assert_eq!(t.discover_shards(&d).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let broker = MemoryBroker::new(MemoryConfig { shards: 1, max_records_per_shard: 3 });
        let t = broker.connect();
        let d = dest("ticks");
        t.discover_shards(&d).await.unwrap();
        let cursor = latest(&t, &d, 0).await;
        for n in 0..5 {
            t.write_one(&d, rec("k", n)).await.unwrap();
        }

        assert_eq!(broker.record_count("ticks").await, 3);
        let batch = t.fetch(&cursor, 100).await.unwrap();
        assert_eq!(values(&batch), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_closed_shard_is_exhausted_after_draining() {
        let broker = MemoryBroker::default();
        let t = broker.connect();
        let d = dest("ticks");
        t.discover_shards(&d).await.unwrap();
        let cursor = latest(&t, &d, 0).await;
        t.write_one(&d, rec("k", 1)).await.unwrap();
        broker.close_shard("ticks", 0).await.unwrap();

        let batch = t.fetch(&cursor, 100).await.unwrap();
        assert_eq!(values(&batch), vec![1]);
        assert!(batch.next_cursor.is_none());

        assert!(t.latest_cursor(&d, &shard_id(0)).await.unwrap().is_none());
        assert!(t.write_one(&d, rec("k", 2)).await.is_err());
        let ack = t.write_batch(&d, vec![rec("k", 3)]).await.unwrap();
        assert_eq!(ack.failed_record_count, 1);
    }

    #[tokio::test]
    async fn test_handles_share_data_and_close_independently() {
        let broker = MemoryBroker::default();
        let writer = broker.connect();
        let reader = broker.connect();
        let d = dest("ticks");
        reader.discover_shards(&d).await.unwrap();
        let cursor = latest(&reader, &d, 0).await;

        writer.write_batch(&d, vec![rec("a", 1), rec("b", 2)]).await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let err = writer.write_one(&d, rec("a", 3)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        let batch = reader.fetch(&cursor, 100).await.unwrap();
        assert_eq!(values(&batch), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_stream_and_bad_cursor() {
        let broker = MemoryBroker::default();
        let t = broker.connect();

        let err = t.latest_cursor(&dest("missing"), &shard_id(0)).await.unwrap_err();
        assert_eq!(err.code(), Some("ResourceNotFoundException"));

        let err = t.fetch(&ShardCursor::new("garbage"), 10).await.unwrap_err();
        assert_eq!(err.code(), Some("InvalidArgumentException"));
    }

    #[tokio::test]
    async fn test_create_stream_rejects_duplicates() {
        let broker = MemoryBroker::default();
        broker.create_stream("orders/eu", 2).await.unwrap();
        assert!(broker.create_stream("orders/eu", 2).await.is_err());

        let t = broker.connect();
        let d = dest("orders/eu");
        assert_eq!(t.discover_shards(&d).await.unwrap().len(), 2);
        let cursor = latest(&t, &d, 1).await;
        assert_eq!(parse_cursor(&cursor).unwrap(), ("orders/eu".to_string(), 1, 0));
    }
}
