#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use stream_api::{
    BatchAck, FetchedBatch, ShardCursor, ShardId, StreamDestination, StreamError,
    StreamTransport, WireRecord, WriteAck,
};
use stream_client::Sleeper;

pub fn dest() -> StreamDestination {
    StreamDestination::new("liquidity-master", "us-east-2").unwrap()
}

pub fn wire(key: &str, value: serde_json::Value) -> WireRecord {
    WireRecord::new(serde_json::to_vec(&value).unwrap(), key)
}

// ═══════════════════════════════════════════════════════════════
//  RecordingSleeper
// ═══════════════════════════════════════════════════════════════

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn delays_ms(&self) -> Vec<u128> {
        self.delays().iter().map(Duration::as_millis).collect()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.delays.lock().unwrap().push(duration);
        Box::pin(tokio::task::yield_now())
    }
}

// ═══════════════════════════════════════════════════════════════
//  ScriptedTransport
// ═══════════════════════════════════════════════════════════════

/// One scripted response to `fetch` on a shard.
pub enum FetchStep {
    /// Records plus a next cursor.
    Records(Vec<WireRecord>),
    /// Transport failure; the cursor is not advanced.
    Fail(StreamError),
    /// Last records of a closed shard: no next cursor.
    Exhausted(Vec<WireRecord>),
    /// Signals `entered`, then blocks until `release` before returning records.
    Gated {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        records: Vec<WireRecord>,
    },
}

/// In-process transport driven by a script. Cursors look like `"{shard}#{n}"`.
/// Once a shard's script is used up, fetch returns empty batches.
#[derive(Default)]
pub struct ScriptedTransport {
    shards: Vec<ShardId>,
    discover_error: Mutex<Option<StreamError>>,
    write_failures: AtomicUsize,
    batch_failures: AtomicUsize,
    batch_fail_at: Mutex<Option<usize>>,
    batch_ack: Mutex<Option<BatchAck>>,
    scripts: Mutex<HashMap<String, VecDeque<FetchStep>>>,
    writes: Mutex<Vec<WireRecord>>,
    batches: Mutex<Vec<Vec<WireRecord>>>,
    cursors: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shards(mut self, shards: &[&str]) -> Self {
        self.shards = shards.iter().map(|s| ShardId::new(*s)).collect();
        self
    }

    pub fn with_discover_error(self, err: StreamError) -> Self {
        *self.discover_error.lock().unwrap() = Some(err);
        self
    }

    /// The next `n` `write_one` calls fail with a throttling error.
    pub fn with_failing_writes(self, n: usize) -> Self {
        self.write_failures.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` `write_batch` calls fail with an I/O error.
    pub fn with_failing_batches(self, n: usize) -> Self {
        self.batch_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Only the `write_batch` call with this 0-based index fails.
    pub fn with_batch_failing_at(self, call: usize) -> Self {
        *self.batch_fail_at.lock().unwrap() = Some(call);
        self
    }

    pub fn with_batch_ack(self, ack: BatchAck) -> Self {
        *self.batch_ack.lock().unwrap() = Some(ack);
        self
    }

    pub fn with_script(self, shard: &str, steps: Vec<FetchStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(shard.to_string(), steps.into());
        self
    }

    /// Every `write_one` attempt, in order.
    pub fn writes(&self) -> Vec<WireRecord> {
        self.writes.lock().unwrap().clone()
    }

    /// Every `write_batch` call, in order.
    pub fn batches(&self) -> Vec<Vec<WireRecord>> {
        self.batches.lock().unwrap().clone()
    }

    /// Cursor tokens passed to `fetch`, in call order.
    pub fn fetched_cursors(&self) -> Vec<String> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn parse_cursor(cursor: &ShardCursor) -> (String, u64) {
    let (shard, n) = cursor.as_str().split_once('#').unwrap();
    (shard.to_string(), n.parse().unwrap())
}

impl StreamTransport for ScriptedTransport {
    fn discover_shards(
        &self,
        _destination: &StreamDestination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ShardId>, StreamError>> + Send + '_>> {
        Box::pin(async move {
            if let Some(err) = self.discover_error.lock().unwrap().take() {
                return Err(err);
            }
            Ok(self.shards.clone())
        })
    }

    fn latest_cursor(
        &self,
        _destination: &StreamDestination,
        shard: &ShardId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ShardCursor>, StreamError>> + Send + '_>> {
        let cursor = ShardCursor::new(format!("{shard}#0"));
        Box::pin(async move { Ok(Some(cursor)) })
    }

    fn fetch(
        &self,
        cursor: &ShardCursor,
        _max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedBatch, StreamError>> + Send + '_>> {
        let cursor = cursor.clone();
        Box::pin(async move {
            self.cursors.lock().unwrap().push(cursor.as_str().to_string());
            let (shard, n) = parse_cursor(&cursor);
            let next = Some(ShardCursor::new(format!("{shard}#{}", n + 1)));

            let step = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&shard)
                .and_then(VecDeque::pop_front);

            match step {
                None => {
                    tokio::task::yield_now().await;
                    Ok(FetchedBatch { records: vec![], next_cursor: Some(cursor), millis_behind_latest: Some(0) })
                }
                Some(FetchStep::Records(records)) => {
                    Ok(FetchedBatch { records, next_cursor: next, millis_behind_latest: Some(0) })
                }
                Some(FetchStep::Fail(err)) => Err(err),
                Some(FetchStep::Exhausted(records)) => {
                    Ok(FetchedBatch { records, next_cursor: None, millis_behind_latest: None })
                }
                Some(FetchStep::Gated { entered, release, records }) => {
                    entered.notify_one();
                    release.notified().await;
                    Ok(FetchedBatch { records, next_cursor: next, millis_behind_latest: Some(0) })
                }
            }
        })
    }

    fn write_one(
        &self,
        _destination: &StreamDestination,
        record: WireRecord,
    ) -> Pin<Box<dyn Future<Output = Result<WriteAck, StreamError>> + Send + '_>> {
        Box::pin(async move {
            let seq = {
                let mut writes = self.writes.lock().unwrap();
                writes.push(record);
                writes.len()
            };
            if Self::take_failure(&self.write_failures) {
                return Err(StreamError::throttled("rate exceeded for shard")
                    .with_code("ProvisionedThroughputExceededException"));
            }
            Ok(WriteAck {
                shard_id: ShardId::new("shardId-000000000000"),
                sequence_number: seq.to_string(),
            })
        })
    }

    fn write_batch(
        &self,
        _destination: &StreamDestination,
        records: Vec<WireRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchAck, StreamError>> + Send + '_>> {
        Box::pin(async move {
            let call = {
                let mut batches = self.batches.lock().unwrap();
                batches.push(records);
                batches.len() - 1
            };
            let scheduled = *self.batch_fail_at.lock().unwrap() == Some(call);
            if scheduled || Self::take_failure(&self.batch_failures) {
                return Err(StreamError::io("service unavailable"));
            }
            Ok(self.batch_ack.lock().unwrap().clone().unwrap_or_default())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
