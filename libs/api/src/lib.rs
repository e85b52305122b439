//! Shared vocabulary of the stream publish/subscribe core: destinations,
//! records, shard cursors, the retry policy and the [`StreamTransport`]
//! boundary every provider implements.

pub mod error;
pub mod transport;
pub mod types;
pub mod util;

pub use error::{ErrorKind, StreamError};
pub use transport::StreamTransport;
pub use types::{
    BatchAck, FetchedBatch, Record, RetryPolicy, ShardCursor, ShardId, StreamDestination,
    WireRecord, WriteAck, DEFAULT_FETCH_LIMIT, MAX_BATCH_BYTES, MAX_BATCH_RECORDS,
    MAX_RECORD_BYTES,
};
pub use util::{now_ms, time_partition_key};
