//! Publish/subscribe core over a sharded stream.
//!
//! [`Publisher`] writes records with an explicit delivery choice (single
//! attempt, bounded retry, batch). [`Subscriber`] runs one polling loop per
//! shard and hands decoded records to a [`RecordHandler`].

pub mod clock;
pub mod config;
pub mod error;
pub mod producer;
pub mod publisher;
pub mod subscriber;

pub use clock::{Sleeper, TokioSleeper};
pub use config::{ClientConfig, ProducerSettings, RetrySettings, SubscriberSettings};
pub use error::ClientError;
pub use producer::{BacklogPolicy, BatchProducer};
pub use publisher::Publisher;
pub use subscriber::{
    HandlerError, ReceivedRecord, RecordHandler, ShardExit, ShardOutcome, ShardStats,
    StopHandle, Subscriber, SubscriberConfig, SubscriptionReport, DEFAULT_ERROR_BACKOFF,
    DEFAULT_POLL_INTERVAL,
};
