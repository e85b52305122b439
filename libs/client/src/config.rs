use std::time::Duration;

use serde::Deserialize;

use stream_api::{RetryPolicy, StreamDestination, DEFAULT_FETCH_LIMIT, MAX_BATCH_RECORDS};

use crate::error::ClientError;
use crate::producer::BacklogPolicy;
use crate::subscriber::{SubscriberConfig, DEFAULT_ERROR_BACKOFF, DEFAULT_POLL_INTERVAL};

/// Provider-side cap on records per fetch.
const MAX_FETCH_LIMIT: usize = 10_000;

/// Root configuration: parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Target stream. Required.
    pub destination: StreamDestination,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub subscriber: SubscriberSettings,

    #[serde(default)]
    pub producer: ProducerSettings,
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ClientError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let fetch = self.subscriber.max_records_per_fetch;
        if fetch == 0 || fetch > MAX_FETCH_LIMIT {
            return Err(ClientError::Config(format!(
                "subscriber.max_records_per_fetch must be in 1..={MAX_FETCH_LIMIT}, got {fetch}"
            )));
        }
        if matches!(self.subscriber.partition_key_filter.as_deref(), Some("")) {
            return Err(ClientError::Config(
                "subscriber.partition_key_filter must not be empty when set".into(),
            ));
        }
        let batch = self.producer.max_batch_records;
        if batch == 0 || batch > MAX_BATCH_RECORDS {
            return Err(ClientError::Config(format!(
                "producer.max_batch_records must be in 1..={MAX_BATCH_RECORDS}, got {batch}"
            )));
        }
        self.producer.backlog.validate()
    }
}

// ═══════════════════════════════════════════════════════════════
//  [retry]
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  [subscriber]
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriberSettings {
    /// Deliver only records with exactly this partition key.
    #[serde(default)]
    pub partition_key_filter: Option<String>,
    #[serde(default = "default_fetch_limit")]
    pub max_records_per_fetch: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}
fn default_error_backoff_ms() -> u64 {
    DEFAULT_ERROR_BACKOFF.as_millis() as u64
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            partition_key_filter: None,
            max_records_per_fetch: default_fetch_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl SubscriberSettings {
    pub fn to_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            max_records_per_fetch: self.max_records_per_fetch,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            partition_key_filter: self.partition_key_filter.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  [producer]
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProducerSettings {
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
    #[serde(default)]
    pub backlog: BacklogPolicy,
}

fn default_max_batch_records() -> usize {
    MAX_BATCH_RECORDS
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            max_batch_records: default_max_batch_records(),
            backlog: BacklogPolicy::default(),
        }
    }
}
