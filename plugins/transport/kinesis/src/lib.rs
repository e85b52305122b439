mod error;
mod sigv4;
mod wire;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use serde::Serialize;
use serde::de::DeserializeOwned;

use stream_api::{
    BatchAck, FetchedBatch, ShardCursor, ShardId, StreamDestination, StreamError,
    StreamTransport, WireRecord, WriteAck,
};

use sigv4::{RequestSigner, CONTENT_TYPE};
use wire::*;

const SERVICE: &str = "kinesis";
const TARGET_PREFIX: &str = "Kinesis_20131202";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct KinesisConfig {
    pub region: String,
    /// Override for local emulators. Default: `https://kinesis.{region}.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl KinesisConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://kinesis.{}.amazonaws.com", self.region),
        }
    }
}

/// Ключи доступа. Разрешаются один раз при старте процесса и
/// передаются в транспорт явно.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

fn extract_host(endpoint: &str) -> Result<String, StreamError> {
    let host = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    let host = host.split('/').next().unwrap_or(host);
    if host.is_empty() {
        return Err(StreamError::config(format!("invalid kinesis endpoint '{endpoint}'")));
    }
    Ok(host.to_string())
}

// ═══════════════════════════════════════════════════════════════
//  KinesisTransport
// ═══════════════════════════════════════════════════════════════

/// [`StreamTransport`] поверх Kinesis JSON API (HTTP + SigV4).
///
/// Один экземпляр обслуживает все shard loop'ы: `reqwest::Client`
/// держит пул соединений и безопасен для конкурентного использования.
pub struct KinesisTransport {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    credentials: Credentials,
    closed: AtomicBool,
}

impl KinesisTransport {
    pub fn new(config: KinesisConfig, credentials: Credentials) -> Result<Self, StreamError> {
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            return Err(StreamError::config("kinesis credentials are missing"));
        }
        let endpoint = config.endpoint_url();
        let host = extract_host(&endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StreamError::config(format!("HTTP client: {e}")))?;
        tracing::debug!(endpoint = %endpoint, region = %config.region, "kinesis transport created");
        Ok(Self {
            http,
            endpoint,
            host,
            region: config.region,
            credentials,
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp, StreamError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::io("kinesis transport is closed"));
        }

        let payload = serde_json::to_vec(request)?;
        let target = format!("{TARGET_PREFIX}.{operation}");
        let signer = RequestSigner {
            access_key_id: &self.credentials.access_key_id,
            secret_access_key: &self.credentials.secret_access_key,
            session_token: self.credentials.session_token.as_deref(),
            region: &self.region,
            service: SERVICE,
        };
        let signed = signer.sign(&self.host, &target, &payload, chrono::Utc::now())?;

        let mut req = self
            .http
            .post(&self.endpoint)
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization);
        if let Some(token) = &self.credentials.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .body(payload)
            .send()
            .await
            .map_err(|e| StreamError::io(format!("kinesis {operation}: {e}")))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| StreamError::io(format!("kinesis {operation} read: {e}")))?;

        if !status.is_success() {
            return Err(error::from_response(status.as_u16(), &body).with_context(format!("kinesis {operation}")));
        }
        serde_json::from_slice(&body)
            .map_err(|e| StreamError::format_err(format!("kinesis {operation} response: {e}")))
    }
}

fn encode_data(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

impl StreamTransport for KinesisTransport {
    fn discover_shards(
        &self,
        destination: &StreamDestination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ShardId>, StreamError>> + Send + '_>> {
        let stream = destination.name().to_string();
        Box::pin(async move {
            let mut shards = Vec::new();
            let mut next_token: Option<String> = None;
            loop {
                let request = match &next_token {
                    Some(token) => ListShardsRequest { stream_name: None, next_token: Some(token) },
                    None => ListShardsRequest { stream_name: Some(&stream), next_token: None },
                };
                let page: ListShardsResponse = self.call("ListShards", &request).await?;
                shards.extend(page.shards.into_iter().map(|s| ShardId::new(s.shard_id)));
                match page.next_token {
                    Some(token) if !token.is_empty() => next_token = Some(token),
                    _ => break,
                }
            }
            tracing::debug!(stream = %stream, shards = shards.len(), "kinesis shards listed");
            Ok(shards)
        })
    }

    fn latest_cursor(
        &self,
        destination: &StreamDestination,
        shard: &ShardId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ShardCursor>, StreamError>> + Send + '_>> {
        let stream = destination.name().to_string();
        let shard = shard.clone();
        Box::pin(async move {
            let request = GetShardIteratorRequest {
                stream_name: &stream,
                shard_id: shard.as_str(),
                shard_iterator_type: "LATEST",
            };
            let resp: GetShardIteratorResponse = self.call("GetShardIterator", &request).await?;
            Ok(resp.shard_iterator.map(ShardCursor::new))
        })
    }

    fn fetch(
        &self,
        cursor: &ShardCursor,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedBatch, StreamError>> + Send + '_>> {
        let cursor = cursor.clone();
        Box::pin(async move {
            let request = GetRecordsRequest { shard_iterator: cursor.as_str(), limit: max_records };
            let resp: GetRecordsResponse = self.call("GetRecords", &request).await?;

            let mut records = Vec::with_capacity(resp.records.len());
            for record in resp.records {
                match base64::engine::general_purpose::STANDARD.decode(&record.data) {
                    Ok(data) => records.push(WireRecord::new(data, record.partition_key)),
                    Err(e) => tracing::warn!(
                        key = %record.partition_key,
                        sequence = ?record.sequence_number,
                        error = %e,
                        "bad record data, skipping"
                    ),
                }
            }
            Ok(FetchedBatch {
                records,
                next_cursor: resp.next_shard_iterator.map(ShardCursor::new),
                millis_behind_latest: resp.millis_behind_latest,
            })
        })
    }

    fn write_one(
        &self,
        destination: &StreamDestination,
        record: WireRecord,
    ) -> Pin<Box<dyn Future<Output = Result<WriteAck, StreamError>> + Send + '_>> {
        let stream = destination.name().to_string();
        Box::pin(async move {
            let request = PutRecordRequest {
                stream_name: &stream,
                data: encode_data(&record.data),
                partition_key: &record.partition_key,
            };
            let resp: PutRecordResponse = self.call("PutRecord", &request).await?;
            Ok(WriteAck {
                shard_id: ShardId::new(resp.shard_id),
                sequence_number: resp.sequence_number,
            })
        })
    }

    fn write_batch(
        &self,
        destination: &StreamDestination,
        records: Vec<WireRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchAck, StreamError>> + Send + '_>> {
        let stream = destination.name().to_string();
        Box::pin(async move {
            let request = PutRecordsRequest {
                stream_name: &stream,
                records: records
                    .iter()
                    .map(|r| PutRecordsEntry { data: encode_data(&r.data), partition_key: &r.partition_key })
                    .collect(),
            };
            let resp: PutRecordsResponse = self.call("PutRecords", &request).await?;
            Ok(BatchAck {
                failed_record_count: resp.failed_record_count.unwrap_or(0),
                first_error: resp.records.into_iter().find_map(|r| r.error_code),
            })
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                tracing::debug!(endpoint = %self.endpoint, "kinesis transport closed");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: Some("token".into()),
        }
    }

    #[test]
    fn test_default_endpoint_follows_region() {
        let config = KinesisConfig::new("us-east-2");
        assert_eq!(config.endpoint_url(), "https://kinesis.us-east-2.amazonaws.com");
        assert_eq!(extract_host(&config.endpoint_url()).unwrap(), "kinesis.us-east-2.amazonaws.com");
    }

    #[test]
    fn test_custom_endpoint_keeps_port() {
        let config = KinesisConfig {
            endpoint: Some("http://localhost:4566/".into()),
            ..KinesisConfig::new("us-east-1")
        };
        assert_eq!(config.endpoint_url(), "http://localhost:4566");
        assert_eq!(extract_host(&config.endpoint_url()).unwrap(), "localhost:4566");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let creds = Credentials { secret_access_key: String::new(), ..credentials() };
        let err = KinesisTransport::new(KinesisConfig::new("us-east-1"), creds).err().unwrap();
        assert_eq!(err.kind(), stream_api::ErrorKind::Config);
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let shown = format!("{:?}", credentials());
        assert!(shown.contains("AKIDEXAMPLE"));
        assert!(!shown.contains("secret\""));
        assert!(!shown.contains("\"token\""));
    }

    #[test]
    fn test_config_from_toml() {
        let config: KinesisConfig = toml::from_str("region = \"us-east-2\"\nendpoint = \"http://localhost:4566\"").unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.timeout_ms, 10_000);
    }
}
