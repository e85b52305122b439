use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};

use stream_api::{
    DEFAULT_FETCH_LIMIT, ShardCursor, ShardId, StreamDestination, StreamTransport,
};

use crate::clock::{Sleeper, TokioSleeper};
use crate::error::ClientError;

/// Пауза между успешными fetch'ами одного shard'а (rate limit провайдера).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Пауза после ошибки транспорта в shard loop'е. Повторы не ограничены:
/// loop переживает любые транзиентные сбои провайдера, пока subscriber
/// запущен. Ошибки видны только в логах и в [`ShardStats`].
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Верхняя граница записей за один fetch.
    pub max_records_per_fetch: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Если задан: handler получает только записи с точно таким ключом.
    pub partition_key_filter: Option<String>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_records_per_fetch: DEFAULT_FETCH_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            partition_key_filter: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Handler
// ═══════════════════════════════════════════════════════════════

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Десериализованная запись, доставленная handler'у.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRecord {
    pub shard_id: ShardId,
    pub partition_key: String,
    pub value: serde_json::Value,
}

/// Обработчик записей. Вызывается последовательно внутри shard'а:
/// следующая запись не доставляется, пока не завершился предыдущий вызов.
///
/// Ошибка handler'а завершает loop своего shard'а; остальные shard'ы
/// продолжают работу.
pub trait RecordHandler: Send + Sync {
    fn handle(
        &self,
        record: ReceivedRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}

impl<F, Fut, E> RecordHandler for F
where
    F: Fn(ReceivedRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError>,
{
    fn handle(
        &self,
        record: ReceivedRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let fut = (self)(record);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Report
// ═══════════════════════════════════════════════════════════════

/// Почему shard loop завершился.
#[derive(Debug)]
pub enum ShardExit {
    /// `stop()`: loop вышел на следующей проверке флага.
    Stopped,
    /// Провайдер не выдал следующий cursor: shard дочитан.
    Exhausted,
    /// Handler вернул ошибку.
    HandlerFailed(HandlerError),
    /// Задача shard'а упала (panic) или была отменена runtime'ом.
    Aborted(String),
}

impl ShardExit {
    pub fn label(&self) -> &'static str {
        match self {
            ShardExit::Stopped => "stopped",
            ShardExit::Exhausted => "exhausted",
            ShardExit::HandlerFailed(_) => "handler_failed",
            ShardExit::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub fetches: u64,
    pub delivered: u64,
    /// Отброшены фильтром по partition key.
    pub filtered: u64,
    /// Не удалось десериализовать payload.
    pub skipped: u64,
    pub transport_errors: u64,
}

#[derive(Debug)]
pub struct ShardOutcome {
    pub shard_id: ShardId,
    pub exit: ShardExit,
    pub stats: ShardStats,
}

#[derive(Debug, Default)]
pub struct SubscriptionReport {
    pub shards: Vec<ShardOutcome>,
}

impl SubscriptionReport {
    pub fn outcome(&self, shard_id: &str) -> Option<&ShardOutcome> {
        self.shards.iter().find(|o| o.shard_id.as_str() == shard_id)
    }

    pub fn delivered(&self) -> u64 {
        self.shards.iter().map(|o| o.stats.delivered).sum()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

/// Cloneable handle that stops a running subscriber from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Читает все shard'ы stream'а: по одной независимой polling-задаче на shard,
/// каждая со своим cursor'ом, начиная с LATEST.
///
/// Внутри shard'а записи доставляются в порядке провайдера, строго
/// последовательно. Между shard'ами порядок не гарантируется.
pub struct Subscriber {
    destination: StreamDestination,
    transport: Arc<dyn StreamTransport>,
    config: SubscriberConfig,
    sleeper: Arc<dyn Sleeper>,
    running: Arc<AtomicBool>,
    /// `start` в процессе: loop'ы ещё не завершились.
    active: AtomicBool,
    closed: AtomicBool,
}

impl Subscriber {
    pub fn new(destination: StreamDestination, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            destination,
            transport,
            config: SubscriberConfig::default(),
            sleeper: Arc::new(TokioSleeper),
            running: Arc::new(AtomicBool::new(false)),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: SubscriberConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn destination(&self) -> &StreamDestination {
        &self.destination
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { running: self.running.clone() }
    }

    /// Обнаружить shard'ы (один discovery-вызов), запустить loop на каждый
    /// и дождаться завершения всех. Ошибка discovery возвращается сразу;
    /// ошибки транспорта внутри loop'ов не возвращаются.
    pub async fn start<H>(&self, handler: H) -> Result<SubscriptionReport, ClientError>
    where
        H: RecordHandler + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed("subscriber"));
        }
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyRunning);
        }
        self.running.store(true, Ordering::Release);
        let mut guard = RunGuard {
            running: &self.running,
            active: &self.active,
            tasks: Vec::new(),
        };

        let shards = match self.transport.discover_shards(&self.destination).await {
            Ok(shards) => shards,
            Err(e) => {
                tracing::error!(stream = %self.destination.name(), error = %e, "shard discovery failed");
                return Err(e.into());
            }
        };
        tracing::info!(
            stream = %self.destination.name(),
            shards = shards.len(),
            filter = ?self.config.partition_key_filter,
            "subscriber starting"
        );

        let handler: Arc<dyn RecordHandler> = Arc::new(handler);
        let mut handles: Vec<(ShardId, JoinHandle<ShardOutcome>)> = Vec::with_capacity(shards.len());
        for shard_id in shards {
            let shard_loop = ShardLoop {
                destination: self.destination.clone(),
                shard_id: shard_id.clone(),
                transport: self.transport.clone(),
                handler: handler.clone(),
                sleeper: self.sleeper.clone(),
                running: self.running.clone(),
                config: self.config.clone(),
            };
            let handle = tokio::spawn(shard_loop.run());
            guard.tasks.push(handle.abort_handle());
            handles.push((shard_id, handle));
        }

        let mut report = SubscriptionReport::default();
        for (shard_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(stream = %self.destination.name(), shard = %shard_id, error = %e, "shard task aborted");
                    ShardOutcome {
                        shard_id,
                        exit: ShardExit::Aborted(e.to_string()),
                        stats: ShardStats::default(),
                    }
                }
            };
            report.shards.push(outcome);
        }

        drop(guard);
        tracing::info!(
            stream = %self.destination.name(),
            delivered = report.delivered(),
            "subscriber finished"
        );
        Ok(report)
    }

    /// Сигнал всем loop'ам выйти на следующей проверке флага. Не ждёт.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// `stop()` + освобождение транспорта. Повторный вызов: no-op.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.stop();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.transport.close().await?;
        tracing::info!(stream = %self.destination.name(), "subscriber closed");
        Ok(())
    }
}

/// Сбрасывает флаги `start` и снимает shard-задачи, если future `start`
/// уничтожен до завершения (timeout, `select!`).
struct RunGuard<'a> {
    running: &'a AtomicBool,
    active: &'a AtomicBool,
    tasks: Vec<AbortHandle>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        for task in &self.tasks {
            task.abort();
        }
        self.active.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Shard loop: INIT → ITERATING → (ITERATING | STOPPED | EXHAUSTED)
// ═══════════════════════════════════════════════════════════════

struct ShardLoop {
    destination: StreamDestination,
    shard_id: ShardId,
    transport: Arc<dyn StreamTransport>,
    handler: Arc<dyn RecordHandler>,
    sleeper: Arc<dyn Sleeper>,
    running: Arc<AtomicBool>,
    config: SubscriberConfig,
}

impl ShardLoop {
    async fn run(self) -> ShardOutcome {
        let mut stats = ShardStats::default();
        let exit = self.poll(&mut stats).await;
        match &exit {
            ShardExit::HandlerFailed(e) => {
                tracing::error!(stream = %self.destination.name(), shard = %self.shard_id, error = %e, "handler failed, shard loop terminated");
            }
            _ => {
                tracing::info!(
                    stream = %self.destination.name(),
                    shard = %self.shard_id,
                    exit = exit.label(),
                    delivered = stats.delivered,
                    transport_errors = stats.transport_errors,
                    "shard loop finished"
                );
            }
        }
        ShardOutcome { shard_id: self.shard_id, exit, stats }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn poll(&self, stats: &mut ShardStats) -> ShardExit {
        let mut cursor = match self.initial_cursor(stats).await {
            Ok(cursor) => cursor,
            Err(exit) => return exit,
        };

        while self.is_running() {
            let batch = match self.transport.fetch(&cursor, self.config.max_records_per_fetch).await {
                Ok(batch) => batch,
                Err(e) => {
                    stats.transport_errors += 1;
                    tracing::warn!(
                        stream = %self.destination.name(),
                        shard = %self.shard_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        retry_in_ms = self.config.error_backoff.as_millis() as u64,
                        "fetch failed, retrying same cursor"
                    );
                    self.sleeper.sleep(self.config.error_backoff).await;
                    continue;
                }
            };
            stats.fetches += 1;
            tracing::debug!(
                shard = %self.shard_id,
                records = batch.records.len(),
                behind_ms = ?batch.millis_behind_latest,
                "fetched"
            );

            for wire in batch.records {
                if let Some(filter) = &self.config.partition_key_filter {
                    if wire.partition_key != *filter {
                        stats.filtered += 1;
                        continue;
                    }
                }

                let value = match serde_json::from_slice::<serde_json::Value>(&wire.data) {
                    Ok(value) => value,
                    Err(e) => {
                        stats.skipped += 1;
                        tracing::warn!(shard = %self.shard_id, key = %wire.partition_key, error = %e, "bad record, skipping");
                        continue;
                    }
                };

                let record = ReceivedRecord {
                    shard_id: self.shard_id.clone(),
                    partition_key: wire.partition_key,
                    value,
                };
                if let Err(e) = self.handler.handle(record).await {
                    return ShardExit::HandlerFailed(e);
                }
                stats.delivered += 1;
            }

            match batch.next_cursor {
                Some(next) => cursor = next,
                None => return ShardExit::Exhausted,
            }

            self.sleeper.sleep(self.config.poll_interval).await;
        }

        ShardExit::Stopped
    }

    /// INIT: cursor в позиции LATEST. Ошибки транспорта: тот же
    /// неограниченный retry, что и для fetch.
    async fn initial_cursor(&self, stats: &mut ShardStats) -> Result<ShardCursor, ShardExit> {
        while self.is_running() {
            match self.transport.latest_cursor(&self.destination, &self.shard_id).await {
                Ok(Some(cursor)) => return Ok(cursor),
                Ok(None) => return Err(ShardExit::Exhausted),
                Err(e) => {
                    stats.transport_errors += 1;
                    tracing::warn!(
                        stream = %self.destination.name(),
                        shard = %self.shard_id,
                        error = %e,
                        retry_in_ms = self.config.error_backoff.as_millis() as u64,
                        "shard iterator request failed"
                    );
                    self.sleeper.sleep(self.config.error_backoff).await;
                }
            }
        }
        Err(ShardExit::Stopped)
    }
}
