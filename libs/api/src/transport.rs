use std::future::Future;
use std::pin::Pin;

use crate::{
    BatchAck, FetchedBatch, ShardCursor, ShardId, StreamDestination, StreamError,
    WireRecord, WriteAck,
};

// ════════════════════════════════════════════════════════════════
//  Stream transport boundary
// ════════════════════════════════════════════════════════════════

/// Граница с stream-сервисом провайдера.
///
/// Wire-протокол определяет реализация (memory, kinesis, ...).
/// Реализация обязана быть безопасной для конкурентных независимых
/// вызовов: все shard loop'ы подписчика делят один экземпляр.
///
/// API crate определяет только трейт, без зависимости от tokio.
pub trait StreamTransport: Send + Sync {
    /// Перечислить текущие shard'ы stream'а.
    fn discover_shards(
        &self,
        destination: &StreamDestination,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ShardId>, StreamError>> + Send + '_>>;

    /// Cursor в позиции LATEST: видны только записи, появившиеся после
    /// вызова. `None`: провайдер не выдал cursor (shard уже исчерпан).
    fn latest_cursor(
        &self,
        destination: &StreamDestination,
        shard: &ShardId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ShardCursor>, StreamError>> + Send + '_>>;

    /// Прочитать до `max_records` записей начиная с `cursor`.
    fn fetch(
        &self,
        cursor: &ShardCursor,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedBatch, StreamError>> + Send + '_>>;

    /// Одиночная запись.
    fn write_one(
        &self,
        destination: &StreamDestination,
        record: WireRecord,
    ) -> Pin<Box<dyn Future<Output = Result<WriteAck, StreamError>> + Send + '_>>;

    /// Batch запись одним запросом (в пределах лимитов провайдера).
    fn write_batch(
        &self,
        destination: &StreamDestination,
        records: Vec<WireRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchAck, StreamError>> + Send + '_>>;

    /// Освободить соединения. Повторный вызов: no-op.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}
