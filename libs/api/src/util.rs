/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Partition key, производный от времени: Unix ms в десятичной записи.
///
/// Используется для записей без ключа: распределяет их по shard'ам,
/// но не даёт никаких гарантий порядка между ними.
pub fn time_partition_key() -> String {
    now_ms().to_string()
}
