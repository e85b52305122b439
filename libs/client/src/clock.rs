use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Источник задержек для retry и polling loop'ов.
///
/// Production использует [`TokioSleeper`]; тесты подставляют реализацию,
/// которая записывает запрошенные задержки и возвращается сразу.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
