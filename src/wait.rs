//! Ожидание асинхронных задач платформы (обработка видео, публикация)

use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Результат одной проверки статуса задачи
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
    Failed(String),
}

/// Стратегия паузы между проверками
#[async_trait]
pub trait WaitStrategy: Send + Sync {
    fn max_attempts(&self) -> u32;

    /// Пауза после неудачной попытки `attempt` (начиная с 1)
    async fn pause(&self, attempt: u32) -> ConnectorResult<()>;
}

/// Фиксированный интервал с ограничением числа попыток и отменой
#[derive(Debug, Clone)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: u32,
    cancel: CancellationToken,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl WaitStrategy for PollPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn pause(&self, _attempt: u32) -> ConnectorResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ConnectorError::Cancelled),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }
}

/// Повторяет `check`, пока задача не завершится или не кончатся попытки
pub async fn poll_until<T, F, Fut>(
    strategy: &dyn WaitStrategy,
    job: &str,
    mut check: F,
) -> ConnectorResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ConnectorResult<PollStatus<T>>>,
{
    let max_attempts = strategy.max_attempts();

    for attempt in 1..=max_attempts {
        match check(attempt).await? {
            PollStatus::Ready(value) => {
                debug!("{} ready after {} attempt(s)", job, attempt);
                return Ok(value);
            }
            PollStatus::Failed(reason) => return Err(ConnectorError::JobFailed(reason)),
            PollStatus::Pending => {
                debug!("{} still pending (attempt {}/{})", job, attempt, max_attempts);
                if attempt < max_attempts {
                    strategy.pause(attempt).await?;
                }
            }
        }
    }

    Err(ConnectorError::PollExhausted {
        job: job.to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), max_attempts)
    }

    #[test]
    fn default_policy_matches_vendor_pacing() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval(), Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 30);
    }

    #[test]
    fn returns_once_ready() {
        let calls = AtomicU32::new(0);
        let result = tokio_test::block_on(poll_until(&fast(5), "container", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if attempt == 3 {
                    PollStatus::Ready("done")
                } else {
                    PollStatus::Pending
                })
            }
        }));

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: ConnectorResult<()> = poll_until(&fast(4), "container", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(PollStatus::Pending) }
        })
        .await;

        assert!(matches!(
            result,
            Err(ConnectorError::PollExhausted { attempts: 4, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failure_status_stops_polling() {
        let result: ConnectorResult<()> = poll_until(&fast(10), "publish", |_| async {
            Ok(PollStatus::Failed("ERROR".into()))
        })
        .await;

        assert!(matches!(result, Err(ConnectorError::JobFailed(reason)) if reason == "ERROR"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_pause() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_secs(60), 3).with_cancellation(cancel.clone());
        cancel.cancel();

        let result: ConnectorResult<()> =
            poll_until(&policy, "publish", |_| async { Ok(PollStatus::Pending) }).await;
        assert!(matches!(result, Err(ConnectorError::Cancelled)));
    }
}
