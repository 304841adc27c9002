// src/core/retry.rs
use crate::config::RetryConfig;
use crate::error::{ExchangeError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Called before every retry with the 1-based attempt that just failed.
pub type RetryHook = Arc<dyn Fn(u32, &ExchangeError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayStrategy {
    Fixed(Duration),
    /// `initial + step * (attempt - 1)`
    Incremental { initial: Duration, step: Duration },
}

impl DelayStrategy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            DelayStrategy::Fixed(d) => d,
            DelayStrategy::Incremental { initial, step } => {
                initial + step * attempt.saturating_sub(1)
            }
        }
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    name: &'static str,
    is_retryable: fn(&ExchangeError) -> bool,
    max_attempts: u32,
    delay: DelayStrategy,
    on_retry: RetryHook,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(
        name: &'static str,
        is_retryable: fn(&ExchangeError) -> bool,
        max_attempts: u32,
        delay: DelayStrategy,
    ) -> Self {
        Self {
            name,
            is_retryable,
            max_attempts: max_attempts.max(1),
            delay,
            on_retry: Arc::new(move |attempt, err| {
                warn!("[{}] attempt {} failed, retrying: {}", name, attempt, err);
            }),
        }
    }

    /// Transient network errors, 5xx and rate limiting.
    pub fn http(cfg: &RetryConfig) -> Self {
        Self::new("http", ExchangeError::is_transient_http, cfg.max_attempts, delay_from(cfg))
    }

    /// Disconnects and receive timeouts; the caller re-runs the full subscribe sequence.
    pub fn websocket(cfg: &RetryConfig) -> Self {
        Self::new(
            "websocket",
            ExchangeError::is_stream_retryable,
            cfg.max_attempts,
            delay_from(cfg),
        )
    }

    pub fn with_on_retry(mut self, hook: RetryHook) -> Self {
        self.on_retry = hook;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, err: &ExchangeError) -> bool {
        (self.is_retryable)(err)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Attempts never overlap.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ExchangeError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                res = op() => res,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.is_retryable(&err) || attempt >= self.max_attempts {
                return Err(err);
            }

            (self.on_retry)(attempt, &err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                _ = tokio::time::sleep(self.delay.delay_for(attempt)) => {}
            }
            attempt += 1;
        }
    }
}

fn delay_from(cfg: &RetryConfig) -> DelayStrategy {
    if cfg.incremental {
        DelayStrategy::Incremental {
            initial: cfg.delay(),
            step: cfg.delay(),
        }
    } else {
        DelayStrategy::Fixed(cfg.delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            "test",
            ExchangeError::is_transient_http,
            max_attempts,
            DelayStrategy::Fixed(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn retryable_error_uses_every_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let res: Result<()> = fast_policy(4)
            .execute(&cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::TransientNetwork("reset".into()))
            })
            .await;

        assert!(matches!(res, Err(ExchangeError::TransientNetwork(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_runs_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let res: Result<()> = fast_policy(4)
            .execute(&cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Configuration("apiSecret".into()))
            })
            .await;

        assert!(matches!(res, Err(ExchangeError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let hook_calls = Arc::new(AtomicU32::new(0));
        let hook_counter = hook_calls.clone();
        let cancel = CancellationToken::new();

        let policy = fast_policy(5).with_on_retry(Arc::new(move |_, _| {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        }));

        let res = policy
            .execute(&cancel, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ExchangeError::HttpStatus {
                        status: 502,
                        body: "bad gateway".into(),
                    })
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(res.unwrap(), 3);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hook_receives_attempt_numbers() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cancel = CancellationToken::new();

        let policy = fast_policy(3).with_on_retry(Arc::new(move |attempt, _| {
            sink.lock().unwrap().push(attempt);
        }));
        let _: Result<()> = policy
            .execute(&cancel, || async {
                Err(ExchangeError::TransientNetwork("timeout".into()))
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_delay() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(
            "slow",
            ExchangeError::is_transient_http,
            3,
            DelayStrategy::Fixed(Duration::from_secs(30)),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let res: Result<()> = policy
            .execute(&cancel, || async {
                Err(ExchangeError::TransientNetwork("reset".into()))
            })
            .await;

        assert!(matches!(res, Err(ExchangeError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn incremental_delay_grows() {
        let d = DelayStrategy::Incremental {
            initial: Duration::from_millis(100),
            step: Duration::from_millis(50),
        };
        assert_eq!(d.delay_for(1), Duration::from_millis(100));
        assert_eq!(d.delay_for(3), Duration::from_millis(200));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(fast_policy(0).max_attempts(), 1);
    }
}
