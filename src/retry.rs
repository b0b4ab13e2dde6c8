use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// 재시도 여부를 판단하는 함수 타입이다.
pub type ShouldRetry = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// 재시도가 끝내 실패한 사유이다.
#[derive(Debug, Error)]
pub enum RetryError {
    /// 허용된 시도 횟수를 모두 소진했다.
    #[error("{tries}회 시도 후에도 실패했습니다: {last:#}")]
    Exhausted { tries: usize, last: anyhow::Error },
    /// `should_retry`가 재시도하지 않기로 판단했다.
    #[error("{0:#}")]
    Aborted(anyhow::Error),
    /// 대기 중 취소되었다.
    #[error("취소되어 재시도를 멈췄습니다: {0:#}")]
    Cancelled(anyhow::Error),
    /// 시작 제한 시간이 지났다.
    #[error("제한 시간이 지나 재시도를 멈췄습니다: {0:#}")]
    TimedOut(anyhow::Error),
}

impl RetryError {
    /// 마지막으로 발생한 작업 오류를 꺼낸다.
    pub fn into_last_error(self) -> anyhow::Error {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(err) | RetryError::Cancelled(err) | RetryError::TimedOut(err) => {
                err
            }
        }
    }
}

/// 시도마다 대기 시간을 곱해 늘리는 선형 백오프이다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// 다음 대기 시간.
    pub initial: Duration,
    /// 대기 시간 상한. 0이면 제한이 없다.
    pub max: Duration,
    /// 매 시도 후 대기 시간에 곱할 배수.
    pub multiplier: f64,
}

impl Backoff {
    /// 현재 대기 시간을 반환하고 다음 값을 계산해 둔다.
    ///
    /// # 반환값
    /// 이번에 대기할 시간. 다음 값이 표현 범위를 넘으면 상한(상한이 없으면
    /// `Duration::MAX`)에 고정되고, 배수가 음수나 NaN이면 0이 된다.
    pub fn linear(&mut self) -> Duration {
        let wait = self.initial;
        let ceiling = if self.max.is_zero() {
            Duration::MAX
        } else {
            self.max
        };
        let next = self.initial.as_secs_f64() * self.multiplier;
        self.initial = if next.is_nan() || next <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(next)
                .unwrap_or(ceiling)
                .min(ceiling)
        };
        wait
    }
}

/// 시도 사이의 대기 방식이다.
///
/// 기본값은 2초 고정 대기이다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDelay {
    Fixed(Duration),
    Backoff(Backoff),
}

impl RetryDelay {
    fn next(&mut self) -> Duration {
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Backoff(backoff) => backoff.linear(),
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Fixed(Duration::from_secs(2))
    }
}

/// 실패한 작업을 조건에 따라 다시 시도하는 설정이다.
#[derive(Clone, Default)]
pub struct Config {
    /// 최대 시도 횟수. 0이면 무제한이다.
    pub tries: usize,
    /// 첫 시도부터 이 시간이 지나면 더 이상 재시도하지 않는다.
    pub start_timeout: Option<Duration>,
    pub retry_delay: RetryDelay,
    /// `false`를 반환한 오류는 즉시 돌려준다. 없으면 항상 재시도한다.
    pub should_retry: Option<ShouldRetry>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("tries", &self.tries)
            .field("start_timeout", &self.start_timeout)
            .field("retry_delay", &self.retry_delay)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl Config {
    pub fn with_tries(mut self, tries: usize) -> Self {
        self.tries = tries;
        self
    }

    pub fn with_delay(mut self, delay: RetryDelay) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// 작업이 성공하거나 재시도 조건이 끝날 때까지 반복 실행한다.
    ///
    /// # 매개변수
    /// - `cancel`: 발동하면 대기를 멈추고 마지막 오류를 돌려준다
    /// - `operation`: 매 시도마다 새 future를 만드는 클로저
    ///
    /// # 반환값
    /// 첫 성공 값, 또는 재시도를 멈춘 사유와 마지막 오류를 담은 [`RetryError`].
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let deadline = self.start_timeout.map(|timeout| Instant::now() + timeout);
        let mut delay = self.retry_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if let Some(should_retry) = &self.should_retry {
                if !should_retry(&err) {
                    return Err(RetryError::Aborted(err));
                }
            }
            if self.tries != 0 && attempt >= self.tries {
                return Err(RetryError::Exhausted {
                    tries: attempt,
                    last: err,
                });
            }
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled(err));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(RetryError::TimedOut(err));
            }
            let wait = delay.next();
            tracing::warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                "재시도 가능한 오류: {err:#}"
            );
            let timeout_at = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled(err)),
                _ = sleep_until(timeout_at), if deadline.is_some() => {
                    return Err(RetryError::TimedOut(err));
                }
                _ = sleep(wait) => {}
            }
        }
    }
}
