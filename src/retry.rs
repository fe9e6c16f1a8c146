use anyhow::{Error, Result};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn new_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_jitter()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
}

pub fn new_backoff_limited() -> ExponentialBuilder {
    new_backoff().with_max_times(5)
}

pub fn notify<E: std::fmt::Debug>(action: &str) -> impl FnMut(&E, Duration) {
    move |e, d| {
        warn!("Retrying {} due to {:?} after {:?}", action, e, d);
    }
}

pub fn retryable<E>(cancel_token: CancellationToken) -> impl FnMut(&E) -> bool {
    move |_| !cancel_token.is_cancelled()
}

/// Runs `operation` until it succeeds, `backoff` gives up, or the token is
/// cancelled. The last error is returned in the latter two cases.
pub async fn retry<T, E, F, Fut>(
    operation: F,
    action: &str,
    backoff: ExponentialBuilder,
    cancel_token: CancellationToken,
) -> Result<T>
where
    E: std::fmt::Debug + Into<Error>,
    Fut: Future<Output = Result<T, E>>,
    F: FnMut() -> Fut,
{
    operation
        .retry(&backoff)
        .notify(notify(action))
        .when(retryable(cancel_token))
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use anyhow::anyhow;

    use super::*;

    fn fast_backoff() -> ExponentialBuilder {
        ExponentialBuilder::new()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_max_times(3)
    }

    #[tokio::test]
    async fn test_retry_until_success() -> Result<()> {
        let attempts = Arc::new(AtomicUsize::new(0));
        let value = retry(
            || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("not yet"))
                    } else {
                        Ok(7)
                    }
                }
            },
            "test",
            fast_backoff(),
            CancellationToken::new(),
        )
        .await?;
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<()> = retry(
            || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("down"))
                }
            },
            "test",
            fast_backoff(),
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
