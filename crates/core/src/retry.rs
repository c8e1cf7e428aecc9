use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `operation` up to `attempts` times, sleeping `backoff * attempt`
/// between failures. Returns the last error when every attempt fails.
pub async fn with_retries<T, E, F, Fut>(
    label: &str,
    attempts: usize,
    backoff: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts => {
                warn!(operation = label, attempt, error = %error, "retrying after failure");
                tokio::time::sleep(backoff * attempt as u32).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::with_retries;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<usize, String> = with_retries("test", 3, Duration::ZERO, move || async move {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < 2 {
                Err("flaky".to_string())
            } else {
                Ok(call)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), String> = with_retries("test", 2, Duration::ZERO, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
