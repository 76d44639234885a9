//! Bounded retry for backend failures
//!
//! A request whose backend connection fails mid-flight is re-sent on a fresh
//! connection, at most `retries` more times. A short jittered pause between
//! attempts (10–59ms) spreads out retries when many pooled connections die
//! at once, e.g. on a backend restart.
//!
//! A macro rather than a generic async function: callsites hold `&mut`
//! borrows across the `.await` that an `FnMut` closure could not return.

use std::time::Duration;

use crate::constants::retry::{JITTER_BASE_MS, JITTER_SPREAD_MS};

/// Pause before the next attempt
pub(crate) fn retry_jitter() -> Duration {
    Duration::from_millis(JITTER_BASE_MS + rand::random::<u64>() % JITTER_SPREAD_MS)
}

/// Evaluate `$expr`, re-evaluating it while it fails with an error accepted
/// by `$retryable`, at most `$retries` extra times.
///
/// Yields the first `Ok`, or the error of the last attempt.
///
/// ```ignore
/// let reply = retry_backend!(settings.backend_retries, &target, ProxyError::is_backend_failure, {
///     forward_once(&exchange, &payload, request_id, expects_reply, &mut shutdown).await
/// });
/// ```
macro_rules! retry_backend {
    ($retries:expr, $label:expr, $retryable:expr, $expr:expr) => {{
        let retries: u32 = $retries;
        let mut attempt: u32 = 0;
        loop {
            match $expr {
                Ok(val) => break Ok(val),
                Err(err) if attempt < retries && ($retryable)(&err) => {
                    attempt += 1;
                    tracing::debug!(
                        backend = %$label,
                        attempt,
                        error = %err,
                        "Backend failure, retrying with a fresh connection"
                    );
                    tokio::time::sleep($crate::session::retry::retry_jitter()).await;
                }
                Err(err) => break Err(err),
            }
        }
    }};
}

pub(crate) use retry_backend;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn fallible_op(counter: &AtomicU32, fail_first_n: u32) -> Result<u32, String> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < fail_first_n {
            Err(format!("error {n}"))
        } else {
            Ok(n)
        }
    }

    fn always(_: &String) -> bool {
        true
    }

    #[tokio::test]
    async fn test_succeeds_on_first_try() {
        let counter = AtomicU32::new(0);
        let result = retry_backend!(1, "test", always, fallible_op(&counter, 0).await);
        assert_eq!(result, Ok(0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_retry() {
        let counter = AtomicU32::new(0);
        let result = retry_backend!(1, "test", always, fallible_op(&counter, 1).await);
        assert_eq!(result, Ok(1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_retry_returns_last_error() {
        let counter = AtomicU32::new(0);
        let result = retry_backend!(1, "test", always, fallible_op(&counter, 10).await);
        assert_eq!(result, Err("error 1".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_tries_once() {
        let counter = AtomicU32::new(0);
        let result = retry_backend!(0, "test", always, fallible_op(&counter, 10).await);
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let result = retry_backend!(
            3,
            "test",
            |e: &String| e != "error 0",
            fallible_op(&counter, 10).await
        );
        assert_eq!(result, Err("error 0".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let pause = super::retry_jitter().as_millis();
            assert!((10..60).contains(&pause));
        }
    }
}
