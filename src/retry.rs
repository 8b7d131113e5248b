use crate::clock::Clock;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry an async operation with a fixed backoff between attempts.
///
/// The operation receives the 1-based attempt number. No sleep follows the final attempt.
pub async fn retry_fixed<F, Fut, T, E>(
    clock: &dyn Clock,
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                debug!("Attempt {}/{} failed: {}", attempt, attempts, e);
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("Attempt {}/{} failed, giving up: {}", attempt, attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let clock = ManualClock::at_unix(0);
        let counter = AtomicU32::new(0);
        let res: Result<u32, String> = retry_fixed(clock.as_ref(), 4, Duration::from_secs(1), |_| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                if current < 2 {
                    Err("connection reset".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 2]);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let clock = ManualClock::at_unix(0);
        let res: Result<(), u32> =
            retry_fixed(clock.as_ref(), 3, Duration::from_millis(5), |attempt| async move {
                Err(attempt)
            })
            .await;

        assert_eq!(res, Err(3));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let clock = ManualClock::at_unix(0);
        let res: Result<(), String> = retry_fixed(clock.as_ref(), 2, Duration::from_secs(1), |attempt| async move {
            Err(format!("timeout #{}", attempt))
        })
        .await;
        assert!(res.is_err());

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Attempt 1/2 failed: timeout #1"));
        assert!(logs.contains("Attempt 2/2 failed, giving up: timeout #2"));
    }
}
