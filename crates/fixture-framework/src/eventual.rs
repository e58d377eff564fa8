//! Bounded retry helpers for readiness waits.
//!
//! Every blocking wait in the framework (server startup, pod readiness,
//! snapshot appearance) retries an attempt with exponential backoff until it
//! succeeds or the deadline passes. Exceeding the deadline is an error, never
//! a silent continue.

use crate::errors::FixtureError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Initial delay between attempts.
pub const INITIAL_DELAY: Duration = Duration::from_millis(50);

/// Maximum delay between attempts.
pub const MAX_DELAY: Duration = Duration::from_secs(1);

/// Retry `attempt` until it returns `Ok` or `timeout` elapses.
///
/// Uses exponential backoff with the following strategy:
/// - Initial delay: 50ms
/// - Exponential multiplier: 2x
/// - Delay capped at 1s and at the remaining time
///
/// An attempt still running when the deadline passes is dropped. The
/// last attempt's error message is carried in the timeout error.
///
/// # Example
///
/// ```no_run
/// use fixture_framework::eventual::wait_until;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), fixture_framework::FixtureError> {
/// wait_until("port 8080 open", Duration::from_secs(5), || async {
///     tokio::net::TcpStream::connect("127.0.0.1:8080")
///         .await
///         .map(|_| ())
///         .map_err(|e| e.to_string())
/// })
/// .await
/// # }
/// ```
///
/// # Errors
///
/// Returns [`FixtureError::ReadinessTimeout`] when the deadline passes.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    mut attempt: F,
) -> Result<T, FixtureError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;

    loop {
        // A hung attempt is cut off at the deadline too.
        let remaining = timeout.saturating_sub(start.elapsed());
        let last_error = match tokio::time::timeout(remaining, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => format!("attempt did not complete within {:?}", timeout),
        };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(FixtureError::ReadinessTimeout {
                what: what.to_string(),
                timeout,
                last_error,
            });
        }

        let remaining = timeout.saturating_sub(elapsed);
        sleep(delay.min(remaining)).await;

        delay = (delay * 2).min(MAX_DELAY);
    }
}
