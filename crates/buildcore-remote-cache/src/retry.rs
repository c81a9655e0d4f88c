//! Retry policy for remote cache requests: exponential backoff,
//! base 100 ms, jitter ≤ 25%, capped at 3 attempts, only for network errors
//! and timeouts. Adapted from `turborepo-api-client::retry`'s shape, but
//! blocking (std::thread::sleep) rather than tokio, matching //! "OS threads, not cooperative tasks".

use std::time::Duration;

use rand::Rng;

const BASE_DELAY_MS: u64 = 100;
const MAX_ATTEMPTS: u32 = 3;

pub fn should_retry(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    match err.status() {
        Some(status) => status.is_server_error(),
        None => false,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY_MS * 2u64.pow(attempt);
    let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..0.25);
    let jittered = base as f64 * (1.0 + jitter_fraction);
    Duration::from_millis(jittered as u64)
}

/// Runs `attempt` up to `MAX_ATTEMPTS` times, sleeping with jittered
/// exponential backoff between tries. Stops retrying as soon as
/// `should_retry` returns false for the error produced.
pub fn with_retry<T>(mut attempt: impl FnMut() -> Result<T, reqwest::Error>) -> Result<T, reqwest::Error> {
    let mut last_err = None;
    for try_count in 0..MAX_ATTEMPTS {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }
                last_err = Some(err);
                if try_count + 1 < MAX_ATTEMPTS {
                    std::thread::sleep(backoff_delay(try_count));
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_and_stays_bounded_by_jitter() {
        let d0 = backoff_delay(0);
        let d1 = backoff_delay(1);
        assert!(d0.as_millis() >= BASE_DELAY_MS as u128);
        assert!(d0.as_millis() <= (BASE_DELAY_MS as f64 * 1.25) as u128);
        assert!(d1.as_millis() >= (BASE_DELAY_MS * 2) as u128);
    }

    #[test]
    fn succeeds_without_retry_when_first_attempt_ok() {
        let mut calls = 0;
        let result: Result<i32, reqwest::Error> = with_retry(|| {
            calls += 1;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }
}
