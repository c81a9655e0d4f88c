//! Node-level retry policy: 3 attempts, exponential
//! backoff starting at 200 ms, only for transient kinds. Same shape as
//! `buildcore_remote_cache::retry` but a distinct policy (different base
//! delay, different retryability test — node retries key off `ErrorKind`,
//! not HTTP status), so it is not shared code.

use std::time::Duration;

use buildcore_types::CoreError;

pub const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 200;

/// Whether a failed attempt should be retried at all, independent of the
/// attempt count so far.
pub fn should_retry(error: &CoreError) -> bool {
    error.kind.is_retryable()
}

/// Exponential backoff with no jitter: node retries are already spread out
/// by scheduling order, unlike the remote-cache tier's thundering-herd risk.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcore_types::ErrorKind;

    #[test]
    fn handler_and_network_errors_are_retryable() {
        assert!(should_retry(&CoreError::handler("linker lock")));
        assert!(should_retry(&CoreError::network("timeout")));
        assert!(!should_retry(&CoreError::input("bad config")));
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_delay(1), Duration::from_millis(200));
        assert_eq!(backoff_delay(2), Duration::from_millis(400));
        assert_eq!(backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn cancelled_is_never_retried() {
        assert!(!should_retry(&CoreError::new(ErrorKind::Cancelled, "cancelled")));
    }
}
