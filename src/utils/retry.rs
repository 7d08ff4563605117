//! Retry utilities: backoff builders for publishing and consumer reconnects.
//!
//! Uses `backon` builders so the retry loops stay plain iterator loops.

use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder};

use crate::config::PublishRetryConfig;

/// Fixed backoff between publish attempts.
///
/// Yields `max_attempts - 1` delays: the first attempt is not delayed.
/// No jitter, so attempts are spaced exactly by `backoff_ms`.
pub fn publish_backoff(config: &PublishRetryConfig) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(Duration::from_millis(config.backoff_ms))
        .with_max_times(config.max_attempts.saturating_sub(1))
}

/// Backoff for consumer reconnects after a broker outage.
///
/// - Min delay: 100ms
/// - Max delay: 30s
/// - Unbounded attempts
/// - Jitter enabled
pub fn reconnect_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(usize::MAX)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_publish_backoff_is_fixed() {
        let config = PublishRetryConfig::default();
        let delays: Vec<_> = publish_backoff(&config).build().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(1)]);
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        let config = PublishRetryConfig {
            max_attempts: 1,
            backoff_ms: 1_000,
        };
        assert_eq!(publish_backoff(&config).build().count(), 0);
    }

    #[test]
    fn test_reconnect_backoff_keeps_going() {
        let mut backoff = reconnect_backoff().build();
        for _ in 0..50 {
            let delay = backoff.next().unwrap();
            assert!(delay <= Duration::from_secs(60));
        }
    }
}
