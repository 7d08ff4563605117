//! Redelivery policy for failed deliveries.
//!
//! The broker's native redelivery does not count attempts, so the count
//! travels with the message in the [`RETRY_COUNT_HEADER`] header. A failed
//! delivery is republished with the count incremented until the queue's
//! `x-max-retries` budget is spent, then rejected without requeue so the
//! broker routes it through the dead-letter exchange.

/// Message header carrying the number of redeliveries already made.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// What the broker should do with a delivery once the consumer is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed, malformed or unknown: remove from the queue.
    Ack,
    /// Handler failed: redeliver after the queue's retry delay.
    Retry { next_count: u32 },
    /// Retries exhausted or failure is permanent: route to the DLQ.
    DeadLetter,
}

/// Settlement for a delivery whose handler failed.
pub fn on_failure(retryable: bool, retry_count: u32, max_retries: u32) -> Settlement {
    if retryable && retry_count < max_retries {
        Settlement::Retry {
            next_count: retry_count + 1,
        }
    } else {
        Settlement::DeadLetter
    }
}
