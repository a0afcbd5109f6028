//! Exponential backoff around transaction submission.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::Connection;

use super::RelayError;

/// First wait after a failed attempt.
const INITIAL_DELAY_MS: u64 = 500;

/// Largest wait. A failure whose next wait would exceed this is final, so
/// the waits are 500, 1000, 2000, 4000 ms and there are at most five attempts.
const MAX_DELAY_MS: u64 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Waits between attempts, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay), |d| Some(*d * 2))
            .take_while(|d| *d <= self.max_delay)
    }
}

/// Sends a serialized transaction and waits until it is confirmed.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Returns the transaction signature.
    async fn submit(&self, transaction: &[u8]) -> anyhow::Result<String>;
}

#[async_trait]
impl<C: Connection> TransactionSubmitter for C {
    async fn submit(&self, transaction: &[u8]) -> anyhow::Result<String> {
        self.send_and_confirm_raw_transaction(transaction).await
    }
}

/// Submit `transaction`, retrying failures according to `policy`.
///
/// Returns `RelayError::Exhausted` with the last failure message once the
/// waits run out.
pub async fn submit_with_backoff(
    submitter: &dyn TransactionSubmitter,
    transaction: &[u8],
    policy: &RetryPolicy,
) -> Result<String, RelayError> {
    let mut delays = policy.delays();
    let mut attempt = 1u32;
    loop {
        match submitter.submit(transaction).await {
            Ok(signature) => {
                debug!(attempt, signature = %signature, "Transaction confirmed");
                return Ok(signature);
            }
            Err(e) => {
                let message = format!("{:#}", e);
                let Some(delay) = delays.next() else {
                    warn!(attempt, error = %message, "Giving up on transaction");
                    return Err(RelayError::Exhausted(message));
                };
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Transaction attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    /// Fails the first `failures` attempts, recording when each one ran.
    struct FlakySubmitter {
        failures: usize,
        attempts: Mutex<Vec<Instant>>,
    }

    impl FlakySubmitter {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn gaps_ms(&self) -> Vec<u128> {
            let attempts = self.attempts.lock().unwrap();
            attempts.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect()
        }
    }

    #[async_trait]
    impl TransactionSubmitter for FlakySubmitter {
        async fn submit(&self, _transaction: &[u8]) -> anyhow::Result<String> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len()
            };
            if attempt <= self.failures {
                anyhow::bail!("node unavailable (attempt {})", attempt)
            }
            Ok("SIG".to_string())
        }
    }

    #[test]
    fn test_default_delays() {
        let delays: Vec<u64> = RetryPolicy::default()
            .delays()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_succeeds_without_waiting() {
        let submitter = FlakySubmitter::new(0);
        let start = Instant::now();
        let signature = submit_with_backoff(&submitter, b"tx", &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(signature, "SIG");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_two_failures() {
        let submitter = FlakySubmitter::new(2);
        let signature = submit_with_backoff(&submitter, b"tx", &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(signature, "SIG");
        assert_eq!(submitter.gaps_ms(), vec![500, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_last_error() {
        let submitter = FlakySubmitter::new(usize::MAX);
        let err = submit_with_backoff(&submitter, b"tx", &RetryPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(submitter.gaps_ms(), vec![500, 1000, 2000, 4000]);
        match err {
            RelayError::Exhausted(message) => assert_eq!(message, "node unavailable (attempt 5)"),
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }
}
