use std::time::Duration;

/// Requeue-or-dead-letter policy for failed deliveries.
///
/// A delivery that has been requeued `retry_count` times is requeued again
/// while `retry_count < max_retries`, becoming eligible after
/// `base_delay * 2^retry_count`. After that it is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// What to do with a delivery that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return it to the queue carrying `retry_count`, eligible after `delay`.
    Requeue { retry_count: u32, delay: Duration },
    /// Route it to the dead-letter queue.
    DeadLetter,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// `base_delay * 2^retry_count`, saturating at `Duration::MAX`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Decides the fate of a delivery that failed after `retry_count` requeues.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::Requeue {
                retry_count: retry_count + 1,
                delay: self.backoff(retry_count),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(64), Duration::MAX);
        assert_eq!(
            RetryPolicy::new(3, Duration::MAX).backoff(1),
            Duration::MAX
        );
    }

    #[test]
    fn test_default_policy_sequence() {
        let policy = RetryPolicy::default();

        let decisions: Vec<_> = (0..=3).map(|n| policy.decide(n)).collect();
        assert_eq!(
            decisions,
            vec![
                RetryDecision::Requeue {
                    retry_count: 1,
                    delay: Duration::from_secs(1)
                },
                RetryDecision::Requeue {
                    retry_count: 2,
                    delay: Duration::from_secs(2)
                },
                RetryDecision::Requeue {
                    retry_count: 3,
                    delay: Duration::from_secs(4)
                },
                RetryDecision::DeadLetter,
            ]
        );
    }

    #[test]
    fn test_retry_count_is_bounded() {
        let policy = RetryPolicy::default().with_max_retries(5);
        for n in 0..100 {
            match policy.decide(n) {
                RetryDecision::Requeue { retry_count, .. } => {
                    assert!(retry_count > n);
                    assert!(retry_count <= 5);
                }
                RetryDecision::DeadLetter => assert!(n >= 5),
            }
        }
    }

    #[test]
    fn test_zero_retries_dead_letters_immediately() {
        let policy = RetryPolicy::default().with_max_retries(0);
        assert_eq!(policy.decide(0), RetryDecision::DeadLetter);
    }
}
