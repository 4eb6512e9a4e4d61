//! Circuit breaker for outbound calls to a dependency that may be down.
//!
//! # States
//!
//! - **Closed**: calls pass through. Each failure increments the failure
//!   count and a success resets it. Reaching the threshold opens the circuit.
//! - **Open**: calls fail immediately with [`CircuitBreakerError::Open`]
//!   without invoking the operation. Once more than `recovery_timeout` has
//!   passed since the last failure, the next call moves the circuit to
//!   half-open and runs as the trial.
//! - **HalfOpen**: exactly one trial call is in flight. Success closes the
//!   circuit, failure reopens it. Other calls are rejected meanwhile.
//!
//! Only the trial resolves the half-open state. A call admitted while the
//! circuit was closed that finishes after it opened only updates the
//! failure count.
//!
//! The only transitions are Closed → Open, Open → HalfOpen and
//! HalfOpen → {Closed, Open}. Each one is logged and counted in
//! `circuit_breaker_transitions_total`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Threshold of 0 is treated as 1.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold.max(1);
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit rejected the call without invoking the operation.
    #[error("Circuit breaker is open")]
    Open,

    /// The operation ran and failed.
    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// A named circuit breaker. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the trial future is dropped before
/// it reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
            tracing::debug!(breaker = %self.breaker.name, "trial call abandoned");
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::gauge!("circuit_breaker_state", "breaker" => name.to_string())
            .set(CircuitState::Closed.gauge_value());

        Self {
            name,
            config,
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose recovery timeout has elapsed
    /// still reports `Open` until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Runs `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// [`CircuitBreakerError::Open`] if the call was rejected, or
    /// [`CircuitBreakerError::Inner`] with the operation's own error.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = match self.admit() {
            Some(admission) => admission,
            None => {
                metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name.to_string())
                    .increment(1);
                tracing::warn!(breaker = %self.name, "circuit open, call rejected");
                return Err(CircuitBreakerError::Open);
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success(admission);
                Ok(value)
            }
            Err(err) => {
                self.on_failure(admission);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::HalfOpen if inner.trial_in_flight => None,
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Some(Admission::Trial)
            }
            CircuitState::Open => {
                let recovered = inner
                    .last_failure_time
                    .is_none_or(|at| at.elapsed() > self.config.recovery_timeout);
                if !recovered {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                Some(Admission::Trial)
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();

        match (admission, inner.state) {
            (Admission::Trial, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            (Admission::Normal, CircuitState::Closed) => inner.failure_count = 0,
            // Admitted before the circuit opened; the trial decides.
            (Admission::Normal, _) => {
                tracing::debug!(breaker = %self.name, state = %inner.state, "late success ignored");
            }
            (Admission::Trial, _) => inner.trial_in_flight = false,
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        match (admission, inner.state) {
            (Admission::Trial, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                inner.last_failure_time = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            (Admission::Normal, CircuitState::Closed) => {
                inner.last_failure_time = Some(Instant::now());
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (Admission::Normal, _) => {
                tracing::debug!(breaker = %self.name, state = %inner.state, "late failure counted");
            }
            (Admission::Trial, _) => inner.trial_in_flight = false,
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        metrics::counter!(
            "circuit_breaker_transitions_total",
            "breaker" => self.name.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        metrics::gauge!("circuit_breaker_state", "breaker" => self.name.to_string())
            .set(to.gauge_value());

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                %from,
                failure_count = inner.failure_count,
                threshold = self.config.failure_threshold,
                "circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, %from, "circuit half-open, allowing trial call")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, %from, "circuit closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::builder()
                .failure_threshold(threshold)
                .recovery_timeout(Duration::from_secs(timeout_secs))
                .build(),
        )
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
    }

    #[tokio::test]
    async fn test_success_keeps_circuit_closed() {
        let breaker = breaker(3, 60);
        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, 60);
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.snapshot().failure_count, 2);

        breaker.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(breaker.snapshot().failure_count, 0);

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = breaker(3, 60);
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 3);
        assert!(snapshot.last_failure_time.is_some());
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let breaker = breaker(2, 60);
        fail(&breaker).await;
        fail(&breaker).await;

        let calls = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_timeout_strictly_elapses() {
        let breaker = breaker(1, 30);
        fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let result = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert!(result.unwrap_err().is_open());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_trial_closes_circuit() {
        let breaker = breaker(1, 30);
        fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.call(|| async { Ok::<_, String>(()) }).await.unwrap();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_and_restarts_timeout() {
        let breaker = breaker(1, 30);
        fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The timeout counts from the failed trial.
        tokio::time::advance(Duration::from_secs(10)).await;
        let result = breaker.call(|| async { Ok::<_, String>(()) }).await;
        assert!(result.unwrap_err().is_open());

        tokio::time::advance(Duration::from_secs(21)).await;
        breaker.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_trial_call() {
        let breaker = breaker(1, 30);
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, String>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let calls = AtomicU32::new(0);
        let concurrent = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert!(concurrent.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_the_slot() {
        let breaker = breaker(1, 30);
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let trial = breaker.call(|| std::future::pending::<Result<(), String>>());
        let timed_out = tokio::time::timeout(Duration::from_secs(1), trial).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcome_does_not_resolve_trial() {
        let breaker = breaker(2, 30);

        // Admitted while closed, finishes after the circuit has moved on.
        let (late_tx, late_rx) = tokio::sync::oneshot::channel::<()>();
        let late_breaker = breaker.clone();
        let late = tokio::spawn(async move {
            late_breaker
                .call(|| async move {
                    let _ = late_rx.await;
                    Ok::<_, String>(())
                })
                .await
        });
        tokio::task::yield_now().await;

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let (trial_tx, trial_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    let _ = trial_rx.await;
                    Err::<(), _>("still down".to_string())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        late_tx.send(()).unwrap();
        late.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let calls = AtomicU32::new(0);
        let concurrent = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert!(concurrent.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        trial_tx.send(()).unwrap();
        assert!(!trial.await.unwrap().unwrap_err().is_open());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_while_open_keeps_recovery_window() {
        let breaker = breaker(1, 30);

        let (late_tx, late_rx) = tokio::sync::oneshot::channel::<()>();
        let late_breaker = breaker.clone();
        let late = tokio::spawn(async move {
            late_breaker
                .call(|| async move {
                    let _ = late_rx.await;
                    Err::<(), _>("slow failure".to_string())
                })
                .await
        });
        tokio::task::yield_now().await;

        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(20)).await;
        late_tx.send(()).unwrap();
        let _ = late.await.unwrap();
        assert_eq!(breaker.snapshot().failure_count, 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        breaker.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let config = CircuitBreakerConfig::builder().failure_threshold(0).build();
        assert_eq!(config.failure_threshold, 1);
    }
}
