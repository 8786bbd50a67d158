//! Retry with exponential backoff and per-service circuit breaking.
//!
//! A [`ServiceGuard`] composes the two: the breaker wraps the whole retry
//! loop, so one retried operation counts as a single success or failure.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_core::config::{BreakerConfig, RetryConfig};
use parley_core::types::ServiceKind;

use crate::error::ServiceError;

// --- Retry ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Backoff ceiling after the given zero-based failed attempt.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered backoff in `[ceiling / 2, ceiling]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.5..=1.0);
        self.ceiling(attempt).mul_f64(jitter)
    }
}

/// Invoke `op` up to `policy.max_attempts` times.
///
/// Returns the first success, or the last error unchanged.
pub async fn call_with_retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    call_with_retry_if(policy, op, |_| true).await
}

/// Like [`call_with_retry`], but gives up at once on errors `should_retry` rejects.
pub async fn call_with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }
                let delay = policy.backoff(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// --- Circuit breaker ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Returned without calling the wrapped operation while a circuit is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit open for {service} service")]
pub struct CircuitOpenError {
    pub service: ServiceKind,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: ServiceKind,
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: ServiceKind, failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            service,
            failure_threshold: failure_threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` through the breaker.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let admission = self.try_acquire()?;
        let mut trial = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = f().await;
        trial.armed = false;

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn try_acquire(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.timeout);
                if elapsed < self.timeout {
                    return Err(CircuitOpenError {
                        service: self.service,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(service = %self.service, "Circuit half-open, admitting trial call");
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(CircuitOpenError {
                        service: self.service,
                    });
                }
                inner.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(service = %self.service, "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        let reopen = inner.state == CircuitState::HalfOpen;
        inner.trial_in_flight = false;
        if reopen || inner.failure_count >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    service = %self.service,
                    failures = inner.failure_count,
                    "Circuit opened"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            service: self.service,
            state: inner.state,
            failure_count: inner.failure_count,
        }
    }
}

/// Reopens the circuit if a trial call is dropped before it finishes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.on_failure();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: ServiceKind,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// One breaker per external service kind.
#[derive(Debug)]
pub struct BreakerRegistry {
    stt: Arc<CircuitBreaker>,
    translation: Arc<CircuitBreaker>,
    tts: Arc<CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        let make = |kind| Arc::new(CircuitBreaker::new(kind, failure_threshold, timeout));
        Self {
            stt: make(ServiceKind::Stt),
            translation: make(ServiceKind::Translation),
            tts: make(ServiceKind::Tts),
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn get(&self, kind: ServiceKind) -> &Arc<CircuitBreaker> {
        match kind {
            ServiceKind::Stt => &self.stt,
            ServiceKind::Translation => &self.translation,
            ServiceKind::Tts => &self.tts,
        }
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        ServiceKind::ALL
            .iter()
            .map(|kind| self.get(*kind).snapshot())
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}

/// Breaker around a retry loop for one service.
#[derive(Debug, Clone)]
pub struct ServiceGuard {
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl ServiceGuard {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self { breaker, policy }
    }

    pub fn for_service(registry: &BreakerRegistry, kind: ServiceKind, policy: RetryPolicy) -> Self {
        Self::new(registry.get(kind).clone(), policy)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let policy = &self.policy;
        self.breaker
            .call(move || call_with_retry_if(policy, op, ServiceError::is_retryable))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let p = policy(5);
        assert_eq!(p.ceiling(0), Duration::from_millis(100));
        assert_eq!(p.ceiling(2), Duration::from_millis(400));
        assert_eq!(p.ceiling(10), Duration::from_millis(1_000));
        assert_eq!(p.ceiling(64), Duration::from_millis(1_000));
        for attempt in 0..6 {
            let d = p.backoff(attempt);
            assert!(d >= p.ceiling(attempt) / 2, "{d:?} below half ceiling");
            assert!(d <= p.ceiling(attempt), "{d:?} above ceiling");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = call_with_retry(&policy(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 2 { Err(format!("fail {n}")) } else { Ok("ok") }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = call_with_retry(&policy(4), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("fail {n}"))
        })
        .await;
        assert_eq!(result.unwrap_err(), "fail 4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_no_sleep_after_last_attempt() {
        let start = Instant::now();
        let _: Result<(), &str> = call_with_retry(&policy(1), || async { Err("nope") }).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_if_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ServiceError> = call_with_retry_if(
            &policy(5),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::not_configured("tts", "no key"))
            },
            ServiceError::is_retryable,
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotConfigured { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn failing() -> impl Future<Output = Result<(), ServiceError>> {
        async { Err(ServiceError::invalid_response("stt", "boom")) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(ServiceKind::Stt, 3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(breaker.call(failing).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result: Result<(), ServiceError> = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = CircuitBreaker::new(ServiceKind::Tts, 1, Duration::from_secs(10));
        let _ = breaker.call(failing).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.try_acquire(), Ok(Admission::Trial));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_err(), "concurrent caller must fail fast");

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = CircuitBreaker::new(ServiceKind::Translation, 2, Duration::from_secs(10));
        let _ = breaker.call(failing).await;
        let _ = breaker.call(failing).await;
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(breaker.call(failing).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timer restarted from the failed trial.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let breaker = CircuitBreaker::new(ServiceKind::Stt, 3, Duration::from_secs(10));
        let _ = breaker.call(failing).await;
        let _ = breaker.call(failing).await;
        assert_eq!(breaker.failure_count(), 2);
        let ok: Result<(), ServiceError> = breaker.call(|| async { Ok(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens() {
        let breaker = CircuitBreaker::new(ServiceKind::Stt, 1, Duration::from_secs(1));
        let _ = breaker.call(failing).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let pending = breaker.call(|| std::future::pending::<Result<(), ServiceError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_counts_retried_call_once() {
        let registry = BreakerRegistry::new(5, Duration::from_secs(30));
        let guard = ServiceGuard::for_service(&registry, ServiceKind::Stt, policy(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), ServiceError> = guard
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::invalid_response("stt", "boom"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.get(ServiceKind::Stt).failure_count(), 1);
        assert_eq!(registry.get(ServiceKind::Tts).failure_count(), 0);
    }

    #[test]
    fn test_registry_snapshot() {
        let registry = BreakerRegistry::default();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|s| s.state == CircuitState::Closed));
        let json = serde_json::to_value(&snapshot[0]).unwrap();
        assert_eq!(json["service"], "stt");
        assert_eq!(json["state"], "closed");
    }
}
