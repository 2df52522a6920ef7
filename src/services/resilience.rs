//! Retries with exponential backoff and per-operation circuit breakers

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::error::{LablabError, Result};

pub const DEFAULT_BREAKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

type StateListener = Arc<dyn Fn(&str, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<SystemTime>,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    key: String,
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
    listeners: RwLock<Vec<StateListener>>,
}

impl CircuitBreaker {
    pub fn new(key: &str, failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            key: key.to_string(),
            failure_threshold: failure_threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                opened_at: None,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn last_failure(&self) -> Option<SystemTime> {
        self.inner.lock().last_failure
    }

    pub fn on_state_change(&self, listener: impl Fn(&str, CircuitState) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn record_success(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::HalfOpen => {
                    info!(key = %self.key, "Circuit breaker closing");
                    inner.failure_count = 0;
                    inner.last_failure = None;
                    inner.opened_at = None;
                    transition(&mut inner, CircuitState::Closed)
                }
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::Open => None,
            }
        };
        self.notify(changed);
    }

    pub fn record_failure(&self, error: &LablabError) {
        let changed = {
            let mut inner = self.inner.lock();
            inner.last_failure = Some(SystemTime::now());
            inner.failure_count += 1;
            warn!(
                key = %self.key,
                error = %error,
                count = inner.failure_count,
                threshold = self.failure_threshold,
                "Circuit breaker recorded failure"
            );
            let trip = match inner.state {
                CircuitState::HalfOpen => true,
                CircuitState::Closed => inner.failure_count >= self.failure_threshold,
                CircuitState::Open => false,
            };
            if trip {
                warn!(key = %self.key, "Circuit breaker opening");
                inner.opened_at = Some(Instant::now());
                transition(&mut inner, CircuitState::Open)
            } else {
                None
            }
        };
        self.notify(changed);
    }

    pub fn reset(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.last_failure = None;
            inner.opened_at = None;
            transition(&mut inner, CircuitState::Closed)
        };
        info!(key = %self.key, "Circuit breaker reset");
        self.notify(changed);
    }

    /// Closed allows; Open allows once the timeout has passed, moving to
    /// HalfOpen; HalfOpen allows the probe
    pub fn is_operation_allowed(&self) -> bool {
        let (allowed, changed) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => (true, None),
                CircuitState::Open => {
                    let expired = inner
                        .opened_at
                        .is_some_and(|at| at.elapsed() >= self.timeout);
                    if expired {
                        info!(key = %self.key, "Circuit breaker half-open");
                        (true, transition(&mut inner, CircuitState::HalfOpen))
                    } else {
                        (false, None)
                    }
                }
            }
        };
        self.notify(changed);
        allowed
    }

    fn notify(&self, changed: Option<CircuitState>) {
        if let Some(state) = changed {
            for listener in self.listeners.read().iter() {
                listener(&self.key, state);
            }
        }
    }
}

fn transition(inner: &mut BreakerInner, to: CircuitState) -> Option<CircuitState> {
    if inner.state == to {
        return None;
    }
    inner.state = to;
    Some(to)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Exponential: base, 2×base, 4×base, ... capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(20));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResilienceHealth {
    pub is_healthy: bool,
    pub total_breakers: usize,
    pub open_breakers: usize,
    pub half_open_breakers: usize,
    pub checked_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResilienceStats {
    pub active_breakers: usize,
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
}

#[derive(Default)]
pub struct ResilienceService {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    listeners: RwLock<Vec<StateListener>>,
    total_retries: AtomicU64,
    successful_retries: AtomicU64,
    failed_operations: AtomicU64,
}

impl ResilienceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every breaker state change, with the breaker's key
    pub fn on_breaker_state_change(&self, listener: impl Fn(&str, CircuitState) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn create_circuit_breaker(
        &self,
        key: &str,
        failure_threshold: u32,
        timeout: Option<Duration>,
    ) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(
            key,
            failure_threshold,
            timeout.unwrap_or(DEFAULT_BREAKER_TIMEOUT),
        ));
        let listeners = self.listeners.read().clone();
        breaker.on_state_change(move |key, state| {
            for listener in &listeners {
                listener(key, state);
            }
        });
        self.breakers.write().insert(key.to_string(), breaker.clone());
        info!(key, "Created circuit breaker");
        breaker
    }

    pub fn circuit_breaker(&self, key: &str) -> Result<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| LablabError::Plugin(format!("Circuit breaker not found: {}", key)))
    }

    pub fn remove_circuit_breaker(&self, key: &str) -> bool {
        let removed = self.breakers.write().remove(key).is_some();
        if removed {
            info!(key, "Removed circuit breaker");
        }
        removed
    }

    pub fn breaker_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.breakers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn execute_with_retry<T, F, Fut>(&self, mut operation: F, policy: Option<RetryPolicy>) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = policy.unwrap_or_default();
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if retry > 0 {
                        self.successful_retries.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(value);
                }
                Err(e) if retry < policy.max_attempts => {
                    let delay = policy.delay_for(retry);
                    retry += 1;
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(attempt = retry, delay_ms = delay.as_millis() as u64, error = %e, "Retrying operation");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.failed_operations.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    /// Retry inside the named breaker; the breaker sees one success or
    /// failure per call, not per attempt
    pub async fn execute_with_resilience<T, F, Fut>(
        &self,
        key: &str,
        operation: F,
        policy: Option<RetryPolicy>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.circuit_breaker(key)?;
        if !breaker.is_operation_allowed() {
            return Err(LablabError::CircuitOpen(key.to_string()));
        }
        match self.execute_with_retry(operation, policy).await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                breaker.record_failure(&e);
                Err(e)
            }
        }
    }

    pub fn health(&self) -> ResilienceHealth {
        let breakers = self.breakers.read();
        let open = breakers.values().filter(|b| b.state() == CircuitState::Open).count();
        let half_open = breakers
            .values()
            .filter(|b| b.state() == CircuitState::HalfOpen)
            .count();
        ResilienceHealth {
            is_healthy: open == 0,
            total_breakers: breakers.len(),
            open_breakers: open,
            half_open_breakers: half_open,
            checked_at: SystemTime::now(),
        }
    }

    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            active_breakers: self.breakers.read().len(),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
        info!("Reset all circuit breakers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_policy(retries: u32) -> Option<RetryPolicy> {
        Some(RetryPolicy {
            max_attempts: retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        })
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
        assert_eq!(policy.delay_for(60), Duration::from_secs(10));
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new("llm", 2, Duration::from_secs(30));
        let err = LablabError::Llm("timeout".into());
        breaker.record_failure(&err);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure(&err);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_operation_allowed());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("llm", 3, Duration::from_secs(30));
        breaker.record_failure(&LablabError::Llm("x".into()));
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_half_open_probe() {
        let breaker = CircuitBreaker::new("save", 1, Duration::ZERO);
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        breaker.on_state_change(move |_, state| sink.lock().push(state));

        breaker.record_failure(&LablabError::Storage("disk".into()));
        assert!(breaker.is_operation_allowed());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure(&LablabError::Storage("disk".into()));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_operation_allowed());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert_eq!(
            *changes.lock(),
            vec![
                CircuitState::Open,
                CircuitState::HalfOpen,
                CircuitState::Open,
                CircuitState::HalfOpen,
                CircuitState::Closed
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let service = ResilienceService::new();
        let calls = AtomicU32::new(0);
        let value = service
            .execute_with_retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(LablabError::Llm("flaky".into()))
                        } else {
                            Ok(n)
                        }
                    }
                },
                fast_policy(3),
            )
            .await
            .unwrap();

        assert_eq!(value, 2);
        let stats = service.stats();
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.successful_retries, 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let service = ResilienceService::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = service
            .execute_with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(LablabError::Llm("down".into())) }
                },
                fast_policy(2),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.stats().failed_operations, 1);
    }

    #[tokio::test]
    async fn test_resilience_requires_breaker_and_respects_open() {
        let service = ResilienceService::new();
        let missing: Result<()> = service
            .execute_with_resilience("nope", || async { Ok(()) }, None)
            .await;
        assert_eq!(missing.unwrap_err().to_string(), "Plugin error: Circuit breaker not found: nope");

        let opened = Arc::new(Mutex::new(Vec::new()));
        let sink = opened.clone();
        service.on_breaker_state_change(move |key, state| sink.lock().push((key.to_string(), state)));
        service.create_circuit_breaker("llm", 1, None);

        let failed: Result<()> = service
            .execute_with_resilience("llm", || async { Err(LablabError::Llm("boom".into())) }, fast_policy(0))
            .await;
        assert!(failed.is_err());

        let blocked: Result<()> = service
            .execute_with_resilience("llm", || async { Ok(()) }, None)
            .await;
        assert_eq!(blocked.unwrap_err().to_string(), "Circuit breaker is open for: llm");
        assert!(!service.health().is_healthy);
        assert_eq!(*opened.lock(), vec![("llm".to_string(), CircuitState::Open)]);

        service.reset_all();
        assert!(service.health().is_healthy);
        assert!(service.remove_circuit_breaker("llm"));
        assert!(service.breaker_keys().is_empty());
    }
}
