use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::Arc,
};

use anyhow::{Error, Result};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::CircuitOpen,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState},
};

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    failed: bool,
    slow: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: VecDeque<CallOutcome>,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_successes: u32,
}

/// Count-based sliding window breaker guarding one dependency.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
                opened_at: None,
                half_open_admitted: 0,
                half_open_successes: 0,
            }),
            service_name,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Runs `operation` if the circuit permits it, recording the outcome.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if !self.try_acquire_permission() {
            warn!(service = %self.service_name, "Circuit breaker is open, call not permitted");
            return Err(CircuitOpen {
                service: self.service_name.clone(),
            }
            .into());
        }

        let started = Instant::now();
        let result = operation().await;
        let slow = started.elapsed() >= self.config.slow_call_duration;

        match &result {
            Ok(_) => {
                debug!(service = %self.service_name, slow, "Circuit breaker call succeeded");
                self.record(CallOutcome { failed: false, slow });
            }
            Err(e) => {
                warn!(service = %self.service_name, error = %e, "Circuit breaker call failed");
                self.record(CallOutcome { failed: true, slow });
            }
        }

        result
    }

    /// Like [`CircuitBreaker::call`], but substitutes `fallback` when the call is
    /// rejected or fails. Never returns an error.
    pub async fn execute<F, Fut, T, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        FB: FnOnce(&Error) -> T,
    {
        match self.call(operation).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    service = %self.service_name,
                    reason = %e,
                    "Serving fallback value"
                );
                fallback(&e)
            }
        }
    }

    /// Forces the circuit back to CLOSED with an empty window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.window.clear();
        info!(service = %self.service_name, "Circuit breaker manually reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        let buffered = inner.window.len();
        let failed = inner.window.iter().filter(|o| o.failed).count();
        let slow = inner.window.iter().filter(|o| o.slow).count();

        CircuitBreakerSnapshot {
            name: self.service_name.clone(),
            state: inner.state,
            failure_rate: rate(failed, buffered),
            slow_call_rate: rate(slow, buffered),
            number_of_buffered_calls: buffered,
            number_of_failed_calls: failed,
            number_of_slow_calls: slow,
            number_of_successful_calls: buffered - failed,
        }
    }

    fn try_acquire_permission(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.config.permitted_calls_in_half_open_state {
                    inner.half_open_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }

        let waited_long_enough = inner
            .opened_at
            .map(|opened_at| opened_at.elapsed() >= self.config.wait_duration_in_open_state)
            .unwrap_or(true);

        if waited_long_enough {
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn record(&self, outcome: CallOutcome) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::HalfOpen => {
                if outcome.failed || outcome.slow {
                    self.transition(&mut inner, CircuitState::Open);
                    return;
                }

                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.permitted_calls_in_half_open_state {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                if inner.window.len() >= self.config.sliding_window_size {
                    inner.window.pop_front();
                }
                inner.window.push_back(outcome);

                if self.threshold_exceeded(&inner.window) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // Outcome of a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    fn threshold_exceeded(&self, window: &VecDeque<CallOutcome>) -> bool {
        let buffered = window.len();
        if buffered < self.config.minimum_number_of_calls {
            return false;
        }

        let failure_rate = rate(window.iter().filter(|o| o.failed).count(), buffered);
        let slow_call_rate = rate(window.iter().filter(|o| o.slow).count(), buffered);

        if failure_rate >= self.config.failure_rate_threshold {
            warn!(
                service = %self.service_name,
                failure_rate,
                threshold = self.config.failure_rate_threshold,
                "Failure rate threshold exceeded"
            );
            return true;
        }

        if slow_call_rate >= self.config.slow_call_rate_threshold {
            warn!(
                service = %self.service_name,
                slow_call_rate,
                threshold = self.config.slow_call_rate_threshold,
                "Slow call rate threshold exceeded"
            );
            return true;
        }

        false
    }

    fn transition(&self, inner: &mut BreakerState, next: CircuitState) {
        let previous = inner.state;
        if previous == next {
            return;
        }

        inner.state = next;
        inner.half_open_admitted = 0;
        inner.half_open_successes = 0;

        match next {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
        }

        warn!(
            service = %self.service_name,
            from = previous.as_str(),
            to = next.as_str(),
            "Circuit breaker state transition"
        );
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 * 100.0 / total as f64
}

/// Owns one breaker per dependency name. Built once in `main` and handed to the
/// clients and the health API.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone()))),
        )
    }

    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .read()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
