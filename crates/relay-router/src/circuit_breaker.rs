//! Per-provider circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ─────────────────────────▶ OPEN
//!     ▲                                │  recovery timeout elapsed
//!     │ successes >= half_open_max     ▼  (next call is the trial)
//!     └──────────────────────────── HALF_OPEN
//!                                      │  any failure
//!                                      └──────────▶ OPEN
//! ```
//!
//! Bookkeeping happens under one mutex per breaker; the guarded operation
//! runs outside it. A rejection by the breaker itself is never counted as a
//! provider failure. State changes are logged and, when an observer is
//! attached, reported to it after the lock is released.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use relay_config::{BreakerSettings, HalfOpenAdmission};
use relay_core::{RelayError, Result, log_breaker_transition};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    #[default]
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// Trial calls are admitted to test recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Health counters owned by one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ProviderHealth {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip)]
    pub last_failure_time: Option<Instant>,
}

impl ProviderHealth {
    /// Time since the last recorded failure.
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.last_failure_time.map(|t| t.elapsed())
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub admission: HalfOpenAdmission,
    /// When false every call is admitted and nothing is tracked.
    pub enabled: bool,
}

impl BreakerConfig {
    pub fn from_settings(settings: &BreakerSettings, admission: HalfOpenAdmission, enabled: bool) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: settings.recovery_timeout(),
            half_open_max_calls: settings.half_open_max_calls.max(1),
            admission,
            enabled,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            admission: HalfOpenAdmission::BestEffort,
            enabled: true,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    health: ProviderHealth,
    trials_in_flight: u32,
    /// Bumped by `reset`; trial permits from an older epoch no longer hold
    /// a slot.
    epoch: u64,
}

impl BreakerInner {
    fn settle_trial(&mut self, epoch: Option<u64>) {
        if epoch == Some(self.epoch) {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        }
    }
}

type Transition = Option<(CircuitState, CircuitState)>;

/// Callback invoked with `(from, to)` on every state change.
pub type TransitionObserver = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker for one provider.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    observer: Option<TransitionObserver>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            observer: None,
        }
    }

    /// Report every state change to `observer`.
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// A breaker that admits everything.
    pub fn disabled(name: impl Into<String>) -> Self {
        Self::new(
            name,
            BreakerConfig {
                enabled: false,
                ..BreakerConfig::default()
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, without applying the recovery timeout.
    pub fn state(&self) -> CircuitState {
        self.lock().health.state
    }

    /// Copy of the health counters.
    pub fn health(&self) -> ProviderHealth {
        self.lock().health.clone()
    }

    /// Run `operation` if the breaker admits it, recording the outcome.
    ///
    /// Returns [`RelayError::CircuitOpen`] without invoking `operation` when
    /// the circuit is open. Errors that do not reflect provider health
    /// (see [`RelayError::counts_as_failure`]) are passed through unrecorded.
    pub async fn guard<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_failure() {
                    permit.failure();
                }
                Err(err)
            }
        }
    }

    /// Admission check. The returned [`Permit`] records the outcome.
    ///
    /// Dropping a permit without settling it records nothing.
    pub fn try_acquire(&self) -> Result<Permit<'_>> {
        if !self.config.enabled {
            return Ok(Permit::new(self, None));
        }

        let mut inner = self.lock();
        let (admitted, trial, transition) = match inner.health.state {
            CircuitState::Closed => (true, false, None),
            CircuitState::Open => {
                let elapsed = inner
                    .health
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    inner.health.state = CircuitState::HalfOpen;
                    inner.health.success_count = 0;
                    (true, true, Some((CircuitState::Open, CircuitState::HalfOpen)))
                } else {
                    (false, false, None)
                }
            }
            CircuitState::HalfOpen => {
                let full = self.config.admission == HalfOpenAdmission::Strict
                    && inner.trials_in_flight >= self.config.half_open_max_calls;
                (!full, true, None)
            }
        };
        let trial = (admitted && trial).then_some(inner.epoch);
        if trial.is_some() {
            inner.trials_in_flight += 1;
        }
        drop(inner);

        self.log_transition(transition);
        if admitted {
            Ok(Permit::new(self, trial))
        } else {
            debug!(provider = %self.name, "circuit open, rejecting call");
            Err(RelayError::circuit_open(&self.name))
        }
    }

    /// Record a success outside of [`guard`](Self::guard).
    pub fn record_success(&self) {
        self.on_success(None);
    }

    /// Record a failure outside of [`guard`](Self::guard).
    pub fn record_failure(&self) {
        self.on_failure(None);
    }

    /// Force the breaker back to a fresh closed state.
    ///
    /// Outstanding trial permits stop counting toward half-open admission.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.health.state;
        inner.health = ProviderHealth::default();
        inner.trials_in_flight = 0;
        inner.epoch = inner.epoch.wrapping_add(1);
        drop(inner);
        if from != CircuitState::Closed {
            self.log_transition(Some((from, CircuitState::Closed)));
        }
    }

    fn on_success(&self, trial: Option<u64>) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();
        inner.settle_trial(trial);
        let health = &mut inner.health;
        let transition = match health.state {
            CircuitState::Closed => {
                health.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                health.success_count += 1;
                if health.success_count >= self.config.half_open_max_calls {
                    health.state = CircuitState::Closed;
                    health.failure_count = 0;
                    health.success_count = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            // Late success from a call admitted before the circuit opened
            CircuitState::Open => None,
        };
        drop(inner);
        self.log_transition(transition);
    }

    fn on_failure(&self, trial: Option<u64>) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();
        inner.settle_trial(trial);
        let health = &mut inner.health;
        health.failure_count = health.failure_count.saturating_add(1);
        health.last_failure_time = Some(Instant::now());
        let transition = match health.state {
            CircuitState::Closed if health.failure_count >= self.config.failure_threshold => {
                health.state = CircuitState::Open;
                Some((CircuitState::Closed, CircuitState::Open))
            }
            CircuitState::HalfOpen => {
                health.state = CircuitState::Open;
                health.success_count = 0;
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            _ => None,
        };
        let failures = health.failure_count;
        drop(inner);
        if transition.is_none() {
            debug!(provider = %self.name, failures, "failure recorded");
        }
        self.log_transition(transition);
    }

    fn release_trial(&self, epoch: u64) {
        self.lock().settle_trial(Some(epoch));
    }

    fn log_transition(&self, transition: Transition) {
        if let Some((from, to)) = transition {
            let failures = self.lock().health.failure_count;
            log_breaker_transition!(self.name.as_str(), from, to, failures);
            if let Some(observer) = &self.observer {
                observer(from, to);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    /// Breaker epoch when admitted as a half-open trial
    trial: Option<u64>,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: Option<u64>) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let (false, Some(epoch)) = (self.settled, self.trial) {
            self.breaker.release_trial(epoch);
        }
    }
}
