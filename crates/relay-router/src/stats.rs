//! Usage statistics.
//!
//! [`StatsCollector`] keeps every counter behind one mutex, so an event's
//! counters are updated together and [`StatsCollector::snapshot`] always
//! returns a consistent copy. The lock is never held across I/O.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use relay_core::{ComplexityLevel, ModelTier, ProviderSlot, RelayError};
use relay_providers::RateLimitUsage;
use serde::Serialize;

use crate::circuit_breaker::{CircuitState, ProviderHealth};

/// Errors kept in the rolling log.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Per-tier call counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub calls: u64,
    pub successes: u64,
}

/// Counters for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderStats {
    pub name: String,
    /// Attempts that reached the provider.
    pub calls: u64,
    pub successes: u64,
    /// Failed attempts, timeouts included.
    pub failures: u64,
    pub timeouts: u64,
    /// Attempts rejected by the circuit breaker.
    pub circuit_breaks: u64,
    /// Breaker transitions into OPEN.
    pub circuit_opens: u64,
    pub circuit_half_opens: u64,
    pub circuit_closes: u64,
    pub by_tier: BTreeMap<ModelTier, TierStats>,
    pub circuit_state: CircuitState,
    pub health: ProviderHealth,
    /// Client-side limiter usage, when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitUsage>,
}

impl ProviderStats {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Successful attempts as a percentage of all attempts.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.successes as f64 / self.calls as f64 * 100.0
        }
    }
}

/// One entry in the rolling error log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: Option<String>,
    pub kind: String,
    pub message: String,
}

impl ErrorRecord {
    fn from_error(err: &RelayError) -> Self {
        Self {
            timestamp: Utc::now(),
            provider: err.provider_name().map(str::to_string),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Immutable copy of all counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    /// Routed calls, regardless of outcome.
    pub total_calls: u64,
    /// Calls that moved on to the fallback provider.
    pub total_fallbacks: u64,
    pub complexity: BTreeMap<ComplexityLevel, u64>,
    pub primary: ProviderStats,
    pub fallback: ProviderStats,
    /// Newest last.
    pub recent_errors: Vec<ErrorRecord>,
}

impl UsageStats {
    pub fn provider(&self, slot: ProviderSlot) -> &ProviderStats {
        match slot {
            ProviderSlot::Primary => &self.primary,
            ProviderSlot::Fallback => &self.fallback,
        }
    }

    fn provider_mut(&mut self, slot: ProviderSlot) -> &mut ProviderStats {
        match slot {
            ProviderSlot::Primary => &mut self.primary,
            ProviderSlot::Fallback => &mut self.fallback,
        }
    }

    /// Complexity histogram count for `level`.
    pub fn complexity_count(&self, level: ComplexityLevel) -> u64 {
        self.complexity.get(&level).copied().unwrap_or(0)
    }

    /// Attach breaker state to a provider's counters.
    pub fn with_health(mut self, slot: ProviderSlot, health: ProviderHealth) -> Self {
        let stats = self.provider_mut(slot);
        stats.circuit_state = health.state;
        stats.health = health;
        self
    }

    /// Attach limiter usage to a provider's counters.
    pub fn with_rate_limit(mut self, slot: ProviderSlot, usage: RateLimitUsage) -> Self {
        self.provider_mut(slot).rate_limit = Some(usage);
        self
    }
}

struct StatsInner {
    usage: UsageStats,
    errors: VecDeque<ErrorRecord>,
}

/// Thread-safe usage counters.
pub struct StatsCollector {
    inner: Mutex<StatsInner>,
}

impl StatsCollector {
    pub fn new(primary_name: &str, fallback_name: &str) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                usage: UsageStats {
                    total_calls: 0,
                    total_fallbacks: 0,
                    complexity: BTreeMap::new(),
                    primary: ProviderStats::named(primary_name),
                    fallback: ProviderStats::named(fallback_name),
                    recent_errors: Vec::new(),
                },
                errors: VecDeque::with_capacity(MAX_RECENT_ERRORS),
            }),
        }
    }

    /// Record the outcome of one attempt against a provider.
    pub fn record<T>(&self, slot: ProviderSlot, tier: ModelTier, outcome: &Result<T, RelayError>) {
        let mut inner = self.lock();
        match outcome {
            Ok(_) => {
                let stats = inner.usage.provider_mut(slot);
                stats.calls += 1;
                stats.successes += 1;
                let tier_stats = stats.by_tier.entry(tier).or_default();
                tier_stats.calls += 1;
                tier_stats.successes += 1;
            }
            Err(err) if err.is_circuit_open() => {
                inner.usage.provider_mut(slot).circuit_breaks += 1;
            }
            // Aborted by the caller: nothing to say about the provider
            Err(RelayError::Cancelled { .. }) => {}
            Err(err) => {
                let stats = inner.usage.provider_mut(slot);
                stats.calls += 1;
                stats.failures += 1;
                if err.is_timeout() {
                    stats.timeouts += 1;
                }
                stats.by_tier.entry(tier).or_default().calls += 1;
                inner.push_error(ErrorRecord::from_error(err));
            }
        }
    }

    /// Count a routed call, and its complexity level when analyzed.
    pub fn record_request(&self, level: Option<ComplexityLevel>) {
        let mut inner = self.lock();
        inner.usage.total_calls += 1;
        if let Some(level) = level {
            *inner.usage.complexity.entry(level).or_insert(0) += 1;
        }
    }

    /// Count a circuit breaker state change.
    pub fn record_transition(&self, slot: ProviderSlot, from: CircuitState, to: CircuitState) {
        if from == to {
            return;
        }
        let mut inner = self.lock();
        let stats = inner.usage.provider_mut(slot);
        match to {
            CircuitState::Open => stats.circuit_opens += 1,
            CircuitState::HalfOpen => stats.circuit_half_opens += 1,
            CircuitState::Closed => stats.circuit_closes += 1,
        }
    }

    pub fn record_fallback(&self) {
        self.lock().usage.total_fallbacks += 1;
    }

    /// Add a terminal error to the rolling log.
    pub fn record_error(&self, err: &RelayError) {
        self.lock().push_error(ErrorRecord::from_error(err));
    }

    /// Consistent copy of all counters.
    pub fn snapshot(&self) -> UsageStats {
        let inner = self.lock();
        let mut usage = inner.usage.clone();
        usage.recent_errors = inner.errors.iter().cloned().collect();
        usage
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatsInner {
    fn push_error(&mut self, record: ErrorRecord) {
        if self.errors.len() == MAX_RECENT_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn collector() -> StatsCollector {
        StatsCollector::new("deepseek", "openai")
    }

    #[test]
    fn test_success_and_failure_counters() {
        let stats = collector();
        stats.record(ProviderSlot::Primary, ModelTier::Cheap, &Ok::<_, RelayError>("OK"));
        stats.record::<()>(
            ProviderSlot::Primary,
            ModelTier::Capable,
            &Err(RelayError::timeout("deepseek", Duration::from_secs(60))),
        );

        let snap = stats.snapshot();
        let primary = &snap.primary;
        assert_eq!(primary.name, "deepseek");
        assert_eq!((primary.calls, primary.successes, primary.failures), (2, 1, 1));
        assert_eq!(primary.timeouts, 1);
        assert_eq!(primary.by_tier[&ModelTier::Cheap].successes, 1);
        assert_eq!(primary.by_tier[&ModelTier::Capable].calls, 1);
        assert!((primary.success_rate() - 50.0).abs() < f64::EPSILON);
        assert_eq!(snap.fallback.calls, 0);
    }

    #[test]
    fn test_circuit_rejection_is_not_a_call() {
        let stats = collector();
        stats.record::<()>(
            ProviderSlot::Fallback,
            ModelTier::Cheap,
            &Err(RelayError::circuit_open("openai")),
        );
        let snap = stats.snapshot();
        assert_eq!(snap.fallback.circuit_breaks, 1);
        assert_eq!(snap.fallback.calls, 0);
        assert!(snap.recent_errors.is_empty());
    }

    #[test]
    fn test_error_log_is_bounded() {
        let stats = collector();
        for i in 0..25 {
            stats.record::<()>(
                ProviderSlot::Primary,
                ModelTier::Cheap,
                &Err(RelayError::provider("deepseek", format!("failure {i}"))),
            );
        }
        let snap = stats.snapshot();
        assert_eq!(snap.recent_errors.len(), MAX_RECENT_ERRORS);
        assert!(snap.recent_errors[0].message.contains("failure 15"));
        assert!(snap.recent_errors[9].message.contains("failure 24"));
        assert_eq!(snap.recent_errors[9].provider.as_deref(), Some("deepseek"));
        assert_eq!(snap.primary.failures, 25);
    }

    #[test]
    fn test_request_histogram_and_fallbacks() {
        let stats = collector();
        stats.record_request(Some(ComplexityLevel::Low));
        stats.record_request(Some(ComplexityLevel::High));
        stats.record_request(None);
        stats.record_fallback();

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.complexity_count(ComplexityLevel::Low), 1);
        assert_eq!(snap.complexity_count(ComplexityLevel::High), 1);
        assert_eq!(snap.complexity_count(ComplexityLevel::Medium), 0);
        assert_eq!(snap.total_fallbacks, 1);
    }

    #[test]
    fn test_transition_counters() {
        use CircuitState::*;
        let stats = collector();
        stats.record_transition(ProviderSlot::Primary, Closed, Open);
        stats.record_transition(ProviderSlot::Primary, Open, HalfOpen);
        stats.record_transition(ProviderSlot::Primary, HalfOpen, Open);
        stats.record_transition(ProviderSlot::Primary, Open, HalfOpen);
        stats.record_transition(ProviderSlot::Primary, HalfOpen, Closed);

        let primary = stats.snapshot().primary;
        assert_eq!(primary.circuit_opens, 2);
        assert_eq!(primary.circuit_half_opens, 2);
        assert_eq!(primary.circuit_closes, 1);
        assert_eq!(stats.snapshot().fallback.circuit_opens, 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let stats = collector();
        let before = stats.snapshot();
        stats.record_fallback();
        assert_eq!(before.total_fallbacks, 0);
        assert_eq!(stats.snapshot().total_fallbacks, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(collector());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record(ProviderSlot::Primary, ModelTier::Cheap, &Ok::<_, RelayError>(()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.primary.calls, 8000);
        assert_eq!(snap.primary.successes, 8000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = collector();
        stats.record_request(Some(ComplexityLevel::Medium));
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["complexity"]["medium"], 1);
        assert_eq!(json["primary"]["circuit_state"], "closed");
        assert!(json["primary"].get("rate_limit").is_none());

        let usage = RateLimitUsage {
            calls_last_minute: 4,
            calls_per_minute: 20,
            min_delay_ms: 1000,
        };
        let json = serde_json::to_value(stats.snapshot().with_rate_limit(ProviderSlot::Primary, usage)).unwrap();
        assert_eq!(json["primary"]["rate_limit"]["calls_last_minute"], 4);
    }
}
