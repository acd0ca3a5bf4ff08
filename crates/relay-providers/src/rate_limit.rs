//! Client-side pacing for provider calls.
//!
//! Keeps a provider under a calls-per-minute budget and spaces consecutive
//! call starts by a minimum delay, so callers wait locally instead of being
//! throttled upstream.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use relay_config::RateLimitSettings;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window rate limiter for one provider.
///
/// Each caller reserves its start time under the lock and then sleeps
/// outside it, so concurrent callers queue up in order. A caller that gives
/// up while waiting keeps its reserved slot.
pub struct RateLimiter {
    name: String,
    settings: RateLimitSettings,
    /// Reserved call start times, oldest first. Entries may lie in the
    /// future while their callers wait.
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, settings: RateLimitSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Wait until the next call may start. Returns the time waited.
    pub async fn acquire(&self) -> Duration {
        let now = Instant::now();
        let start = self.reserve(now);
        let wait = start.saturating_duration_since(now);
        if !wait.is_zero() {
            debug!(
                provider = %self.name,
                wait_ms = wait.as_millis() as u64,
                "rate limiter delaying call"
            );
            tokio::time::sleep_until(start).await;
        }
        wait
    }

    /// Current usage statistics.
    pub fn usage(&self) -> RateLimitUsage {
        let now = Instant::now();
        let mut window = self.lock();
        prune(&mut window, now);
        RateLimitUsage {
            calls_last_minute: window.len() as u32,
            calls_per_minute: self.settings.calls_per_minute,
            min_delay_ms: self.settings.min_delay_ms,
        }
    }

    /// Forget all recorded calls.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut window = self.lock();
        prune(&mut window, now);

        let limit = self.settings.calls_per_minute.max(1) as usize;
        let mut start = now;
        if window.len() >= limit {
            // The limit-th most recent call has to leave the window first
            let blocking = window[window.len() - limit];
            start = start.max(later(blocking, WINDOW));
        }
        if let Some(&last) = window.back() {
            start = start.max(later(last, self.settings.min_delay()));
        }
        window.push_back(start);
        start
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn later(instant: Instant, delay: Duration) -> Instant {
    instant.checked_add(delay).unwrap_or(instant)
}

/// Rate limiter usage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    /// Calls started or reserved in the last minute
    pub calls_last_minute: u32,
    /// Configured per-minute budget
    pub calls_per_minute: u32,
    /// Configured gap between calls
    pub min_delay_ms: u64,
}

impl RateLimitUsage {
    /// Share of the per-minute budget in use, as a percentage.
    pub fn utilization_percent(&self) -> f64 {
        if self.calls_per_minute == 0 {
            return 0.0;
        }
        self.calls_last_minute as f64 / self.calls_per_minute as f64 * 100.0
    }

    /// Check if near the per-minute limit (>80% used).
    pub fn near_limit(&self) -> bool {
        self.utilization_percent() > 80.0
    }

    /// Calls left in the current minute.
    pub fn remaining(&self) -> u32 {
        self.calls_per_minute.saturating_sub(self.calls_last_minute)
    }
}
