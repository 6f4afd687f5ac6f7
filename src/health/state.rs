//! Backend health state machine.
//!
//! # States
//! - Unknown: never checked; receives traffic
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from selection unless every candidate is unhealthy
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! Updates are relaxed atomics: the health monitor and request path race freely and the
//! last writer wins.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Health record for one backend name.
#[derive(Debug, Default)]
pub struct BackendHealth {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    /// Milliseconds since the epoch of the last failure; 0 = never.
    last_failure_ms: AtomicU64,
    in_flight: AtomicUsize,
}

impl BackendHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy or not yet checked.
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_failure_ms(&self) -> u64 {
        self.last_failure_ms.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Report a successful request/check.
    pub fn mark_success(&self, healthy_threshold: usize) {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Healthy {
            return;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold.max(1) {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
        }
    }

    /// Report a failed request/check.
    pub fn mark_failure(&self, unhealthy_threshold: usize) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.last_failure_ms.store(now_ms(), Ordering::Relaxed);

        if self.state() == HealthState::Unhealthy {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold.max(1) {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            tracing::warn!(consecutive_failures = failures, "Backend marked unhealthy");
        }
    }

    /// Count a request against this backend until the guard drops.
    pub fn begin_request(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            health: Arc::clone(self),
        }
    }
}

/// RAII guard that tracks an in-flight upstream request.
#[derive(Debug)]
pub struct InFlightGuard {
    health: Arc<BackendHealth>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.health.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Health records keyed by backend name.
///
/// Survives config reloads so a backend keeps its history while its descriptor
/// is rebuilt.
#[derive(Debug, Default)]
pub struct HealthTable {
    entries: DashMap<String, Arc<BackendHealth>>,
}

impl HealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing record for `name`, or a fresh one.
    pub fn entry(&self, name: &str) -> Arc<BackendHealth> {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BackendHealth::new()))
            .clone()
    }

    /// Drop records for backends that no longer exist.
    pub fn retain_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = names.into_iter().collect();
        self.entries.retain(|name, _| keep.contains(name.as_str()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let health = BackendHealth::new();
        assert_eq!(health.state(), HealthState::Unknown);
        assert!(health.is_healthy());

        health.mark_failure(2);
        assert!(health.is_healthy());
        health.mark_failure(2);
        assert_eq!(health.state(), HealthState::Unhealthy);
        assert!(health.last_failure_ms() > 0);

        health.mark_success(2);
        assert_eq!(health.state(), HealthState::Unhealthy);
        health.mark_success(2);
        assert_eq!(health.state(), HealthState::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_in_flight_guard() {
        let health = Arc::new(BackendHealth::new());
        let g1 = health.begin_request();
        let g2 = health.begin_request();
        assert_eq!(health.in_flight(), 2);
        drop(g1);
        assert_eq!(health.in_flight(), 1);
        drop(g2);
        assert_eq!(health.in_flight(), 0);
    }

    #[test]
    fn test_table_shares_records_by_name() {
        let table = HealthTable::new();
        let a = table.entry("openai");
        a.mark_failure(1);
        assert_eq!(table.entry("openai").state(), HealthState::Unhealthy);

        table.entry("anthropic");
        table.retain_names(["anthropic"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.entry("openai").state(), HealthState::Unknown);
    }
}
