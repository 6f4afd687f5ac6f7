//! Power-of-two-choices load balancing strategy.

use std::sync::Arc;

use crate::backend::BackendDescriptor;
use crate::load_balancer::{LoadBalancer, Selection};

/// Samples two distinct healthy backends and keeps the less loaded one.
#[derive(Debug, Default)]
pub struct PowerOfTwoChoices;

impl PowerOfTwoChoices {
    pub fn new() -> Self {
        Self
    }
}

/// Lower is better: in-flight requests first, then recent failures.
fn load(backend: &BackendDescriptor) -> (usize, usize) {
    (
        backend.health.in_flight(),
        backend.health.consecutive_failures(),
    )
}

impl LoadBalancer for PowerOfTwoChoices {
    fn select(&self, backends: &[Arc<BackendDescriptor>]) -> Option<Selection> {
        let healthy: Vec<&Arc<BackendDescriptor>> =
            backends.iter().filter(|b| b.health.is_healthy()).collect();

        let chosen = match healthy.len() {
            0 => {
                // In case of tie, the first declared backend is selected (stability)
                let backend = backends.iter().min_by_key(|b| b.health.last_failure_ms())?;
                tracing::warn!(
                    backend = %backend.name,
                    candidates = backends.len(),
                    "All backends unhealthy, failing open"
                );
                return Some(Selection {
                    backend: Arc::clone(backend),
                    fail_open: true,
                });
            }
            1 => healthy[0],
            n => {
                let first = fastrand::usize(..n);
                let mut second = fastrand::usize(..n - 1);
                if second >= first {
                    second += 1;
                }
                let (a, b) = (healthy[first], healthy[second]);
                if load(b) < load(a) {
                    b
                } else {
                    a
                }
            }
        };

        Some(Selection {
            backend: Arc::clone(chosen),
            fail_open: false,
        })
    }
}
