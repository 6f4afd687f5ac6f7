//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → candidate backends (declaration order)
//!     → filter by health state
//!     → p2c.rs (pick two at random, keep the healthier)
//!     → nothing healthy: fail open to the least-recently-failed backend
//!     → Selection { backend, fail_open }
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless; health lives on the descriptors
//! - Unhealthy backends excluded from selection unless all are unhealthy
//! - Fail-open is reported to the caller, never hidden

pub mod p2c;

use std::sync::Arc;

use crate::backend::BackendDescriptor;

pub use p2c::PowerOfTwoChoices;

/// The backend chosen for one request.
#[derive(Debug, Clone)]
pub struct Selection {
    pub backend: Arc<BackendDescriptor>,
    /// Every candidate was unhealthy; this one failed least recently.
    pub fail_open: bool,
}

/// Backend selection strategy.
pub trait LoadBalancer: Send + Sync {
    /// Choose a backend; `None` only when `backends` is empty.
    fn select(&self, backends: &[Arc<BackendDescriptor>]) -> Option<Selection>;
}
