//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Check each backend of the current snapshot
//!     → Update state.rs
//!
//! Passive health checks (passive.rs):
//!     Dispatch outcome observed
//!     → Update state.rs
//!
//! State machine (state.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     Keyed by backend name, shared across snapshots
//! ```

pub mod active;
pub mod passive;
pub mod state;

pub use state::{BackendHealth, HealthState, HealthTable, InFlightGuard};
