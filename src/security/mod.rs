//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (after route match):
//!     → cors.rs (tower-http CorsLayer around the forwarding service)
//!     → rate_limit.rs (per-route, per-IP token buckets)
//!     → limits.rs (request body size)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-For)
//!     → Pass to translation / dispatch
//! ```
//!
//! # Design Decisions
//! - Policies are compiled per route at snapshot build
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod cors;
pub mod headers;
pub mod limits;
pub mod rate_limit;
