//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (listener, host, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate host and prefix conditions)
//!     → Return: RouteMatch { route, sub_path } or NoRouteMatch
//!
//! Route Compilation (at snapshot build):
//!     RouteConfig[]
//!     → Resolve backends against the registry
//!     → Compile matchers and policies
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled per snapshot, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{Route, RouteMatch, Router};
