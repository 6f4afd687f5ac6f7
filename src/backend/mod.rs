//! Backend descriptor subsystem.
//!
//! # Data Flow
//! ```text
//! BackendConfig (from snapshot build)
//!     → auth.rs (resolve none / staticKey / envRef into a secret)
//!     → descriptor.rs (dialect, native route table, timeouts, retry)
//!     → registry.rs (name → Arc<BackendDescriptor>)
//! ```
//!
//! # Design Decisions
//! - Dialects are a closed tagged enum; capabilities come from the route table
//! - Credentials resolve once per load, never per request
//! - An unresolvable credential disables only its backend

pub mod auth;
pub mod descriptor;
pub mod registry;

pub use auth::{Credential, ResolvedAuth, Secret};
pub use descriptor::{BackendDescriptor, Dialect, NativeRouteTable, RouteMode};
pub use registry::BackendRegistry;
