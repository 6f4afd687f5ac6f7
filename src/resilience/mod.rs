//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream attempt:
//!     → timeouts.rs (per-attempt deadline around connect, head and buffered body)
//!     → On failure: retries.rs (connection-level only, bounded by maxAttempts)
//!     → backoff.rs (exponential delay with jitter before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Every upstream call has a deadline
//! - Retries are opt-in per backend and never replay an HTTP response
//! - Jittered backoff prevents synchronized retry waves

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{AttemptFailure, RetryPolicy};
pub use timeouts::{Deadline, DeadlineExceeded};
