//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Snapshot listeners
//!     → listener.rs (bind, one FrontDoor per listener)
//!     → Hand off to HTTP layer
//!
//! On every snapshot swap:
//!     new listener names      → bind and start
//!     removed listener names  → stop accepting, drain in-flight requests
//!     changed bind addresses  → stop old socket, bind new one
//! ```
//!
//! # Design Decisions
//! - Listeners are keyed by name, matching the snapshot's router map
//! - A failed bind at startup is fatal; a failed bind on reload is logged

pub mod listener;

pub use listener::{ListenerError, ListenerSet};
