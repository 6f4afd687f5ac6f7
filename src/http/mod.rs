//! HTTP front door.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → server.rs (Axum setup, request-id + trace layers)
//!     → request.rs (RequestContext: id, client, host, path)
//!     → routing::Router (route + sub-path)
//!     → route policies (CORS preflight, rate limit)
//!     → load_balancer → translate → dispatch
//!     → response.rs (gateway headers, CORS decoration)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, X_REQUEST_ID};
pub use server::{AppState, FrontDoor};
