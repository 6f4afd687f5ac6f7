//! LLM gateway library.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Backends and traffic
pub mod backend;
pub mod dispatch;
pub mod health;
pub mod load_balancer;
pub mod translate;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub mod admin;

pub use config::schema::GatewayConfig;
pub use config::ConfigStore;
pub use error::GatewayError;
pub use http::FrontDoor;
pub use lifecycle::Shutdown;
