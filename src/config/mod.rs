//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML/JSON/TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → snapshot.rs (compile routers and backend registry)
//!     → store.rs (atomic swap of Arc<ConfigSnapshot>)
//!
//! On reload signal (file change, SIGHUP, admin API):
//!     watcher.rs coalesces triggers
//!     → store.rs loads, validates, builds
//!     → swap on success, keep last good snapshot on failure
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; changes require full rebuild
//! - All sections have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError, ConfigFormat};
pub use schema::{BackendConfig, GatewayConfig, ListenerConfig, RouteConfig};
pub use snapshot::ConfigSnapshot;
pub use store::{ConfigStore, ReloadOutcome};
pub use validation::ValidationError;
