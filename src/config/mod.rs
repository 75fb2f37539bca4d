//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → Lifecycle::from_config, ProbeServer, DrainCoordinator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Durations are seconds as floats; `<= 0` disables a step
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, LifecycleConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProbeConfig,
    TlsConfig,
};
pub use validation::ValidationError;
