//! posproctor-core — shared model for the commander fleet monitor.
//!
//! Defines the data every other crate passes around: monitored
//! [`Target`]s, the per-poll [`DiagnosticResult`], the canonical
//! [`ErrorKind`] taxonomy and per-cycle [`CycleStats`]. Also owns the
//! TOML configuration and the [`TargetRegistry`] with its reload boundary.
//!
//! # Architecture
//!
//! ```text
//! TargetSource::reload()  (file, static)
//!   └── TargetRegistry     (validated, immutable per cycle)
//!         └── list_enabled() → Vec<Target>
//!
//! ProctorConfig::from_file()
//!   ├── PollerConfig   (pool_size, per_target_timeout, cycle_interval, ...)
//!   ├── ClientConfig   (scheme, verify_tls, loyalty_names, token_ttl)
//!   └── ExporterConfig (listen)
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{ClientConfig, Credentials, ExporterConfig, PollerConfig, ProctorConfig, Scheme};
pub use error::{ConfigError, ConfigResult};
pub use registry::{FileTargetSource, StaticTargetSource, TargetRegistry, TargetSource};
pub use types::*;
