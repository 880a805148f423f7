//! posproctor-metrics — the single shared-mutable store of the process.
//!
//! Poll workers fold [`DiagnosticResult`](posproctor_core::DiagnosticResult)s
//! in, the orchestrator adds cycle stats, and the exporter renders the
//! whole state as Prometheus text on every scrape.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── record()            ← one call per poll outcome (workers)
//!   ├── record_cycle()      ← once per cycle (orchestrator)
//!   ├── retain_targets()    ← cycle start, clears gauges of removed targets
//!   ├── query_started()     ← worker entry/exit (query_finished)
//!   └── render() → text/plain for /metrics
//! ```

pub mod histogram;
pub mod prometheus;
pub mod registry;

pub use histogram::Histogram;
pub use prometheus::CONTENT_TYPE;
pub use registry::{AppInfo, MetricsRegistry, TargetLabels};
