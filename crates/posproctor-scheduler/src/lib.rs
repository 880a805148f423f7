//! posproctor-scheduler — bounded-parallel polling cycles.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::run(shutdown)
//!   ├── interval tick (missed ticks fire immediately)
//!   ├── TargetSource::reload()        (skipped for the first cycle)
//!   ├── MetricsRegistry::retain_targets()
//!   ├── WorkerPool::run_cycle()
//!   │     ├── JoinSet, ≤ pool_size tasks, registry order
//!   │     ├── per-target timeout around every query
//!   │     └── cycle deadline → abort + synthesize stragglers
//!   └── MetricsRegistry::record_cycle()
//! ```

pub mod error;
pub mod orchestrator;
pub mod pool;

pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use pool::{CycleReport, PoolConfig, TargetOutcome, WorkerPool};
