//! The polling loop.
//!
//! Cycles start on a fixed interval. A cycle that overruns its slot is
//! followed immediately by the next one rather than skipping it. Each
//! cycle after the first reloads the target list; a failed reload skips
//! that cycle only.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use posproctor_client::DiagnosticClient;
use posproctor_core::{PollerConfig, TargetRegistry, TargetSource};
use posproctor_metrics::MetricsRegistry;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::pool::{CycleReport, WorkerPool};

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Spacing between cycle starts.
    pub cycle_interval: Duration,
    /// How long shutdown waits for a running cycle before abandoning it.
    pub shutdown_grace: Duration,
}

impl From<&PollerConfig> for OrchestratorConfig {
    fn from(p: &PollerConfig) -> Self {
        Self {
            cycle_interval: p.cycle_interval,
            shutdown_grace: p.shutdown_grace,
        }
    }
}

/// Drives the worker pool until shutdown.
pub struct Orchestrator<C, S> {
    pool: WorkerPool<C>,
    source: S,
    config: OrchestratorConfig,
    initial: Option<TargetRegistry>,
}

impl<C, S> Orchestrator<C, S>
where
    C: DiagnosticClient,
    S: TargetSource + 'static,
{
    /// Load the startup target list.
    ///
    /// Fails if the list cannot be loaded; no cycle runs in that case.
    pub fn new(pool: WorkerPool<C>, source: S, config: OrchestratorConfig) -> OrchestratorResult<Self> {
        if config.cycle_interval.is_zero() {
            return Err(OrchestratorError::InvalidSetting {
                key: "poller.cycle_interval",
                value: config.cycle_interval,
            });
        }
        let initial = source.reload()?;
        info!(
            total = initial.total(),
            enabled = initial.enabled_count(),
            "startup target list loaded"
        );
        Ok(Self {
            pool,
            source,
            config,
            initial: Some(initial),
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.pool.metrics()
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            workers = self.pool.config().pool_size,
            "polling loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let Some(registry) = self.next_registry() else {
                continue;
            };
            self.metrics().retain_targets(&registry.list_enabled());

            let cycle = self.pool.run_cycle(&registry);
            tokio::pin!(cycle);

            tokio::select! {
                report = &mut cycle => self.finish(&report),
                _ = shutdown.changed() => {
                    info!(grace_secs = self.config.shutdown_grace.as_secs(), "shutdown requested, draining in-flight queries");
                    match tokio::time::timeout(self.config.shutdown_grace, &mut cycle).await {
                        Ok(report) => self.finish(&report),
                        Err(_) => warn!("shutdown grace expired, abandoning the running cycle"),
                    }
                    break;
                }
            }
        }

        info!("polling loop stopped");
    }

    /// Startup list for the first cycle, a fresh reload afterwards.
    fn next_registry(&mut self) -> Option<TargetRegistry> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        match self.source.reload() {
            Ok(registry) => {
                debug!(enabled = registry.enabled_count(), "target list reloaded");
                Some(registry)
            }
            Err(e) => {
                warn!(error = %e, "target list reload failed, skipping cycle");
                self.metrics().record_registry_failure();
                None
            }
        }
    }

    fn finish(&self, report: &CycleReport) {
        self.metrics().record_cycle(&report.stats);
    }
}
