//! Bounded worker pool for one polling cycle.
//!
//! At most `pool_size` queries are in flight. Whenever one finishes the
//! next enabled target in registry order is dispatched. When the cycle
//! budget runs out, outstanding tasks are aborted and every target still
//! without a result gets a synthesized one, so each target settles exactly
//! once per cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use posproctor_client::DiagnosticClient;
use posproctor_core::{CycleStats, DiagnosticResult, ErrorKind, PollerConfig, Target, TargetRegistry, epoch_secs};
use posproctor_metrics::MetricsRegistry;

/// Limits applied to every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub per_target_timeout: Duration,
    /// Ceiling on one whole cycle.
    pub cycle_budget: Duration,
}

impl From<&PollerConfig> for PoolConfig {
    fn from(p: &PollerConfig) -> Self {
        Self {
            pool_size: p.pool_size,
            per_target_timeout: p.per_target_timeout,
            cycle_budget: p.cycle_budget(),
        }
    }
}

/// The result settled for one target, and whether the pool produced it
/// in place of a worker.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub result: DiagnosticResult,
    pub synthesized: bool,
}

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub stats: CycleStats,
    /// One entry per enabled target, in registry order.
    pub outcomes: Vec<TargetOutcome>,
}

// ── In-flight accounting ─────────────────────────────────────────────

/// Headroom the worker-side timeout gives the client's own, so the
/// client's failure path (token eviction, logging) normally runs first.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_millis(250);

/// The live count lives in the metrics registry; this only tracks the
/// per-cycle peak on top of it.
struct InFlight {
    peak: AtomicUsize,
    metrics: Arc<MetricsRegistry>,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.metrics.query_started();
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    /// Start a new peak window from whatever is still running.
    fn reset_peak(&self) {
        self.peak.store(self.metrics.in_flight(), Ordering::SeqCst);
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.metrics.query_finished();
    }
}

// ── Settlement ───────────────────────────────────────────────────────

/// One cell per target. Whoever fills a cell first, worker or deadline
/// sweep, owns the result; the metrics record happens under the same
/// lock, so it happens exactly once.
struct Settlement {
    slots: Vec<Mutex<Option<TargetOutcome>>>,
    metrics: Arc<MetricsRegistry>,
}

impl Settlement {
    fn new(len: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            slots: (0..len).map(|_| Mutex::new(None)).collect(),
            metrics,
        }
    }

    fn settle(&self, index: usize, result: DiagnosticResult, synthesized: bool) -> bool {
        let mut slot = self.slots[index].lock();
        if slot.is_some() {
            debug!(address = %result.target.address, "late result discarded");
            return false;
        }
        self.metrics.record(&result);
        *slot = Some(TargetOutcome { result, synthesized });
        true
    }

    fn is_settled(&self, index: usize) -> bool {
        self.slots[index].lock().is_some()
    }

    /// Settled cells in target order.
    fn outcomes(&self) -> Vec<TargetOutcome> {
        self.slots.iter().filter_map(|slot| slot.lock().clone()).collect()
    }
}

// ── WorkerPool ───────────────────────────────────────────────────────

/// Runs polling cycles with bounded parallelism.
pub struct WorkerPool<C> {
    client: Arc<C>,
    metrics: Arc<MetricsRegistry>,
    config: PoolConfig,
    in_flight: Arc<InFlight>,
}

impl<C: DiagnosticClient> WorkerPool<C> {
    pub fn new(client: Arc<C>, metrics: Arc<MetricsRegistry>, config: PoolConfig) -> Self {
        let config = PoolConfig {
            pool_size: config.pool_size.max(1),
            ..config
        };
        let in_flight = Arc::new(InFlight {
            peak: AtomicUsize::new(0),
            metrics: metrics.clone(),
        });
        Self {
            client,
            metrics,
            config,
            in_flight,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Poll every enabled target of `registry` once.
    ///
    /// Returns within the cycle budget (plus scheduling slack) no matter
    /// how targets behave.
    pub async fn run_cycle(&self, registry: &TargetRegistry) -> CycleReport {
        let started = Instant::now();
        let started_at = epoch_secs();
        let deadline = started + self.config.cycle_budget;
        let targets = registry.list_enabled();
        let settlement = Arc::new(Settlement::new(targets.len(), self.metrics.clone()));
        self.in_flight.reset_peak();

        info!(
            targets = targets.len(),
            workers = self.config.pool_size,
            budget_secs = self.config.cycle_budget.as_secs(),
            "cycle started"
        );

        let mut set = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut dispatched_at: Vec<Option<Instant>> = vec![None; targets.len()];
        let mut next = 0;
        let mut deadline_hit = false;

        loop {
            while set.len() < self.config.pool_size && next < targets.len() {
                let handle = set.spawn(Self::poll_one(
                    self.client.clone(),
                    self.in_flight.clone(),
                    self.config.per_target_timeout,
                    next,
                    targets[next].clone(),
                    settlement.clone(),
                ));
                running.insert(handle.id(), next);
                dispatched_at[next] = Some(Instant::now());
                next += 1;
            }
            if set.is_empty() {
                break;
            }

            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((id, ())))) => {
                    running.remove(&id);
                }
                Ok(Some(Err(e))) => {
                    let Some(index) = running.remove(&e.id()) else {
                        continue;
                    };
                    let target = &targets[index];
                    error!(address = %target.address, error = %e, "poll worker failed");
                    let latency = dispatched_at[index].map(|t| t.elapsed()).unwrap_or_default();
                    settlement.settle(
                        index,
                        DiagnosticResult::failure(target.clone(), latency, ErrorKind::Unknown, format!("poll worker failed: {e}")),
                        true,
                    );
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    break;
                }
            }
        }

        if deadline_hit {
            warn!(
                in_flight = set.len(),
                undispatched = targets.len() - next,
                "cycle budget exhausted, abandoning outstanding queries"
            );
        }
        // Abort stragglers and wait until they are gone, so their in-flight
        // guards are released before the next cycle starts counting.
        set.shutdown().await;

        // Sweep: anything still unsettled was in flight or never started.
        for (index, target) in targets.iter().enumerate() {
            if settlement.is_settled(index) {
                continue;
            }
            let (latency, kind, message) = match dispatched_at[index] {
                Some(t) => (t.elapsed(), ErrorKind::Timeout, "no result before the cycle deadline"),
                None => (Duration::ZERO, ErrorKind::Unknown, "not dispatched before the cycle deadline"),
            };
            settlement.settle(
                index,
                DiagnosticResult::failure(target.clone(), latency, kind, message),
                true,
            );
        }

        let outcomes = settlement.outcomes();

        let synthesized = outcomes.iter().filter(|o| o.synthesized).count();
        let stats = CycleStats {
            started_at,
            duration: started.elapsed(),
            targets_total: registry.total(),
            targets_enabled: targets.len(),
            concurrency_peak: self.in_flight.peak.load(Ordering::SeqCst),
            completed: outcomes.len() - synthesized,
            synthesized,
        };

        info!(
            duration_ms = stats.duration.as_millis() as u64,
            completed = stats.completed,
            synthesized = stats.synthesized,
            failed = outcomes.iter().filter(|o| !o.result.success).count(),
            peak = stats.concurrency_peak,
            "cycle finished"
        );

        CycleReport { stats, outcomes }
    }

    async fn poll_one(
        client: Arc<C>,
        in_flight: Arc<InFlight>,
        timeout: Duration,
        index: usize,
        target: Target,
        settlement: Arc<Settlement>,
    ) {
        let _guard = in_flight.enter();
        let started = Instant::now();
        let ceiling = timeout.saturating_add(CLIENT_TIMEOUT_SLACK);
        let result = match tokio::time::timeout(ceiling, client.query(&target, timeout)).await {
            Ok(result) => result,
            Err(_) => DiagnosticResult::failure(
                target.clone(),
                started.elapsed(),
                ErrorKind::Timeout,
                format!("no response within {timeout:?}"),
            ),
        };
        settlement.settle(index, result, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posproctor_metrics::AppInfo;

    #[test]
    fn settle_is_first_writer_wins() {
        let metrics = Arc::new(MetricsRegistry::new(AppInfo::default()));
        let settlement = Settlement::new(1, metrics);
        let target = Target::new("10.0.0.1", "Store 1", "g");

        assert!(settlement.settle(
            0,
            DiagnosticResult::failure(target.clone(), Duration::ZERO, ErrorKind::Timeout, "deadline"),
            true
        ));
        assert!(!settlement.settle(
            0,
            DiagnosticResult::success(target, Duration::ZERO, Default::default(), Default::default()),
            false
        ));

        let outcomes = settlement.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].synthesized);
        assert_eq!(outcomes[0].result.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn pool_size_zero_is_clamped() {
        struct Never;
        impl DiagnosticClient for Never {
            async fn query(&self, target: &Target, _timeout: Duration) -> DiagnosticResult {
                DiagnosticResult::failure(target.clone(), Duration::ZERO, ErrorKind::Unknown, "never")
            }
        }
        let pool = WorkerPool::new(
            Arc::new(Never),
            Arc::new(MetricsRegistry::new(AppInfo::default())),
            PoolConfig {
                pool_size: 0,
                per_target_timeout: Duration::from_secs(1),
                cycle_budget: Duration::from_secs(1),
            },
        );
        assert_eq!(pool.config().pool_size, 1);
    }

    #[test]
    fn config_from_poller_uses_effective_budget() {
        let poller = PollerConfig::default();
        let config = PoolConfig::from(&poller);
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.cycle_budget, poller.cycle_interval);
    }
}
