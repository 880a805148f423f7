//! The metrics registry.
//!
//! Holds every exposed series. Each target label set owns one
//! [`parking_lot::Mutex`]-guarded state block, so a `record` for one target
//! never contends with another target and a scrape only ever waits on one
//! short critical section at a time. The outer map is write-locked only
//! when a label set is seen for the first time.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use posproctor_core::{
    CgiCommand, CycleStats, DeviceKey, DeviceKind, DiagnosticResult, ErrorKind, FepRole, FepStatus, Status,
    Target, epoch_secs,
};

use crate::histogram::{CYCLE_BUCKETS, Histogram, QUERY_BUCKETS};
use crate::prometheus::{header, histogram, sample};

/// Static process information exposed as `posproctor_app_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub version: String,
    pub pool_size: usize,
    pub per_target_timeout: Duration,
    pub cycle_interval: Duration,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pool_size: 10,
            per_target_timeout: Duration::from_secs(60),
            cycle_interval: Duration::from_secs(300),
        }
    }
}

/// The per-target label set: `store`, `ip`, `group`, `brand`.
///
/// A series is identified by the full set, never a subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetLabels {
    pub store: String,
    pub ip: String,
    pub group: String,
    pub brand: String,
}

impl From<&Target> for TargetLabels {
    fn from(t: &Target) -> Self {
        Self {
            store: t.display_name.clone(),
            ip: t.address.clone(),
            group: t.group.clone(),
            brand: t.brand.clone(),
        }
    }
}

impl TargetLabels {
    fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("store", self.store.as_str()),
            ("ip", self.ip.as_str()),
            ("group", self.group.as_str()),
            ("brand", self.brand.as_str()),
        ]
    }
}

/// Status gauges from the most recent poll. Overwritten wholesale.
#[derive(Debug, Clone)]
struct StatusGauges {
    success: bool,
    controller: u8,
    devices: BTreeMap<DeviceKey, Status>,
    feps: BTreeMap<String, FepStatus>,
}

#[derive(Debug, Clone, Default)]
struct Health {
    consecutive_failures: u64,
    last_success: Option<u64>,
    last_error: Option<ErrorKind>,
}

#[derive(Debug, Clone)]
struct SeriesState {
    status: Option<StatusGauges>,
    health: Option<Health>,
    failures: [u64; ErrorKind::ALL.len()],
    durations: Histogram,
    /// Per-request latency within the exchange.
    requests: BTreeMap<CgiCommand, Histogram>,
}

impl SeriesState {
    fn new() -> Self {
        Self {
            status: None,
            health: None,
            failures: [0; ErrorKind::ALL.len()],
            durations: Histogram::new(QUERY_BUCKETS),
            requests: BTreeMap::new(),
        }
    }

    fn apply(&mut self, result: &DiagnosticResult) {
        self.durations.observe(result.latency.as_secs_f64());
        for (command, latency) in &result.command_latencies {
            self.requests
                .entry(*command)
                .or_insert_with(|| Histogram::new(QUERY_BUCKETS))
                .observe(latency.as_secs_f64());
        }
        let health = self.health.get_or_insert_with(Health::default);

        match result.error_kind {
            None => {
                self.status = Some(StatusGauges {
                    success: true,
                    controller: result.controller_status().map_or(0, Status::gauge),
                    devices: result.device_statuses.clone(),
                    feps: result.fep_statuses.clone(),
                });
                health.consecutive_failures = 0;
                health.last_success = Some(result.timestamp);
                health.last_error = None;
            }
            Some(kind) => {
                // No device series survive a failed poll.
                self.status = Some(StatusGauges {
                    success: false,
                    controller: 0,
                    devices: BTreeMap::new(),
                    feps: BTreeMap::new(),
                });
                self.failures[kind.index()] += 1;
                health.consecutive_failures += 1;
                health.last_error = Some(kind);
            }
        }
    }

    /// Drop everything that describes current state; counters stay.
    fn clear_gauges(&mut self) {
        self.status = None;
        self.health = None;
    }
}

#[derive(Debug, Clone)]
struct CycleState {
    last: Option<CycleStats>,
    last_scrape: Option<u64>,
    cycles_total: u64,
    synthesized_total: u64,
    registry_failures_total: u64,
    durations: Histogram,
}

/// Shared registry of every metric the process exposes.
///
/// Pass it around as `Arc<MetricsRegistry>`; all methods take `&self`.
pub struct MetricsRegistry {
    info: AppInfo,
    series: RwLock<BTreeMap<TargetLabels, Arc<Mutex<SeriesState>>>>,
    cycle: Mutex<CycleState>,
    in_flight: AtomicUsize,
}

impl MetricsRegistry {
    pub fn new(info: AppInfo) -> Self {
        Self {
            info,
            series: RwLock::new(BTreeMap::new()),
            cycle: Mutex::new(CycleState {
                last: None,
                last_scrape: None,
                cycles_total: 0,
                synthesized_total: 0,
                registry_failures_total: 0,
                durations: Histogram::new(CYCLE_BUCKETS),
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn series_for(&self, labels: &TargetLabels) -> Arc<Mutex<SeriesState>> {
        if let Some(s) = self.series.read().get(labels) {
            return s.clone();
        }
        let mut map = self.series.write();
        map.entry(labels.clone())
            .or_insert_with(|| {
                debug!(store = %labels.store, ip = %labels.ip, "new target series");
                Arc::new(Mutex::new(SeriesState::new()))
            })
            .clone()
    }

    /// Fold one poll outcome into the target's series.
    ///
    /// Every gauge, counter and histogram of the target changes under a
    /// single lock, so a concurrent [`render`](Self::render) sees either
    /// all of it or none of it.
    pub fn record(&self, result: &DiagnosticResult) {
        let labels = TargetLabels::from(&result.target);
        let series = self.series_for(&labels);
        series.lock().apply(result);
    }

    /// Store the stats of a finished cycle.
    pub fn record_cycle(&self, stats: &CycleStats) {
        let mut cycle = self.cycle.lock();
        cycle.cycles_total += 1;
        cycle.synthesized_total += stats.synthesized as u64;
        cycle.durations.observe(stats.duration.as_secs_f64());
        cycle.last_scrape = Some(epoch_secs());
        cycle.last = Some(stats.clone());
    }

    /// Clear status and error-state gauges of every series not in `targets`.
    ///
    /// Failure counters and latency histograms of removed targets are
    /// kept; they accumulate for the process lifetime.
    pub fn retain_targets(&self, targets: &[Target]) {
        let keep: HashSet<TargetLabels> = targets.iter().map(TargetLabels::from).collect();
        let map = self.series.read();
        for (labels, series) in map.iter() {
            if keep.contains(labels) {
                continue;
            }
            let mut state = series.lock();
            if state.status.is_some() || state.health.is_some() {
                debug!(store = %labels.store, ip = %labels.ip, "clearing gauges of removed target");
                state.clear_gauges();
            }
        }
    }

    /// Count a query entering flight; returns the new in-flight total.
    ///
    /// The pool drives this counter directly, so `concurrent_queries`
    /// is never a copy that can lag behind it.
    pub fn query_started(&self) -> usize {
        self.in_flight.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Pair of [`query_started`](Self::query_started).
    pub fn query_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Count a cycle that could not load its target list.
    pub fn record_registry_failure(&self) {
        self.cycle.lock().registry_failures_total += 1;
    }

    /// Render the full state in the Prometheus text format.
    ///
    /// Read-only and deterministic: two calls with no mutation in between
    /// return identical text.
    pub fn render(&self) -> String {
        let handles: Vec<(TargetLabels, Arc<Mutex<SeriesState>>)> = self
            .series
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let series: Vec<(TargetLabels, SeriesState)> = handles
            .into_iter()
            .map(|(labels, s)| {
                let state = s.lock().clone();
                (labels, state)
            })
            .collect();
        let cycle = self.cycle.lock().clone();
        let in_flight = self.in_flight();

        let mut out = String::new();
        self.render_status(&mut out, &series);
        self.render_health(&mut out, &series);
        self.render_process(&mut out, &cycle, in_flight);
        out
    }

    fn render_status(&self, out: &mut String, series: &[(TargetLabels, SeriesState)]) {
        let live = || {
            series
                .iter()
                .filter_map(|(labels, s)| s.status.as_ref().map(|st| (labels, st)))
        };

        header(out, "scrape_success", "gauge", "Whether the last poll of a commander succeeded (1) or failed (0).");
        for (labels, st) in live() {
            sample(out, "scrape_success", &labels.pairs(), u8::from(st.success));
        }

        header(out, "controller_status", "gauge", "Forecourt controller status (1=online, 0=offline).");
        for (labels, st) in live() {
            sample(out, "controller_status", &labels.pairs(), st.controller);
        }

        let devices = [
            ("pump_status", "fueling_point_id", DeviceKind::Pump, "Pump status per fueling point (1=online, 0=offline)."),
            ("dcr_status", "fueling_point_id", DeviceKind::Dcr, "DCR status per fueling point (1=online, 0=offline)."),
            ("price_display_status", "display_id", DeviceKind::PriceSign, "Fuel price display status (1=online, 0=offline)."),
        ];
        for (name, id_label, kind, help) in devices {
            header(out, name, "gauge", help);
            for (labels, st) in live() {
                for (key, status) in st.devices.iter().filter(|(k, _)| k.kind == kind) {
                    let mut pairs = labels.pairs().to_vec();
                    pairs.push((id_label, key.id.as_str()));
                    sample(out, name, &pairs, status.gauge());
                }
            }
        }

        let feps = [
            ("loyalty_fep_status", FepRole::Loyalty, "Loyalty FEP connection status (1=online, 0=offline)."),
            ("primary_fep_status", FepRole::Primary, "Primary card processor FEP connection status (1=online, 0=offline)."),
        ];
        for (name, role, help) in feps {
            header(out, name, "gauge", help);
            for (labels, st) in live() {
                for (fep_name, fep) in st.feps.iter().filter(|(_, f)| f.role == role) {
                    let mut pairs = labels.pairs().to_vec();
                    pairs.push(("fep_name", fep_name.as_str()));
                    sample(out, name, &pairs, fep.status.gauge());
                }
            }
        }
    }

    fn render_health(&self, out: &mut String, series: &[(TargetLabels, SeriesState)]) {
        let live = || {
            series
                .iter()
                .filter_map(|(labels, s)| s.health.as_ref().map(|h| (labels, h)))
        };

        header(out, "consecutive_failures", "gauge", "Failed polls in a row for each commander.");
        for (labels, h) in live() {
            sample(out, "consecutive_failures", &labels.pairs(), h.consecutive_failures);
        }

        header(
            out,
            "last_successful_connection_timestamp",
            "gauge",
            "Unix time of the last successful poll of each commander.",
        );
        for (labels, h) in live() {
            if let Some(ts) = h.last_success {
                sample(out, "last_successful_connection_timestamp", &labels.pairs(), ts);
            }
        }

        header(out, "commander_error_state", "gauge", "Current error state and last error type of each commander.");
        for (labels, h) in live() {
            let (status, last_error) = match h.last_error {
                None => ("healthy", ""),
                Some(kind) => ("error", kind.as_str()),
            };
            let mut pairs = labels.pairs().to_vec();
            pairs.push(("status", status));
            pairs.push(("last_error_type", last_error));
            sample(out, "commander_error_state", &pairs, 1);
        }

        header(out, "query_failures_total", "counter", "Failed polls per commander by error type.");
        for (labels, s) in series {
            for kind in ErrorKind::ALL {
                let mut pairs = labels.pairs().to_vec();
                pairs.push(("error_type", kind.as_str()));
                sample(out, "query_failures_total", &pairs, s.failures[kind.index()]);
            }
        }

        header(out, "query_duration_seconds", "histogram", "Time spent polling each commander.");
        for (labels, s) in series {
            histogram(out, "query_duration_seconds", &labels.pairs(), &s.durations);
        }

        header(
            out,
            "request_duration_seconds",
            "histogram",
            "Time spent in each CGI request (validate, forecourt, payment) per commander.",
        );
        for (labels, s) in series {
            for (command, h) in &s.requests {
                let mut pairs = labels.pairs().to_vec();
                pairs.push(("endpoint", command.as_str()));
                histogram(out, "request_duration_seconds", &pairs, h);
            }
        }
    }

    fn render_process(
        &self,
        out: &mut String,
        cycle: &CycleState,
        in_flight: usize,
    ) {
        header(out, "concurrent_queries", "gauge", "Queries currently in flight.");
        sample(out, "concurrent_queries", &[], in_flight);

        header(out, "concurrency_peak", "gauge", "Most queries in flight at once during the last cycle.");
        if let Some(last) = &cycle.last {
            sample(out, "concurrency_peak", &[], last.concurrency_peak);
        }

        header(out, "total_commanders", "gauge", "Commanders configured, by enabled flag.");
        if let Some(last) = &cycle.last {
            let disabled = last.targets_total.saturating_sub(last.targets_enabled);
            sample(out, "total_commanders", &[("enabled", "true")], last.targets_enabled);
            sample(out, "total_commanders", &[("enabled", "false")], disabled);
        }

        header(out, "last_scrape_timestamp", "gauge", "Unix time the last polling cycle finished.");
        if let Some(ts) = cycle.last_scrape {
            sample(out, "last_scrape_timestamp", &[], ts);
        }

        header(out, "cycles_total", "counter", "Polling cycles completed.");
        sample(out, "cycles_total", &[], cycle.cycles_total);

        header(out, "synthesized_results_total", "counter", "Results synthesized for targets that did not answer before the cycle deadline.");
        sample(out, "synthesized_results_total", &[], cycle.synthesized_total);

        header(out, "registry_failures_total", "counter", "Cycles skipped because the target list could not be loaded.");
        sample(out, "registry_failures_total", &[], cycle.registry_failures_total);

        let workers = self.info.pool_size.to_string();
        header(out, "scrape_cycle_duration_seconds", "histogram", "Total time to complete a polling cycle.");
        histogram(out, "scrape_cycle_duration_seconds", &[("workers", workers.as_str())], &cycle.durations);

        let timeout = self.info.per_target_timeout.as_secs().to_string();
        let interval = self.info.cycle_interval.as_secs().to_string();
        header(out, "app_info", "gauge", "Application information.");
        sample(
            out,
            "app_info",
            &[
                ("version", self.info.version.as_str()),
                ("pool_size", workers.as_str()),
                ("timeout", timeout.as_str()),
                ("interval", interval.as_str()),
            ],
            1,
        );
    }
}
