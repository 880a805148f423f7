//! Domain types shared by the client, scheduler and metrics crates.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Brand label used when a target row does not name one.
pub const UNKNOWN_BRAND: &str = "Unknown";

// ── Target ─────────────────────────────────────────────────────────

/// One monitored POS controller endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    /// `host` or `host:port`.
    pub address: String,
    /// Store name shown on dashboards (`store` label).
    pub display_name: String,
    pub group: String,
    #[serde(default = "default_brand")]
    pub brand: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_brand() -> String {
    UNKNOWN_BRAND.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Target {
    pub fn new(address: &str, display_name: &str, group: &str) -> Self {
        Self {
            address: address.to_string(),
            display_name: display_name.to_string(),
            group: group.to_string(),
            brand: default_brand(),
            enabled: true,
        }
    }

    pub fn with_brand(mut self, brand: &str) -> Self {
        self.brand = brand.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ── ErrorKind ──────────────────────────────────────────────────────

/// Canonical classification of a failed poll.
///
/// The string forms are part of the exposition contract: alert rules
/// select on `error_type="auth"` etc., so they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Auth,
    Parse,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in exposition order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Timeout,
        ErrorKind::Connection,
        ErrorKind::Auth,
        ErrorKind::Parse,
        ErrorKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Auth => "auth",
            ErrorKind::Parse => "parse",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Position in [`ErrorKind::ALL`], for array-indexed counters.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Device / FEP status ────────────────────────────────────────────

/// Online/offline state of a device or FEP link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn from_online(online: bool) -> Self {
        if online { Status::Online } else { Status::Offline }
    }

    /// Gauge value: 1 for online, 0 for offline.
    pub fn gauge(self) -> u8 {
        match self {
            Status::Online => 1,
            Status::Offline => 0,
        }
    }
}

/// Kind of forecourt device reported by the diagnostics document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Controller,
    Pump,
    Dcr,
    PriceSign,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Controller => "controller",
            DeviceKind::Pump => "pump",
            DeviceKind::Dcr => "dcr",
            DeviceKind::PriceSign => "price_sign",
        }
    }
}

/// Identity of one device on a controller.
///
/// Pumps and DCRs use the fueling point `sysid`, price signs their
/// device id. The controller is unique per target. Serializes as
/// `kind/id` so it can key a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub kind: DeviceKind,
    pub id: String,
}

impl DeviceKey {
    pub const CONTROLLER_ID: &'static str = "controller";

    pub fn controller() -> Self {
        Self {
            kind: DeviceKind::Controller,
            id: Self::CONTROLLER_ID.to_string(),
        }
    }

    pub fn new(kind: DeviceKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

impl Serialize for DeviceKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Which payment path a front-end processor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FepRole {
    Loyalty,
    Primary,
}

/// Connection status of one FEP, keyed by its brand name in
/// [`DiagnosticResult::fep_statuses`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FepStatus {
    pub role: FepRole,
    pub status: Status,
}

/// One request of the commander CGI exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CgiCommand {
    Validate,
    Forecourt,
    Payment,
}

impl CgiCommand {
    pub const ALL: [CgiCommand; 3] = [CgiCommand::Validate, CgiCommand::Forecourt, CgiCommand::Payment];

    /// Value of the `endpoint` metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            CgiCommand::Validate => "validate",
            CgiCommand::Forecourt => "forecourt",
            CgiCommand::Payment => "payment",
        }
    }
}

impl fmt::Display for CgiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── DiagnosticResult ───────────────────────────────────────────────

/// Outcome of polling one target once.
///
/// Built only through [`DiagnosticResult::success`] and
/// [`DiagnosticResult::failure`], so `error_kind.is_some() == !success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticResult {
    pub target: Target,
    /// Unix timestamp (seconds) when the poll finished.
    pub timestamp: u64,
    pub success: bool,
    #[serde(with = "duration_secs")]
    pub latency: Duration,
    pub device_statuses: BTreeMap<DeviceKey, Status>,
    /// FEP brand name → status.
    pub fep_statuses: BTreeMap<String, FepStatus>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Time spent in each CGI request that completed or failed before
    /// the exchange ended. A cached session token means no `validate`.
    #[serde(serialize_with = "duration_secs::serialize_map")]
    pub command_latencies: BTreeMap<CgiCommand, Duration>,
}

impl DiagnosticResult {
    pub fn success(
        target: Target,
        latency: Duration,
        device_statuses: BTreeMap<DeviceKey, Status>,
        fep_statuses: BTreeMap<String, FepStatus>,
    ) -> Self {
        Self {
            target,
            timestamp: epoch_secs(),
            success: true,
            latency,
            device_statuses,
            fep_statuses,
            error_kind: None,
            error_message: None,
            command_latencies: BTreeMap::new(),
        }
    }

    pub fn failure(target: Target, latency: Duration, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            target,
            timestamp: epoch_secs(),
            success: false,
            latency,
            device_statuses: BTreeMap::new(),
            fep_statuses: BTreeMap::new(),
            error_kind: Some(kind),
            error_message: Some(message.into()),
            command_latencies: BTreeMap::new(),
        }
    }

    pub fn with_command_latencies(mut self, latencies: BTreeMap<CgiCommand, Duration>) -> Self {
        self.command_latencies = latencies;
        self
    }

    /// Controller status, if the poll reported one.
    pub fn controller_status(&self) -> Option<Status> {
        self.device_statuses.get(&DeviceKey::controller()).copied()
    }

    /// Devices of one kind, in id order.
    pub fn devices(&self, kind: DeviceKind) -> impl Iterator<Item = (&str, Status)> {
        self.device_statuses
            .iter()
            .filter(move |(key, _)| key.kind == kind)
            .map(|(key, status)| (key.id.as_str(), *status))
    }
}

mod duration_secs {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::Serializer;

    use super::CgiCommand;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn serialize_map<S: Serializer>(m: &BTreeMap<CgiCommand, Duration>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(m.iter().map(|(command, d)| (command.as_str(), d.as_secs_f64())))
    }
}

// ── CycleStats ─────────────────────────────────────────────────────

/// Summary of one polling cycle. One live instance, overwritten each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleStats {
    /// Unix timestamp (seconds) when the cycle started.
    pub started_at: u64,
    pub duration: Duration,
    /// All targets in the registry, disabled ones included.
    pub targets_total: usize,
    pub targets_enabled: usize,
    /// Highest number of simultaneously in-flight queries observed.
    pub concurrency_peak: usize,
    /// Results produced by a worker before the deadline.
    pub completed: usize,
    /// Results synthesized for stragglers, undispatched targets or panics.
    pub synthesized: usize,
}

/// Current Unix time in whole seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
