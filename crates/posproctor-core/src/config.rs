//! posproctor.toml configuration parser.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable overriding the configured username.
pub const USERNAME_ENV: &str = "POSPROCTOR_USERNAME";
/// Environment variable overriding the configured password.
pub const PASSWORD_ENV: &str = "POSPROCTOR_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct ProctorConfig {
    /// TOML file holding the `[[target]]` list.
    pub targets_file: PathBuf,
    /// Optional TOML file with a `[credentials]` table.
    pub credentials_file: Option<PathBuf>,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Maximum number of concurrent queries.
    pub pool_size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub per_target_timeout: Duration,
    /// Spacing between cycle starts.
    #[serde(deserialize_with = "de_duration")]
    pub cycle_interval: Duration,
    /// Ceiling on one cycle; defaults to `cycle_interval`.
    #[serde(deserialize_with = "de_opt_duration")]
    pub cycle_budget: Option<Duration>,
    #[serde(deserialize_with = "de_duration")]
    pub shutdown_grace: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            per_target_timeout: Duration::from_secs(60),
            cycle_interval: Duration::from_secs(5 * 60),
            cycle_budget: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl PollerConfig {
    /// The effective cycle ceiling.
    pub fn cycle_budget(&self) -> Duration {
        self.cycle_budget.unwrap_or(self.cycle_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub scheme: Scheme,
    /// Commanders ship self-signed certificates, so this is off by default.
    pub verify_tls: bool,
    /// FEP names (case-insensitive) that identify the loyalty processor.
    pub loyalty_names: Vec<String>,
    #[serde(deserialize_with = "de_duration")]
    pub token_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Https,
            verify_tls: false,
            loyalty_names: vec!["rewards 2 go".to_string()],
            token_ttl: Duration::from_secs(20 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub listen: SocketAddr,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

impl ProctorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        // Relative paths are resolved against the config file's directory.
        if let Some(dir) = path.parent() {
            config.targets_file = dir.join(&config.targets_file);
            config.credentials_file = config.credentials_file.map(|f| dir.join(f));
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: ProctorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let p = &self.poller;
        if p.pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "poller.pool_size",
                message: "must be at least 1".to_string(),
            });
        }
        let durations = [
            ("poller.per_target_timeout", p.per_target_timeout),
            ("poller.cycle_interval", p.cycle_interval),
            ("poller.cycle_budget", p.cycle_budget()),
            ("poller.shutdown_grace", p.shutdown_grace),
            ("client.token_ttl", self.client.token_ttl),
        ];
        for (key, d) in durations {
            if d.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve credentials: environment first, then `credentials_file`.
    pub fn credentials(&self) -> ConfigResult<Credentials> {
        let from_env = (std::env::var(USERNAME_ENV).ok(), std::env::var(PASSWORD_ENV).ok());
        if let (Some(username), Some(password)) = from_env {
            return Ok(Credentials::new(username, password));
        }

        let Some(path) = &self.credentials_file else {
            return Err(ConfigError::Credentials(format!(
                "set {USERNAME_ENV}/{PASSWORD_ENV} or credentials_file"
            )));
        };
        Credentials::from_file(path)
    }
}

// ── Credentials ────────────────────────────────────────────────────

/// Commander API credentials. Opaque: `Debug` never prints the password.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    password: String,
}

#[derive(Deserialize)]
struct CredentialsFile {
    credentials: Credentials,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CredentialsFile = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if file.credentials.username.is_empty() {
            return Err(ConfigError::Credentials("username is empty".to_string()));
        }
        Ok(file.credentials)
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Durations ──────────────────────────────────────────────────────

/// Parse a duration string like "5s", "500ms", "2m", "1h" or "30".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().and_then(|h| h.checked_mul(3600)).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Secs(u64),
}

impl RawDuration {
    fn resolve<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Secs(n) => Ok(Duration::from_secs(n)),
            RawDuration::Text(s) => {
                parse_duration(&s).ok_or_else(|| E::custom(format!("invalid duration `{s}`")))
            }
        }
    }
}

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    RawDuration::deserialize(d)?.resolve()
}

fn de_opt_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<RawDuration>::deserialize(d)?
        .map(RawDuration::resolve)
        .transpose()
}
