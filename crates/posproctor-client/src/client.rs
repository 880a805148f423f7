//! The diagnostic client.
//!
//! [`DiagnosticClient`] is the seam the scheduler polls through;
//! [`CommanderClient`] is the production implementation speaking the
//! commander CGI protocol.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use posproctor_core::{CgiCommand, ClientConfig, Credentials, DiagnosticResult, Scheme, Target};

use crate::classify::{QueryFailure, classify};
use crate::parse::{self, Forecourt, Payment};
use crate::token::TokenCache;
use crate::transport::{Endpoint, TlsConfig, Transport, encode_query_value};

const CGI_PATH: &str = "/cgi-bin/CGILink";

type Latencies = BTreeMap<CgiCommand, Duration>;

/// Await one CGI request, noting how long it took whatever the outcome.
async fn timed<T>(
    latencies: &mut Latencies,
    command: CgiCommand,
    request: impl Future<Output = Result<T, QueryFailure>>,
) -> Result<T, QueryFailure> {
    let started = Instant::now();
    let outcome = request.await;
    latencies.insert(command, started.elapsed());
    outcome
}

/// Polls one target and reports its diagnostics.
///
/// `query` never fails: every failure comes back as a
/// [`DiagnosticResult`] with its classified error kind. `timeout` bounds
/// the full exchange.
pub trait DiagnosticClient: Send + Sync + 'static {
    fn query(&self, target: &Target, timeout: Duration) -> impl Future<Output = DiagnosticResult> + Send;
}

/// Client for Verifone-style commander controllers.
pub struct CommanderClient {
    transport: Transport,
    scheme: Scheme,
    credentials: Credentials,
    loyalty_names: Vec<String>,
    tokens: TokenCache,
}

impl CommanderClient {
    pub fn new(config: &ClientConfig, credentials: Credentials) -> Result<Self, rustls::Error> {
        let transport = match config.scheme {
            Scheme::Http => Transport::plain(),
            Scheme::Https if config.verify_tls => Transport::with_tls(TlsConfig::with_system_roots()?),
            Scheme::Https => Transport::with_tls(TlsConfig::without_verification()?),
        };
        Ok(Self {
            transport,
            scheme: config.scheme,
            credentials,
            loyalty_names: config.loyalty_names.clone(),
            tokens: TokenCache::new(config.token_ttl),
        })
    }

    /// Session tokens currently cached.
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    fn cache_key(&self, target: &Target) -> String {
        format!("{}:{}", target.address, self.credentials.username)
    }

    async fn authenticate(&self, endpoint: &Endpoint) -> Result<String, QueryFailure> {
        let path = format!(
            "{CGI_PATH}?cmd=validate&user={}&passwd={}",
            encode_query_value(&self.credentials.username),
            encode_query_value(self.credentials.password()),
        );
        let resp = self.transport.get(endpoint, &path, "validate").await?;
        parse::session_cookie(&resp.body)
    }

    async fn command(&self, endpoint: &Endpoint, command: &'static str, cookie: &str) -> Result<bytes::Bytes, QueryFailure> {
        let path = format!("{CGI_PATH}?cmd={command}&cookie={}", encode_query_value(cookie));
        Ok(self.transport.get(endpoint, &path, command).await?.body)
    }

    async fn exchange(
        &self,
        target: &Target,
        key: &str,
        latencies: &mut Latencies,
    ) -> Result<(Forecourt, Payment), QueryFailure> {
        let endpoint = Endpoint::parse(&target.address, self.scheme)?;

        let cookie = match self.tokens.get(key) {
            Some(cookie) => cookie,
            None => {
                let cookie = timed(latencies, CgiCommand::Validate, self.authenticate(&endpoint)).await?;
                self.tokens.insert(key, cookie.clone());
                cookie
            }
        };

        let request = self.command(&endpoint, "vforecourtdiagnostics", &cookie);
        let body = timed(latencies, CgiCommand::Forecourt, request).await?;
        let devices = parse::forecourt(&body)?;

        let request = self.command(&endpoint, "vpaymentdiagnostics", &cookie);
        let payment = match timed(latencies, CgiCommand::Payment, request).await {
            Ok(body) => parse::payment(&body, &self.loyalty_names),
            Err(e) => Err(e),
        };
        let feps = payment.unwrap_or_else(|e| {
            warn!(address = %target.address, error = %e, "payment diagnostics unavailable");
            BTreeMap::new()
        });

        Ok((devices, feps))
    }
}

impl DiagnosticClient for CommanderClient {
    async fn query(&self, target: &Target, timeout: Duration) -> DiagnosticResult {
        let start = Instant::now();
        let key = self.cache_key(target);
        let mut latencies = Latencies::new();

        let outcome = match tokio::time::timeout(timeout, self.exchange(target, &key, &mut latencies)).await {
            Ok(result) => result,
            Err(_) => Err(QueryFailure::Timeout(timeout)),
        };
        let latency = start.elapsed();

        match outcome {
            Ok((devices, feps)) => {
                debug!(
                    address = %target.address,
                    store = %target.display_name,
                    devices = devices.len(),
                    feps = feps.len(),
                    latency_ms = latency.as_millis() as u64,
                    "poll succeeded"
                );
                DiagnosticResult::success(target.clone(), latency, devices, feps).with_command_latencies(latencies)
            }
            Err(failure) => {
                self.tokens.invalidate(&key);
                let kind = classify(&failure);
                warn!(
                    address = %target.address,
                    store = %target.display_name,
                    error_type = %kind,
                    error = %failure,
                    "poll failed"
                );
                DiagnosticResult::failure(target.clone(), latency, kind, failure.to_string())
                    .with_command_latencies(latencies)
            }
        }
    }
}
