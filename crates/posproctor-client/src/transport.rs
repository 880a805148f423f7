//! HTTP(S) transport for the commander CGI interface.
//!
//! One TCP connection per request, optionally wrapped in rustls, driven
//! by a hyper http1 client connection. The caller owns the timeout.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use posproctor_core::Scheme;

use crate::classify::QueryFailure;

const USER_AGENT: &str = concat!("posproctor/", env!("CARGO_PKG_VERSION"));

/// Where a target's CGI interface lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Split a target address (`host`, `host:port`, `[v6]` or `[v6]:port`).
    pub fn parse(address: &str, scheme: Scheme) -> Result<Self, QueryFailure> {
        let address = address.trim();
        if address.is_empty() {
            return Err(QueryFailure::Request("empty address".to_string()));
        }
        let invalid_port = || QueryFailure::Request(format!("invalid port in `{address}`"));

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| QueryFailure::Request(format!("unterminated `[` in `{address}`")))?;
            let port = match tail {
                "" => scheme.default_port(),
                _ => tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(invalid_port)?,
            };
            (host.to_string(), port)
        } else {
            match address.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => {
                    (host.to_string(), port.parse::<u16>().map_err(|_| invalid_port())?)
                }
                // Bare IPv6 literal without a port.
                _ => (address.to_string(), scheme.default_port()),
            }
        };
        if host.is_empty() {
            return Err(QueryFailure::Request(format!("missing host in `{address}`")));
        }
        Ok(Self { scheme, host, port })
    }

    /// `host:port`, as used for connect and the `Host` header. IPv6
    /// literals are bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Status and collected body of one response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: http::StatusCode,
    pub body: Bytes,
}

// ── TlsConfig ────────────────────────────────────────────────────────

/// Configuration for TLS connections to commanders.
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// Verify server certificates against the Mozilla root store.
    pub fn with_system_roots() -> Result<Self, rustls::Error> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// Accept any server certificate.
    ///
    /// Commanders present self-signed certificates issued per site, so
    /// there is no chain to verify against.
    pub fn without_verification() -> Result<Self, rustls::Error> {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Issues GET requests against commander endpoints.
#[derive(Clone)]
pub struct Transport {
    tls: Option<TlsConnector>,
}

impl Transport {
    /// Plain-HTTP transport.
    pub fn plain() -> Self {
        Self { tls: None }
    }

    pub fn with_tls(tls: TlsConfig) -> Self {
        Self {
            tls: Some(TlsConnector::from(tls.client_config)),
        }
    }

    /// GET `path` on `endpoint` and collect the body.
    ///
    /// `command` only labels errors and logs.
    pub async fn get(
        &self,
        endpoint: &Endpoint,
        path: &str,
        command: &'static str,
    ) -> Result<RawResponse, QueryFailure> {
        let authority = endpoint.authority();
        let stream = TcpStream::connect(&authority)
            .await
            .map_err(|source| QueryFailure::Connect {
                address: authority.clone(),
                source,
            })?;

        match (endpoint.scheme, &self.tls) {
            (Scheme::Https, Some(connector)) => {
                let server_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
                    .map_err(|e| QueryFailure::Request(format!("invalid tls server name: {e}")))?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|source| QueryFailure::Tls {
                        address: authority.clone(),
                        source,
                    })?;
                exchange(tls_stream, &authority, path, command).await
            }
            (Scheme::Https, None) => Err(QueryFailure::Request(
                "https endpoint on a plain transport".to_string(),
            )),
            (Scheme::Http, _) => exchange(stream, &authority, path, command).await,
        }
    }
}

async fn exchange<S>(
    stream: S,
    authority: &str,
    path: &str,
    command: &'static str,
) -> Result<RawResponse, QueryFailure>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // Drive the connection in the background; it ends when `sender` drops.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority)
        .header("user-agent", USER_AGENT)
        .body(Empty::<Bytes>::new())
        .map_err(|e| QueryFailure::Request(e.to_string()))?;

    let resp = sender.send_request(req).await?;
    let status = resp.status();
    let body = resp.into_body().collect().await?.to_bytes();

    debug!(%authority, command, status = status.as_u16(), bytes = body.len(), "commander responded");

    if !status.is_success() {
        return Err(QueryFailure::Status {
            command,
            status: status.as_u16(),
        });
    }
    Ok(RawResponse { status, body })
}

/// Percent-encode a query-string value (RFC 3986 unreserved set kept).
pub fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_default_ports() {
        let e = Endpoint::parse("10.0.0.5", Scheme::Https).unwrap();
        assert_eq!(e.authority(), "10.0.0.5:443");
        let e = Endpoint::parse("10.0.0.5", Scheme::Http).unwrap();
        assert_eq!(e.authority(), "10.0.0.5:80");
    }

    #[test]
    fn endpoint_explicit_port() {
        let e = Endpoint::parse("commander.local:8443", Scheme::Https).unwrap();
        assert_eq!(e.host, "commander.local");
        assert_eq!(e.port, 8443);
    }

    #[test]
    fn endpoint_rejects_bad_port_and_empty() {
        assert!(Endpoint::parse("10.0.0.5:http", Scheme::Http).is_err());
        assert!(Endpoint::parse("  ", Scheme::Http).is_err());
    }

    #[test]
    fn endpoint_bracketed_ipv6() {
        let e = Endpoint::parse("[::1]:8443", Scheme::Https).unwrap();
        assert_eq!(e.host, "::1");
        assert_eq!(e.port, 8443);
        assert_eq!(e.authority(), "[::1]:8443");

        let e = Endpoint::parse("[fe80::2]", Scheme::Http).unwrap();
        assert_eq!(e.host, "fe80::2");
        assert_eq!(e.port, 80);

        let e = Endpoint::parse("fd00::7", Scheme::Https).unwrap();
        assert_eq!(e.authority(), "[fd00::7]:443");
    }

    #[test]
    fn endpoint_rejects_malformed_ipv6() {
        for bad in ["[::1", "[::1]8443", "[::1]:x", "[]:80"] {
            let err = Endpoint::parse(bad, Scheme::Https).unwrap_err();
            assert_eq!(crate::classify(&err), posproctor_core::ErrorKind::Unknown, "{bad}");
        }
    }

    #[test]
    fn encode_keeps_unreserved() {
        assert_eq!(encode_query_value("Manager_1.x~"), "Manager_1.x~");
    }

    #[test]
    fn encode_escapes_reserved() {
        assert_eq!(encode_query_value("p@ss w&rd="), "p%40ss%20w%26rd%3D");
    }

    #[test]
    fn tls_configs_build() {
        assert!(TlsConfig::with_system_roots().is_ok());
        assert!(TlsConfig::without_verification().is_ok());
    }
}
