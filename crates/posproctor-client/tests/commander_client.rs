//! End-to-end exchanges against an in-process fake commander.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use posproctor_client::{CommanderClient, DiagnosticClient};
use posproctor_core::{
    CgiCommand, ClientConfig, Credentials, DeviceKey, DeviceKind, ErrorKind, FepRole, Scheme, Status, Target,
};

const COOKIE: &str = r#"<?xml version="1.0"?><vfi:credential xmlns:vfi="urn:vfi"><vfi:cookie>tok-123</vfi:cookie></vfi:credential>"#;
const NO_COOKIE: &str = r#"<?xml version="1.0"?><vfi:fault xmlns:vfi="urn:vfi"><vfi:faultString>denied</vfi:faultString></vfi:fault>"#;
const FORECOURT: &str = r#"<?xml version="1.0"?>
<diag:forecourtDiagnostics xmlns:diag="urn:vfi-sapphire:diagnostics.2017-01-17">
  <controller status="Online"/>
  <fuelingPoint sysid="1"><device type="Pump" status="Online" isAvailable="true"/></fuelingPoint>
  <fuelingPoint sysid="2"><device type="Pump" status="Offline" isAvailable="true"/>
    <device type="DCR" status="Online" isAvailable="true"/></fuelingPoint>
  <device type="Fuel Price Display" id="sign-a" status="Online" isAvailable="true"/>
</diag:forecourtDiagnostics>"#;
const PAYMENT: &str = r#"<?xml version="1.0"?>
<paymentDiagnostics>
  <fepDetail fepName="Worldpay" isPrimary="true"><connectionStatus>true</connectionStatus></fepDetail>
  <fepDetail fepName="Rewards 2 Go" isPrimary="false"><connectionStatus>false</connectionStatus></fepDetail>
</paymentDiagnostics>"#;

/// How the fake commander answers each command.
#[derive(Clone, Copy)]
enum Behaviour {
    Healthy,
    Unauthorized,
    NoCookie,
    GarbageForecourt,
    PaymentDown,
    Hang,
}

struct FakeCommander {
    address: String,
    validates: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl FakeCommander {
    async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let validates = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));

        let (v, r) = (validates.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let (v, r) = (v.clone(), r.clone());
                tokio::spawn(async move { serve(stream, behaviour, &v, &r).await });
            }
        });

        Self {
            address,
            validates,
            requests,
        }
    }

    fn target(&self) -> Target {
        Target::new(&self.address, "Store 9", "east").with_brand("Shell")
    }
}

async fn serve(mut stream: TcpStream, behaviour: Behaviour, validates: &AtomicUsize, requests: &AtomicUsize) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    requests.fetch_add(1, Ordering::SeqCst);
    let head = String::from_utf8_lossy(&buf);
    let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();

    if matches!(behaviour, Behaviour::Hang) {
        tokio::time::sleep(Duration::from_secs(30)).await;
        return;
    }

    let (status, body) = if path.contains("cmd=validate") {
        validates.fetch_add(1, Ordering::SeqCst);
        assert!(path.contains("user=manager"), "{path}");
        assert!(path.contains("passwd=p%40ss"), "{path}");
        match behaviour {
            Behaviour::Unauthorized => (401, ""),
            Behaviour::NoCookie => (200, NO_COOKIE),
            _ => (200, COOKIE),
        }
    } else if path.contains("cmd=vforecourtdiagnostics") {
        assert!(path.contains("cookie=tok-123"), "{path}");
        match behaviour {
            Behaviour::GarbageForecourt => (200, "<html>maintenance"),
            _ => (200, FORECOURT),
        }
    } else if path.contains("cmd=vpaymentdiagnostics") {
        match behaviour {
            Behaviour::PaymentDown => (500, ""),
            _ => (200, PAYMENT),
        }
    } else {
        (404, "")
    };

    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: text/xml\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn client() -> CommanderClient {
    let config = ClientConfig {
        scheme: Scheme::Http,
        ..ClientConfig::default()
    };
    CommanderClient::new(&config, Credentials::new("manager", "p@ss")).unwrap()
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn healthy_commander_reports_every_device() {
    let fake = FakeCommander::start(Behaviour::Healthy).await;
    let result = client().query(&fake.target(), TIMEOUT).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.error_kind, None);
    assert_eq!(result.controller_status(), Some(Status::Online));
    assert_eq!(
        result.device_statuses[&DeviceKey::new(DeviceKind::Pump, "2")],
        Status::Offline
    );
    assert_eq!(
        result.device_statuses[&DeviceKey::new(DeviceKind::Dcr, "2")],
        Status::Online
    );
    assert_eq!(
        result.device_statuses[&DeviceKey::new(DeviceKind::PriceSign, "sign-a")],
        Status::Online
    );
    assert_eq!(result.fep_statuses["Worldpay"].role, FepRole::Primary);
    assert_eq!(result.fep_statuses["Rewards 2 Go"].status, Status::Offline);
    assert_eq!(fake.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn session_token_is_reused_across_polls() {
    let fake = FakeCommander::start(Behaviour::Healthy).await;
    let client = client();
    for _ in 0..3 {
        assert!(client.query(&fake.target(), TIMEOUT).await.success);
    }
    assert_eq!(fake.validates.load(Ordering::SeqCst), 1);
    assert_eq!(client.tokens().len(), 1);
}

#[tokio::test]
async fn each_cgi_request_is_timed() {
    let fake = FakeCommander::start(Behaviour::Healthy).await;
    let client = client();

    let first = client.query(&fake.target(), TIMEOUT).await;
    let commands: Vec<_> = first.command_latencies.keys().copied().collect();
    assert_eq!(commands, CgiCommand::ALL);

    // Cached token: no validate request on the second poll.
    let second = client.query(&fake.target(), TIMEOUT).await;
    let commands: Vec<_> = second.command_latencies.keys().copied().collect();
    assert_eq!(commands, [CgiCommand::Forecourt, CgiCommand::Payment]);
}

#[tokio::test]
async fn failed_request_is_still_timed() {
    let fake = FakeCommander::start(Behaviour::GarbageForecourt).await;
    let result = client().query(&fake.target(), TIMEOUT).await;
    assert_eq!(result.error_kind, Some(ErrorKind::Parse));
    assert!(result.command_latencies.contains_key(&CgiCommand::Forecourt));
    assert!(!result.command_latencies.contains_key(&CgiCommand::Payment));
}

#[tokio::test]
async fn http_401_is_auth() {
    let fake = FakeCommander::start(Behaviour::Unauthorized).await;
    let client = client();
    let result = client.query(&fake.target(), TIMEOUT).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Auth));
    assert!(client.tokens().is_empty());
}

#[tokio::test]
async fn missing_cookie_is_auth() {
    let fake = FakeCommander::start(Behaviour::NoCookie).await;
    let result = client().query(&fake.target(), TIMEOUT).await;
    assert_eq!(result.error_kind, Some(ErrorKind::Auth));
}

#[tokio::test]
async fn error_message_never_contains_password() {
    let fake = FakeCommander::start(Behaviour::Unauthorized).await;
    let result = client().query(&fake.target(), TIMEOUT).await;
    let message = result.error_message.unwrap();
    assert!(!message.contains("p@ss"));
    assert!(!message.contains("p%40ss"));
}

#[tokio::test]
async fn undecodable_forecourt_is_parse_and_evicts_token() {
    let fake = FakeCommander::start(Behaviour::GarbageForecourt).await;
    let client = client();
    let result = client.query(&fake.target(), TIMEOUT).await;

    assert_eq!(result.error_kind, Some(ErrorKind::Parse));
    assert!(client.tokens().is_empty());

    client.query(&fake.target(), TIMEOUT).await;
    assert_eq!(fake.validates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn payment_failure_keeps_forecourt() {
    let fake = FakeCommander::start(Behaviour::PaymentDown).await;
    let result = client().query(&fake.target(), TIMEOUT).await;

    assert!(result.success);
    assert_eq!(result.controller_status(), Some(Status::Online));
    assert!(result.fep_statuses.is_empty());
}

#[tokio::test]
async fn refused_connection_is_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = client()
        .query(&Target::new(&address, "Store 0", "east"), TIMEOUT)
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::Connection));
}

#[tokio::test]
async fn hung_commander_is_timeout_within_ceiling() {
    let fake = FakeCommander::start(Behaviour::Hang).await;
    let timeout = Duration::from_millis(200);

    let started = std::time::Instant::now();
    let result = client().query(&fake.target(), timeout).await;

    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.latency >= timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}
