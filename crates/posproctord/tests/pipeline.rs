//! Full pipeline: real client → worker pool → polling loop → /metrics.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tower::ServiceExt;

use posproctor_client::CommanderClient;
use posproctor_core::{ClientConfig, Credentials, PollerConfig, Scheme, StaticTargetSource, Target};
use posproctor_metrics::{AppInfo, MetricsRegistry};
use posproctor_scheduler::{Orchestrator, OrchestratorConfig, PoolConfig, WorkerPool};

const COOKIE: &str = r#"<?xml version="1.0"?><vfi:credential xmlns:vfi="urn:vfi"><vfi:cookie>abc</vfi:cookie></vfi:credential>"#;
const FORECOURT: &str = r#"<?xml version="1.0"?>
<diag:forecourtDiagnostics xmlns:diag="urn:vfi-sapphire:diagnostics.2017-01-17">
  <controller status="Online"/>
  <fuelingPoint sysid="1"><device type="Pump" status="Online" isAvailable="true"/></fuelingPoint>
</diag:forecourtDiagnostics>"#;
const PAYMENT: &str = r#"<?xml version="1.0"?>
<paymentDiagnostics>
  <fepDetail fepName="Worldpay" isPrimary="true"><connectionStatus>true</connectionStatus></fepDetail>
</paymentDiagnostics>"#;

async fn healthy_commander() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(answer(stream));
        }
    });
    address
}

async fn answer(mut stream: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf);
    let body = if head.contains("cmd=validate") {
        COOKIE
    } else if head.contains("cmd=vforecourtdiagnostics") {
        FORECOURT
    } else {
        PAYMENT
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/xml\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// An address nobody listens on.
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn scrape(metrics: &Arc<MetricsRegistry>) -> String {
    let response = posproctor_exporter::build_router(metrics.clone())
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn one_cycle_reaches_the_exposition_endpoint() {
    let healthy = healthy_commander().await;
    let dead = dead_address().await;

    let client = CommanderClient::new(
        &ClientConfig {
            scheme: Scheme::Http,
            ..ClientConfig::default()
        },
        Credentials::new("manager", "secret"),
    )
    .unwrap();

    let poller = PollerConfig {
        pool_size: 2,
        per_target_timeout: Duration::from_secs(5),
        cycle_interval: Duration::from_secs(600),
        cycle_budget: Some(Duration::from_secs(20)),
        shutdown_grace: Duration::from_secs(5),
    };
    let metrics = Arc::new(MetricsRegistry::new(AppInfo::default()));
    let pool = WorkerPool::new(Arc::new(client), metrics.clone(), PoolConfig::from(&poller));
    let source = StaticTargetSource::new(vec![
        Target::new(&healthy, "Store 1", "west").with_brand("Shell"),
        Target::new(&dead, "Store 2", "west").with_brand("Shell"),
        Target::new("10.255.255.1", "Store 3", "west").disabled(),
    ]);
    let orchestrator = Orchestrator::new(pool, source, OrchestratorConfig::from(&poller)).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(orchestrator.run(shutdown_rx));

    let mut text = String::new();
    for _ in 0..100 {
        text = scrape(&metrics).await;
        if text.contains("posproctor_cycles_total 1\n") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(text.contains("posproctor_cycles_total 1\n"), "{text}");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), loop_handle)
        .await
        .unwrap()
        .unwrap();

    let up = format!(r#"store="Store 1",ip="{healthy}",group="west",brand="Shell""#);
    let down = format!(r#"store="Store 2",ip="{dead}",group="west",brand="Shell""#);

    assert!(text.contains(&format!("posproctor_scrape_success{{{up}}} 1\n")), "{text}");
    assert!(text.contains(&format!("posproctor_pump_status{{{up},fueling_point_id=\"1\"}} 1\n")), "{text}");
    assert!(text.contains(&format!("posproctor_scrape_success{{{down}}} 0\n")), "{text}");
    assert!(
        text.contains(&format!("posproctor_query_failures_total{{{down},error_type=\"connection\"}} 1\n")),
        "{text}"
    );
    assert!(text.contains("posproctor_total_commanders{enabled=\"true\"} 2\n"), "{text}");
    assert!(text.contains("posproctor_total_commanders{enabled=\"false\"} 1\n"), "{text}");
    assert!(!text.contains("Store 3"), "{text}");
    assert!(!text.contains("secret"));
}
