//! Agent link behaviour against an in-process WebSocket agent

use deckrelay_connection::{AgentLink, LinkConfig, LinkError, LinkState};
use deckrelay_proto::{AgentAddress, AgentRequest, TelemetryMetric};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

type Handler = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct FakeAgent {
    address: AgentAddress,
    /// Every frame the agent received
    seen: mpsc::UnboundedReceiver<Value>,
    /// Accepted TCP connections
    accepted: Arc<AtomicUsize>,
}

/// Agent that answers each frame with whatever `handler` returns
async fn spawn_agent(handler: Handler) -> FakeAgent {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(tcp).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let value: Value = serde_json::from_str(&text).unwrap();
                        let _ = seen_tx.send(value.clone());
                        if let Some(reply) = handler(&value) {
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    FakeAgent {
        address: AgentAddress::new("127.0.0.1", port),
        seen,
        accepted,
    }
}

/// Agent that reports CPU usage and echoes command arguments back
fn telemetry_agent() -> Handler {
    Arc::new(|frame: &Value| {
        let id = frame.get("id")?.clone();
        match frame["type"].as_str()? {
            "get_cpu" => Some(json!({ "id": id, "status": "success", "value": 12.5 })),
            "command" if frame["command"] == "fail" => {
                Some(json!({ "id": id, "status": "error", "message": "command failed" }))
            }
            "command" => Some(json!({ "id": id, "status": "success", "value": frame["args"][0] })),
            _ => None,
        }
    })
}

fn silent_agent() -> Handler {
    Arc::new(|_: &Value| -> Option<Value> { None })
}

async fn wait_for_state(link: &AgentLink, state: LinkState) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while link.state() != state {
        assert!(
            Instant::now() < deadline,
            "link never reached {:?} (still {:?})",
            state,
            link.state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn connected_link(address: &AgentAddress, config: LinkConfig) -> AgentLink {
    init_tracing();
    let link = AgentLink::new(config);
    assert!(link.set_target(address.clone()));
    wait_for_state(&link, LinkState::Connected).await;
    link
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A port nothing listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_call_while_disconnected_fails_immediately() {
    let link = AgentLink::new(LinkConfig::default());

    let started = Instant::now();
    let result = link
        .call(TelemetryMetric::Cpu.request(), Duration::from_millis(2000))
        .await;

    assert!(matches!(result, Err(LinkError::NotConnected)));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(link.pending().count(), 0);
}

#[tokio::test]
async fn test_call_while_connecting_fails_immediately() {
    // Accepts TCP but never completes the WebSocket handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _hold = tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            sockets.push(socket);
        }
    });

    let link = AgentLink::new(LinkConfig::default());
    link.set_target(AgentAddress::new("127.0.0.1", port));
    assert_eq!(link.state(), LinkState::Connecting);

    let result = link
        .call(TelemetryMetric::Cpu.request(), Duration::from_secs(2))
        .await;

    assert!(matches!(result, Err(LinkError::NotConnected)));
    assert_eq!(link.pending().count(), 0);
    link.shutdown();
}

#[tokio::test]
async fn test_call_resolves_with_agent_reply() {
    let agent = spawn_agent(telemetry_agent()).await;
    let link = connected_link(&agent.address, LinkConfig::default()).await;

    let response = link
        .call(TelemetryMetric::Cpu.request(), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response.value, Some(json!(12.5)));
    assert_eq!(link.pending().count(), 0);
    link.shutdown();
}

#[tokio::test]
async fn test_agent_error_surfaces_as_remote_error() {
    let agent = spawn_agent(telemetry_agent()).await;
    let link = connected_link(&agent.address, LinkConfig::default()).await;

    let result = link
        .call(
            AgentRequest::Command {
                command: "fail".to_string(),
                args: vec![],
            },
            Duration::from_secs(2),
        )
        .await;

    match result {
        Err(LinkError::Remote(message)) => assert_eq!(message, "command failed"),
        other => panic!("expected remote error, got {:?}", other),
    }
    link.shutdown();
}

#[tokio::test]
async fn test_unanswered_call_times_out_and_is_removed() {
    let mut agent = spawn_agent(silent_agent()).await;
    let link = connected_link(&agent.address, LinkConfig::default()).await;

    let started = Instant::now();
    let result = link
        .call(TelemetryMetric::Cpu.request(), Duration::from_millis(50))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(LinkError::Timeout)));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(1000));

    let frame = agent.seen.recv().await.unwrap();
    let id = frame["id"].as_str().unwrap().to_string();
    assert!(!link.pending().contains(&id));
    assert_eq!(link.pending().count(), 0);
    link.shutdown();
}

#[tokio::test]
async fn test_send_omits_correlation_id() {
    let mut agent = spawn_agent(silent_agent()).await;
    let link = connected_link(&agent.address, LinkConfig::default()).await;

    link.send(AgentRequest::Volume { value: 0.25 }).unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), agent.seen.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, json!({ "type": "volume", "value": 0.25 }));
    assert_eq!(link.pending().count(), 0);
    link.shutdown();
}

#[tokio::test]
async fn test_concurrent_calls_receive_their_own_replies() {
    let agent = spawn_agent(telemetry_agent()).await;
    let link = connected_link(&agent.address, LinkConfig::default()).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let link = link.clone();
        handles.push(tokio::spawn(async move {
            let response = link
                .call(
                    AgentRequest::Command {
                        command: "echo".to_string(),
                        args: vec![format!("caller-{}", i)],
                    },
                    Duration::from_secs(2),
                )
                .await
                .unwrap();
            (i, response.value)
        }));
    }

    for handle in handles {
        let (i, value) = handle.await.unwrap();
        assert_eq!(value, Some(json!(format!("caller-{}", i))));
    }
    assert_eq!(link.pending().count(), 0);
    link.shutdown();
}

#[tokio::test]
async fn test_repeated_connect_keeps_single_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let _hold = tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            sockets.push(socket);
        }
    });

    let link = AgentLink::new(LinkConfig::default());
    assert!(link.set_target(AgentAddress::new("127.0.0.1", port)));

    for _ in 0..20 {
        assert!(!link.connect());
        assert!(!link.set_target(AgentAddress::new("127.0.0.1", port)));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(link.connect_attempts(), 1);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    link.shutdown();
}

#[tokio::test]
async fn test_drop_mid_flight_leaves_call_to_its_deadline_and_reconnects() {
    // Reads one frame, then hangs up; later connections stay open
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(tcp).await else {
                    return;
                };
                if n == 0 {
                    let _ = ws.next().await;
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let retry_delay = Duration::from_millis(400);
    let link = connected_link(
        &AgentAddress::new("127.0.0.1", port),
        LinkConfig::default().with_retry_delay(retry_delay),
    )
    .await;

    let caller = link.clone();
    let started = Instant::now();
    let call = tokio::spawn(async move {
        let result = caller
            .call(TelemetryMetric::Cpu.request(), Duration::from_millis(1200))
            .await;
        (result, started.elapsed())
    });

    wait_for_state(&link, LinkState::Disconnected).await;
    let dropped_at = Instant::now();
    assert!(link.retry_scheduled());
    assert_eq!(link.connect_attempts(), 1);
    assert_eq!(link.pending().count(), 1);

    // New calls fail fast while the link is down
    let fresh = link
        .call(TelemetryMetric::Ram.request(), Duration::from_secs(1))
        .await;
    assert!(matches!(fresh, Err(LinkError::NotConnected)));

    wait_for_state(&link, LinkState::Connected).await;
    assert!(dropped_at.elapsed() >= retry_delay - Duration::from_millis(50));
    assert_eq!(link.connect_attempts(), 2);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    let (result, elapsed) = call.await.unwrap();
    assert!(matches!(result, Err(LinkError::Timeout)));
    assert!(elapsed >= Duration::from_millis(1200));
    assert_eq!(link.pending().count(), 0);
    link.shutdown();
}

#[tokio::test]
async fn test_unreachable_agent_schedules_retry() {
    let port = closed_port().await;
    let link = AgentLink::new(LinkConfig::default().with_retry_delay(Duration::from_millis(150)));

    link.set_target(AgentAddress::new("127.0.0.1", port));
    wait_for_state(&link, LinkState::Disconnected).await;
    assert!(link.retry_scheduled());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(link.connect_attempts() >= 2);
    link.shutdown();
}

#[tokio::test]
async fn test_address_change_reconnects_to_new_agent() {
    let first = spawn_agent(Arc::new(|frame: &Value| {
        Some(json!({ "id": frame["id"], "status": "success", "value": "first" }))
    }))
    .await;
    let second = spawn_agent(Arc::new(|frame: &Value| {
        Some(json!({ "id": frame["id"], "status": "success", "value": "second" }))
    }))
    .await;

    let link = connected_link(&first.address, LinkConfig::default()).await;

    assert!(link.set_target(second.address.clone()));
    assert_eq!(link.target(), Some(second.address.clone()));
    wait_for_state(&link, LinkState::Connected).await;

    let response = link
        .call(TelemetryMetric::Gpu.request(), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.value, Some(json!("second")));
    assert_eq!(first.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(second.accepted.load(Ordering::SeqCst), 1);
    link.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_reconnecting() {
    let agent = spawn_agent(silent_agent()).await;
    let link = connected_link(
        &agent.address,
        LinkConfig::default().with_retry_delay(Duration::from_millis(100)),
    )
    .await;

    link.shutdown();
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(!link.retry_scheduled());
    assert!(matches!(
        link.send(AgentRequest::RestartServer),
        Err(LinkError::NotConnected)
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(link.connect_attempts(), 1);
    assert_eq!(agent.accepted.load(Ordering::SeqCst), 1);
}
