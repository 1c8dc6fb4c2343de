//! Integration tests for the connection lifecycle.
//!
//! Reconnect schedule, retry exhaustion, and teardown, exercised through a
//! bare `ConnectionHandle` on the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use transitedge_connector_lib::metrics::{encode_metrics, FeedMetrics, UNHANDLED_EVENT_LABEL};
use transitedge_connector_lib::{ConnectionConfig, ConnectionHandle, LifecycleEvent, Liveness};
use transitedge_metadata::ConnectionOptions;
use transitedge_middleware::{Frame, InMemoryTransport, MemoryServer};

const ENDPOINT: &str = "mem://status";

fn activate(config: ConnectionConfig) -> (ConnectionHandle, MemoryServer) {
    let (transport, server) = InMemoryTransport::new();
    (ConnectionHandle::activate(config, Arc::new(transport)), server)
}

async fn next_failure_or_exhausted(
    events: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>,
) -> LifecycleEvent {
    loop {
        let event = events.recv().await.unwrap();
        if !matches!(event, LifecycleEvent::StateChanged(_)) {
            return event;
        }
    }
}

// =============================================================================
// Reconnect schedule
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_and_exhaustion() {
    let start = Instant::now();
    let (transport, server) = InMemoryTransport::new();
    server.refuse_connections(true);
    let handle = ConnectionHandle::activate(
        ConnectionConfig::new("status", ENDPOINT),
        Arc::new(transport),
    );
    let mut events = handle.lifecycle_events();

    let mut delays = Vec::new();
    let exhausted_after = loop {
        match next_failure_or_exhausted(&mut events).await {
            LifecycleEvent::ConnectFailed { .. } => {}
            LifecycleEvent::ReconnectScheduled { attempt, delay } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay);
            }
            LifecycleEvent::RetriesExhausted { attempts } => break attempts,
            other => panic!("unexpected lifecycle event: {:?}", other),
        }
    };

    assert_eq!(exhausted_after, 5);
    assert_eq!(
        delays,
        [1000, 2000, 4000, 5000, 5000]
            .map(Duration::from_millis)
            .to_vec()
    );

    let attempts = server.connect_attempts().await;
    assert_eq!(attempts.len(), 6);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, delays);
    assert_eq!(attempts[0], start);

    // Driver has given up and stays down
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(handle.liveness(), Liveness::Disconnected);
    assert!(!handle.is_active());
    assert_eq!(server.connect_attempts().await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_reset_after_successful_connect() {
    let (handle, mut server) = activate(ConnectionConfig::new("status", ENDPOINT));
    let mut events = handle.lifecycle_events();

    for _ in 0..3 {
        let session = server.accept().await.unwrap();
        drop(session);
        loop {
            if let LifecycleEvent::ReconnectScheduled { attempt, delay } =
                next_failure_or_exhausted(&mut events).await
            {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(1));
                break;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_gives_up_immediately() {
    let (handle, mut server) = activate(
        ConnectionConfig::new("status", ENDPOINT).options(ConnectionOptions::no_reconnect()),
    );
    let mut liveness = handle.watch_liveness();

    let session = server.accept().await.unwrap();
    liveness.wait_for(|l| l.is_connected()).await.unwrap();
    drop(session);
    liveness
        .wait_for(|l| *l == Liveness::Disconnected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.connect_attempts().await.len(), 1);
    assert!(!handle.is_active());
}

// =============================================================================
// Liveness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_liveness_sequence() {
    let (handle, mut server) = activate(ConnectionConfig::new("status", ENDPOINT));
    assert_eq!(handle.liveness(), Liveness::Disconnected);
    let mut events = handle.lifecycle_events();

    let session = server.accept().await.unwrap();
    drop(session);

    let mut states = Vec::new();
    while states.len() < 3 {
        if let LifecycleEvent::StateChanged(state) = events.recv().await.unwrap() {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        [Liveness::Connecting, Liveness::Connected, Liveness::Disconnected]
    );
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_handlers_receive_payloads_in_order() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let config = ConnectionConfig::new("status", ENDPOINT)
        .on("status", move |payload| sink.lock().unwrap().push(payload))
        .emit_on_connect(Frame::new("subscribe", json!({"topic": "status"})));
    let (handle, mut server) = activate(config);

    let mut session = server.accept().await.unwrap();
    let subscribe = session.recv().await.unwrap();
    assert_eq!(subscribe.payload, json!({"topic": "status"}));

    session.push("status", json!(1)).await;
    session.push("other", json!("ignored")).await;
    session.push("status", json!(2)).await;

    while seen.lock().unwrap().len() < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);
    assert!(handle.is_connected());
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_deactivate_is_idempotent() {
    let (mut handle, mut server) = activate(
        ConnectionConfig::new("status", ENDPOINT)
            .refresh_every(Duration::from_secs(5), Frame::bare("poll")),
    );
    let mut session = server.accept().await.unwrap();
    handle.watch_liveness().wait_for(|l| l.is_connected()).await.unwrap();

    handle.deactivate().await;
    assert_eq!(handle.liveness(), Liveness::Disconnected);
    assert!(!handle.is_active());
    // Session released, no further polls
    assert!(session.recv().await.is_none());

    handle.deactivate().await;
    assert_eq!(handle.liveness(), Liveness::Disconnected);

    assert!(matches!(
        handle.emit(Frame::bare("poll")),
        Err(transitedge_connector_lib::EmitError::NotConnected { .. })
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.connect_attempts().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_session() {
    let (handle, mut server) = activate(ConnectionConfig::new("status", ENDPOINT));
    let mut session = server.accept().await.unwrap();
    let liveness = handle.watch_liveness();

    drop(handle);
    assert!(session.recv().await.is_none());
    assert_eq!(*liveness.borrow(), Liveness::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.connect_attempts().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_while_backing_off() {
    let (transport, server) = InMemoryTransport::new();
    server.refuse_connections(true);
    let mut handle = ConnectionHandle::activate(
        ConnectionConfig::new("status", ENDPOINT),
        Arc::new(transport),
    );
    let mut events = handle.lifecycle_events();

    loop {
        if let LifecycleEvent::ReconnectScheduled { .. } =
            next_failure_or_exhausted(&mut events).await
        {
            break;
        }
    }

    handle.deactivate().await;
    assert_eq!(handle.liveness(), Liveness::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.connect_attempts().await.len(), 1);
}

// =============================================================================
// Robustness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unregistered_events_share_one_metric_series() {
    let done = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&done);
    let config = ConnectionConfig::new("series-bound", ENDPOINT)
        .on("done", move |_| *flag.lock().unwrap() = true);
    let (_handle, mut server) = activate(config);
    let session = server.accept().await.unwrap();

    for i in 0..50 {
        session.push(&format!("noise_{}", i), json!({})).await;
    }
    session.push("done", json!({})).await;
    while !*done.lock().unwrap() {
        tokio::task::yield_now().await;
    }

    let metrics = FeedMetrics::new("series-bound");
    assert_eq!(metrics.events_received(UNHANDLED_EVENT_LABEL), 50);
    assert_eq!(metrics.events_received("done"), 1);

    let exported = encode_metrics().unwrap();
    assert!(!exported.contains("noise_"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_settles_disconnected() {
    let config = ConnectionConfig::new("status", ENDPOINT)
        .on("boom", |_| panic!("handler failure"));
    let (handle, mut server) = activate(config);
    let session = server.accept().await.unwrap();
    let mut liveness = handle.watch_liveness();
    liveness.wait_for(|l| l.is_connected()).await.unwrap();

    session.push("boom", json!(null)).await;
    liveness
        .wait_for(|l| *l == Liveness::Disconnected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!handle.is_active());
    assert!(!handle.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_handle_stays_disconnected() {
    for _ in 0..20 {
        let (handle, _server) = activate(ConnectionConfig::new("status", ENDPOINT));
        let liveness = handle.watch_liveness();
        tokio::task::yield_now().await;
        drop(handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*liveness.borrow(), Liveness::Disconnected);
    }
}
