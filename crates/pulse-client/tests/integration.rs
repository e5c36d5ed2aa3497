//! End-to-end scenarios over the mock transport.
//!
//! Every test runs on tokio's paused clock, so backoff delays, heartbeat
//! intervals and request timeouts elapse in virtual time and the timing
//! assertions are exact.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use tokio::time::Instant;

use async_trait::async_trait;

use pulse_client::testing::MockTransport;
use pulse_client::{
    ConnectionHandle, ConnectionStatus, Envelope, MessageType, MessagingClient, PulseError,
    PulseSettings, QosLevel, SubscribeOptions, Transport, TransportConn, TransportError,
};

fn default_client() -> (MessagingClient, MockTransport) {
    client_with(PulseSettings::default())
}

fn client_with(settings: PulseSettings) -> (MessagingClient, MockTransport) {
    let mock = MockTransport::new();
    let client = MessagingClient::with_transport(settings, Arc::new(mock.clone()));
    (client, mock)
}

async fn wait_for_status(conn: &ConnectionHandle, wanted: ConnectionStatus) {
    let mut status = conn.status_stream();
    status.wait_for(|s| *s == wanted).await.expect("actor alive");
}

/// Mock transport whose handshake takes a fixed amount of (virtual) time.
struct SlowConnect {
    inner: MockTransport,
    delay: Duration,
}

#[async_trait]
impl Transport for SlowConnect {
    async fn connect(&self, url: &str) -> Result<TransportConn, TransportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.connect(url).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions and routing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn subscribe_sends_control_frame_and_delivers_events() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let mut handle = conn
        .subscribe(vec!["metrics".into()], SubscribeOptions::default())
        .await
        .unwrap();

    let control = link.recv_envelope().await;
    assert_eq!(control.kind, MessageType::Subscribe);
    assert_eq!(control.data["topics"][0], "metrics");

    link.push_envelope(&Envelope::event("metrics", json!({"cpu": 55.5})))
        .await;
    let delivered = handle.recv().await.expect("event delivered");
    assert_eq!(delivered.data["cpu"], 55.5);
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_is_reported_and_does_not_stall_the_stream() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;
    let mut errors = conn.errors();

    let mut handle = conn
        .subscribe(vec!["metrics".into()], SubscribeOptions::default())
        .await
        .unwrap();
    let _control = link.recv_envelope().await;

    link.push_text("{definitely not json").await;
    link.push_envelope(&Envelope::event("metrics", json!({"cpu": 1})))
        .await;

    // The valid frame right behind the bad one still arrives
    let delivered = handle.recv().await.expect("delivery after bad frame");
    assert_eq!(delivered.data["cpu"], 1);

    let err = errors.recv().await.expect("protocol error published");
    assert_matches!(err.as_ref(), PulseError::Protocol(_));
}

#[tokio::test(start_paused = true)]
async fn no_delivery_after_unsubscribe_returns() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let mut handle = conn
        .subscribe(vec!["metrics".into()], SubscribeOptions::default())
        .await
        .unwrap();
    let _control = link.recv_envelope().await;

    link.push_envelope(&Envelope::event("metrics", json!({"n": 1})))
        .await;
    assert!(conn.unsubscribe(handle.id()).await.unwrap());

    // The unsubscribe control frame goes out for the released topic
    let control = link.recv_envelope().await;
    assert_eq!(control.kind, MessageType::Unsubscribe);
    assert_eq!(control.data["topics"][0], "metrics");

    // Whatever was in flight when unsubscribe returned is never delivered
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn qos_delivery_is_acknowledged() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let mut handle = conn
        .subscribe(
            vec!["orders".into()],
            SubscribeOptions {
                qos: QosLevel::AtLeastOnce,
                ack_required: true,
                batch: None,
            },
        )
        .await
        .unwrap();
    let _control = link.recv_envelope().await;

    let event = Envelope::event("orders", json!({"id": 7}));
    link.push_envelope(&event).await;

    assert!(handle.recv().await.is_some());
    let ack = link.recv_envelope().await;
    assert_eq!(ack.kind, MessageType::Ack);
    assert_eq!(ack.correlation_id, Some(event.id));
}

#[tokio::test(start_paused = true)]
async fn commands_are_served_while_a_connect_attempt_hangs() {
    let mock = MockTransport::new();
    let slow = SlowConnect {
        inner: mock.clone(),
        delay: Duration::from_secs(30),
    };
    let client = MessagingClient::with_transport(PulseSettings::default(), Arc::new(slow));
    let conn = client.connection("dashboard", "ws://server");

    // The handshake is still pending: registration must not wait for it.
    let started = Instant::now();
    let _handle = conn
        .subscribe(vec!["metrics".into()], SubscribeOptions::default())
        .await
        .unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(conn.status(), ConnectionStatus::Connecting);

    // Once the socket opens, the registration goes out as usual.
    let mut link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    let control = link.recv_envelope().await;
    assert_eq!(control.kind, MessageType::Subscribe);
    assert_eq!(control.data["topics"][0], "metrics");
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / response
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn request_resolves_with_correlated_response() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let requester = conn.clone();
    let task = tokio::spawn(async move {
        requester
            .request("agents", Some("list".into()), json!({}))
            .await
    });

    let request = link.recv_envelope().await;
    assert_eq!(request.kind, MessageType::Request);
    assert_eq!(request.action.as_deref(), Some("list"));

    link.push_envelope(&Envelope::response(
        "agents",
        request.id,
        json!({"agents": ["a", "b"]}),
    ))
    .await;

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.data["agents"][0], "a");
}

#[tokio::test(start_paused = true)]
async fn request_retries_then_times_out() {
    let mut settings = PulseSettings::default();
    settings.connection.request_timeout_ms = 100;
    settings.connection.request_retries = 2;
    let (client, mock) = client_with(settings);
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let started = Instant::now();
    let requester = conn.clone();
    let task = tokio::spawn(async move { requester.request("agents", None, json!({})).await });

    // Initial send plus two retransmits, all carrying the same message id
    let first = link.recv_envelope().await;
    let second = link.recv_envelope().await;
    let third = link.recv_envelope().await;
    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.id);

    let err = task.await.unwrap().unwrap_err();
    assert_matches!(err, PulseError::Timeout(t) => {
        assert_eq!(t.attempts, 3);
        assert_eq!(t.elapsed, Duration::from_millis(300));
    });
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn error_frame_rejects_the_request() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let requester = conn.clone();
    let task = tokio::spawn(async move { requester.request("agents", None, json!({})).await });

    let request = link.recv_envelope().await;
    let mut error = Envelope::event("agents", json!({"message": "no such agent"}));
    error.kind = MessageType::Error;
    error.correlation_id = Some(request.id);
    link.push_envelope(&error).await;

    let err = task.await.unwrap().unwrap_err();
    assert_matches!(err, PulseError::Server { message } if message == "no such agent");
}

#[tokio::test(start_paused = true)]
async fn abandoned_request_is_swept_without_retransmits() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let requester = conn.clone();
    let task = tokio::spawn(async move { requester.request("agents", None, json!({})).await });
    let _request = link.recv_envelope().await;
    task.abort();

    // One sweep interval later the pending table is clean and nothing was
    // retransmitted.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let stats = conn.stats().await.unwrap();
    assert_eq!(stats.pending_requests, 0);
    assert!(link.try_recv_frame().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_on_schedule_and_answers_server_pings() {
    let mut settings = PulseSettings::default();
    settings.heartbeat.interval_ms = 1_000;
    let (client, mock) = client_with(settings);
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let started = Instant::now();
    let ping = link.recv_envelope().await;
    assert_eq!(ping.kind, MessageType::Ping);
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    link.push_envelope(&Envelope::pong(ping.id)).await;

    // Cadence holds after a healthy round trip
    let next_ping = link.recv_envelope().await;
    assert_eq!(next_ping.kind, MessageType::Ping);
    assert_eq!(started.elapsed(), Duration::from_secs(2));

    // A server-initiated ping gets a correlated pong back
    let server_ping = Envelope::ping();
    link.push_envelope(&server_ping).await;
    let pong = link.recv_envelope().await;
    assert_eq!(pong.kind, MessageType::Pong);
    assert_eq!(pong.correlation_id, Some(server_ping.id));

    let stats = conn.stats().await.unwrap();
    assert!(stats.heartbeat_latency.is_some());
}

#[tokio::test(start_paused = true)]
async fn missed_heartbeats_trigger_reconnect() {
    let mut settings = PulseSettings::default();
    settings.heartbeat.interval_ms = 1_000;
    settings.heartbeat.max_missed = 2;
    let (client, mock) = client_with(settings);
    let conn = client.connection("dashboard", "ws://server");
    let link = mock.next_link().await;

    // Never answer any ping: two missed pongs declare the link dead and
    // the actor reconnects on its own.
    let _link2 = mock.next_link().await;
    drop(link);
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    assert_eq!(mock.connect_count(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stats_track_traffic_and_activity() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let mut handle = conn
        .subscribe(vec!["metrics".into()], SubscribeOptions::default())
        .await
        .unwrap();
    let _control = link.recv_envelope().await;
    conn.send("metrics", json!({"n": 1})).await.unwrap();
    let _sent = link.recv_envelope().await;
    link.push_envelope(&Envelope::event("metrics", json!({"cpu": 1})))
        .await;
    assert!(handle.recv().await.is_some());

    let stats = conn.stats().await.unwrap();
    assert!(stats.connected_at.is_some());
    assert!(stats.last_activity.is_some());
    // Subscribe control frame plus the published event
    assert_eq!(stats.messages_sent, 2);
    assert_eq!(stats.messages_received, 1);
    assert!(stats.bytes_transferred > 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_in_original_order() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let subs = [
        conn.subscribe(vec!["one".into()], SubscribeOptions::default())
            .await
            .unwrap(),
        conn.subscribe(vec!["two".into()], SubscribeOptions::default())
            .await
            .unwrap(),
        conn.subscribe(vec!["three".into()], SubscribeOptions::default())
            .await
            .unwrap(),
    ];
    for _ in 0..3 {
        let control = link.recv_envelope().await;
        assert_eq!(control.kind, MessageType::Subscribe);
    }

    link.fail("connection reset").await;
    let mut link2 = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;

    // Resubscription replays the same registrations in subscribe order
    for (expected, _) in ["one", "two", "three"].iter().zip(&subs) {
        let control = link2.recv_envelope().await;
        assert_eq!(control.kind, MessageType::Subscribe);
        assert_eq!(control.data["topics"][0], *expected);
    }

    // Deliveries flow again on the new socket
    let mut handle = subs.into_iter().next().unwrap();
    link2
        .push_envelope(&Envelope::event("one", json!({"n": 1})))
        .await;
    assert!(handle.recv().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn queued_sends_survive_reconnect_with_oldest_dropped_on_overflow() {
    let mut settings = PulseSettings::default();
    settings.queue.capacity = 2;
    let (client, mock) = client_with(settings);
    let conn = client.connection("dashboard", "ws://server");
    let link = mock.next_link().await;

    link.fail("connection reset").await;
    wait_for_status(&conn, ConnectionStatus::Reconnecting).await;

    // Three sends into a capacity-2 queue while disconnected: the oldest
    // is dropped, the rest replay after reconnect in FIFO order.
    let (r1, r2, r3, mut link2) = tokio::join!(
        conn.send("metrics", json!({"n": 1})),
        conn.send("metrics", json!({"n": 2})),
        conn.send("metrics", json!({"n": 3})),
        mock.next_link(),
    );
    assert_matches!(r1, Err(PulseError::Transport(_)));
    r2.unwrap();
    r3.unwrap();

    let first = link2.recv_envelope().await;
    let second = link2.recv_envelope().await;
    assert_eq!(first.data["n"], 2);
    assert_eq!(second.data["n"], 3);

    let stats = conn.stats().await.unwrap();
    assert_eq!(stats.dropped_overflow, 1);
    assert_eq!(stats.queued, 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_exhausting_attempts() {
    let mut settings = PulseSettings::default();
    settings.connection.backoff.max_attempts = 2;
    settings.connection.backoff.base_delay_ms = 10;
    let (client, mock) = client_with(settings);
    mock.fail_next_connects(10);

    let conn = client.connection("dashboard", "ws://server");
    wait_for_status(&conn, ConnectionStatus::Failed).await;
    // Initial attempt plus the two budgeted reconnects
    assert_eq!(mock.connect_count(), 3);

    // The terminal connection rejects further work
    let err = conn.send("metrics", json!({})).await.unwrap_err();
    assert_matches!(err, PulseError::ConnectionFailed { attempts: 2 });
}

#[tokio::test(start_paused = true)]
async fn transient_connect_failures_recover() {
    let (client, mock) = default_client();
    mock.fail_next_connects(2);

    let conn = client.connection("dashboard", "ws://server");
    let _link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    assert_eq!(mock.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn each_retry_passes_back_through_connecting() {
    let mock = MockTransport::new();
    mock.fail_next_connects(1);
    let slow = SlowConnect {
        inner: mock.clone(),
        delay: Duration::from_millis(250),
    };
    let client = MessagingClient::with_transport(PulseSettings::default(), Arc::new(slow));
    let conn = client.connection("dashboard", "ws://server");

    // First attempt fails; the backoff window reports Reconnecting.
    wait_for_status(&conn, ConnectionStatus::Reconnecting).await;
    // The retry itself is observable as Connecting before the socket opens.
    wait_for_status(&conn, ConnectionStatus::Connecting).await;
    let _link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    assert_eq!(mock.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn stable_connection_resets_the_reconnect_counter() {
    let mut settings = PulseSettings::default();
    settings.heartbeat.interval_ms = 1_000;
    let (client, mock) = client_with(settings);
    let conn = client.connection("dashboard", "ws://server");

    // Two quick flaps: the counter keeps growing.
    let link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    link.fail("flap").await;
    wait_for_status(&conn, ConnectionStatus::Reconnecting).await;
    assert_eq!(conn.stats().await.unwrap().reconnect_attempts, 1);

    let link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    link.fail("flap").await;
    wait_for_status(&conn, ConnectionStatus::Reconnecting).await;
    assert_eq!(conn.stats().await.unwrap().reconnect_attempts, 2);

    // Held past one heartbeat interval: the next outage starts the backoff
    // sequence over instead of continuing it.
    let link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    link.fail("outage").await;
    wait_for_status(&conn, ConnectionStatus::Reconnecting).await;
    assert_eq!(conn.stats().await.unwrap().reconnect_attempts, 1);

    let _link = mock.next_link().await;
    wait_for_status(&conn, ConnectionStatus::Connected).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiting and disconnect
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sends_beyond_the_burst_are_paced_by_the_token_bucket() {
    let mut settings = PulseSettings::default();
    settings.rate_limit.capacity = 1;
    settings.rate_limit.refill_per_sec = 10.0;
    let (client, mock) = client_with(settings);
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let started = Instant::now();
    let (r1, r2) = tokio::join!(
        conn.send("metrics", json!({"n": 1})),
        conn.send("metrics", json!({"n": 2})),
    );
    r1.unwrap();
    r2.unwrap();

    let first = link.recv_envelope().await;
    let second = link.recv_envelope().await;
    assert_eq!(first.data["n"], 1);
    assert_eq!(second.data["n"], 2);
    // One token per 100ms: the second send waited for a refill
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_terminal_and_fails_outstanding_work() {
    let (client, mock) = default_client();
    let conn = client.connection("dashboard", "ws://server");
    let mut link = mock.next_link().await;

    let requester = conn.clone();
    let task = tokio::spawn(async move { requester.request("agents", None, json!({})).await });
    let _request = link.recv_envelope().await;

    conn.disconnect().await.unwrap();
    wait_for_status(&conn, ConnectionStatus::Closed).await;

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_terminal());

    // No reconnect attempt follows an explicit disconnect
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.connect_count(), 1);
    assert_matches!(
        conn.send("metrics", json!({})).await.unwrap_err(),
        PulseError::ConnectionClosed
    );
}
