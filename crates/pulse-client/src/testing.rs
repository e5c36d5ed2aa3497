//! Channel-backed transport double for tests.
//!
//! [`MockTransport`] satisfies the [`Transport`](crate::transport::Transport)
//! contract without any socket: each `connect` hands the test a
//! [`MockLink`] — the "server side" of the connection — which can observe
//! frames the client wrote, push inbound frames, and close or fail the
//! link to drive reconnect scenarios.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use pulse_core::{Envelope, TransportError};

use crate::transport::{Transport, TransportConn, TransportEvent, TransportSink};

/// Scriptable in-memory transport.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    fail_connects: AtomicU32,
    connect_count: AtomicU32,
    links: Mutex<VecDeque<MockLink>>,
    link_ready: Notify,
}

impl MockTransport {
    /// Create a transport that accepts every connect.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Total connect attempts observed (including failed ones).
    #[must_use]
    pub fn connect_count(&self) -> u32 {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    /// Wait for the client to connect and return the server side of the
    /// link.
    pub async fn next_link(&self) -> MockLink {
        loop {
            if let Some(link) = self.state.links.lock().pop_front() {
                return link;
            }
            self.state.link_ready.notified().await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<TransportConn, TransportError> {
        let _ = self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        let failures = self.state.fail_connects.load(Ordering::SeqCst);
        if failures > 0 {
            self.state
                .fail_connects
                .store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed {
                url: url.to_owned(),
                reason: "mock connect refused".into(),
            });
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::channel(64);
        let open = Arc::new(AtomicBool::new(true));

        let link = MockLink {
            frames: frame_rx,
            event_tx,
            open: open.clone(),
        };
        self.state.links.lock().push_back(link);
        // notify_one stores a permit, so a connect landing just before the
        // test calls next_link is not missed.
        self.state.link_ready.notify_one();

        Ok(TransportConn {
            sink: Box::new(MockSink {
                tx: frame_tx,
                open,
            }),
            events,
        })
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(text)
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Server side of one mock connection.
pub struct MockLink {
    frames: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl MockLink {
    /// Next frame the client wrote, if any arrives.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Next frame the client wrote, parsed as an envelope.
    ///
    /// # Panics
    ///
    /// Panics if the link closed or the frame is not a valid envelope —
    /// both are test failures.
    pub async fn recv_envelope(&mut self) -> Envelope {
        let raw = self.frames.recv().await.expect("link closed");
        serde_json::from_str(&raw).expect("client wrote malformed frame")
    }

    /// Frame already written by the client, without waiting.
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    /// Push a raw inbound text frame to the client.
    pub async fn push_text(&self, raw: impl Into<String>) {
        let _ = self
            .event_tx
            .send(TransportEvent::Message(raw.into()))
            .await;
    }

    /// Push an envelope to the client.
    ///
    /// # Panics
    ///
    /// Panics if the envelope fails to serialize (a test failure).
    pub async fn push_envelope(&self, envelope: &Envelope) {
        let raw = serde_json::to_string(envelope).expect("envelope serializes");
        self.push_text(raw).await;
    }

    /// Report a mid-stream socket error followed by close.
    pub async fn fail(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self
            .event_tx
            .send(TransportEvent::Error(reason.to_owned()))
            .await;
        let _ = self
            .event_tx
            .send(TransportEvent::Closed {
                code: None,
                reason: None,
            })
            .await;
    }

    /// Close the link from the server side.
    pub async fn close(&self, code: Option<u16>) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self
            .event_tx
            .send(TransportEvent::Closed { code, reason: None })
            .await;
    }

    /// Whether the client-side sink can still write.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn connect_produces_a_link() {
        let mock = MockTransport::new();
        let mut conn = mock.connect("ws://test").await.unwrap();
        let mut link = mock.next_link().await;

        conn.sink.send("hello".into()).await.unwrap();
        assert_eq!(link.recv_frame().await.as_deref(), Some("hello"));
        assert_eq!(mock.connect_count(), 1);
    }

    #[tokio::test]
    async fn pushed_frames_reach_the_client() {
        let mock = MockTransport::new();
        let mut conn = mock.connect("ws://test").await.unwrap();
        let link = mock.next_link().await;

        link.push_envelope(&Envelope::event("metrics", json!({"cpu": 1})))
            .await;
        match conn.events.recv().await {
            Some(TransportEvent::Message(raw)) => {
                assert!(raw.contains("metrics"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_connects_are_scripted() {
        let mock = MockTransport::new();
        mock.fail_next_connects(2);
        assert!(mock.connect("ws://test").await.is_err());
        assert!(mock.connect("ws://test").await.is_err());
        assert!(mock.connect("ws://test").await.is_ok());
        assert_eq!(mock.connect_count(), 3);
    }

    #[tokio::test]
    async fn close_stops_the_sink() {
        let mock = MockTransport::new();
        let mut conn = mock.connect("ws://test").await.unwrap();
        let link = mock.next_link().await;

        link.close(Some(1000)).await;
        let err = conn.sink.send("late".into()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        match conn.events.recv().await {
            Some(TransportEvent::Closed { code, .. }) => assert_eq!(code, Some(1000)),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_emits_error_then_close() {
        let mock = MockTransport::new();
        let mut conn = mock.connect("ws://test").await.unwrap();
        let link = mock.next_link().await;

        link.fail("broken pipe").await;
        assert!(matches!(
            conn.events.recv().await,
            Some(TransportEvent::Error(_))
        ));
        assert!(matches!(
            conn.events.recv().await,
            Some(TransportEvent::Closed { .. })
        ));
    }
}
