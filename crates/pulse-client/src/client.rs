//! Client facade owning named connections.
//!
//! [`MessagingClient`] is the entry point: it snapshots settings at
//! construction, holds the transport factory, and hands out
//! [`ConnectionHandle`]s by name. Asking for an existing name returns the
//! live handle; a terminal (closed or failed) connection is replaced by a
//! fresh one, since terminal connections never self-heal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pulse_settings::PulseSettings;

use crate::manager::{self, ConnectionHandle};
use crate::transport::{Transport, WsTransport};

/// Facade over a set of named connections sharing one configuration.
pub struct MessagingClient {
    settings: PulseSettings,
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
    cancel: CancellationToken,
}

impl MessagingClient {
    /// Create a client speaking WebSocket.
    #[must_use]
    pub fn new(settings: PulseSettings) -> Self {
        Self::with_transport(settings, Arc::new(WsTransport))
    }

    /// Create a client over a custom transport (tests substitute a
    /// channel-backed double here).
    #[must_use]
    pub fn with_transport(settings: PulseSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
            connections: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Get or create the connection registered under `name`.
    ///
    /// An existing live connection is returned as-is (its url wins over the
    /// one passed here). A terminal connection is replaced.
    pub fn connection(&self, name: impl Into<String>, url: impl Into<String>) -> ConnectionHandle {
        let name = name.into();
        let mut connections = self.connections.lock();
        if let Some(handle) = connections.get(&name) {
            if !handle.status().is_terminal() {
                return handle.clone();
            }
            debug!(name = %name, "replacing terminal connection");
        }
        let handle = manager::spawn(
            url.into(),
            self.settings.clone(),
            self.transport.clone(),
            self.cancel.child_token(),
        );
        let _ = connections.insert(name, handle.clone());
        handle
    }

    /// Look up a connection by name without creating one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ConnectionHandle> {
        self.connections.lock().get(name).cloned()
    }

    /// Number of registered connections (including terminal ones not yet
    /// replaced).
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Tear down every connection. Queued messages and pending requests
    /// fail with a terminal error; handles remain usable only for status
    /// inspection.
    pub fn dispose(&self) {
        self.cancel.cancel();
        self.connections.lock().clear();
    }
}

impl Drop for MessagingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ConnectionStatus;
    use crate::testing::MockTransport;

    fn client(mock: &MockTransport) -> MessagingClient {
        MessagingClient::with_transport(PulseSettings::default(), Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn named_connection_is_reused() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let a = client.connection("dashboard", "ws://a");
        let b = client.connection("dashboard", "ws://b");
        assert_eq!(a.id(), b.id());
        assert_eq!(client.len(), 1);
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_connections() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let a = client.connection("metrics", "ws://a");
        let b = client.connection("control", "ws://a");
        assert_ne!(a.id(), b.id());
        assert_eq!(client.len(), 2);
    }

    #[tokio::test]
    async fn terminal_connection_is_replaced() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let a = client.connection("dashboard", "ws://a");
        let _link = mock.next_link().await;
        a.disconnect().await.unwrap();

        let mut status = a.status_stream();
        status
            .wait_for(|s| *s == ConnectionStatus::Closed)
            .await
            .unwrap();

        let b = client.connection("dashboard", "ws://a");
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn dispose_closes_connections() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let a = client.connection("dashboard", "ws://a");
        let _link = mock.next_link().await;
        client.dispose();

        let mut status = a.status_stream();
        status.wait_for(|s| s.is_terminal()).await.unwrap();
        assert!(client.is_empty());
    }
}
