//! Transport abstraction over a raw bidirectional socket.
//!
//! The transport mirrors the underlying socket exactly: no parsing, no
//! buffering, no retry logic. A send while the socket is not open fails
//! immediately with [`TransportError::NotConnected`]; everything above this
//! layer is responsible for queuing. Anything that can provide
//! open/close/send(text) plus a stream of lifecycle events is a valid
//! implementation — the production [`WsTransport`] speaks WebSocket via
//! tokio-tungstenite, and tests substitute a channel-backed double.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use pulse_core::TransportError;

/// Buffered lifecycle events per connection before backpressure applies.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event reported by a transport connection.
///
/// A successful [`Transport::connect`] implies the `open` event; the
/// remaining socket lifecycle arrives through the event receiver.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete inbound text frame.
    Message(String),
    /// The socket failed mid-stream. A close event follows.
    Error(String),
    /// The socket is closed. Terminal for this connection.
    Closed {
        /// Close code, if the peer supplied one.
        code: Option<u16>,
        /// Close reason, if the peer supplied one.
        reason: Option<String>,
    },
}

/// Write half of an open transport connection.
#[async_trait]
pub trait TransportSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An established connection: write half plus lifecycle event stream.
pub struct TransportConn {
    /// Write half.
    pub sink: Box<dyn TransportSink>,
    /// Lifecycle events, ending with [`TransportEvent::Closed`].
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for raw socket connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<TransportConn, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Production transport over tokio-tungstenite.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<TransportConn, TransportError> {
        let (stream, _response) =
            connect_async(url)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    url: url.to_owned(),
                    reason: e.to_string(),
                })?;
        debug!(url, "websocket connected");

        let (write, mut read) = stream.split();
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Read pump: forwards frames until the socket closes or errors.
        // Protocol-level ping/pong is answered by tungstenite itself;
        // application-level heartbeat frames arrive as text like any other.
        let _pump = tokio::spawn(async move {
            while let Some(item) = read.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        if event_tx
                            .send(TransportEvent::Message(text.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), Some(f.reason.to_string())))
                            .unwrap_or((None, None));
                        let _ = event_tx.send(TransportEvent::Closed { code, reason }).await;
                        return;
                    }
                    Ok(_) => {} // binary / ping / pong frames carry no envelope
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: None,
                            })
                            .await;
                        return;
                    }
                }
            }
            // Stream ended without a close frame.
            let _ = event_tx
                .send(TransportEvent::Closed {
                    code: None,
                    reason: None,
                })
                .await;
        });

        Ok(TransportConn {
            sink: Box::new(WsSink { write, open: true }),
            events,
        })
    }
}

type WsWriteHalf = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

struct WsSink {
    write: WsWriteHalf,
    open: bool,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                self.open = false;
                TransportError::Io(e.to_string())
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.write
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}
