//! Connection lifecycle actor.
//!
//! One logical connection is one spawned task owning the socket, the
//! subscription registry, the router, the outbound queue, the rate limiter
//! and the heartbeat monitor. All interaction goes through a cloneable
//! [`ConnectionHandle`] over a command channel, so no state needs locking
//! and a slow caller can never wedge the event loop.
//!
//! The actor runs a reconnect state machine: connect, serve, lose the link,
//! back off with jitter, repeat. Subscriptions and queued messages survive
//! reconnects; the cycle ends either with an explicit `disconnect()`
//! (status `Closed`) or after exhausting the reconnect budget (status
//! `Failed`). Both are terminal: callers must create a fresh connection.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use pulse_core::backoff;
use pulse_core::{
    ConnectionId, Envelope, FilterSpec, PulseError, RateLimitError, Result, SubscribeOptions,
    SubscriptionId, TransportError,
};
use pulse_settings::PulseSettings;

use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::queue::{OutboundQueue, QueueEntry};
use crate::rate_limit::RateLimiter;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::router::{MessageRouter, RouteAction};
use crate::transport::{Transport, TransportConn, TransportEvent, TransportSink};

/// Commands buffered per connection before callers are backpressured.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Errors buffered per subscriber of the error channel.
const ERROR_CHANNEL_CAPACITY: usize = 32;

/// Observable connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not yet connected.
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// Socket open and serving.
    Connected,
    /// Link lost, reconnect cycle running.
    Reconnecting,
    /// Closed by an explicit `disconnect()`. Terminal.
    Closed,
    /// Reconnect budget exhausted. Terminal.
    Failed,
}

impl ConnectionStatus {
    /// Whether the connection will never serve again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Point-in-time counters for one connection.
#[derive(Clone, Debug)]
pub struct ConnectionStats {
    /// Current lifecycle state.
    pub status: ConnectionStatus,
    /// When the current socket opened. `None` while disconnected.
    pub connected_at: Option<Instant>,
    /// Last socket read or write.
    pub last_activity: Option<Instant>,
    /// Frames written to the socket, control traffic included.
    pub messages_sent: u64,
    /// Frames read from the socket.
    pub messages_received: u64,
    /// Total frame bytes moved in either direction.
    pub bytes_transferred: u64,
    /// Messages waiting in the outbound queue.
    pub queued: usize,
    /// Requests awaiting a response.
    pub pending_requests: usize,
    /// Live subscription registrations.
    pub subscriptions: usize,
    /// Reconnect attempts since the last stable connection.
    pub reconnect_attempts: u32,
    /// Outbound messages dropped to queue overflow.
    pub dropped_overflow: u64,
    /// Outbound messages dropped to TTL expiry.
    pub dropped_expired: u64,
    /// Inbound deliveries dropped to full handler channels.
    pub dropped_deliveries: u64,
    /// Responses discarded because no request was waiting.
    pub discarded_responses: u64,
    /// Smoothed heartbeat round-trip latency.
    pub heartbeat_latency: Option<Duration>,
}

enum Command {
    Subscribe {
        topics: Vec<String>,
        filters: Vec<FilterSpec>,
        options: SubscribeOptions,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<Result<()>>,
    },
    Request {
        envelope: Envelope,
        reply: oneshot::Sender<Result<Envelope>>,
    },
    Stats {
        reply: oneshot::Sender<ConnectionStats>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-side handle to a connection actor. Cheap to clone; the actor
/// shuts down once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    url: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    errors: broadcast::Sender<Arc<PulseError>>,
    max_attempts: u32,
}

impl ConnectionHandle {
    /// Stable id of this logical connection.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Url this connection targets.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch stream of status transitions.
    #[must_use]
    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Subscribe to background errors: malformed frames, rejected
    /// subscriptions, and other failures with no awaiting caller.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<Arc<PulseError>> {
        self.errors.subscribe()
    }

    /// Register a subscription covering `topics`.
    ///
    /// Local registration is immediate; the server-side subscribe is
    /// confirmed (or rejected) asynchronously via the subscription status
    /// and the error channel.
    pub async fn subscribe(
        &self,
        topics: Vec<String>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        self.subscribe_with_filters(topics, vec![], options).await
    }

    /// Register a subscription with payload filter predicates.
    pub async fn subscribe_with_filters(
        &self,
        topics: Vec<String>,
        filters: Vec<FilterSpec>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Subscribe {
            topics,
            filters,
            options,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.terminal_error())
    }

    /// Remove a subscription. After this returns, its handles receive
    /// nothing further. Returns `false` for an unknown id.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Unsubscribe {
            id: id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.terminal_error())
    }

    /// Publish an event to a topic.
    ///
    /// Resolves once the message is written to the socket, or with the
    /// reason it was dropped (queue overflow, TTL expiry, throttled past
    /// deadline, terminal connection).
    pub async fn send(&self, topic: impl Into<String>, data: Value) -> Result<()> {
        self.send_envelope(Envelope::event(topic, data)).await
    }

    /// Publish a pre-built envelope (e.g. one carrying a TTL or metadata).
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Send { envelope, reply }).await?;
        rx.await.map_err(|_| self.terminal_error())?
    }

    /// Send a request and await its correlated response.
    pub async fn request(
        &self,
        topic: impl Into<String>,
        action: Option<String>,
        data: Value,
    ) -> Result<Envelope> {
        let envelope = Envelope::request(topic, action, data);
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Request { envelope, reply }).await?;
        rx.await.map_err(|_| self.terminal_error())?
    }

    /// Snapshot of the connection's counters.
    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Stats { reply }).await?;
        rx.await.map_err(|_| self.terminal_error())
    }

    /// Close the connection. Pending requests and queued messages fail
    /// with a terminal error; the status becomes `Closed`.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Disconnect { reply }).await?;
        // The actor may already be gone; either way the connection is down.
        let _ = rx.await;
        Ok(())
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.terminal_error())
    }

    fn terminal_error(&self) -> PulseError {
        match *self.status.borrow() {
            ConnectionStatus::Failed => PulseError::ConnectionFailed {
                attempts: self.max_attempts,
            },
            _ => PulseError::ConnectionClosed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

/// Spawn a connection actor and return its handle. The actor connects
/// lazily but immediately: the first attempt starts right away.
pub(crate) fn spawn(
    url: String,
    settings: PulseSettings,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> ConnectionHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
    let id = ConnectionId::new();

    let heartbeat_interval = if settings.heartbeat.enabled {
        Duration::from_millis(settings.heartbeat.interval_ms)
    } else {
        Duration::ZERO
    };
    let now = Instant::now();
    let actor = ConnectionActor {
        id: id.clone(),
        url: url.clone(),
        transport,
        commands: command_rx,
        status: status_tx,
        errors: error_tx.clone(),
        registry: SubscriptionRegistry::new(),
        router: MessageRouter::new(),
        queue: OutboundQueue::new(
            settings.queue.capacity,
            Duration::from_millis(settings.queue.default_ttl_ms),
        ),
        limiter: RateLimiter::new(
            settings.rate_limit.capacity,
            settings.rate_limit.refill_per_sec,
            now,
        ),
        heartbeat: HeartbeatMonitor::new(heartbeat_interval, settings.heartbeat.max_missed),
        heartbeat_interval,
        sink: None,
        reconnect_attempts: 0,
        connected_at: None,
        last_activity: None,
        messages_sent: 0,
        messages_received: 0,
        bytes_transferred: 0,
        cancel,
        settings,
    };
    let max_attempts = actor.settings.connection.backoff.max_attempts;
    let _task = tokio::spawn(actor.run());

    ConnectionHandle {
        id,
        url,
        commands: command_tx,
        status: status_rx,
        errors: error_tx,
        max_attempts,
    }
}

enum LoopExit {
    /// Explicit disconnect or every handle dropped.
    Closed,
    /// Socket died; the reconnect cycle takes over.
    LinkLost,
}

enum ConnectOutcome {
    /// Handshake succeeded.
    Link(TransportConn),
    /// Handshake failed; schedule the next attempt.
    Retry,
    /// Explicit disconnect or every handle dropped mid-handshake.
    Closed,
}

struct ConnectionActor {
    id: ConnectionId,
    url: String,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    errors: broadcast::Sender<Arc<PulseError>>,
    registry: SubscriptionRegistry,
    router: MessageRouter,
    queue: OutboundQueue,
    limiter: RateLimiter,
    heartbeat: HeartbeatMonitor,
    heartbeat_interval: Duration,
    sink: Option<Box<dyn TransportSink>>,
    reconnect_attempts: u32,
    connected_at: Option<Instant>,
    last_activity: Option<Instant>,
    messages_sent: u64,
    messages_received: u64,
    bytes_transferred: u64,
    cancel: CancellationToken,
    settings: PulseSettings,
}

impl ConnectionActor {
    #[instrument(skip_all, fields(connection_id = %self.id, url = %self.url))]
    async fn run(mut self) {
        loop {
            self.set_status(ConnectionStatus::Connecting);
            match self.connect_attempt().await {
                ConnectOutcome::Closed => {
                    self.shutdown(ConnectionStatus::Closed).await;
                    return;
                }
                ConnectOutcome::Retry => {}
                ConnectOutcome::Link(conn) => {
                    let mut events = conn.events;
                    self.sink = Some(conn.sink);
                    match self.serve(&mut events).await {
                        LoopExit::Closed => {
                            self.shutdown(ConnectionStatus::Closed).await;
                            return;
                        }
                        LoopExit::LinkLost => self.on_link_lost(),
                    }
                }
            }
            self.set_status(ConnectionStatus::Reconnecting);

            self.reconnect_attempts += 1;
            let config = &self.settings.connection.backoff;
            if self.reconnect_attempts > config.max_attempts {
                warn!(attempts = config.max_attempts, "reconnect budget exhausted");
                self.shutdown(ConnectionStatus::Failed).await;
                return;
            }

            let delay = Duration::from_millis(backoff::delay_with_random(
                config,
                self.reconnect_attempts - 1,
                rand::rng().random(),
            ));
            info!(
                attempt = self.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            if matches!(self.idle_until(Instant::now() + delay).await, Some(LoopExit::Closed)) {
                self.shutdown(ConnectionStatus::Closed).await;
                return;
            }
        }
    }

    /// Drive one handshake while still serving commands, so a slow
    /// connect never stalls `subscribe()`/`send()` callers. Registry and
    /// queue bookkeeping happen immediately; the wire work waits for the
    /// socket.
    async fn connect_attempt(&mut self) -> ConnectOutcome {
        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let mut connect = pin!(async move { transport.connect(&url).await });
        loop {
            let pending_at = self.router.next_deadline();
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(conn) => ConnectOutcome::Link(conn),
                        Err(e) => {
                            warn!(error = %e, "connect attempt failed");
                            ConnectOutcome::Retry
                        }
                    };
                }
                () = self.cancel.cancelled() => return ConnectOutcome::Closed,
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { return ConnectOutcome::Closed };
                    if self.handle_command(cmd).await.is_some() {
                        // Disconnected, so the only exit a command can
                        // force here is an explicit close.
                        return ConnectOutcome::Closed;
                    }
                }
                () = maybe_sleep(pending_at) => {
                    let _ = self.retry_due().await;
                }
            }
        }
    }

    /// Serve commands while waiting out a backoff delay. Sends queue up,
    /// subscriptions register locally, and request deadlines keep firing
    /// so a timeout is never stretched by an outage.
    async fn idle_until(&mut self, deadline: Instant) -> Option<LoopExit> {
        loop {
            let pending_at = self.router.next_deadline();
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return None,
                () = self.cancel.cancelled() => return Some(LoopExit::Closed),
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { return Some(LoopExit::Closed) };
                    if let Some(exit) = self.handle_command(cmd).await {
                        return Some(exit);
                    }
                }
                () = maybe_sleep(pending_at) => {
                    // Disconnected: retries cannot be written, but budgets
                    // and timeouts still advance on schedule.
                    let _ = self.retry_due().await;
                }
            }
        }
    }

    /// Main loop for one live socket.
    async fn serve(&mut self, events: &mut mpsc::Receiver<TransportEvent>) -> LoopExit {
        let now = Instant::now();
        self.set_status(ConnectionStatus::Connected);
        self.connected_at = Some(now);
        self.heartbeat.start(now);
        info!(attempt = self.reconnect_attempts, "connected");

        // Subscriptions first, in original subscribe order, then the
        // request replay, then the queued backlog.
        for request in self.registry.resubscribe_requests() {
            if self.write(&Envelope::subscribe(&request)).await.is_err() {
                return LoopExit::LinkLost;
            }
        }
        for envelope in self.router.replay_pending(now) {
            if self.write(&envelope).await.is_err() {
                return LoopExit::LinkLost;
            }
        }

        let sweep_interval = Duration::from_millis(self.settings.connection.sweep_interval_ms);
        let mut next_sweep = now + sweep_interval;

        loop {
            let now = Instant::now();
            let heartbeat_at = self.heartbeat.next_deadline();
            let pending_at = self.router.next_deadline();
            let flush_at = self.next_flush_at(now);

            tokio::select! {
                () = self.cancel.cancelled() => return LoopExit::Closed,
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { return LoopExit::Closed };
                    if let Some(exit) = self.handle_command(cmd).await {
                        return exit;
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(TransportEvent::Message(raw)) => {
                            if let Some(exit) = self.on_frame(&raw).await {
                                return exit;
                            }
                        }
                        Some(TransportEvent::Error(reason)) => {
                            warn!(reason = %reason, "transport error");
                        }
                        Some(TransportEvent::Closed { code, reason }) => {
                            info!(?code, ?reason, "transport closed");
                            return LoopExit::LinkLost;
                        }
                        None => return LoopExit::LinkLost,
                    }
                }
                () = maybe_sleep(heartbeat_at) => {
                    match self.heartbeat.on_deadline(Instant::now()) {
                        Some(HeartbeatAction::SendPing(ping)) => {
                            // Heartbeats bypass the queue and rate limiter.
                            if self.write(&ping).await.is_err() {
                                return LoopExit::LinkLost;
                            }
                        }
                        Some(HeartbeatAction::LinkDead) => return LoopExit::LinkLost,
                        None => {}
                    }
                }
                () = maybe_sleep(pending_at) => {
                    if self.retry_due().await.is_err() {
                        return LoopExit::LinkLost;
                    }
                }
                () = maybe_sleep(flush_at) => {
                    if self.flush().await.is_err() {
                        return LoopExit::LinkLost;
                    }
                }
                () = tokio::time::sleep_until(next_sweep) => {
                    // Safety net for deadlines the timer arm missed.
                    if self.retry_due().await.is_err() {
                        return LoopExit::LinkLost;
                    }
                    next_sweep = Instant::now() + sweep_interval;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Option<LoopExit> {
        match command {
            Command::Subscribe {
                topics,
                filters,
                options,
                reply,
            } => {
                let outcome = self.registry.subscribe(topics, filters, options);
                let _ = reply.send(outcome.handle);
                if let Some(request) = outcome.control {
                    if self.is_connected()
                        && self.write(&Envelope::subscribe(&request)).await.is_err()
                    {
                        return Some(LoopExit::LinkLost);
                    }
                    // While disconnected the resubscribe pass covers it.
                }
            }
            Command::Unsubscribe { id, reply } => {
                let released = self.registry.unsubscribe(&id);
                let found = released.is_some();
                let _ = reply.send(found);
                if let Some(topics) = released {
                    if !topics.is_empty()
                        && self.is_connected()
                        && self.write(&Envelope::unsubscribe(&topics)).await.is_err()
                    {
                        return Some(LoopExit::LinkLost);
                    }
                }
            }
            Command::Send { envelope, reply } => {
                self.queue.enqueue(envelope, Some(reply), Instant::now());
                if self.is_connected() && self.flush().await.is_err() {
                    return Some(LoopExit::LinkLost);
                }
            }
            Command::Request { envelope, reply } => {
                let timeout = Duration::from_millis(self.settings.connection.request_timeout_ms);
                let retries = self.settings.connection.request_retries;
                self.router.register_request(
                    envelope.clone(),
                    timeout,
                    retries,
                    reply,
                    Instant::now(),
                );
                if self.is_connected() && self.write(&envelope).await.is_err() {
                    // The request stays pending and replays after reconnect.
                    return Some(LoopExit::LinkLost);
                }
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(());
                return Some(LoopExit::Closed);
            }
        }
        None
    }

    /// Route one inbound frame and perform its follow-up action.
    async fn on_frame(&mut self, raw: &str) -> Option<LoopExit> {
        self.messages_received += 1;
        self.bytes_transferred += raw.len() as u64;
        self.last_activity = Some(Instant::now());
        match self.router.route(raw, &mut self.registry) {
            Ok(outcome) => {
                if let Some(err) = outcome.error {
                    self.publish_error(err);
                }
                match outcome.action {
                    RouteAction::Done => {}
                    RouteAction::ReplyPong(pong) | RouteAction::SendAck(pong) => {
                        if self.write(&pong).await.is_err() {
                            return Some(LoopExit::LinkLost);
                        }
                    }
                    RouteAction::Pong(envelope) => {
                        if let Some(rtt) = self
                            .heartbeat
                            .on_pong(envelope.correlation_id.as_ref(), Instant::now())
                        {
                            debug!(rtt_ms = rtt.as_millis() as u64, "heartbeat round trip");
                        }
                    }
                }
            }
            Err(protocol) => {
                warn!(reason = %protocol.reason, frame = %protocol.frame_prefix, "malformed frame");
                self.publish_error(PulseError::Protocol(protocol));
            }
        }
        None
    }

    /// Re-send requests whose deadline fired with retry budget left.
    async fn retry_due(&mut self) -> std::result::Result<(), ()> {
        for envelope in self.router.expire_due(Instant::now()) {
            if self.is_connected() && self.write(&envelope).await.is_err() {
                return Err(());
            }
        }
        Ok(())
    }

    /// When the flush timer should fire: the earlier of the head entry's
    /// deadline and the next rate-limit token.
    fn next_flush_at(&mut self, now: Instant) -> Option<Instant> {
        if !self.is_connected() {
            return None;
        }
        let head_deadline = self.queue.head_deadline()?;
        Some(self.limiter.next_token_at(now).max(now).min(head_deadline))
    }

    /// Drain the outbound queue as far as tokens and deadlines allow.
    async fn flush(&mut self) -> std::result::Result<(), ()> {
        loop {
            let now = Instant::now();
            let Some(head_deadline) = self.queue.head_deadline() else {
                return Ok(());
            };
            if head_deadline <= now {
                // Past its deadline: throttled out if the limiter was the
                // bottleneck, plain TTL expiry otherwise.
                let Some(entry) = self.queue.pop_expired(now) else {
                    continue;
                };
                let error = if self.limiter.available(now) < 1.0 {
                    PulseError::RateLimit(RateLimitError {
                        retry_after: self.limiter.retry_after(now),
                    })
                } else {
                    PulseError::Transport(TransportError::Io(
                        "queued message ttl expired".to_owned(),
                    ))
                };
                debug!(error = %error, "queued message dropped at flush");
                Self::resolve_entry(entry, Err(error));
                continue;
            }
            if !self.limiter.try_acquire(now) {
                return Ok(());
            }
            let Some(entry) = self.queue.pop_live(now) else {
                return Ok(());
            };
            match self.write(&entry.envelope).await {
                Ok(()) => Self::resolve_entry(entry, Ok(())),
                Err(()) => {
                    // Back at the head so the replay after reconnect keeps
                    // FIFO order.
                    self.queue.push_front(entry);
                    return Err(());
                }
            }
        }
    }

    async fn write(&mut self, envelope: &Envelope) -> std::result::Result<(), ()> {
        let raw = match serde_json::to_string(envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "unserializable outbound envelope dropped");
                return Ok(());
            }
        };
        let Some(sink) = self.sink.as_mut() else {
            return Err(());
        };
        let len = raw.len() as u64;
        match sink.send(raw).await {
            Ok(()) => {
                self.messages_sent += 1;
                self.bytes_transferred += len;
                self.last_activity = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "socket write failed");
                Err(())
            }
        }
    }

    fn resolve_entry(entry: QueueEntry, result: Result<()>) {
        if let Some(notify) = entry.notify {
            let _ = notify.send(result);
        }
    }

    fn on_link_lost(&mut self) {
        self.heartbeat.stop();
        self.sink = None;
        // A connection that held for at least one heartbeat interval was
        // healthy: the next outage starts a fresh backoff sequence.
        let stable_after = if self.heartbeat_interval.is_zero() {
            Duration::from_secs(30)
        } else {
            self.heartbeat_interval
        };
        if let Some(connected_at) = self.connected_at.take() {
            if connected_at.elapsed() >= stable_after {
                self.reconnect_attempts = 0;
            }
        }
    }

    async fn shutdown(&mut self, status: ConnectionStatus) {
        self.heartbeat.stop();
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        if status == ConnectionStatus::Failed {
            let attempts = self.settings.connection.backoff.max_attempts;
            self.queue
                .fail_all(|| PulseError::ConnectionFailed { attempts });
            self.router
                .fail_all(|| PulseError::ConnectionFailed { attempts });
        } else {
            self.queue.fail_all(|| PulseError::ConnectionClosed);
            self.router.fail_all(|| PulseError::ConnectionClosed);
        }
        self.set_status(status);
    }

    fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let _ = self.status.send(status);
    }

    fn publish_error(&self, error: PulseError) {
        let _ = self.errors.send(Arc::new(error));
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            status: *self.status.borrow(),
            connected_at: self.connected_at,
            last_activity: self.last_activity,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            bytes_transferred: self.bytes_transferred,
            queued: self.queue.len(),
            pending_requests: self.router.pending_len(),
            subscriptions: self.registry.len(),
            reconnect_attempts: self.reconnect_attempts,
            dropped_overflow: self.queue.dropped_overflow(),
            dropped_expired: self.queue.dropped_expired(),
            dropped_deliveries: self.registry.dropped_deliveries(),
            discarded_responses: self.router.discarded_responses(),
            heartbeat_latency: self.heartbeat.latency(),
        }
    }
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
