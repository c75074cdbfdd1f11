//! Connection manager for the live push endpoint
//!
//! Owns the lifecycle of one logical WebSocket connection: open, connected,
//! closed, reconnecting. Recovery is automatic with capped exponential
//! backoff; while the page is hidden, scheduled reconnects are deferred
//! rather than burned. Decoded messages fan out to subscribers through the
//! registry, once under the generic `message` channel and once under their
//! specific type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::backoff::ReconnectPolicy;
use super::registry::{Handler, HandlerId, SubscriberRegistry};
use super::state::{ConnCore, ConnState, ReconnectPlan};
use crate::config::Settings;
use crate::events::{Envelope, EventKind, LiveEvent};

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    keepalive: Duration,
    core: Mutex<ConnCore>,
    registry: SubscriberRegistry,
    /// Outbound channel into the live session; `None` while disconnected.
    out_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Pending reconnect timer; cancel-and-replace, never stacked.
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    visible: AtomicBool,
    shutting_down: AtomicBool,
}

/// Handle to the single logical push connection
///
/// Cheap to clone; all clones share one connection, one attempt counter and
/// one subscriber registry. Create it once per page session, wire up
/// subscribers with [`on`](ConnectionManager::on), then call
/// [`connect`](ConnectionManager::connect).
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager from settings; no I/O happens until `connect()`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: settings.endpoint.live_url(),
                policy: settings.reconnect.policy(),
                keepalive: settings.reconnect.keepalive(),
                core: Mutex::new(ConnCore::new()),
                registry: SubscriberRegistry::new(),
                out_tx: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                visible: AtomicBool::new(true),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Open the connection; a no-op while an attempt is in flight or the
    /// socket is already open. Must be called from within a tokio runtime.
    ///
    /// An explicit `connect()` also revives a manager that was shut down,
    /// starting a fresh session. Subscribers released by the shutdown must be
    /// re-registered first.
    pub fn connect(&self) {
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        self.spawn_session();
    }

    /// Connect path for timer and visibility callbacks; unlike an explicit
    /// `connect()` it stays inert after shutdown.
    fn resume(&self) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        self.spawn_session();
    }

    fn spawn_session(&self) {
        if !self.inner.core.lock().begin_connect() {
            debug!("connect ignored, attempt already in flight or open");
            return;
        }
        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }
        let manager = self.clone();
        tokio::spawn(async move { manager.run_session().await });
    }

    /// Register a handler for an event kind
    ///
    /// Registering a `Message` handler immediately replays any messages held
    /// in the fallback queue.
    pub fn on(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let id = self.inner.registry.on(kind.clone(), handler);
        if kind == EventKind::Message {
            self.inner.registry.replay_fallback();
        }
        id
    }

    /// Remove a previously registered handler; no-op if not found.
    pub fn off(&self, kind: &EventKind, id: HandlerId) {
        self.inner.registry.off(kind, id);
    }

    /// Serialize a payload to JSON text and transmit it, if connected.
    pub fn send<T: Serialize>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(err) => warn!("dropping unserializable outbound payload: {}", err),
        }
    }

    /// Transmit a text frame, if connected; silently dropped otherwise.
    /// Outbound is fire-and-forget, there is no queue and no acknowledgment.
    pub fn send_text(&self, text: impl Into<String>) {
        let guard = self.inner.out_tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(Message::Text(text.into())).is_err() {
                    debug!("session ended, dropping outbound message");
                }
            }
            None => debug!("not connected, dropping outbound message"),
        }
    }

    /// Current connectivity
    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().state() == ConnState::Open
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnState {
        self.inner.core.lock().state()
    }

    /// Feed the page-visibility signal
    ///
    /// While hidden, reconnects are deferred instead of scheduled; a deferred
    /// reconnect fires immediately when visibility returns.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::SeqCst);
        if visible && self.inner.core.lock().take_deferred() {
            info!("page visible again, resuming reconnect");
            self.resume();
        }
    }

    /// Tear down the connection, stop all reconnection scheduling and release
    /// every subscriber (dropping their captured resources with them). The
    /// manager can be revived with an explicit [`connect`](Self::connect);
    /// subscribers must then be wired up again.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }
        // Dropping the outbound sender ends the session loop
        *self.inner.out_tx.lock() = None;
        self.inner.registry.clear();
        info!("connection manager shut down");
    }

    /// One connection attempt plus, on success, the message pump. Runs until
    /// the socket drops, then hands off to the reconnect planner.
    async fn run_session(self) {
        let ws = match connect_async(self.inner.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!("failed to open {}: {}", self.inner.url, err);
                self.inner.core.lock().mark_closed();
                self.schedule_reconnect();
                return;
            }
        };
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            self.inner.core.lock().reset();
            return;
        }
        info!("connected to {}", self.inner.url);

        self.inner.core.lock().mark_open();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        *self.inner.out_tx.lock() = Some(out_tx);
        self.dispatch_connection_change(true);
        self.inner.registry.replay_fallback();

        let (mut sink, mut stream) = ws.split();
        let keepalive = self.inner.keepalive;
        let ping_period = keepalive.max(Duration::from_secs(1));
        let mut pinger = tokio::time::interval_at(Instant::now() + ping_period, ping_period);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(err) = sink.send(Message::Pong(data)).await {
                            warn!("transport error: {}", err);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("server closed connection");
                        break;
                    }
                    Some(Ok(_)) => {} // binary and pong frames carry nothing for us
                    Some(Err(err)) => {
                        warn!("transport error: {}", err);
                        break;
                    }
                    None => break,
                },
                outbound = out_rx.recv() => match outbound {
                    Some(message) => {
                        if let Err(err) = sink.send(message).await {
                            warn!("send failed: {}", err);
                            break;
                        }
                    }
                    None => break,
                },
                _ = pinger.tick(), if !keepalive.is_zero() => {
                    if let Err(err) = sink.send(Message::Text("ping".to_string())).await {
                        warn!("keepalive failed: {}", err);
                        break;
                    }
                }
            }
        }

        *self.inner.out_tx.lock() = None;
        self.inner.core.lock().mark_closed();
        self.dispatch_connection_change(false);
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            self.inner.core.lock().reset();
            return;
        }
        self.schedule_reconnect();
    }

    /// Decode one inbound frame and fan it out to subscribers.
    ///
    /// Malformed payloads are discarded with a warning; they do not affect the
    /// connection or other messages.
    pub(crate) fn handle_frame(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("discarding malformed frame: {}", err);
                return;
            }
        };
        let registry = &self.inner.registry;
        match envelope.kind() {
            Some(kind) => {
                let event = LiveEvent::Payload(envelope);
                registry.dispatch(&EventKind::Message, &event);
                registry.dispatch(&kind, &event);
            }
            None => registry.dispatch(&EventKind::Message, &LiveEvent::Payload(envelope)),
        }
    }

    fn dispatch_connection_change(&self, connected: bool) {
        self.inner.registry.dispatch(
            &EventKind::ConnectionChange,
            &LiveEvent::ConnectionChange(connected),
        );
    }

    /// Plan the next attempt after a disconnect and arm its timer.
    ///
    /// The previous timer is always aborted before a new one is stored, so at
    /// most one reconnect schedule is ever in flight.
    fn schedule_reconnect(&self) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let visible = self.inner.visible.load(Ordering::SeqCst);
        let plan = self
            .inner
            .core
            .lock()
            .plan_reconnect(visible, &self.inner.policy);
        match plan {
            ReconnectPlan::Exhausted => {
                warn!(
                    "giving up after {} reconnect attempts",
                    self.inner.policy.max_attempts
                );
            }
            ReconnectPlan::Deferred => {
                info!("page hidden, deferring reconnect");
            }
            ReconnectPlan::Schedule { attempt, delay } => {
                info!("reconnecting in {}ms (attempt {})", delay.as_millis(), attempt);
                let manager = self.clone();
                let handle = tokio::spawn(async move {
                    sleep(delay).await;
                    manager.resume();
                });
                let mut timer = self.inner.reconnect_timer.lock();
                if let Some(previous) = timer.take() {
                    previous.abort();
                }
                *timer = Some(handle);
            }
        }
    }
}
