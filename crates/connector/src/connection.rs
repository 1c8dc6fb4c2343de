//! Resilient event-subscribed connection
//!
//! A [`ConnectionHandle`] owns one transport session for one feed. A single
//! driver task handles everything that happens to the connection (connect
//! results, inbound events, refresh ticks, caller emits and shutdown) one
//! event at a time. Drops and failed attempts are retried with capped
//! exponential backoff until the configured attempts run out.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use transitedge_metadata::ConnectionOptions;
use transitedge_middleware::{Frame, Link, Transport, TransportError};

use crate::dispatch::EventDispatch;
use crate::error::EmitError;
use crate::events::{LifecycleEvent, LIFECYCLE_CHANNEL_CAPACITY, SERVER_ERROR_EVENT};
use crate::liveness::Liveness;
use crate::metrics::{FeedMetrics, UNHANDLED_EVENT_LABEL};

/// Caller emits waiting for the driver
const COMMAND_BUFFER_SIZE: usize = 64;

/// Periodic outbound event sent while connected
#[derive(Debug, Clone, PartialEq)]
pub struct Refresh {
    pub every: Duration,
    pub frame: Frame,
}

/// Everything needed to activate a connection
#[derive(Debug)]
pub struct ConnectionConfig {
    feed: String,
    endpoint: String,
    options: ConnectionOptions,
    dispatch: EventDispatch,
    on_connect: Vec<Frame>,
    refresh: Option<Refresh>,
}

impl ConnectionConfig {
    pub fn new(feed: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            endpoint: endpoint.into(),
            options: ConnectionOptions::default(),
            dispatch: EventDispatch::new(),
            on_connect: Vec::new(),
            refresh: None,
        }
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribe to an inbound event
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.dispatch.register(event, handler);
        self
    }

    /// Emit `frame` right after every successful connect
    pub fn emit_on_connect(mut self, frame: Frame) -> Self {
        self.on_connect.push(frame);
        self
    }

    /// Emit `frame` every `every` while connected. The first tick fires one
    /// full period after activation.
    pub fn refresh_every(mut self, every: Duration, frame: Frame) -> Self {
        self.refresh = Some(Refresh { every, frame });
        self
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Liveness, lifecycle events and metrics for one connection, shared by the
/// handle and its driver
#[derive(Clone)]
struct Lifecycle {
    feed: String,
    liveness: Arc<watch::Sender<Liveness>>,
    events: broadcast::Sender<LifecycleEvent>,
    metrics: FeedMetrics,
    shutdown: watch::Receiver<bool>,
}

impl Lifecycle {
    fn new(feed: &str, shutdown: watch::Receiver<bool>) -> Self {
        let (liveness, _) = watch::channel(Liveness::Disconnected);
        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let metrics = FeedMetrics::new(feed);
        metrics.set_connected(false);
        Self {
            feed: feed.to_string(),
            liveness: Arc::new(liveness),
            events,
            metrics,
            shutdown,
        }
    }

    fn current(&self) -> Liveness {
        *self.liveness.borrow()
    }

    /// Move to `next` if the move is valid. Once shutdown has been requested
    /// only `Disconnected` is accepted.
    fn transition(&self, next: Liveness) {
        let mut from = next;
        // Checked under the watch lock; teardown sets shutdown before settling
        let changed = self.liveness.send_if_modified(|current| {
            from = *current;
            if *current == next || !current.can_transition_to(next) {
                return false;
            }
            if next != Liveness::Disconnected && *self.shutdown.borrow() {
                return false;
            }
            *current = next;
            self.metrics.set_connected(next.is_connected());
            true
        });

        if !changed {
            if from != next && !from.can_transition_to(next) {
                warn!(feed = %self.feed, from = %from, to = %next, "Ignoring invalid liveness transition");
            } else if from != next {
                debug!(feed = %self.feed, to = %next, "Ignoring liveness change after shutdown");
            }
            return;
        }
        debug!(feed = %self.feed, from = %from, to = %next, "Liveness changed");
        self.publish(LifecycleEvent::StateChanged(next));
    }

    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn reject(&self, event: &str) {
        warn!(feed = %self.feed, event = %event, "Dropping outbound event, connection is not live");
        self.metrics.inc_emit_rejected(event);
        self.publish(LifecycleEvent::EmitRejected {
            event: event.to_string(),
        });
    }
}

/// Handle to an active connection. Dropping it tears the connection down.
pub struct ConnectionHandle {
    endpoint: String,
    lifecycle: Lifecycle,
    commands: mpsc::Sender<Frame>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Start connecting in the background and return immediately.
    ///
    /// Must be called from within a tokio runtime. Liveness starts at
    /// `Disconnected` and moves to `Connecting` once the driver runs.
    pub fn activate(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let ConnectionConfig {
            feed,
            endpoint,
            options,
            dispatch,
            on_connect,
            refresh,
        } = config;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = Lifecycle::new(&feed, shutdown_tx.subscribe());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);

        let refresh = refresh.filter(|refresh| {
            if refresh.every.is_zero() {
                warn!(feed = %feed, event = %refresh.frame.event, "Refresh period is zero, periodic refresh disabled");
                return false;
            }
            true
        });
        let refresh = refresh.map(|refresh| {
            let mut interval = interval_at(Instant::now() + refresh.every, refresh.every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            RefreshTimer {
                interval,
                frame: refresh.frame,
            }
        });

        info!(
            feed = %feed,
            endpoint = %endpoint,
            events = ?dispatch.events(),
            "Activating connection"
        );

        let driver = Driver {
            transport,
            endpoint: endpoint.clone(),
            options,
            dispatch,
            on_connect,
            refresh,
            commands: commands_rx,
            shutdown: shutdown_rx,
            lifecycle: lifecycle.clone(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            endpoint,
            lifecycle,
            commands: commands_tx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    pub fn feed(&self) -> &str {
        &self.lifecycle.feed
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn liveness(&self) -> Liveness {
        self.lifecycle.current()
    }

    pub fn is_connected(&self) -> bool {
        self.liveness().is_connected()
    }

    /// Receiver that observes every liveness change
    pub fn watch_liveness(&self) -> watch::Receiver<Liveness> {
        self.lifecycle.liveness.subscribe()
    }

    /// Subscribe to lifecycle events published from now on
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.events.subscribe()
    }

    /// Whether the driver is still running (false after deactivation or
    /// once reconnect attempts are exhausted)
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Push an event to the server.
    ///
    /// Only allowed while connected; otherwise the event is dropped and the
    /// rejection is returned and published as [`LifecycleEvent::EmitRejected`].
    pub fn emit(&self, frame: Frame) -> Result<(), EmitError> {
        if !self.is_connected() {
            self.lifecycle.reject(&frame.event);
            return Err(EmitError::NotConnected { event: frame.event });
        }

        self.commands.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => {
                self.lifecycle.reject(&frame.event);
                EmitError::Backpressure { event: frame.event }
            }
            TrySendError::Closed(frame) => {
                self.lifecycle.reject(&frame.event);
                EmitError::NotConnected { event: frame.event }
            }
        })
    }

    /// Cancel timers, release the session and settle at `Disconnected`.
    /// Safe to call any number of times.
    pub async fn deactivate(&mut self) {
        let Some(task) = self.task.take() else {
            debug!(feed = %self.feed(), "Connection already deactivated");
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!(feed = %self.feed(), error = %e, "Connection driver panicked");
            }
        }
        self.lifecycle.transition(Liveness::Disconnected);
        info!(feed = %self.feed(), "Connection deactivated");
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            task.abort();
            self.lifecycle.transition(Liveness::Disconnected);
        }
    }
}

struct RefreshTimer {
    interval: Interval,
    frame: Frame,
}

/// Resolves on the next refresh tick, or never when no refresh is configured
async fn next_tick(refresh: &mut Option<RefreshTimer>) {
    match refresh {
        Some(timer) => {
            timer.interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct DisconnectOnExit(Lifecycle);

impl Drop for DisconnectOnExit {
    fn drop(&mut self) {
        self.0.transition(Liveness::Disconnected);
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

struct Driver {
    transport: Arc<dyn Transport>,
    endpoint: String,
    options: ConnectionOptions,
    dispatch: EventDispatch,
    on_connect: Vec<Frame>,
    refresh: Option<RefreshTimer>,
    commands: mpsc::Receiver<Frame>,
    shutdown: watch::Receiver<bool>,
    lifecycle: Lifecycle,
}

impl Driver {
    async fn run(mut self) {
        let feed = self.lifecycle.feed.clone();
        // Settles liveness however the task ends: return, abort, or a
        // panicking handler
        let _exit = DisconnectOnExit(self.lifecycle.clone());
        let mut attempts: u32 = 0;

        loop {
            self.lifecycle.transition(Liveness::Connecting);

            match self.connect().await {
                None => break,
                Some(Ok(link)) => {
                    attempts = 0;
                    self.lifecycle.transition(Liveness::Connected);
                    info!(feed = %feed, endpoint = %self.endpoint, "Connected");

                    match self.pump(link).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            self.lifecycle.transition(Liveness::Disconnected);
                            warn!(feed = %feed, reason = %reason, "Connection lost");
                            self.lifecycle
                                .publish(LifecycleEvent::ConnectionLost { reason });
                        }
                    }
                }
                Some(Err(e)) => {
                    self.lifecycle.transition(Liveness::Disconnected);
                    warn!(feed = %feed, endpoint = %self.endpoint, error = %e, "Connect attempt failed");
                    self.lifecycle.publish(LifecycleEvent::ConnectFailed {
                        error: e.to_string(),
                    });
                }
            }

            if !self.options.should_retry(attempts) {
                if self.options.reconnection {
                    warn!(feed = %feed, attempts, "Reconnect attempts exhausted, staying disconnected");
                    self.lifecycle
                        .publish(LifecycleEvent::RetriesExhausted { attempts });
                } else {
                    info!(feed = %feed, "Reconnection disabled, staying disconnected");
                }
                break;
            }

            let delay = self.options.backoff_delay(attempts);
            attempts += 1;
            self.lifecycle.metrics.inc_reconnect();
            info!(
                feed = %feed,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            self.lifecycle.publish(LifecycleEvent::ReconnectScheduled {
                attempt: attempts,
                delay,
            });

            if !self.wait(delay).await {
                break;
            }
        }

        debug!(feed = %feed, "Connection driver stopped");
    }

    /// Attempt one connect. `None` means shutdown was requested meanwhile.
    async fn connect(&mut self) -> Option<Result<Link, TransportError>> {
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let attempt = async move { transport.connect(&endpoint).await };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return None,
                result = &mut attempt => return Some(result),
                _ = next_tick(&mut self.refresh) => {
                    self.on_refresh_tick(None);
                }
                Some(frame) = self.commands.recv() => self.lifecycle.reject(&frame.event),
            }
        }
    }

    /// Serve an open session until it ends or shutdown is requested
    async fn pump(&mut self, link: Link) -> SessionEnd {
        let Link {
            outbound,
            mut inbound,
        } = link;

        for frame in self.on_connect.clone() {
            debug!(feed = %self.lifecycle.feed, event = %frame.event, "Emitting on connect");
            if !self.push(&outbound, frame) {
                return SessionEnd::Lost("link closed during connect".to_string());
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return SessionEnd::Shutdown,
                msg = inbound.recv() => match msg {
                    Some(Ok(frame)) => self.dispatch(frame),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("transport closed".to_string()),
                },
                _ = next_tick(&mut self.refresh) => {
                    if !self.on_refresh_tick(Some(&outbound)) {
                        return SessionEnd::Lost("link closed".to_string());
                    }
                }
                Some(frame) = self.commands.recv() => {
                    if !self.push(&outbound, frame) {
                        return SessionEnd::Lost("link closed".to_string());
                    }
                }
            }
        }
    }

    /// Sleep for the backoff delay. Returns false if shutdown was requested.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return false,
                _ = &mut sleep => return true,
                _ = next_tick(&mut self.refresh) => {
                    self.on_refresh_tick(None);
                }
                Some(frame) = self.commands.recv() => self.lifecycle.reject(&frame.event),
            }
        }
    }

    /// Emit the refresh event if the connection is live right now; skip the
    /// tick otherwise. Returns false if the link turned out to be closed.
    fn on_refresh_tick(&self, outbound: Option<&mpsc::Sender<Frame>>) -> bool {
        let Some(timer) = &self.refresh else {
            return true;
        };

        match outbound {
            Some(outbound) if self.lifecycle.current().is_connected() => {
                trace!(feed = %self.lifecycle.feed, event = %timer.frame.event, "Refresh tick");
                self.push(outbound, timer.frame.clone())
            }
            _ => {
                debug!(
                    feed = %self.lifecycle.feed,
                    liveness = %self.lifecycle.current(),
                    "Refresh tick skipped, not connected"
                );
                true
            }
        }
    }

    /// Hand a frame to the transport without waiting. Returns false if the
    /// link is closed.
    fn push(&self, outbound: &mpsc::Sender<Frame>, frame: Frame) -> bool {
        let event = frame.event.clone();
        match outbound.try_send(frame) {
            Ok(()) => {
                self.lifecycle.metrics.inc_emit_sent(&event);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(feed = %self.lifecycle.feed, event = %event, "Transport buffer full, dropping event");
                self.lifecycle.metrics.inc_emit_rejected(&event);
                true
            }
            Err(TrySendError::Closed(_)) => {
                self.lifecycle.reject(&event);
                false
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        trace!(feed = %self.lifecycle.feed, event = %frame.event, "Inbound event");

        if self.dispatch.handles(&frame.event) {
            self.lifecycle.metrics.inc_event(&frame.event);
            self.dispatch.dispatch(frame);
        } else if frame.event == SERVER_ERROR_EVENT {
            self.lifecycle.metrics.inc_event(SERVER_ERROR_EVENT);
            let message = frame
                .payload
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| frame.payload.to_string());
            warn!(feed = %self.lifecycle.feed, message = %message, "Server reported an error");
            self.lifecycle
                .publish(LifecycleEvent::ServerError { message });
        } else {
            // Server-chosen names never become label values
            self.lifecycle.metrics.inc_event(UNHANDLED_EVENT_LABEL);
            debug!(feed = %self.lifecycle.feed, event = %frame.event, "No handler registered, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_follows_allowed_moves() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = Lifecycle::new("lifecycle-moves", shutdown_rx);
        let mut events = lifecycle.events.subscribe();

        lifecycle.transition(Liveness::Connected);
        assert_eq!(lifecycle.current(), Liveness::Disconnected);

        lifecycle.transition(Liveness::Connecting);
        lifecycle.transition(Liveness::Connected);
        assert_eq!(lifecycle.current(), Liveness::Connected);
        assert!(lifecycle.metrics.is_connected());

        assert_eq!(
            events.try_recv().unwrap(),
            LifecycleEvent::StateChanged(Liveness::Connecting)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            LifecycleEvent::StateChanged(Liveness::Connected)
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_only_disconnect_after_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = Lifecycle::new("lifecycle-shutdown", shutdown_rx);
        lifecycle.transition(Liveness::Connecting);

        // Teardown: signal shutdown, then settle
        shutdown_tx.send(true).unwrap();
        lifecycle.transition(Liveness::Disconnected);

        // A driver still finishing its poll cannot revive the connection
        lifecycle.transition(Liveness::Connecting);
        assert_eq!(lifecycle.current(), Liveness::Disconnected);
        assert!(!lifecycle.metrics.is_connected());
    }

    #[test]
    fn test_shutdown_blocks_late_connect() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = Lifecycle::new("lifecycle-late-connect", shutdown_rx);
        let liveness = lifecycle.liveness.subscribe();
        lifecycle.transition(Liveness::Connecting);

        shutdown_tx.send(true).unwrap();
        lifecycle.transition(Liveness::Connected);
        assert_eq!(*liveness.borrow(), Liveness::Connecting);

        lifecycle.transition(Liveness::Disconnected);
        assert_eq!(*liveness.borrow(), Liveness::Disconnected);
    }
}
