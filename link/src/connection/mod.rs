//! Connection management.
//!
//! This module contains:
//! - [`ConnectionManager`]: the public handle owning one logical connection
//! - `task`: the background task that dials, drives the socket, runs the
//!   heartbeat and reconnects after abnormal loss

mod task;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec;
use crate::correlator::RequestCorrelator;
use crate::error::{LinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::{ConnectionOptions, ReadyState};
use crate::reconnect::{ReconnectController, ReconnectDecision};
use crate::timeouts::LinkTimeouts;

/// Capacity of the command channel between the handle and the task.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// How long `close()` waits for the task to finish its close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Current time in millis since Unix epoch.
#[inline]
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    Send {
        frame: String,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// State shared between the handle and the task.
pub(crate) struct ConnectionContext {
    pub(crate) url: String,
    pub(crate) options: ConnectionOptions,
    pub(crate) timeouts: LinkTimeouts,
    pub(crate) handlers: EventHandlers,
    pub(crate) correlator: Arc<RequestCorrelator>,
    state: AtomicU8,
    last_heartbeat_ms: AtomicU64,
    ping_interval_ms: AtomicU64,
    ping_timeout_ms: AtomicU64,
    reconnect: Mutex<ReconnectController>,
}

impl ConnectionContext {
    pub(crate) fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn record_heartbeat(&self) {
        self.last_heartbeat_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn record_negotiated(&self, interval: Duration, timeout: Duration) {
        self.ping_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
        self.ping_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Run `f` against the reconnect controller. A poisoned lock still holds a
    /// consistent controller (every method is a plain field update).
    pub(crate) fn with_reconnect<R>(&self, f: impl FnOnce(&mut ReconnectController) -> R) -> R {
        let mut guard = self
            .reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub(crate) fn on_failure(&self) -> ReconnectDecision {
        self.with_reconnect(|r| r.on_failure())
    }
}

/// Result of a task's first dial, as seen by callers joining it late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FirstDial {
    Pending,
    Opened,
    Failed(String),
}

/// Reports the first dial to the `connect()` caller that spawned the task
/// and to any caller that joined while it was in flight. Fires once.
pub(crate) struct ReadySignal {
    caller: Option<oneshot::Sender<Result<()>>>,
    joiners: watch::Sender<FirstDial>,
}

impl ReadySignal {
    pub(crate) fn opened(&mut self) {
        if let Some(tx) = self.caller.take() {
            self.joiners.send_replace(FirstDial::Opened);
            let _ = tx.send(Ok(()));
        }
    }

    pub(crate) fn failed(&mut self, err: LinkError) {
        if let Some(tx) = self.caller.take() {
            self.joiners.send_replace(FirstDial::Failed(err.to_string()));
            let _ = tx.send(Err(err));
        }
    }
}

struct TaskHandle {
    cmd_tx: mpsc::Sender<ConnCmd>,
    join: JoinHandle<()>,
    first_dial: watch::Receiver<FirstDial>,
}

/// Owner of one logical connection.
///
/// Consumers hold a reference to a manager instead of reaching into a shared
/// socket; every dependency (URL, options, timeouts, handlers) is injected at
/// construction.
///
/// # Example
///
/// ```rust,no_run
/// use courier_link::{ConnectionManager, ConnectionOptions, EventHandlers, LinkTimeouts};
/// use serde_json::json;
///
/// # async fn example() -> courier_link::Result<()> {
/// let manager = ConnectionManager::new(
///     "ws://localhost:8080/ws",
///     ConnectionOptions::default(),
///     LinkTimeouts::default(),
///     EventHandlers::new().on_business_message(|msg| println!("{:?}", msg)),
/// );
/// manager.connect(false).await?;
/// let data = manager.send_async("profile.get", json!({"id": 7})).await?;
/// println!("{}", data);
/// manager.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    ctx: Arc<ConnectionContext>,
    task: tokio::sync::Mutex<Option<TaskHandle>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        options: ConnectionOptions,
        timeouts: LinkTimeouts,
        handlers: EventHandlers,
    ) -> Self {
        let reconnect = ReconnectController::from_options(&options);
        let correlator = Arc::new(RequestCorrelator::new(timeouts.request_timeout));
        let ctx = ConnectionContext {
            url: url.into(),
            ping_interval_ms: AtomicU64::new(timeouts.default_ping_interval.as_millis() as u64),
            ping_timeout_ms: AtomicU64::new(timeouts.default_ping_timeout.as_millis() as u64),
            options,
            timeouts,
            handlers,
            correlator,
            state: AtomicU8::new(ReadyState::Closed as u8),
            last_heartbeat_ms: AtomicU64::new(0),
            reconnect: Mutex::new(reconnect),
        };
        Self {
            ctx: Arc::new(ctx),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Open the connection.
    ///
    /// A no-op when already open; a call made while the first dial is still
    /// in flight waits for that dial instead of starting another.
    /// `is_reconnect = false` (a manual connect) clears the reconnect attempt
    /// counter, including after a give-up.
    /// Resolves once the transport is open; when the first dial fails the
    /// error is returned while the task keeps retrying in the background (if
    /// auto-reconnect is on). Wrap in `tokio::time::timeout` to bound the
    /// wait from the caller's side.
    pub async fn connect(&self, is_reconnect: bool) -> Result<()> {
        let mut slot = self.task.lock().await;

        if let Some(handle) = slot.as_ref() {
            if !handle.join.is_finished() {
                if self.ctx.state() == ReadyState::Open {
                    log::debug!("[courier-link] connect() ignored: already open");
                    return Ok(());
                }
                if *handle.first_dial.borrow() == FirstDial::Pending {
                    let first_dial = handle.first_dial.clone();
                    drop(slot);
                    log::debug!("[courier-link] connect() joining the dial in flight");
                    return join_first_dial(first_dial).await;
                }
            }
        }

        // A task stuck in backoff is replaced by a fresh dial.
        if let Some(previous) = slot.take() {
            stop_task(previous).await;
        }

        if !is_reconnect {
            self.ctx.with_reconnect(|r| r.reset());
        }

        self.ctx.set_state(ReadyState::Connecting);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (first_dial_tx, first_dial) = watch::channel(FirstDial::Pending);
        let ready = ReadySignal {
            caller: Some(ready_tx),
            joiners: first_dial_tx,
        };
        let ctx = Arc::clone(&self.ctx);
        let join = tokio::spawn(async move {
            task::connection_task(ctx, cmd_rx, ready).await;
        });
        *slot = Some(TaskHandle {
            cmd_tx,
            join,
            first_dial,
        });
        drop(slot);

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(LinkError::ConnectionClosed(
                "connection task exited before signalling readiness".to_string(),
            )),
        }
    }

    /// Close the connection.
    ///
    /// Stops the heartbeat, cancels any pending reconnect, closes the
    /// transport and rejects every pending request. Each step runs even if an
    /// earlier one failed.
    pub async fn close(&self) {
        self.ctx.set_state(ReadyState::Closing);

        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => stop_task(handle).await,
            None => log::debug!("[courier-link] close(): no connection task"),
        }

        let rejected = self.ctx.correlator.fail_all("connection closed by client");
        if rejected > 0 {
            log::info!("[courier-link] Rejected {} pending request(s) on close", rejected);
        }

        self.ctx.with_reconnect(|r| r.reset());
        self.ctx.set_state(ReadyState::Closed);
    }

    /// Send a data packet without waiting for a response.
    pub async fn send(&self, event_type: &str, payload: JsonValue) -> Result<()> {
        let frame = codec::encode_message(event_type, &payload, None)?;
        self.send_frame(frame).await
    }

    /// Send a request and wait for its correlated response.
    ///
    /// The listener is registered before the frame is written. Resolves with
    /// the envelope's `data` on the OK code; rejects with
    /// [`LinkError::Rejected`] on any other code, with
    /// [`LinkError::TimeoutError`] after the request timeout, and with
    /// [`LinkError::ConnectionClosed`] if the connection goes away first.
    pub async fn send_async(&self, event_type: &str, payload: JsonValue) -> Result<JsonValue> {
        let correlator = &self.ctx.correlator;
        let ack_id = correlator.next_ack_id();
        let frame = codec::encode_message(event_type, &payload, Some(ack_id))?;
        let pending = correlator.register(ack_id)?;

        if let Err(e) = self.send_frame(frame).await {
            correlator.cancel(ack_id);
            return Err(e);
        }

        correlator.wait_envelope(pending).await
    }

    pub fn state(&self) -> ReadyState {
        self.ctx.state()
    }

    pub fn is_open(&self) -> bool {
        self.ctx.state() == ReadyState::Open
    }

    /// Unix millis of the last pong, if any was received.
    pub fn last_heartbeat_ms(&self) -> Option<u64> {
        match self.ctx.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Heartbeat interval in effect (negotiated, or the default).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.ctx.ping_interval_ms.load(Ordering::Relaxed))
    }

    /// Pong deadline in effect (negotiated, or the default).
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.ctx.ping_timeout_ms.load(Ordering::Relaxed))
    }

    /// Consecutive failed reconnect attempts since the last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.ctx.with_reconnect(|r| r.attempts())
    }

    pub fn pending_requests(&self) -> usize {
        self.ctx.correlator.pending_count()
    }

    async fn send_frame(&self, frame: String) -> Result<()> {
        let cmd_tx = match self.task.lock().await.as_ref() {
            Some(handle) => handle.cmd_tx.clone(),
            None => return Err(LinkError::NotConnected),
        };

        let (result_tx, result_rx) = oneshot::channel();
        cmd_tx
            .send(ConnCmd::Send { frame, result_tx })
            .await
            .map_err(|_| LinkError::NotConnected)?;
        result_rx.await.map_err(|_| {
            LinkError::ConnectionClosed("connection task dropped the send".to_string())
        })?
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(slot) = self.task.try_lock() {
            if let Some(handle) = slot.as_ref() {
                let _ = handle.cmd_tx.try_send(ConnCmd::Shutdown);
            }
        }
    }
}

async fn join_first_dial(mut first_dial: watch::Receiver<FirstDial>) -> Result<()> {
    let settled = first_dial
        .wait_for(|dial| *dial != FirstDial::Pending)
        .await
        .map(|dial| (*dial).clone());
    match settled {
        Ok(FirstDial::Failed(message)) => Err(LinkError::WebSocketError(message)),
        Ok(_) => Ok(()),
        Err(_) => Err(LinkError::ConnectionClosed(
            "connection task exited before signalling readiness".to_string(),
        )),
    }
}

async fn stop_task(handle: TaskHandle) {
    let TaskHandle { cmd_tx, mut join, .. } = handle;
    if cmd_tx.send(ConnCmd::Shutdown).await.is_err() {
        log::debug!("[courier-link] Connection task already stopped");
    }
    match tokio::time::timeout(CLOSE_GRACE, &mut join).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => log::warn!("[courier-link] Connection task ended abnormally: {}", e),
        Err(_) => {
            log::warn!(
                "[courier-link] Connection task did not stop within {:?}; aborting",
                CLOSE_GRACE
            );
            join.abort();
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            "ws://127.0.0.1:9/ws",
            ConnectionOptions::default().with_auto_reconnect(false),
            LinkTimeouts::fast(),
            EventHandlers::new(),
        )
    }

    #[tokio::test]
    async fn test_send_without_connection_is_not_connected() {
        let manager = manager();
        let err = manager.send("ping", JsonValue::Null).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(manager.state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_send_async_failure_leaves_no_pending_listener() {
        let manager = manager();
        assert!(manager.send_async("profile.get", JsonValue::Null).await.is_err());
        assert_eq!(manager.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_close_without_connect_is_safe() {
        let manager = manager();
        manager.close().await;
        manager.close().await;
        assert_eq!(manager.state(), ReadyState::Closed);
    }

    #[test]
    fn test_defaults_before_negotiation() {
        let manager = manager();
        assert_eq!(manager.heartbeat_interval(), LinkTimeouts::fast().default_ping_interval);
        assert_eq!(manager.last_heartbeat_ms(), None);
        assert_eq!(manager.reconnect_attempts(), 0);
    }
}
