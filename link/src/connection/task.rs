//! Background connection task.
//!
//! One task per [`ConnectionManager::connect`](super::ConnectionManager::connect)
//! call. It dials, drives the socket with a single `select!` loop (commands,
//! heartbeat ping, pong deadline, inbound frames) and, after an abnormal
//! loss, sleeps the backoff chosen by the reconnect controller while still
//! answering commands.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::MaybeTlsStream;

use super::{ConnCmd, ConnectionContext, ReadySignal, FAR_FUTURE};
use crate::codec;
use crate::error::{LinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, HeartbeatViolation};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStatus};
use crate::models::{BusinessMessage, HeartbeatPolicy, Packet, PacketKind, ReadyState};
use crate::reconnect::ReconnectDecision;
use crate::timeouts::LinkTimeouts;

pub(crate) type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How one socket session ended.
enum SessionEnd {
    /// The owner asked to close.
    Shutdown,
    /// Close packet or close code 1000: do not reconnect.
    Normal(DisconnectReason),
    /// Anything else: hand over to the reconnect controller.
    Abnormal(DisconnectReason),
}

pub(crate) async fn connection_task(
    ctx: Arc<ConnectionContext>,
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    mut ready: ReadySignal,
) {
    loop {
        ctx.set_state(ReadyState::Connecting);
        ctx.with_reconnect(|r| r.begin_attempt());

        match establish_ws(&ctx).await {
            Ok(ws) => {
                ctx.with_reconnect(|r| r.on_open());
                ctx.set_state(ReadyState::Open);
                log::info!("[courier-link] Connected to {}", ctx.url);
                ctx.handlers.emit_open();
                ready.opened();

                match drive_session(&ctx, ws, &mut cmd_rx).await {
                    SessionEnd::Shutdown => {
                        finish(&ctx, DisconnectReason::normal("Connection closed by client"));
                        return;
                    },
                    SessionEnd::Normal(reason) => {
                        log::info!("[courier-link] Connection closed normally: {}", reason);
                        finish(&ctx, reason);
                        return;
                    },
                    SessionEnd::Abnormal(reason) => {
                        log::warn!("[courier-link] Connection lost: {}", reason);
                        ctx.correlator.fail_all(&reason.message);
                        ctx.handlers.emit_close(reason);
                    },
                }
            },
            Err(e) => {
                log::warn!("[courier-link] Connection attempt failed: {}", e);
                ready.failed(e);
            },
        }

        match ctx.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                log::info!(
                    "[courier-link] Attempting reconnection in {:?} (attempt {})",
                    delay,
                    attempt
                );
                ctx.set_state(ReadyState::Connecting);
                if !wait_backoff(delay, &mut cmd_rx).await {
                    ctx.set_state(ReadyState::Closed);
                    return;
                }
            },
            ReconnectDecision::GiveUp { attempts } => {
                log::warn!(
                    "[courier-link] Giving up after {} reconnection attempt(s); reload required",
                    attempts
                );
                ctx.set_state(ReadyState::Closed);
                ctx.correlator.fail_all("reconnection gave up");
                ctx.handlers.emit_error(ConnectionError::new(
                    format!("Max reconnection attempts ({}) reached", attempts),
                    false,
                ));
                ctx.handlers.emit_reload_required();
                return;
            },
            ReconnectDecision::Stop => {
                log::debug!("[courier-link] Reconnection disabled; connection stays closed");
                ctx.set_state(ReadyState::Closed);
                ctx.correlator.fail_all("connection lost");
                return;
            },
        }
    }
}

fn finish(ctx: &ConnectionContext, reason: DisconnectReason) {
    ctx.set_state(ReadyState::Closed);
    ctx.correlator.fail_all(&reason.message);
    ctx.handlers.emit_close(reason);
}

/// Sleep out a backoff delay while answering commands. Returns `false` when
/// shutdown was requested.
async fn wait_backoff(delay: std::time::Duration, cmd_rx: &mut mpsc::Receiver<ConnCmd>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCmd::Send { result_tx, .. }) => {
                    let _ = result_tx.send(Err(LinkError::NotConnected));
                },
                Some(ConnCmd::Shutdown) | None => return false,
            },
            _ = &mut sleep => return true,
        }
    }
}

async fn establish_ws(ctx: &ConnectionContext) -> Result<WebSocketStream> {
    log::debug!("[courier-link] Establishing WebSocket connection to {}", ctx.url);

    let request = ctx.url.as_str().into_client_request().map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid WebSocket URL '{}': {}", ctx.url, e))
    })?;

    let timeout = ctx.timeouts.connection_timeout;
    let connect_result = if LinkTimeouts::is_no_timeout(timeout) {
        Ok(tokio_tungstenite::connect_async(request).await)
    } else {
        tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await
    };

    match connect_result {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
            let message = format!("WebSocket upgrade rejected: HTTP {}", response.status());
            ctx.handlers.emit_error(ConnectionError::new(&message, true));
            Err(LinkError::WebSocketError(message))
        },
        Ok(Err(e)) => {
            let message = format!("Connection failed: {}", e);
            ctx.handlers.emit_error(ConnectionError::new(&message, true));
            Err(LinkError::WebSocketError(message))
        },
        Err(_) => {
            let message = format!("Connection timeout ({:?})", timeout);
            ctx.handlers.emit_error(ConnectionError::new(&message, true));
            Err(LinkError::TimeoutError(message))
        },
    }
}

async fn drive_session(
    ctx: &ConnectionContext,
    mut ws: WebSocketStream,
    cmd_rx: &mut mpsc::Receiver<ConnCmd>,
) -> SessionEnd {
    let mut heartbeat = HeartbeatMonitor::new(
        ctx.timeouts.default_ping_interval,
        ctx.timeouts.default_ping_timeout,
    );
    let opened_at = Instant::now();

    let end = loop {
        let ping_at = heartbeat.next_ping_at(opened_at);
        let pong_deadline = heartbeat.pong_deadline();

        let ping_sleep = tokio::time::sleep_until(ping_at);
        tokio::pin!(ping_sleep);
        let pong_sleep =
            tokio::time::sleep_until(pong_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE));
        tokio::pin!(pong_sleep);

        tokio::select! {
            biased;

            _ = &mut pong_sleep, if pong_deadline.is_some() => {
                let status = heartbeat.check_overdue(Instant::now());
                if let Some(end) = apply_heartbeat(ctx, status) {
                    break end;
                }
            }

            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCmd::Send { frame, result_tx }) => {
                    let result = write_frame(ctx, &mut ws, frame).await;
                    let failed = result.as_ref().err().map(|e| e.to_string());
                    let _ = result_tx.send(result);
                    if let Some(error) = failed {
                        break SessionEnd::Abnormal(DisconnectReason::abnormal(format!(
                            "Send failed: {}",
                            error
                        )));
                    }
                },
                Some(ConnCmd::Shutdown) | None => break SessionEnd::Shutdown,
            },

            _ = &mut ping_sleep => {
                let ping = match codec::encode(&Packet::control(PacketKind::Ping)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("[courier-link] Failed to encode ping: {}", e);
                        continue;
                    },
                };
                if let Err(e) = write_frame(ctx, &mut ws, ping).await {
                    break SessionEnd::Abnormal(DisconnectReason::abnormal(format!(
                        "Heartbeat ping failed: {}",
                        e
                    )));
                }
                heartbeat.on_ping_sent(Instant::now());
            }

            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(end) = handle_text(ctx, &mut ws, &mut heartbeat, text.as_str()).await {
                        break end;
                    }
                },
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        if let Some(end) = handle_text(ctx, &mut ws, &mut heartbeat, text).await {
                            break end;
                        }
                    },
                    Err(e) => {
                        log::warn!("[courier-link] Dropping non UTF-8 binary frame: {}", e);
                        ctx.handlers.emit_error(ConnectionError::new(
                            format!("Non UTF-8 binary frame: {}", e),
                            true,
                        ));
                    },
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                        None => DisconnectReason::abnormal("Server closed without status code"),
                    };
                    break if reason.normal {
                        SessionEnd::Normal(reason)
                    } else {
                        SessionEnd::Abnormal(reason)
                    };
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        log::debug!("[courier-link] Failed to answer protocol ping: {}", e);
                    }
                },
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {},
                Some(Err(e)) => {
                    let message = e.to_string();
                    ctx.handlers.emit_error(ConnectionError::new(&message, true));
                    break SessionEnd::Abnormal(DisconnectReason::abnormal(format!(
                        "WebSocket error: {}",
                        message
                    )));
                },
                None => {
                    break SessionEnd::Abnormal(DisconnectReason::abnormal("WebSocket stream ended"));
                },
            },
        }
    };

    heartbeat.reset();
    match &end {
        SessionEnd::Shutdown | SessionEnd::Normal(_) => {
            ctx.set_state(ReadyState::Closing);
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "closed by client".into(),
            };
            if let Err(e) = ws.close(Some(frame)).await {
                log::debug!("[courier-link] Close handshake failed: {}", e);
            }
        },
        SessionEnd::Abnormal(_) => {},
    }
    end
}

/// Decode and dispatch one inbound frame. Returns the session end when the
/// frame terminates the session.
async fn handle_text(
    ctx: &ConnectionContext,
    ws: &mut WebSocketStream,
    heartbeat: &mut HeartbeatMonitor,
    text: &str,
) -> Option<SessionEnd> {
    ctx.handlers.emit_receive(text);

    let packet = match codec::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            log::warn!("[courier-link] Dropping malformed frame: {}", e);
            ctx.handlers.emit_error(ConnectionError::new(e.to_string(), true));
            return None;
        },
    };

    match packet.kind {
        PacketKind::Open => {
            match codec::parse_handshake(&packet) {
                Some(handshake) => {
                    heartbeat.configure(&handshake);
                    ctx.record_negotiated(heartbeat.interval(), heartbeat.timeout());
                    log::info!(
                        "[courier-link] Session {} open: ping interval {:?}, timeout {:?}",
                        handshake.sid.as_deref().unwrap_or("-"),
                        heartbeat.interval(),
                        heartbeat.timeout()
                    );
                },
                None => log::warn!("[courier-link] Open packet without a usable handshake"),
            }
            None
        },
        PacketKind::Close => {
            let message = match &packet.payload {
                Some(JsonValue::String(reason)) => reason.clone(),
                _ => "Server sent close packet".to_string(),
            };
            Some(SessionEnd::Normal(DisconnectReason::normal(message)))
        },
        PacketKind::Ping => {
            let pong = match codec::encode(&Packet::control(PacketKind::Pong)) {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("[courier-link] Failed to encode pong: {}", e);
                    return None;
                },
            };
            match write_frame(ctx, ws, pong).await {
                Ok(()) => None,
                Err(e) => Some(SessionEnd::Abnormal(DisconnectReason::abnormal(format!(
                    "Failed to answer ping: {}",
                    e
                )))),
            }
        },
        PacketKind::Pong => {
            ctx.record_heartbeat();
            let status = heartbeat.on_pong(Instant::now());
            apply_heartbeat(ctx, status)
        },
        PacketKind::Message => {
            dispatch_message(ctx, packet);
            None
        },
    }
}

fn dispatch_message(ctx: &ConnectionContext, packet: Packet) {
    if let Some(ack_id) = packet.ack_id {
        let payload = packet.payload.clone().unwrap_or(JsonValue::Null);
        if ctx.correlator.settle(ack_id, payload) {
            return;
        }
        log::debug!(
            "[courier-link] No pending request for ack {}; delivering as message",
            ack_id
        );
    }

    ctx.handlers.emit_message(&packet);

    if let (Some(event_type), Some(payload)) = (&packet.event_type, &packet.payload) {
        if let Some(message) = BusinessMessage::from_packet(event_type, payload) {
            ctx.handlers.emit_business_message(message);
        }
    }
}

fn apply_heartbeat(ctx: &ConnectionContext, status: HeartbeatStatus) -> Option<SessionEnd> {
    match status {
        HeartbeatStatus::Healthy { round_trip } => {
            log::debug!("[courier-link] Heartbeat ok ({:?})", round_trip);
            None
        },
        HeartbeatStatus::Idle => None,
        HeartbeatStatus::Violation { elapsed, timeout } => {
            log::warn!(
                "[courier-link] Heartbeat violation: no pong within {:?} (elapsed {:?})",
                timeout,
                elapsed
            );
            ctx.handlers
                .emit_heartbeat_violation(HeartbeatViolation { elapsed, timeout });
            match ctx.options.heartbeat_policy {
                HeartbeatPolicy::LogOnly => None,
                HeartbeatPolicy::Reconnect => Some(SessionEnd::Abnormal(
                    DisconnectReason::abnormal(format!("Heartbeat timeout ({:?})", timeout)),
                )),
            }
        },
    }
}

async fn write_frame(ctx: &ConnectionContext, ws: &mut WebSocketStream, frame: String) -> Result<()> {
    ctx.handlers.emit_send(&frame);
    let timeout = ctx.timeouts.send_timeout;
    let send = ws.send(Message::Text(frame.into()));
    if LinkTimeouts::is_no_timeout(timeout) {
        return send.await.map_err(LinkError::from);
    }
    match tokio::time::timeout(timeout, send).await {
        Ok(result) => result.map_err(LinkError::from),
        Err(_) => Err(LinkError::TimeoutError(format!("Send timeout ({:?})", timeout))),
    }
}
