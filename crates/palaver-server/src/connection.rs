//! Per-connection driver
//!
//! Owns one upgraded WebSocket: a single `tokio::select!` loop reads
//! inbound frames and drains the connection's bounded outbound queue, so
//! every write to the peer goes through one serialized writer. The driver
//! runs the Pending -> Authenticated -> Closed state machine and performs
//! full registry cleanup on every exit path.

use crate::handshake::HandshakeError;
use crate::now_ms;
use crate::rate_limit::RateLimiter;
use crate::registry::{ConnectionId, Outbound, OutboundSender, OUTBOUND_QUEUE};
use crate::server::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use palaver_protocol::{classify, InboundKind, ServerFrame, CLOSE_AUTH_FAILED, HANDSHAKE_METHOD};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Drive one connection from upgrade completion to close
pub async fn drive(
    socket: WebSocket,
    state: Arc<AppState>,
    conn: ConnectionId,
    handshake_required: bool,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    state.registry.attach(conn, tx.clone());

    let mut limiter = RateLimiter::new(&state.config.rate_limit_rules);
    let mut pending = handshake_required;

    if handshake_required {
        let challenge = state.handshake.issue(now_ms());
        let frame = ServerFrame::AuthChallenge {
            method: HANDSHAKE_METHOD.to_string(),
            token: challenge.token.clone(),
            message: challenge.message.clone(),
            expiry: challenge.expires_at_ms,
        };
        state.registry.set_challenge(conn, challenge);
        let _ = tx.try_send(Outbound::Frame(frame.to_json()));
    } else if let Some(room) = state.registry.join(conn, None) {
        debug!(%conn, room = %room, "auto-joined default room");
    }

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&state, conn, &mut pending, &mut limiter, &tx, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // The protocol is text; a binary frame from a
                        // nonconforming client degrades to a custom payload
                        let text = String::from_utf8_lossy(&data).into_owned();
                        dispatch(&state, conn, &mut pending, &mut limiter, &tx, &text);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%conn, error = %e, "socket read error");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(record) = state.registry.remove(conn) {
        if state.config.logging.log_connections {
            info!(
                %conn,
                remote = %record.remote_addr,
                client_id = %record.client_id,
                messages = record.message_count,
                "connection closed"
            );
        }
    }
}

/// Dispatch one inbound text frame according to the connection state
fn dispatch(
    state: &AppState,
    conn: ConnectionId,
    pending: &mut bool,
    limiter: &mut RateLimiter,
    tx: &OutboundSender,
    raw: &str,
) {
    if *pending {
        handle_pending_frame(state, conn, pending, tx, raw);
    } else {
        state.router.route(conn, raw, limiter, tx, now_ms());
    }
}

/// A pending connection admits exactly one kind of frame: auth-response
fn handle_pending_frame(
    state: &AppState,
    conn: ConnectionId,
    pending: &mut bool,
    tx: &OutboundSender,
    raw: &str,
) {
    let inbound = classify(raw);
    let InboundKind::AuthResponse { signature, address } = inbound.kind else {
        let _ = tx.try_send(Outbound::Frame(ServerFrame::auth_required().to_json()));
        return;
    };

    let outcome = match state.registry.take_challenge(conn) {
        None => Err(HandshakeError::NoPendingChallenge),
        Some(challenge) => state.handshake.verify(
            &challenge,
            signature.as_deref(),
            address.as_deref(),
            now_ms(),
        ),
    };

    match outcome {
        Ok(address) => {
            let Some(client_id) = state.registry.authenticate(conn, &address, now_ms()) else {
                return;
            };
            *pending = false;
            info!(%conn, wallet = %address, "handshake verified");
            let frame = ServerFrame::AuthSuccess { address, client_id };
            let _ = tx.try_send(Outbound::Frame(frame.to_json()));
            if let Some(room) = state.registry.join(conn, None) {
                debug!(%conn, room = %room, "auto-joined default room");
            }
        }
        Err(err) => {
            let reason = err.to_string();
            debug!(%conn, reason = %reason, "handshake failed");
            // auth-failed is queued ahead of the close so well-behaved
            // clients can surface the reason even if the close frame is lost
            let frame = ServerFrame::AuthFailed {
                reason: reason.clone(),
            };
            let _ = tx.try_send(Outbound::Frame(frame.to_json()));
            let _ = tx.try_send(Outbound::Close {
                code: CLOSE_AUTH_FAILED,
                reason,
            });
        }
    }
}
