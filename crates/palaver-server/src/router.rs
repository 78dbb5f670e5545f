//! Inbound frame routing
//!
//! One authenticated connection, one raw text frame. The router classifies
//! the frame, applies the rate limiter and room policy, handles the
//! join/leave control verbs, and fans the raw text out according to the
//! room's routing mode. Frames are forwarded verbatim; sender metadata is
//! a client-side convention.

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::registry::{ConnectionId, Outbound, OutboundSender, Registry};
use palaver_protocol::{classify, InboundKind, ServerFrame};
use std::sync::Arc;
use tracing::debug;

/// Stateless frame router over the shared registry
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
    config: Arc<Config>,
}

impl Router {
    /// Create a router over the registry and configuration snapshot
    pub fn new(registry: Arc<Registry>, config: Arc<Config>) -> Self {
        Self { registry, config }
    }

    /// Route one inbound frame from an authenticated connection
    ///
    /// `reply` is the sender's own outbound queue, used for policy error
    /// frames.
    pub fn route(
        &self,
        conn: ConnectionId,
        raw: &str,
        limiter: &mut RateLimiter,
        reply: &OutboundSender,
        now_ms: i64,
    ) {
        let inbound = classify(raw);

        if !limiter.check_and_record(&inbound.message_type, now_ms) {
            debug!(%conn, message_type = %inbound.message_type, "rate limit exceeded");
            send_error(reply, "Rate limit exceeded".to_string());
            return;
        }

        match inbound.kind {
            InboundKind::Join { room_id } => {
                if let Some(joined) = self.registry.join(conn, room_id.as_deref()) {
                    debug!(%conn, room = %joined, "joined room");
                }
                return;
            }
            InboundKind::Leave => {
                if let Some(left) = self.registry.leave(conn) {
                    debug!(%conn, room = %left, "left room");
                }
                return;
            }
            _ => {}
        }

        let room_id = self.registry.room_of(conn);
        let room_config = room_id.as_deref().and_then(|id| self.config.room(id));

        if let Some(room) = room_config {
            if let Some(allowed) = &room.allowed_message_types {
                if !allowed.iter().any(|t| t == &inbound.message_type) {
                    send_error(
                        reply,
                        format!(
                            "Message type '{}' not allowed in this room",
                            inbound.message_type
                        ),
                    );
                    return;
                }
            }
        }

        let mode = room_config.map(|r| r.routing_mode.as_str()).unwrap_or("broadcast");
        match mode {
            "unicast" => {
                let target_id = match &inbound.kind {
                    InboundKind::Message { target_id } => target_id.as_deref(),
                    _ => None,
                };
                // Without a target the frame is silently dropped
                if let Some(target_id) = target_id {
                    if let Some(target) = self.registry.unicast_target(target_id) {
                        let _ = target.try_send(Outbound::Frame(raw.to_string()));
                    }
                }
            }
            mode => {
                // multicast is configured but not yet distinguished; it and
                // any unrecognized mode fan out as broadcast
                if mode == "multicast" {
                    debug!(%conn, "multicast mode routed as broadcast");
                }
                for target in self.registry.broadcast_targets(conn) {
                    let _ = target.try_send(Outbound::Frame(raw.to_string()));
                }
            }
        }

        if self.config.logging.log_messages {
            debug!(%conn, message_type = %inbound.message_type, "routed frame");
        }
        self.registry.note_message(conn, now_ms);
    }
}

fn send_error(reply: &OutboundSender, error: String) {
    let _ = reply.try_send(Outbound::Frame(ServerFrame::Error { error }.to_json()));
}
