//! Connection registry and room membership
//!
//! All cross-connection state (connection records, per-IP counts, room
//! membership, pending handshake challenges) lives in one struct behind a
//! single lock, so the invariants that span maps (membership matches each
//! record's room, counters match cardinalities) are updated atomically.
//! Nothing awaits while holding the lock; fan-out snapshots the recipient
//! sender list under the lock and sends outside it.

use crate::config::Config;
use crate::handshake::Challenge;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Outbound queue depth per connection
pub const OUTBOUND_QUEUE: usize = 256;

/// Opaque handle for one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A frame or close handed to a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame, sent verbatim
    Frame(String),
    /// Close the socket with the given code and reason
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason string
        reason: String,
    },
}

/// Handle into a connection's bounded outbound queue
pub type OutboundSender = mpsc::Sender<Outbound>;

/// How admission pre-screened a connection before the upgrade completed
#[derive(Debug, Clone, PartialEq)]
pub enum AuthSeed {
    /// Auth disabled or anonymous allowed; identity assigned up front
    Anonymous {
        /// `<anonymousPrefix><8 hex chars>`
        user_id: String,
    },
    /// Token method; identity derived from the (unvalidated) token
    Token {
        /// `user_<first 8 chars of token>`
        user_id: String,
    },
    /// Wallet handshake required; connection starts pending
    Handshake,
}

/// One live connection's record
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Handle
    pub id: ConnectionId,
    /// Remote address, IPv6-normalized
    pub remote_addr: String,
    /// Normalized remote IP (per-IP counter key)
    pub ip: IpAddr,
    /// `<userId>_<epochMillis>` once authenticated, `pending_<epochMillis>` before
    pub client_id: String,
    /// Stable identity; lowercase wallet address for handshake auth
    pub user_id: Option<String>,
    /// Set only for handshake-authenticated connections
    pub wallet_address: Option<String>,
    /// Whether the connection may join rooms and send frames
    pub authenticated: bool,
    /// Current room, at most one
    pub room_id: Option<String>,
    /// Frames routed for this connection (observability only)
    pub message_count: u64,
    /// Last routed frame timestamp (observability only)
    pub last_message_at: Option<i64>,
    /// Admission timestamp
    pub connected_at: i64,
    sender: Option<OutboundSender>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    ip_counts: HashMap<IpAddr, usize>,
    pending: HashMap<ConnectionId, Challenge>,
    next_id: u64,
}

/// Admission rejections; each maps to HTTP 503 at the upgrade layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Total connection cap reached
    ServerAtCapacity,
    /// Per-IP connection cap reached
    IpAtCapacity,
    /// Default room is full (checked at upgrade time, not at join)
    DefaultRoomAtCapacity,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerAtCapacity => write!(f, "server at connection capacity"),
            Self::IpAtCapacity => write!(f, "too many connections from this IP"),
            Self::DefaultRoomAtCapacity => write!(f, "default room is full"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// The shared connection/room substrate
pub struct Registry {
    config: Arc<Config>,
    state: Mutex<HubState>,
}

impl Registry {
    /// Create an empty registry over a configuration snapshot
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            state: Mutex::new(HubState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        // A poisoned lock means a panic mid-mutation; the maps are still
        // structurally sound, so recover rather than cascade the panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capacity_check(&self, state: &HubState, ip: IpAddr) -> Result<(), AdmissionError> {
        let limits = &self.config.connection_limits;
        if state.connections.len() >= limits.max_total_connections {
            return Err(AdmissionError::ServerAtCapacity);
        }
        if state.ip_counts.get(&ip).copied().unwrap_or(0) >= limits.max_connections_per_ip {
            return Err(AdmissionError::IpAtCapacity);
        }
        if let Some(room) = self.config.default_room() {
            let occupancy = state.rooms.get(&room.id).map_or(0, HashSet::len);
            if occupancy >= limits.max_connections_per_room {
                return Err(AdmissionError::DefaultRoomAtCapacity);
            }
        }
        Ok(())
    }

    /// Pre-upgrade capacity gate (the insert in [`Registry::register`]
    /// re-verifies atomically)
    pub fn check_capacity(&self, ip: IpAddr) -> Result<(), AdmissionError> {
        self.capacity_check(&self.state(), ip)
    }

    /// Insert a record for an admitted connection
    pub fn register(
        &self,
        ip: IpAddr,
        remote_addr: String,
        seed: AuthSeed,
        now_ms: i64,
    ) -> Result<ConnectionId, AdmissionError> {
        let mut state = self.state();
        self.capacity_check(&state, ip)?;

        let id = ConnectionId(state.next_id);
        state.next_id += 1;

        let (client_id, user_id, authenticated) = match seed {
            AuthSeed::Handshake => (format!("pending_{}", now_ms), None, false),
            AuthSeed::Anonymous { user_id } | AuthSeed::Token { user_id } => {
                (format!("{}_{}", user_id, now_ms), Some(user_id), true)
            }
        };

        state.connections.insert(
            id,
            ConnectionRecord {
                id,
                remote_addr,
                ip,
                client_id,
                user_id,
                wallet_address: None,
                authenticated,
                room_id: None,
                message_count: 0,
                last_message_at: None,
                connected_at: now_ms,
                sender: None,
            },
        );
        *state.ip_counts.entry(ip).or_insert(0) += 1;
        Ok(id)
    }

    /// Attach the connection's writer handle once the driver is running
    pub fn attach(&self, id: ConnectionId, sender: OutboundSender) {
        if let Some(record) = self.state().connections.get_mut(&id) {
            record.sender = Some(sender);
        }
    }

    /// Store the pending challenge for a connection
    pub fn set_challenge(&self, id: ConnectionId, challenge: Challenge) {
        self.state().pending.insert(id, challenge);
    }

    /// Consume the pending challenge (single use: taken before the first
    /// verification attempt, success or failure)
    pub fn take_challenge(&self, id: ConnectionId) -> Option<Challenge> {
        self.state().pending.remove(&id)
    }

    /// Promote a pending connection after a verified handshake
    ///
    /// Returns the new client id, or None if the record is gone.
    pub fn authenticate(&self, id: ConnectionId, address: &str, now_ms: i64) -> Option<String> {
        let mut state = self.state();
        state.pending.remove(&id);
        let record = state.connections.get_mut(&id)?;
        let user_id = address.to_lowercase();
        record.client_id = format!("{}_{}", user_id, now_ms);
        record.user_id = Some(user_id.clone());
        record.wallet_address = Some(user_id);
        record.authenticated = true;
        Some(record.client_id.clone())
    }

    /// Join a room, leaving the current one first
    ///
    /// The target resolves to the configured room with that id, else the
    /// first configured room; a join to an unknown id still succeeds into
    /// the default. Unauthenticated connections may not join; returns the
    /// joined room id.
    pub fn join(&self, id: ConnectionId, target: Option<&str>) -> Option<String> {
        let resolved = target
            .and_then(|t| self.config.room(t))
            .or_else(|| self.config.default_room())?
            .id
            .clone();

        let mut state = self.state();
        let record = state.connections.get(&id)?;
        if !record.authenticated {
            return None;
        }
        if record.room_id.as_deref() == Some(resolved.as_str()) {
            return Some(resolved);
        }

        Self::leave_locked(&mut state, id);
        state.rooms.entry(resolved.clone()).or_default().insert(id);
        if let Some(record) = state.connections.get_mut(&id) {
            record.room_id = Some(resolved.clone());
        }
        Some(resolved)
    }

    /// Leave the current room; returns the room that was left
    pub fn leave(&self, id: ConnectionId) -> Option<String> {
        Self::leave_locked(&mut self.state(), id)
    }

    fn leave_locked(state: &mut HubState, id: ConnectionId) -> Option<String> {
        let record = state.connections.get_mut(&id)?;
        let room_id = record.room_id.take()?;
        if let Some(members) = state.rooms.get_mut(&room_id) {
            members.remove(&id);
            if members.is_empty() {
                state.rooms.remove(&room_id);
            }
        }
        Some(room_id)
    }

    /// Remove a connection entirely (any close path)
    ///
    /// Runs leave, releases the per-IP count (removing the key at zero),
    /// drops any pending challenge, and returns the final record.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        let mut state = self.state();
        Self::leave_locked(&mut state, id);
        state.pending.remove(&id);
        let record = state.connections.remove(&id)?;
        if let Some(count) = state.ip_counts.get_mut(&record.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.ip_counts.remove(&record.ip);
            }
        }
        Some(record)
    }

    /// Record one routed frame (observability only)
    pub fn note_message(&self, id: ConnectionId, now_ms: i64) {
        if let Some(record) = self.state().connections.get_mut(&id) {
            record.message_count += 1;
            record.last_message_at = Some(now_ms);
        }
    }

    /// Whether the connection has completed authentication
    pub fn is_authenticated(&self, id: ConnectionId) -> bool {
        self.state()
            .connections
            .get(&id)
            .is_some_and(|r| r.authenticated)
    }

    /// The connection's current room
    pub fn room_of(&self, id: ConnectionId) -> Option<String> {
        self.state().connections.get(&id)?.room_id.clone()
    }

    /// The connection's wire-visible client id
    pub fn client_id_of(&self, id: ConnectionId) -> Option<String> {
        Some(self.state().connections.get(&id)?.client_id.clone())
    }

    /// Snapshot the broadcast recipients for a sender: every other open
    /// member of its room, or every other open connection when roomless
    pub fn broadcast_targets(&self, sender: ConnectionId) -> Vec<OutboundSender> {
        let state = self.state();
        match state.connections.get(&sender).and_then(|r| r.room_id.as_ref()) {
            Some(room_id) => state
                .rooms
                .get(room_id)
                .map(|members| {
                    members
                        .iter()
                        .filter(|&&m| m != sender)
                        .filter_map(|m| state.connections.get(m)?.sender.clone())
                        .collect()
                })
                .unwrap_or_default(),
            None => state
                .connections
                .values()
                .filter(|r| r.id != sender)
                .filter_map(|r| r.sender.clone())
                .collect(),
        }
    }

    /// Find the open connection with the given client id, if any
    pub fn unicast_target(&self, client_id: &str) -> Option<OutboundSender> {
        self.state()
            .connections
            .values()
            .find(|r| r.client_id == client_id)?
            .sender
            .clone()
    }

    /// Close pending connections whose challenge expired; returns how many
    pub fn close_expired_pending(&self, now_ms: i64) -> usize {
        let expired: Vec<(ConnectionId, OutboundSender)> = {
            let mut state = self.state();
            let ids: Vec<ConnectionId> = state
                .pending
                .iter()
                .filter(|(_, ch)| now_ms > ch.expires_at_ms)
                .map(|(&id, _)| id)
                .collect();
            ids.iter().for_each(|id| {
                state.pending.remove(id);
            });
            ids.into_iter()
                .filter_map(|id| {
                    let sender = state.connections.get(&id)?.sender.clone()?;
                    Some((id, sender))
                })
                .collect()
        };

        let count = expired.len();
        for (_, sender) in expired {
            let _ = sender.try_send(Outbound::Close {
                code: palaver_protocol::CLOSE_AUTH_FAILED,
                reason: crate::handshake::HandshakeError::Expired.to_string(),
            });
        }
        count
    }

    /// Remove records admitted more than `grace_ms` ago whose driver never
    /// attached (the HTTP upgrade failed after admission); returns how many
    pub fn reap_unattached(&self, now_ms: i64, grace_ms: i64) -> usize {
        let stale: Vec<ConnectionId> = {
            let state = self.state();
            state
                .connections
                .values()
                .filter(|r| r.sender.is_none() && now_ms - r.connected_at > grace_ms)
                .map(|r| r.id)
                .collect()
        };
        let count = stale.len();
        for id in stale {
            self.remove(id);
        }
        count
    }

    /// Drain for shutdown: hand every open connection a normal close
    pub fn close_all(&self) {
        let senders: Vec<OutboundSender> = {
            let state = self.state();
            state
                .connections
                .values()
                .filter_map(|r| r.sender.clone())
                .collect()
        };
        for sender in senders {
            let _ = sender.try_send(Outbound::Close {
                code: palaver_protocol::CLOSE_NORMAL,
                reason: "server shutting down".to_string(),
            });
        }
    }

    /// Live connection count
    pub fn total_connections(&self) -> usize {
        self.state().connections.len()
    }

    /// Live connections sharing one remote IP
    pub fn connections_for_ip(&self, ip: IpAddr) -> usize {
        self.state().ip_counts.get(&ip).copied().unwrap_or(0)
    }

    /// Current member count of a room
    pub fn room_size(&self, room_id: &str) -> usize {
        self.state().rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// Whether a pending challenge is outstanding for the connection
    pub fn has_pending(&self, id: ConnectionId) -> bool {
        self.state().pending.contains_key(&id)
    }
}
