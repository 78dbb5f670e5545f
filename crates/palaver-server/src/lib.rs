//! Palaver signaling hub
//!
//! A long-lived WebSocket service that authenticates clients against an
//! Ethereum wallet via an EIP-191 challenge/response handshake and routes
//! WebRTC signaling frames (offers, answers, ICE candidates, opaque custom
//! payloads) among clients grouped into rooms.

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod handshake;
pub mod ipfilter;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod server;

/// Current wall-clock time in epoch milliseconds
///
/// Challenge expiry and client identifiers are defined against epoch time,
/// not a monotonic clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
