//! Palaver signaling wire protocol
//!
//! All application frames are WebSocket text frames carrying UTF-8 JSON.
//! Frames that are not valid JSON are routed as opaque custom payloads
//! rather than rejected. The server forwards client frames verbatim; the
//! types here cover only the frames the server itself originates and the
//! classification it needs for routing.

#![forbid(unsafe_code)]

pub mod frames;
pub mod inbound;

pub use frames::ServerFrame;
pub use inbound::{classify, Inbound, InboundKind};

/// Normal closure initiated by either side
pub const CLOSE_NORMAL: u16 = 1000;

/// Authentication failure; the close reason carries the cause
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// The auth method name carried in challenge frames
pub const HANDSHAKE_METHOD: &str = "ethereum-handshake";
