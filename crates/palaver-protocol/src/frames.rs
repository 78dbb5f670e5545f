//! Server-originated frames

use serde::{Deserialize, Serialize};

/// Frames the server sends to clients
///
/// Everything else a client receives is another client's frame forwarded
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Challenge issued immediately after upgrade when handshake auth is on
    AuthChallenge {
        /// Auth method, always `ethereum-handshake`
        method: String,
        /// Nonce token: `<epochMillis>:<hex-encoded 16 random bytes>`
        token: String,
        /// The exact string the client must sign
        message: String,
        /// Epoch millis after which the challenge is void
        expiry: i64,
    },
    /// Handshake accepted
    AuthSuccess {
        /// The verified wallet address as supplied by the client
        address: String,
        /// Connection identifier: `<userId>_<epochMillis>`
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Handshake rejected; the connection closes with code 4001 right after
    AuthFailed {
        /// Human-readable failure cause
        reason: String,
    },
    /// Non-terminal policy or protocol error
    Error {
        /// Human-readable error text
        error: String,
    },
}

impl ServerFrame {
    /// The error frame sent for any non-`auth-response` frame on a pending
    /// connection
    pub fn auth_required() -> Self {
        Self::Error {
            error: "Authentication required. Send auth-response with signature and address."
                .to_string(),
        }
    }

    /// Serialize to the wire representation
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
