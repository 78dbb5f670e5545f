//! Ethereum wallet challenge/response handshake
//!
//! The engine guarantees three properties: freshness (every challenge
//! carries a server-generated 16-byte nonce), single use (the caller takes
//! the stored challenge out before the first verification attempt, success
//! or failure), and bounded validity (the configured expiry).

use crate::config::AuthConfig;

/// A challenge issued to one pending connection
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Nonce token: `<epochMillis>:<hex-encoded 16 random bytes>`
    pub token: String,
    /// The exact string the client must sign
    pub message: String,
    /// Epoch millis after which the challenge is void
    pub expires_at_ms: i64,
}

/// Issues challenges and verifies signed responses
#[derive(Debug, Clone)]
pub struct HandshakeEngine {
    message: String,
    expiry_ms: i64,
}

impl HandshakeEngine {
    /// Build an engine from the auth configuration
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            message: auth.handshake_message.clone(),
            expiry_ms: auth.handshake_expiry as i64 * 1000,
        }
    }

    /// Issue a fresh challenge
    pub fn issue(&self, now_ms: i64) -> Challenge {
        let nonce: [u8; 16] = rand::random();
        let token = format!("{}:{}", now_ms, hex::encode(nonce));
        let message = format!("{}\n\nToken: {}", self.message, token);
        Challenge {
            token,
            message,
            expires_at_ms: now_ms + self.expiry_ms,
        }
    }

    /// Verify an `auth-response` against a consumed challenge
    ///
    /// Returns the verified wallet address in lowercase hex (the stable
    /// user identity). The failure variants map one-to-one onto the
    /// reason strings the wire contract promises.
    pub fn verify(
        &self,
        challenge: &Challenge,
        signature: Option<&str>,
        address: Option<&str>,
        now_ms: i64,
    ) -> Result<String, HandshakeError> {
        if now_ms > challenge.expires_at_ms {
            return Err(HandshakeError::Expired);
        }
        let (signature, address) = match (signature, address) {
            (Some(s), Some(a)) => (s, a),
            _ => return Err(HandshakeError::MissingFields),
        };
        if !is_prefixed_hex(address, 40) {
            return Err(HandshakeError::InvalidAddress);
        }
        if !is_prefixed_hex(signature, 130) {
            return Err(HandshakeError::InvalidSignature);
        }

        let mut sig_bytes = [0u8; palaver_crypto::eip191::SIGNATURE_LEN];
        hex::decode_to_slice(&signature[2..], &mut sig_bytes)
            .map_err(|_| HandshakeError::InvalidSignature)?;

        let recovered = palaver_crypto::eip191::recover_address(&challenge.message, &sig_bytes)
            .map_err(|_| HandshakeError::VerificationError)?;

        if !recovered.eq_ignore_ascii_case(address) {
            return Err(HandshakeError::VerificationFailed);
        }
        Ok(address.to_lowercase())
    }
}

/// `0x` followed by exactly `digits` hex characters
fn is_prefixed_hex(s: &str, digits: usize) -> bool {
    s.len() == digits + 2
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Handshake failure causes
///
/// The `Display` strings are the wire contract: they are sent in the
/// `auth-failed` frame and as the 4001 close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// No challenge was outstanding for the connection
    NoPendingChallenge,
    /// The challenge expired before the response arrived
    Expired,
    /// The response omitted the signature or the address
    MissingFields,
    /// Claimed address is not 20 hex bytes
    InvalidAddress,
    /// Signature is not 65 hex bytes
    InvalidSignature,
    /// Recovered signer does not match the claimed address
    VerificationFailed,
    /// The recovery library rejected the signature outright
    VerificationError,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPendingChallenge => write!(f, "No pending handshake challenge"),
            Self::Expired => write!(f, "Handshake challenge expired"),
            Self::MissingFields => write!(f, "Missing signature or address"),
            Self::InvalidAddress => write!(f, "Invalid Ethereum address format"),
            Self::InvalidSignature => write!(f, "Invalid signature format"),
            Self::VerificationFailed => write!(f, "Signature verification failed"),
            Self::VerificationError => write!(f, "Signature verification error"),
        }
    }
}

impl std::error::Error for HandshakeError {}
