//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias using CryptoError
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during signature recovery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Signature bytes are structurally invalid
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Public key recovery failed
    #[error("Recovery failed: {0}")]
    Recovery(String),
}
