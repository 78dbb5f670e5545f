//! EIP-191 (`personal_sign`) digesting and signer recovery
//!
//! Wallets sign `"\x19Ethereum Signed Message:\n" || decimal(len) || message`
//! so the signature cannot be replayed as a transaction. The signature is the
//! 65-byte `r || s || v` layout, where `v` is either a raw recovery id (0-3)
//! or the legacy 27/28 offset form.

use crate::error::{CryptoError, Result};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

/// Length of a recoverable signature: 32-byte r, 32-byte s, 1-byte v
pub const SIGNATURE_LEN: usize = 65;

/// Compute the EIP-191 `personal_sign` digest of a message
///
/// # Arguments
///
/// * `message` - The human-readable message the wallet displayed and signed
///
/// # Returns
///
/// 32-byte Keccak-256 digest of the prefixed message
pub fn personal_digest(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()));
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Derive the `0x`-prefixed lowercase hex address for a public key
///
/// An Ethereum address is the last 20 bytes of the Keccak-256 hash of the
/// uncompressed public key (without the SEC1 `0x04` tag byte).
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Recover the signer's address from a message and a recoverable signature
///
/// # Arguments
///
/// * `message` - The message as signed (pre-EIP-191-prefix)
/// * `signature` - 65-byte `r || s || v` signature
///
/// # Returns
///
/// The signer's `0x`-prefixed lowercase hex address
///
/// # Errors
///
/// Returns `CryptoError::InvalidSignature` for an out-of-range recovery id or
/// malformed `r || s`, and `CryptoError::Recovery` if no public key can be
/// recovered for the digest/signature pair.
pub fn recover_address(message: &str, signature: &[u8; SIGNATURE_LEN]) -> Result<String> {
    let digest = personal_digest(message);

    let v = signature[64];
    // Accept both raw recovery ids and the legacy 27/28 encoding
    let recid_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recid_byte)
        .ok_or_else(|| CryptoError::InvalidSignature(format!("recovery id {} out of range", v)))?;

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|e| CryptoError::Recovery(e.to_string()))?;

    Ok(address_of(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn test_key() -> SigningKey {
        // Fixed scalar so test vectors are stable across runs
        SigningKey::from_slice(&[0x42u8; 32]).unwrap()
    }

    fn sign(key: &SigningKey, message: &str) -> [u8; SIGNATURE_LEN] {
        let digest = personal_digest(message);
        let (sig, recid) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte();
        out
    }

    #[test]
    fn test_personal_digest_deterministic() {
        assert_eq!(personal_digest("hello"), personal_digest("hello"));
        assert_ne!(personal_digest("hello"), personal_digest("hello!"));
    }

    #[test]
    fn test_recover_roundtrip() {
        let key = test_key();
        let expected = address_of(key.verifying_key());

        let message = "Sign this to authenticate\n\nToken: 1700000000000:deadbeef";
        let signature = sign(&key, message);

        let recovered = recover_address(message, &signature).unwrap();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn test_recover_legacy_v_offset() {
        let key = test_key();
        let message = "offset check";
        let mut signature = sign(&key, message);
        signature[64] += 27;

        let recovered = recover_address(message, &signature).unwrap();
        assert_eq!(recovered, address_of(key.verifying_key()));
    }

    #[test]
    fn test_recover_wrong_message_gives_different_address() {
        let key = test_key();
        let signature = sign(&key, "the real message");

        match recover_address("a different message", &signature) {
            Ok(addr) => assert_ne!(addr, address_of(key.verifying_key())),
            // Recovery is also allowed to fail outright for a foreign digest
            Err(CryptoError::Recovery(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_recovery_id_out_of_range() {
        let key = test_key();
        let mut signature = sign(&key, "m");
        signature[64] = 9;

        assert!(matches!(
            recover_address("m", &signature),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_address_format() {
        let key = test_key();
        let addr = address_of(key.verifying_key());
        assert_eq!(addr.len(), 42);
        assert!(addr.starts_with("0x"));
        assert!(addr[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(addr, addr.to_lowercase());
    }
}
