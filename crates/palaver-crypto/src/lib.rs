//! # Palaver Cryptography Library
//!
//! Ethereum-style message authentication for the palaver signaling hub:
//! EIP-191 (`personal_sign`) digesting and recovery of the signer's address
//! from a 65-byte recoverable secp256k1 signature.
//!
//! The server never holds private keys; everything here is verification-side.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod eip191;
pub mod error;

pub use error::{CryptoError, Result};

/// Library version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
