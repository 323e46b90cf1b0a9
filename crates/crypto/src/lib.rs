//! Cryptographic primitives for MedVault
//!
//! Content hashing for stored files plus the secp256k1 identity that signs
//! ledger transactions.

pub mod hash_functions;
pub mod signing;

pub use hash_functions::{keccak256, FileHash, HashFunction, Keccak256, SHA256};
pub use signing::{address_of, EvmSigner, RecoverableSignature};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("{what} must be {expected} hex characters, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("private key is not a valid secp256k1 scalar")]
    InvalidPrivateKey,

    #[error("signature is malformed or does not recover")]
    InvalidSignature,

    #[error("signing failed: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
