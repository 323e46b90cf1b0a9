//! Hash functions used by MedVault
//!
//! SHA-256 fingerprints stored files; Keccak-256 backs ABI selectors,
//! transaction hashing and address derivation on the EVM side.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CryptoError;

/// Trait for hash functions
pub trait HashFunction {
    /// Hash input data and return the result
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// Hash input data and return a fixed-size array
    fn hash_fixed(&self, data: &[u8]) -> [u8; 32];

    /// Get the name of the hash function
    fn name(&self) -> &'static str;
}

/// SHA256 hash implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SHA256;

impl SHA256 {
    /// Create a new SHA256 instance
    pub fn new() -> Self {
        Self
    }
}

impl HashFunction for SHA256 {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        self.hash_fixed(data).to_vec()
    }

    fn hash_fixed(&self, data: &[u8]) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash = hasher.finalize();
        let mut result = [0u8; 32];
        result.copy_from_slice(&hash);
        result
    }

    fn name(&self) -> &'static str {
        "SHA256"
    }
}

/// Keccak256 hash implementation (pre-standard SHA-3 padding, as used by the EVM)
#[derive(Debug, Default, Clone, Copy)]
pub struct Keccak256;

impl Keccak256 {
    /// Create a new Keccak256 instance
    pub fn new() -> Self {
        Self
    }
}

impl HashFunction for Keccak256 {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        self.hash_fixed(data).to_vec()
    }

    fn hash_fixed(&self, data: &[u8]) -> [u8; 32] {
        use sha3::{Digest, Keccak256};
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let hash = hasher.finalize();
        let mut result = [0u8; 32];
        result.copy_from_slice(&hash);
        result
    }

    fn name(&self) -> &'static str {
        "Keccak256"
    }
}

/// Shorthand for `Keccak256::new().hash_fixed(data)`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256.hash_fixed(data)
}

/// SHA-256 digest of a stored file; the value recorded on the ledger is its
/// lowercase hex rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHash(pub [u8; 32]);

impl FileHash {
    /// Hash the given data using SHA-256.
    pub fn from_data(data: &[u8]) -> Self {
        Self(SHA256.hash_fixed(data))
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let trimmed = hex_str.trim();
        if trimmed.len() != 64 {
            return Err(CryptoError::InvalidLength {
                what: "file hash",
                expected: 64,
                actual: trimmed.len(),
            });
        }
        let mut arr = [0u8; 32];
        hex::decode_to_slice(trimmed, &mut arr)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_hello() {
        assert_eq!(
            FileHash::from_data(b"hello").to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn file_hash_hex_parsing() {
        let hash = FileHash::from_data(b"record");
        assert_eq!(FileHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!(
            FileHash::from_hex(&hash.to_hex().to_uppercase()).unwrap(),
            hash
        );
        assert!(matches!(
            FileHash::from_hex("abcd"),
            Err(CryptoError::InvalidLength { actual: 4, .. })
        ));
    }

    #[test]
    fn hash_function_names() {
        assert_eq!(SHA256::new().name(), "SHA256");
        assert_eq!(Keccak256::new().name(), "Keccak256");
        assert_eq!(SHA256::new().hash(b"x").len(), 32);
    }
}
