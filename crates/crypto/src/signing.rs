//! secp256k1 signing identity for EVM transactions.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use medvault_types::Address;
use std::fmt;

use crate::hash_functions::keccak256;
use crate::CryptoError;

/// Recoverable ECDSA signature split into the fields a transaction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Parity of the ephemeral point (0 or 1).
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// Recover the signer address for a 32-byte prehash.
    pub fn recover_address(&self, prehash: &[u8; 32]) -> Result<Address, CryptoError> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        let signature = Signature::from_slice(&bytes).map_err(|_| CryptoError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.recovery_id).ok_or(CryptoError::InvalidSignature)?;
        let key = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(address_of(&key))
    }
}

/// The process-wide ledger signing identity.
#[derive(Clone)]
pub struct EvmSigner {
    key: SigningKey,
    address: Address,
}

impl EvmSigner {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> Result<Self, CryptoError> {
        let trimmed = private_key.trim();
        let payload = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if payload.len() != 64 {
            return Err(CryptoError::InvalidLength {
                what: "private key",
                expected: 64,
                actual: payload.len(),
            });
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(payload, &mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte prehash (already Keccak-256 hashed).
    pub fn sign_prehash(&self, prehash: &[u8; 32]) -> Result<RecoverableSignature, CryptoError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash)
            .map_err(|err| CryptoError::Signing(err.to_string()))?;
        let (r, s) = signature.split_bytes();

        let mut out = RecoverableSignature {
            r: [0u8; 32],
            s: [0u8; 32],
            recovery_id: recovery_id.to_byte(),
        };
        out.r.copy_from_slice(&r);
        out.s.copy_from_slice(&s);
        Ok(out)
    }
}

impl fmt::Debug for EvmSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Last 20 bytes of `keccak256(uncompressed_pubkey[1..])`.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address(bytes)
}
