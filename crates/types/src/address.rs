use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing an EVM account address.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("address must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("address payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Number of raw bytes contained in an address.
pub const ADDRESS_BYTES: usize = 20;
/// Expected hex length of an encoded address, without the `0x` prefix.
pub const ADDRESS_HEX_LENGTH: usize = ADDRESS_BYTES * 2;

/// Encode a 20-byte account identifier in EIP-55 mixed-case checksum form.
///
/// A hex letter is upper-cased when the matching nibble of
/// `keccak256(lowercase_hex)` is 8 or greater.
pub fn encode_address(bytes: &[u8; ADDRESS_BYTES]) -> String {
    let lower = hex::encode(bytes);
    let digest = Keccak256::digest(lower.as_bytes());

    let mut encoded = String::with_capacity(ADDRESS_HEX_LENGTH + 2);
    encoded.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let byte = digest[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            encoded.push(ch.to_ascii_uppercase());
        } else {
            encoded.push(ch);
        }
    }
    encoded
}

/// Decode an address string (`0x`-prefixed or bare, any case) into raw bytes.
///
/// Checksum casing is not enforced; addresses from configuration files are
/// frequently written in lowercase.
pub fn decode_address(address: &str) -> Result<[u8; ADDRESS_BYTES], AddressError> {
    let trimmed = address.trim();
    let payload = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if payload.len() != ADDRESS_HEX_LENGTH {
        return Err(AddressError::InvalidLength {
            expected: ADDRESS_HEX_LENGTH,
            actual: payload.len(),
        });
    }

    let mut bytes = [0u8; ADDRESS_BYTES];
    hex::decode_to_slice(payload, &mut bytes)?;
    Ok(bytes)
}

/// Check whether the provided string is a valid EVM address.
pub fn is_valid_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

/// EVM account address; serialised as its checksummed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_BYTES]);

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    pub fn to_checksum(&self) -> String {
        encode_address(&self.0)
    }
}

impl From<[u8; ADDRESS_BYTES]> for Address {
    fn from(value: [u8; ADDRESS_BYTES]) -> Self {
        Address(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        encode_address(&value.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_address(&value).map(Address)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_address(s).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_address(&self.0))
    }
}
