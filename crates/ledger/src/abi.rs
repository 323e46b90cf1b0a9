//! Minimal Solidity ABI codec for the argument and return types the
//! patient-record contract uses: `string`, `address` and `bool`.

use medvault_crypto::keccak256;
use medvault_types::Address;
use thiserror::Error;

const WORD: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("return data too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("offset or length {0} does not fit the return data")]
    OutOfBounds(u128),
    #[error("bool word has non-canonical value")]
    InvalidBool,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// A single call argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    String(String),
    Address(Address),
    Bool(bool),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_))
    }
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encode an argument tuple (head/tail layout).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
        }
        match token {
            Token::String(value) => encode_bytes(value.as_bytes(), &mut tail),
            Token::Address(address) => head.extend_from_slice(&address_word(address)),
            Token::Bool(flag) => head.extend_from_slice(&uint_word(u128::from(*flag))),
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

/// Decode a single `bool` return value.
pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    let word = read_word(data, 0)?;
    if word[..WORD - 1].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidBool);
    }
    match word[WORD - 1] {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(AbiError::InvalidBool),
    }
}

/// Decode a single `string` return value.
pub fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    let offset = read_usize(data, 0)?;
    let len = read_usize(data, offset)?;
    let start = offset
        .checked_add(WORD)
        .ok_or(AbiError::OutOfBounds(offset as u128))?;
    let end = start
        .checked_add(len)
        .ok_or(AbiError::OutOfBounds(len as u128))?;
    if end > data.len() {
        return Err(AbiError::TooShort {
            needed: end,
            actual: data.len(),
        });
    }
    String::from_utf8(data[start..end].to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&uint_word(bytes.len() as u128));
    out.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 20..].copy_from_slice(address.as_bytes());
    word
}

fn read_word(data: &[u8], at: usize) -> Result<&[u8], AbiError> {
    let end = at.checked_add(WORD).ok_or(AbiError::OutOfBounds(at as u128))?;
    data.get(at..end).ok_or(AbiError::TooShort {
        needed: end,
        actual: data.len(),
    })
}

fn read_usize(data: &[u8], at: usize) -> Result<usize, AbiError> {
    let word = read_word(data, at)?;
    if word[..WORD - 16].iter().any(|b| *b != 0) {
        return Err(AbiError::OutOfBounds(u128::MAX));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[WORD - 16..]);
    let value = u128::from_be_bytes(low);
    usize::try_from(value)
        .ok()
        .filter(|v| *v <= data.len())
        .ok_or(AbiError::OutOfBounds(value))
}
