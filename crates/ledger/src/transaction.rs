//! Legacy (type 0) EVM transactions with EIP-155 replay protection.

use medvault_crypto::{keccak256, CryptoError, EvmSigner};
use medvault_types::Address;

use crate::rlp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(u128::from(self.nonce)),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(u128::from(self.gas_limit)),
            rlp::encode_bytes(self.to.as_bytes()),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// RLP payload hashed for signing: the six fields plus `chain_id, 0, 0`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(u128::from(self.chain_id)));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        rlp::encode_list(&fields)
    }

    pub fn sighash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    pub fn sign(&self, signer: &EvmSigner) -> Result<SignedTransaction, CryptoError> {
        let signature = signer.sign_prehash(&self.sighash())?;
        let v = u128::from(self.chain_id) * 2 + 35 + u128::from(signature.recovery_id);

        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_bytes(strip_leading_zeros(&signature.r)));
        fields.push(rlp::encode_bytes(strip_leading_zeros(&signature.s)));
        let raw = rlp::encode_list(&fields);
        let hash = keccak256(&raw);

        Ok(SignedTransaction { raw, hash })
    }
}

// r and s are integers in RLP, so they carry no leading zero bytes.
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}
