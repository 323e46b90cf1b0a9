//! MedVault Ledger Client
//!
//! Adapts record-keeping intent to contract calls on an EVM ledger. The
//! contract keeps, per patient id, the SHA-256 of the patient's file and the
//! set of hospital addresses allowed to retrieve it.
//!
//! Two mutating calls (`addRecord`, `grantAccess`) are signed by a single
//! process-wide identity and wait for one confirmation; the queries
//! (`checkAccess`, `getFileHash`) are plain `eth_call`s.

pub mod abi;
pub mod contract;
pub mod evm;
pub mod memory;
pub mod rlp;
pub mod rpc;
pub mod transaction;

pub use evm::{EvmLedger, EvmLedgerConfig, SignerSource};
pub use memory::MemoryLedger;

use async_trait::async_trait;
use medvault_crypto::{CryptoError, FileHash};
use medvault_types::{Address, PatientId};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger node unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("ledger node returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected ledger response: {0}")]
    InvalidResponse(String),

    #[error("contract return data could not be decoded: {0}")]
    Abi(#[from] abi::AbiError),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("transaction {tx_hash} not confirmed within {}s", .waited.as_secs())]
    ConfirmationTimeout { tx_hash: String, waited: Duration },

    #[error("failed to sign transaction: {0}")]
    Signing(#[from] CryptoError),

    #[error("node exposes {available} accounts; dev account #{index} does not exist")]
    NoDevAccount { index: usize, available: usize },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A confirmed, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

/// Contract operations needed by the record workflows.
#[async_trait]
pub trait AccessLedger: Send + Sync {
    /// Account that signs mutating calls.
    fn signer(&self) -> Address;

    fn chain_id(&self) -> u64;

    /// `addRecord(patientId, fileHash)`; returns once confirmed.
    async fn add_record(&self, patient: &PatientId, file_hash: &FileHash) -> Result<TxReceipt>;

    /// `grantAccess(patientId, hospital)`; returns once confirmed.
    async fn grant_access(&self, patient: &PatientId, hospital: &Address) -> Result<TxReceipt>;

    /// `checkAccess(patientId, hospital)`; read-only.
    async fn check_access(&self, patient: &PatientId, hospital: &Address) -> Result<bool>;

    /// `getFileHash(patientId)`; `None` when nothing was recorded.
    async fn file_hash(&self, patient: &PatientId) -> Result<Option<String>>;
}
