//! In-process ledger used by tests and offline development.

use async_trait::async_trait;
use medvault_crypto::{keccak256, FileHash};
use medvault_types::{Address, PatientId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::{AccessLedger, LedgerError, Result, TxReceipt};

const MEMORY_CHAIN_ID: u64 = 1337;

#[derive(Debug, Default)]
struct Record {
    file_hash: String,
    granted: HashSet<Address>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Record>,
    nonce: u64,
    queries: u64,
    offline: bool,
}

/// Mirrors the contract semantics: `addRecord` overwrites the stored hash
/// and keeps existing grants; `grantAccess` reverts for unknown patients.
#[derive(Debug)]
pub struct MemoryLedger {
    owner: Address,
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            state: Mutex::new(State::default()),
        }
    }

    /// While offline every call fails with [`LedgerError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Number of transactions accepted so far.
    pub fn nonce(&self) -> u64 {
        self.state.lock().nonce
    }

    /// Number of calls of any kind that reached the ledger.
    pub fn query_count(&self) -> u64 {
        self.state.lock().queries
    }

    pub fn recorded_hash(&self, patient: &PatientId) -> Option<String> {
        self.state
            .lock()
            .records
            .get(patient.as_str())
            .map(|record| record.file_hash.clone())
    }

    pub fn is_granted(&self, patient: &PatientId, hospital: &Address) -> bool {
        self.state
            .lock()
            .records
            .get(patient.as_str())
            .is_some_and(|record| record.granted.contains(hospital))
    }

    fn enter(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        state.queries += 1;
        if state.offline {
            return Err(LedgerError::Unavailable("memory ledger is offline".into()));
        }
        Ok(state)
    }

    fn receipt(&self, state: &mut State, label: &str, patient: &PatientId) -> TxReceipt {
        state.nonce += 1;
        let seed = format!("{}:{}:{}:{}", self.owner, state.nonce, label, patient);
        TxReceipt {
            tx_hash: format!("0x{}", hex::encode(keccak256(seed.as_bytes()))),
            block_number: Some(state.nonce),
            gas_used: None,
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Address::ZERO)
    }
}

#[async_trait]
impl AccessLedger for MemoryLedger {
    fn signer(&self) -> Address {
        self.owner
    }

    fn chain_id(&self) -> u64 {
        MEMORY_CHAIN_ID
    }

    async fn add_record(&self, patient: &PatientId, file_hash: &FileHash) -> Result<TxReceipt> {
        let mut state = self.enter()?;
        state
            .records
            .entry(patient.as_str().to_string())
            .or_default()
            .file_hash = file_hash.to_hex();
        Ok(self.receipt(&mut state, "addRecord", patient))
    }

    async fn grant_access(&self, patient: &PatientId, hospital: &Address) -> Result<TxReceipt> {
        let mut state = self.enter()?;
        let receipt = self.receipt(&mut state, "grantAccess", patient);
        match state.records.get_mut(patient.as_str()) {
            Some(record) => {
                record.granted.insert(*hospital);
                Ok(receipt)
            }
            None => Err(LedgerError::Reverted {
                tx_hash: receipt.tx_hash,
            }),
        }
    }

    async fn check_access(&self, patient: &PatientId, hospital: &Address) -> Result<bool> {
        let state = self.enter()?;
        Ok(state
            .records
            .get(patient.as_str())
            .is_some_and(|record| record.granted.contains(hospital)))
    }

    async fn file_hash(&self, patient: &PatientId) -> Result<Option<String>> {
        let state = self.enter()?;
        Ok(state
            .records
            .get(patient.as_str())
            .map(|record| record.file_hash.clone()))
    }
}
