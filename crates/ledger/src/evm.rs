//! JSON-RPC backed ledger client for EVM networks.

use async_trait::async_trait;
use medvault_crypto::{EvmSigner, FileHash};
use medvault_types::{Address, PatientId};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::rpc::{
    format_data, format_quantity, parse_data, parse_quantity, parse_quantity_u64, JsonRpcClient,
};
use crate::transaction::LegacyTransaction;
use crate::{abi, contract, AccessLedger, LedgerError, Result, TxReceipt};

/// Connection settings shared by both signer modes.
#[derive(Debug, Clone)]
pub struct EvmLedgerConfig {
    pub rpc_url: String,
    pub contract: Address,
    /// Fixed gas price in wei; `None` asks the node.
    pub gas_price_wei: Option<u128>,
    /// Fixed gas limit; `None` asks the node to estimate.
    pub gas_limit: Option<u64>,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub request_timeout: Duration,
}

impl EvmLedgerConfig {
    pub fn new(rpc_url: impl Into<String>, contract: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract,
            gas_price_wei: None,
            gas_limit: None,
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the signing identity comes from.
#[derive(Debug, Clone)]
pub enum SignerSource {
    /// Sign locally and submit raw transactions.
    PrivateKey(EvmSigner),
    /// Let the node sign with one of its unlocked, pre-funded accounts.
    DevAccount { index: usize },
}

#[derive(Debug)]
enum Submitter {
    Local(EvmSigner),
    NodeAccount(Address),
}

impl Submitter {
    fn address(&self) -> Address {
        match self {
            Submitter::Local(signer) => signer.address(),
            Submitter::NodeAccount(address) => *address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl RawReceipt {
    fn into_receipt(self) -> Result<TxReceipt> {
        // Receipts without a status field predate Byzantium; treat as success.
        if let Some(status) = &self.status {
            if parse_quantity(status)? == 0 {
                return Err(LedgerError::Reverted {
                    tx_hash: self.transaction_hash,
                });
            }
        }
        Ok(TxReceipt {
            block_number: self.block_number.as_deref().map(parse_quantity_u64).transpose()?,
            gas_used: self.gas_used.as_deref().map(parse_quantity_u64).transpose()?,
            tx_hash: self.transaction_hash,
        })
    }
}

#[derive(Debug)]
pub struct EvmLedger {
    rpc: JsonRpcClient,
    config: EvmLedgerConfig,
    chain_id: u64,
    submitter: Submitter,
    // Held from nonce lookup until the node has accepted the transaction.
    submit_lock: Mutex<()>,
}

impl EvmLedger {
    /// Connect and resolve the signer. Fails if the node cannot be reached.
    pub async fn connect(config: EvmLedgerConfig, source: SignerSource) -> Result<Self> {
        let rpc = JsonRpcClient::new(config.rpc_url.clone(), config.request_timeout)?;

        let chain_hex: String = rpc.call("eth_chainId", json!([])).await?;
        let chain_id = parse_quantity_u64(&chain_hex)?;

        let submitter = match source {
            SignerSource::PrivateKey(signer) => Submitter::Local(signer),
            SignerSource::DevAccount { index } => {
                let accounts = fetch_accounts(&rpc).await?;
                let address = accounts.get(index).ok_or(LedgerError::NoDevAccount {
                    index,
                    available: accounts.len(),
                })?;
                Submitter::NodeAccount(*address)
            }
        };

        info!(
            "Connected to ledger {} (chain id {}), signer {}",
            rpc.url(),
            chain_id,
            submitter.address()
        );

        Ok(Self {
            rpc,
            config,
            chain_id,
            submitter,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn contract(&self) -> Address {
        self.config.contract
    }

    /// Accounts the node manages, in `eth_accounts` order.
    pub async fn node_accounts(&self) -> Result<Vec<Address>> {
        fetch_accounts(&self.rpc).await
    }

    async fn submit(&self, label: &'static str, data: Vec<u8>) -> Result<TxReceipt> {
        let tx_hash = {
            let _guard = self.submit_lock.lock().await;
            match &self.submitter {
                Submitter::Local(signer) => self.submit_signed(signer, data).await?,
                Submitter::NodeAccount(from) => self.submit_unsigned(from, data).await?,
            }
        };

        info!(call = label, tx_hash = %tx_hash, "Transaction submitted");
        let receipt = self.wait_for_receipt(&tx_hash).await?;
        info!(
            call = label,
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    async fn submit_signed(&self, signer: &EvmSigner, data: Vec<u8>) -> Result<String> {
        let from = signer.address();
        // Re-derived for every transaction so other submitters cannot
        // desynchronise a cached counter.
        let nonce_hex: String = self
            .rpc
            .call("eth_getTransactionCount", json!([from.to_checksum(), "pending"]))
            .await?;
        let nonce = parse_quantity_u64(&nonce_hex)?;

        let gas_price = match self.config.gas_price_wei {
            Some(price) => price,
            None => {
                let price_hex: String = self.rpc.call("eth_gasPrice", json!([])).await?;
                parse_quantity(&price_hex)?
            }
        };
        let gas_limit = match self.config.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(&from, &data).await?,
        };

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: self.config.contract,
            value: 0,
            data,
            chain_id: self.chain_id,
        };
        let signed = tx.sign(signer)?;
        debug!(nonce, gas_price, gas_limit, "Signed transaction");

        let tx_hash: String = self
            .rpc
            .call("eth_sendRawTransaction", json!([signed.raw_hex()]))
            .await?;
        if !tx_hash.eq_ignore_ascii_case(&signed.hash_hex()) {
            warn!(
                "Node reported hash {} for transaction {}",
                tx_hash,
                signed.hash_hex()
            );
        }
        Ok(tx_hash)
    }

    async fn submit_unsigned(&self, from: &Address, data: Vec<u8>) -> Result<String> {
        let mut tx = json!({
            "from": from.to_checksum(),
            "to": self.config.contract.to_checksum(),
            "data": format_data(&data),
        });
        if let Some(limit) = self.config.gas_limit {
            tx["gas"] = json!(format_quantity(u128::from(limit)));
        }
        if let Some(price) = self.config.gas_price_wei {
            tx["gasPrice"] = json!(format_quantity(price));
        }
        self.rpc.call("eth_sendTransaction", json!([tx])).await
    }

    async fn estimate_gas(&self, from: &Address, data: &[u8]) -> Result<u64> {
        let estimate: String = self
            .rpc
            .call(
                "eth_estimateGas",
                json!([{
                    "from": from.to_checksum(),
                    "to": self.config.contract.to_checksum(),
                    "data": format_data(data),
                }]),
            )
            .await?;
        parse_quantity_u64(&estimate)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt> {
        let waited = self.config.receipt_timeout;
        match tokio::time::timeout(waited, self.poll_receipt(tx_hash)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
                waited,
            }),
        }
    }

    async fn poll_receipt(&self, tx_hash: &str) -> Result<TxReceipt> {
        loop {
            let receipt: Option<RawReceipt> = self
                .rpc
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(receipt) = receipt {
                return receipt.into_receipt();
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn call_contract(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let result: String = self
            .rpc
            .call(
                "eth_call",
                json!([
                    {
                        "to": self.config.contract.to_checksum(),
                        "data": format_data(&data),
                    },
                    "latest"
                ]),
            )
            .await?;
        parse_data(&result)
    }
}

async fn fetch_accounts(rpc: &JsonRpcClient) -> Result<Vec<Address>> {
    let accounts: Vec<String> = rpc.call("eth_accounts", json!([])).await?;
    accounts
        .iter()
        .map(|raw| {
            raw.parse::<Address>().map_err(|err| {
                LedgerError::InvalidResponse(format!("eth_accounts entry {raw:?}: {err}"))
            })
        })
        .collect()
}

#[async_trait]
impl AccessLedger for EvmLedger {
    fn signer(&self) -> Address {
        self.submitter.address()
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn add_record(&self, patient: &PatientId, file_hash: &FileHash) -> Result<TxReceipt> {
        self.submit("addRecord", contract::add_record(patient, file_hash))
            .await
    }

    async fn grant_access(&self, patient: &PatientId, hospital: &Address) -> Result<TxReceipt> {
        self.submit("grantAccess", contract::grant_access(patient, hospital))
            .await
    }

    async fn check_access(&self, patient: &PatientId, hospital: &Address) -> Result<bool> {
        let output = self
            .call_contract(contract::check_access(patient, hospital))
            .await?;
        Ok(abi::decode_bool(&output)?)
    }

    async fn file_hash(&self, patient: &PatientId) -> Result<Option<String>> {
        let output = self.call_contract(contract::get_file_hash(patient)).await?;
        let hash = abi::decode_string(&output)?;
        Ok(Some(hash).filter(|value| !value.is_empty()))
    }
}
