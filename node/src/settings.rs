use anyhow::{Context, Result};
use clap::ValueEnum;
use config::{Config, File as ConfigFile};
use medvault_types::{Address, Hospital, HospitalRegistry, DEFAULT_HOSPITALS};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x7cdc469F45e22d2B1e4C48AE17a1a95e5f626c18";
const WEI_PER_GWEI: u128 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Loopback development node signing with a pre-funded account.
    Local,
    /// Hosted node; transactions signed with a local private key.
    Remote,
}

#[derive(Clone, Copy, Debug)]
struct ProfileDefaults {
    name: &'static str,
    config_filename: &'static str,
    host: &'static str,
    port: u16,
    storage_dir: &'static str,
    rpc_url: Option<&'static str>,
    gas_price_gwei: Option<u64>,
    gas_limit: Option<u64>,
    log_level: &'static str,
    log_format: &'static str,
    requires_private_key: bool,
}

impl Profile {
    fn defaults(&self) -> ProfileDefaults {
        match self {
            Profile::Local => ProfileDefaults {
                name: "local",
                config_filename: "local.toml",
                host: "127.0.0.1",
                port: 5000,
                storage_dir: "./uploads",
                rpc_url: Some("http://127.0.0.1:8545"),
                gas_price_gwei: None,
                gas_limit: None,
                log_level: "debug",
                log_format: "pretty",
                requires_private_key: false,
            },
            Profile::Remote => ProfileDefaults {
                name: "remote",
                config_filename: "remote.toml",
                host: "0.0.0.0",
                port: 5000,
                storage_dir: "./uploads",
                rpc_url: None,
                gas_price_gwei: Some(10),
                gas_limit: Some(300_000),
                log_level: "info",
                log_format: "json",
                requires_private_key: true,
            },
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(Profile::Local),
            "remote" => Some(Profile::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.defaults().name)
    }
}

/// Hex private key that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Where a configured hospital's ledger address comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HospitalAccount {
    Address(String),
    /// Index into the ledger node's `eth_accounts`.
    NodeAccount(usize),
}

#[derive(Debug, Clone, Deserialize)]
struct HospitalEntry {
    name: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    account_index: Option<usize>,
}

impl HospitalEntry {
    fn into_setting(self) -> Result<(String, HospitalAccount)> {
        match (self.address, self.account_index) {
            (Some(address), None) => Ok((self.name, HospitalAccount::Address(address))),
            (None, Some(index)) => Ok((self.name, HospitalAccount::NodeAccount(index))),
            _ => anyhow::bail!(
                "hospital '{}' needs exactly one of address or account_index",
                self.name
            ),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Profile,
    pub config_path: Option<PathBuf>,

    // HTTP
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,

    // Storage
    pub storage_dir: String,
    pub verify_integrity: bool,

    // Ledger
    pub rpc_url: String,
    pub contract_address: Address,
    pub private_key: Option<SecretKey>,
    pub dev_account_index: usize,
    pub gas_price_wei: Option<u128>,
    pub gas_limit: Option<u64>,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub request_timeout: Duration,

    pub hospitals: Vec<(String, HospitalAccount)>,

    // Observability
    pub prometheus_enabled: bool,
    pub log_level: String,
    pub log_format: String,
}

impl AppConfig {
    pub fn load(profile: Profile, config_path_override: Option<&str>) -> Result<Self> {
        let defaults = profile.defaults();
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from("config").join(defaults.config_filename);
            path.exists().then_some(path)
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("MEDVAULT"));
        let config = builder.build()?;

        let rpc_url = get_string_value(&config, &["rpc_url", "ledger.rpc_url"])
            .or_else(|| legacy_env("INFURA_URL"))
            .or_else(|| defaults.rpc_url.map(str::to_string))
            .unwrap_or_default();

        let private_key = get_string_value(&config, &["private_key", "ledger.private_key"])
            .or_else(|| legacy_env("PRIVATE_KEY"))
            .map(SecretKey);

        let contract_address = get_string_value(
            &config,
            &["contract_address", "ledger.contract_address"],
        )
        .unwrap_or_else(|| DEFAULT_CONTRACT_ADDRESS.to_string());
        let contract_address = contract_address
            .parse::<Address>()
            .with_context(|| format!("invalid contract address {contract_address:?}"))?;

        let gas_price_gwei = get_u64_value(&config, &["gas_price_gwei", "ledger.gas_price_gwei"])?
            .or(defaults.gas_price_gwei);
        let gas_limit =
            get_u64_value(&config, &["gas_limit", "ledger.gas_limit"])?.or(defaults.gas_limit);

        let hospitals = match config.get::<Vec<HospitalEntry>>("hospitals") {
            Ok(entries) => entries
                .into_iter()
                .map(HospitalEntry::into_setting)
                .collect::<Result<Vec<_>>>()?,
            Err(config::ConfigError::NotFound(_)) => default_hospitals(),
            Err(err) => return Err(err).context("invalid [[hospitals]] entries"),
        };

        Ok(Self {
            profile,
            config_path: resolved_path,
            host: get_string_value(&config, &["host", "server.host"])
                .unwrap_or_else(|| defaults.host.to_string()),
            port: get_u64_value(&config, &["port", "server.port"])?
                .map(u16::try_from)
                .transpose()
                .context("port must fit in 16 bits")?
                .unwrap_or(defaults.port),
            max_upload_bytes: get_u64_value(
                &config,
                &["max_upload_bytes", "server.max_upload_bytes"],
            )?
            .map(usize::try_from)
            .transpose()
            .context("max_upload_bytes is too large")?
            .unwrap_or(medvault_rpc::DEFAULT_MAX_UPLOAD_BYTES),
            storage_dir: get_string_value(&config, &["storage_dir", "storage.dir"])
                .unwrap_or_else(|| defaults.storage_dir.to_string()),
            verify_integrity: get_bool_value(
                &config,
                &["verify_integrity", "storage.verify_integrity"],
                true,
            ),
            rpc_url,
            contract_address,
            private_key,
            dev_account_index: get_u64_value(
                &config,
                &["dev_account_index", "ledger.dev_account_index"],
            )?
            .map(usize::try_from)
            .transpose()
            .context("dev_account_index is too large")?
            .unwrap_or(0),
            gas_price_wei: gas_price_gwei.map(|gwei| u128::from(gwei) * WEI_PER_GWEI),
            gas_limit,
            receipt_timeout: Duration::from_secs(
                get_u64_value(
                    &config,
                    &["receipt_timeout_secs", "ledger.receipt_timeout_secs"],
                )?
                .unwrap_or(120),
            ),
            receipt_poll_interval: Duration::from_millis(
                get_u64_value(
                    &config,
                    &["receipt_poll_interval_ms", "ledger.receipt_poll_interval_ms"],
                )?
                .unwrap_or(1_000),
            ),
            request_timeout: Duration::from_secs(
                get_u64_value(
                    &config,
                    &["request_timeout_secs", "ledger.request_timeout_secs"],
                )?
                .unwrap_or(30),
            ),
            hospitals,
            prometheus_enabled: get_bool_value(
                &config,
                &["prometheus_enabled", "metrics.enabled"],
                true,
            ),
            log_level: get_string_value(&config, &["log_level", "logging.level"])
                .unwrap_or_else(|| defaults.log_level.to_string()),
            log_format: get_string_value(&config, &["log_format", "logging.format"])
                .unwrap_or_else(|| defaults.log_format.to_string()),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.trim().is_empty() {
            anyhow::bail!("STORAGE_DIR must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("PORT must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be greater than zero");
        }
        if self.rpc_url.trim().is_empty() {
            anyhow::bail!(
                "Profile '{}' requires a ledger endpoint; set MEDVAULT_RPC_URL or INFURA_URL",
                self.profile
            );
        }
        if self.profile.defaults().requires_private_key && self.private_key.is_none() {
            anyhow::bail!(
                "Profile '{}' requires a signing key; set MEDVAULT_PRIVATE_KEY or PRIVATE_KEY",
                self.profile
            );
        }
        if self.receipt_poll_interval.is_zero() {
            anyhow::bail!("RECEIPT_POLL_INTERVAL_MS must be greater than zero");
        }
        if self.hospitals.is_empty() {
            anyhow::bail!("At least one hospital must be configured");
        }
        // Node-account entries can only be checked once the ledger is reachable.
        if !self.uses_node_accounts() {
            self.hospital_registry(&[])?;
        }
        Ok(())
    }

    pub fn uses_node_accounts(&self) -> bool {
        self.hospitals
            .iter()
            .any(|(_, account)| matches!(account, HospitalAccount::NodeAccount(_)))
    }

    /// Build the registry, resolving node-account entries against
    /// `node_accounts` (the ledger node's `eth_accounts`).
    pub fn hospital_registry(&self, node_accounts: &[Address]) -> Result<HospitalRegistry> {
        let mut hospitals = Vec::with_capacity(self.hospitals.len());
        for (name, account) in &self.hospitals {
            let address = match account {
                HospitalAccount::Address(raw) => raw
                    .parse::<Address>()
                    .with_context(|| format!("invalid address for hospital '{name}'"))?,
                HospitalAccount::NodeAccount(index) => {
                    *node_accounts.get(*index).with_context(|| {
                        format!(
                            "hospital '{name}' uses node account {index}, but the node has {}",
                            node_accounts.len()
                        )
                    })?
                }
            };
            hospitals.push(Hospital {
                name: name.clone(),
                address,
            });
        }
        HospitalRegistry::new(hospitals).context("invalid hospital configuration")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_hospitals() -> Vec<(String, HospitalAccount)> {
    DEFAULT_HOSPITALS
        .iter()
        .map(|(name, address)| (name.to_string(), HospitalAccount::Address(address.to_string())))
        .collect()
}

fn legacy_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_u64_value(config: &Config, keys: &[&str]) -> Result<Option<u64>> {
    for key in keys {
        if let Ok(value) = config.get_int(key) {
            let value =
                u64::try_from(value).with_context(|| format!("{key} must not be negative"))?;
            return Ok(Some(value));
        }
        if let Some(raw) = get_string_value(config, &[key]) {
            let value = raw
                .parse::<u64>()
                .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}"))?;
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fixture_config(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("config")
            .join(name)
    }

    fn base_config(profile: Profile) -> AppConfig {
        AppConfig {
            profile,
            config_path: None,
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_bytes: 1024,
            storage_dir: "./uploads".to_string(),
            verify_integrity: true,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: DEFAULT_CONTRACT_ADDRESS.parse().unwrap(),
            private_key: None,
            dev_account_index: 0,
            gas_price_wei: None,
            gas_limit: None,
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            hospitals: default_hospitals(),
            prometheus_enabled: false,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }

    #[test]
    fn local_profile_loads_defaults() {
        let path = fixture_config("local.toml");
        let config = AppConfig::load(Profile::Local, Some(path.to_str().unwrap())).unwrap();

        assert_eq!(config.profile, Profile::Local);
        assert_eq!(config.port, 5000);
        assert_eq!(config.storage_dir, "./uploads");
        assert_eq!(
            config.contract_address.to_checksum(),
            DEFAULT_CONTRACT_ADDRESS
        );
        assert_eq!(config.dev_account_index, 0);
        assert!(config.uses_node_accounts());
        config.validate().unwrap();

        let accounts: Vec<Address> = (0..4u8).map(|i| Address([i; 20])).collect();
        let registry = config.hospital_registry(&accounts).unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["Apollo Hospital", "AIIMS Hospital", "KIMS Hospital"]
        );
        assert_eq!(registry.resolve("Apollo Hospital").unwrap(), Address([1; 20]));
        assert_eq!(registry.resolve("KIMS Hospital").unwrap(), Address([3; 20]));

        let err = config.hospital_registry(&accounts[..2]).unwrap_err();
        assert!(err.to_string().contains("KIMS Hospital"), "unexpected error: {err}");
    }

    #[test]
    fn hospital_entry_needs_one_account_source() {
        let entry = HospitalEntry {
            name: "Apollo Hospital".into(),
            address: Some("0x1111111111111111111111111111111111111111".into()),
            account_index: Some(1),
        };
        assert!(entry.into_setting().is_err());

        let entry = HospitalEntry {
            name: "Apollo Hospital".into(),
            address: None,
            account_index: None,
        };
        assert!(entry.into_setting().is_err());

        let entry = HospitalEntry {
            name: "Apollo Hospital".into(),
            address: None,
            account_index: Some(2),
        };
        assert_eq!(
            entry.into_setting().unwrap(),
            ("Apollo Hospital".to_string(), HospitalAccount::NodeAccount(2))
        );
    }

    #[test]
    fn remote_fixture_sets_gas_defaults() {
        let path = fixture_config("remote.toml");
        let config = AppConfig::load(Profile::Remote, Some(path.to_str().unwrap())).unwrap();

        assert_eq!(config.gas_price_wei, Some(10 * WEI_PER_GWEI));
        assert_eq!(config.gas_limit, Some(300_000));
        assert_eq!(config.log_format, "json");
    }

    fn write_config(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("medvault.toml");
        std::fs::write(&path, body).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn dev_account_index_is_range_checked() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(&dir, "[ledger]\ndev_account_index = 2\n");
        let config = AppConfig::load(Profile::Local, Some(&path)).unwrap();
        assert_eq!(config.dev_account_index, 2);

        let path = write_config(&dir, "[ledger]\ndev_account_index = -1\n");
        let err = AppConfig::load(Profile::Local, Some(&path)).unwrap_err();
        assert!(err.to_string().contains("negative"), "unexpected error: {err}");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AppConfig::load(Profile::Local, Some("/nonexistent/medvault.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"), "unexpected error: {err}");
    }

    #[test]
    fn remote_profile_requires_credentials() {
        let mut config = base_config(Profile::Remote);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing key"), "unexpected error: {err}");

        config.private_key = Some(SecretKey("0x01".into()));
        config.rpc_url = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ledger endpoint"), "unexpected error: {err}");

        config.rpc_url = "https://node.example".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = base_config(Profile::Local);
        config.validate().unwrap();

        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = base_config(Profile::Local);
        config.storage_dir = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = base_config(Profile::Local);
        config.hospitals.clear();
        assert!(config.validate().is_err());

        let mut config = base_config(Profile::Local);
        config
            .hospitals
            .push(("Broken".into(), HospitalAccount::Address("0x1234".into())));
        assert!(config.validate().is_err());
    }

    #[test]
    fn private_key_is_redacted() {
        let mut config = base_config(Profile::Remote);
        config.private_key = Some(SecretKey("deadbeef".into()));
        assert!(!format!("{config:?}").contains("deadbeef"));
    }

    #[test]
    fn profile_names() {
        assert_eq!(Profile::from_name(" Remote "), Some(Profile::Remote));
        assert_eq!(Profile::from_name("local"), Some(Profile::Local));
        assert_eq!(Profile::from_name("mainnet"), None);
        assert_eq!(Profile::Local.to_string(), "local");
    }
}
