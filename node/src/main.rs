use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use medvault_crypto::EvmSigner;
use medvault_files::DiskFileStore;
use medvault_ledger::{AccessLedger, EvmLedger, EvmLedgerConfig, SignerSource};
use medvault_rpc::{records, start_server, AppState, RecordService};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;

use settings::{AppConfig, Profile};

fn cli() -> Command {
    Command::new("medvault-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("MedVault patient record gateway")
        .arg(
            Arg::new("profile")
                .long("profile")
                .value_name("PROFILE")
                .value_parser(value_parser!(Profile))
                .default_value("local")
                .help("Select ledger profile (local, remote). Can also be set via MEDVAULT_PROFILE"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Override the HTTP listen host"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override the HTTP listen port"),
        )
        .arg(
            Arg::new("storage-dir")
                .short('d')
                .long("storage-dir")
                .value_name("DIR")
                .help("Directory holding uploaded files"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics endpoint"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let profile = std::env::var("MEDVAULT_PROFILE")
        .ok()
        .and_then(|value| Profile::from_name(&value))
        .or_else(|| matches.get_one::<Profile>("profile").copied())
        .unwrap_or(Profile::Local);
    let config_path = matches.get_one::<String>("config").map(String::as_str);

    let mut config = AppConfig::load(profile, config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(storage_dir) = matches.get_one::<String>("storage-dir") {
        config.storage_dir = storage_dir.clone();
    }
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }
    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }
    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;

    info!(
        "Starting MedVault {} (profile {})",
        env!("CARGO_PKG_VERSION"),
        config.profile
    );
    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let metrics = init_metrics(&config);
    let ledger = connect_ledger(&config).await?;

    let node_accounts = if config.uses_node_accounts() {
        ledger
            .node_accounts()
            .await
            .context("failed to list ledger node accounts for hospitals")?
    } else {
        Vec::new()
    };
    let hospitals = Arc::new(config.hospital_registry(&node_accounts)?);
    for hospital in hospitals.iter() {
        info!("Registered hospital {} ({})", hospital.name, hospital.address);
    }

    let store = DiskFileStore::open(&config.storage_dir)
        .await
        .with_context(|| format!("storage directory {} is not usable", config.storage_dir))?;
    info!("Storing uploads in {}", store.root().display());

    let records = RecordService::new(hospitals, Arc::new(store), Arc::new(ledger))
        .with_integrity_check(config.verify_integrity);
    if !config.verify_integrity {
        warn!("Download integrity verification is disabled");
    }

    let mut state = AppState::new(Arc::new(records));
    state.metrics = metrics;
    state.max_upload_bytes = config.max_upload_bytes;

    let addr = config.listen_addr();
    tokio::select! {
        result = start_server(state, &addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    info!("MedVault stopped");
    Ok(())
}

async fn connect_ledger(config: &AppConfig) -> Result<EvmLedger> {
    let mut ledger_config = EvmLedgerConfig::new(config.rpc_url.clone(), config.contract_address);
    ledger_config.gas_price_wei = config.gas_price_wei;
    ledger_config.gas_limit = config.gas_limit;
    ledger_config.receipt_timeout = config.receipt_timeout;
    ledger_config.receipt_poll_interval = config.receipt_poll_interval;
    ledger_config.request_timeout = config.request_timeout;

    let source = match &config.private_key {
        Some(key) => SignerSource::PrivateKey(
            EvmSigner::from_hex(key.expose()).context("configured private key is invalid")?,
        ),
        None => SignerSource::DevAccount {
            index: config.dev_account_index,
        },
    };

    let ledger = EvmLedger::connect(ledger_config, source)
        .await
        .with_context(|| format!("failed to connect to ledger node at {}", config.rpc_url))?;
    info!(
        "Ledger contract {} on chain {} (signer {})",
        ledger.contract(),
        ledger.chain_id(),
        ledger.signer()
    );
    Ok(ledger)
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!(records::UPLOADS_TOTAL, "Uploads recorded on the ledger");
            describe_counter!(records::DOWNLOADS_TOTAL, "Files released to hospitals");
            describe_counter!(
                records::ACCESS_DENIED_TOTAL,
                "Downloads refused by the ledger access check"
            );
            describe_counter!(
                records::LEDGER_FAILURES_TOTAL,
                "Ledger calls that failed or reverted"
            );
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}
