//! btcwd: a single-user HD wallet daemon backed by a trusted full node.

mod builder;
mod crypto;
mod error;
mod keys;
mod node;
mod rpcserver;
mod scanner;
mod store;
mod utxo;
mod wallet;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use btcw_consensus::Network;
use btcw_log::{log_error, log_info, log_warn};
use btcw_storage::fjall::FjallStore;
use btcw_storage::memory::MemoryStore;
use btcw_storage::KeyValueStore;
use tokio::sync::watch;
use zeroize::Zeroize;

use crate::error::WalletError;
use crate::node::{NodeBackend, NodeClient, NodeConfig};
use crate::store::WalletStore;
use crate::wallet::Wallet;

const WALLET_DB_NAME: &str = "wallet.db";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StorageBackend {
    Fjall,
    Memory,
}

impl StorageBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fjall" => Some(Self::Fjall),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Config {
    create: bool,
    network: Network,
    rpc_user: String,
    rpc_pass: String,
    node_backend: NodeBackend,
    node_host: Option<String>,
    rpc_addr: String,
    data_dir: Option<PathBuf>,
    storage: StorageBackend,
    log_level: btcw_log::Level,
    log_format: btcw_log::Format,
    log_timestamps: bool,
}

#[derive(Debug)]
enum CliAction {
    Run(Box<Config>),
    PrintHelp,
    PrintVersion,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(message) = run().await {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = match parse_args_from(std::env::args().skip(1))? {
        CliAction::Run(config) => config,
        CliAction::PrintHelp => {
            println!("{}", usage());
            return Ok(());
        }
        CliAction::PrintVersion => {
            println!("btcwd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    btcw_log::init(btcw_log::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    let db_path = wallet_db_path(&config)?;
    let (kv_store, fjall_handle) = open_store(config.storage, &db_path)?;
    let store = WalletStore::new(kv_store);

    if config.create {
        return run_create(&store, config.network);
    }

    if config.rpc_user.is_empty() || config.rpc_pass.is_empty() {
        return Err("RPC username and password are required to start wallet".into());
    }

    let wallet = match Wallet::load(store, config.network) {
        Ok(wallet) => Arc::new(wallet),
        Err(WalletError::NotInitialized) => {
            return Err("A wallet does not exist. Please create one first with -create".into());
        }
        Err(err) => return Err(format!("error loading wallet: {err}")),
    };
    log_info!("wallet loaded on {}", config.network);

    let node_config = NodeConfig {
        backend: config.node_backend,
        network: config.network,
        rpc_user: config.rpc_user.clone(),
        rpc_pass: config.rpc_pass.clone(),
        host: config.node_host.clone(),
    };
    let (node, block_events) = NodeClient::connect(&node_config)
        .await
        .map_err(|err| format!("error setting up node client: {err}"))?;
    let node = Arc::new(node);
    wallet.set_node(node);

    if config.node_backend == NodeBackend::Btcd {
        if let Err(err) = wallet.reload_address_filter().await {
            log_warn!("failed to load node address filter: {err}");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let scanner_task = tokio::spawn(scanner::run(
        wallet.clone(),
        block_events,
        shutdown_rx.clone(),
    ));

    rpcserver::serve(wallet, &config.rpc_addr, shutdown_rx)
        .await
        .map_err(|err| format!("error starting RPC server: {err}"))?;

    if let Err(err) = scanner_task.await {
        log_error!("scanner task failed: {err}");
    }
    if let Some(fjall) = fjall_handle {
        if let Err(err) = fjall.persist() {
            log_error!("failed to flush wallet database: {err}");
        }
    }
    log_info!("shutdown complete");
    Ok(())
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    log_warn!("failed to install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        log_info!("signal received; requesting shutdown");
        let _ = shutdown_tx.send(true);
    });
}

/// Interactive wallet creation: confirm intent, take the passphrase
/// twice, then show the freshly generated seed exactly once.
fn run_create(store: &WalletStore, network: Network) -> Result<(), String> {
    println!("do you want to create a new wallet? (y/n)");
    let input = read_trimmed_line()?.to_lowercase();
    if input != "y" && input != "yes" {
        return Ok(());
    }

    println!("enter passphrase for wallet: ");
    let mut passphrase = read_trimmed_line()?;
    println!("confirm passphrase: ");
    let mut confirm = read_trimmed_line()?;
    if passphrase.as_bytes() != confirm.as_bytes() {
        passphrase.zeroize();
        confirm.zeroize();
        return Err("passphrases do not match, please try again".into());
    }

    let result = wallet::create_wallet(store, network, passphrase.as_bytes());
    passphrase.zeroize();
    confirm.zeroize();
    let mut seed = result.map_err(|err| err.to_string())?;

    println!(
        "Next will be the master seed. Write it down and store securely. \
         Anyone with access to the seed has access to the funds."
    );
    println!("seed: {}", node::bytes_to_hex(&seed));
    seed.zeroize();
    Ok(())
}

fn read_trimmed_line() -> Result<String, String> {
    let mut line = String::new();
    std::io::stdout()
        .flush()
        .map_err(|err| format!("error writing prompt: {err}"))?;
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|_| "error reading input, please try again".to_string())?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// `<home>/.btcw/<network>/wallet/wallet.db`, directories created 0700.
fn wallet_db_path(config: &Config) -> Result<PathBuf, String> {
    let base = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => {
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| "cannot determine home directory".to_string())?;
            home.join(".btcw")
        }
    };
    let wallet_dir = base.join(config.network.name()).join("wallet");
    std::fs::create_dir_all(&wallet_dir)
        .map_err(|err| format!("error creating wallet directory: {err}"))?;
    restrict_permissions(&base);
    restrict_permissions(&wallet_dir);
    Ok(wallet_dir.join(WALLET_DB_NAME))
}

fn open_store(
    storage: StorageBackend,
    db_path: &Path,
) -> Result<(Arc<dyn KeyValueStore>, Option<Arc<FjallStore>>), String> {
    match storage {
        StorageBackend::Fjall => {
            let store = Arc::new(
                FjallStore::open(db_path)
                    .map_err(|err| format!("error opening wallet database: {err}"))?,
            );
            restrict_permissions(db_path);
            Ok((store.clone(), Some(store)))
        }
        StorageBackend::Memory => Ok((Arc::new(MemoryStore::new()), None)),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)) {
        log_warn!("could not restrict permissions on {}: {err}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut create = false;
    let mut simnet = false;
    let mut regtest = false;
    let mut rpc_user = String::new();
    let mut rpc_pass = String::new();
    let mut node_name = "btcd".to_string();
    let mut node_host: Option<String> = None;
    let mut rpc_addr = rpcserver::DEFAULT_RPC_ADDR.to_string();
    let mut data_dir: Option<PathBuf> = None;
    let mut storage = StorageBackend::Fjall;
    let mut log_level = btcw_log::Level::Info;
    let mut log_format = btcw_log::Format::Text;
    let mut log_timestamps = true;

    let mut args = raw_args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "help" | "-h" | "-help" | "--help" => return Ok(CliAction::PrintHelp),
            "version" | "-version" | "--version" => return Ok(CliAction::PrintVersion),
            "-create" | "--create" => create = true,
            "-simnet" | "--simnet" => simnet = true,
            "-regtest" | "--regtest" => regtest = true,
            "-rpcuser" | "--rpcuser" => {
                rpc_user = args
                    .next()
                    .ok_or_else(|| format!("missing value for -rpcuser\n{}", usage()))?;
            }
            "-rpcpass" | "--rpcpass" => {
                rpc_pass = args
                    .next()
                    .ok_or_else(|| format!("missing value for -rpcpass\n{}", usage()))?;
            }
            "-node" | "--node" => {
                node_name = args
                    .next()
                    .ok_or_else(|| format!("missing value for -node\n{}", usage()))?;
            }
            "--node-host" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --node-host\n{}", usage()))?;
                node_host = Some(value);
            }
            "--rpc-addr" => {
                rpc_addr = args
                    .next()
                    .ok_or_else(|| format!("missing value for --rpc-addr\n{}", usage()))?;
            }
            "--datadir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --datadir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --backend\n{}", usage()))?;
                storage = StorageBackend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
            }
            "--log-level" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = btcw_log::Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
            }
            "--log-format" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = btcw_log::Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
            }
            "--no-log-timestamps" => log_timestamps = false,
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let node_backend = NodeBackend::parse(&node_name)
        .ok_or("Invalid node type. Please provide 'btcd' or 'core'")?;
    if node_backend == NodeBackend::Core && simnet {
        return Err(
            "Simnet is not available with core. For core please specify testnet or regtest".into(),
        );
    }

    let network = if simnet {
        Network::Simnet
    } else if regtest {
        Network::Regtest
    } else {
        Network::Testnet3
    };

    Ok(CliAction::Run(Box::new(Config {
        create,
        network,
        rpc_user,
        rpc_pass,
        node_backend,
        node_host,
        rpc_addr,
        data_dir,
        storage,
        log_level,
        log_format,
        log_timestamps,
    })))
}

fn usage() -> &'static str {
    "usage: btcwd [options]

  -create               create a new wallet and exit
  -simnet               use the simnet network
  -regtest              use the regtest network (default: testnet3)
  -rpcuser <user>       node RPC username
  -rpcpass <pass>       node RPC password
  -node <btcd|core>     node backing the wallet (default: btcd)
  --node-host <addr>    override the node RPC address
  --rpc-addr <addr>     wallet RPC listen address (default: 127.0.0.1:18557)
  --datadir <dir>       override the data directory (default: ~/.btcw)
  --backend <name>      storage backend: fjall or memory (default: fjall)
  --log-level <level>   error|warn|info|debug|trace (default: info)
  --log-format <fmt>    text|json (default: text)
  --no-log-timestamps   omit timestamps from text logs
  help                  show this help
  version               show the version"
}
