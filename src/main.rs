//! Single-validator ledger node.
//!
//! Starts one node on an in-process transport, together with a simulated
//! remote peer that submits a signed transaction every second.
//!
//! # Usage
//! ```text
//! ledger_node [OPTIONS]
//! ```
//!
//! # Options
//! - `--name <name>`: Node identifier (default `LOCAL`)
//! - `--validator`: Produce blocks with the key from the keystore
//! - `--authority <hex>`: Compressed public key of the block producer (required unless `--validator`)
//! - `--block-time <secs>`: Block interval (default 5)
//! - `--keystore <path>`: Validator key file (default `~/.ledger_node/<name>/validator.key`)
//! - `--log-level <level>`: `debug`, `info`, `warn` or `error`
//!
//! The keystore passphrase is read from `NODE_PASSPHRASE`, or prompted if not set.

use ledger_node::core::block::Block;
use ledger_node::core::blockchain::Blockchain;
use ledger_node::core::transaction::Transaction;
use ledger_node::core::validator::BlockValidator;
use ledger_node::crypto::key_pair::{PrivateKey, PublicKey};
use ledger_node::crypto::keystore::Keystore;
use ledger_node::network::local_transport::LocalTransport;
use ledger_node::network::rpc::Message;
use ledger_node::network::server::{Server, ServerOptions};
use ledger_node::network::transport::Transport;
use ledger_node::storage::memory_storage::MemoryStorage;
use ledger_node::types::encoding::Encode;
use ledger_node::utils::log::{self, Level};
use ledger_node::{debug, error, info, warn};
use rand_core::{OsRng, RngCore};
use rpassword::prompt_password;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use zeroize::Zeroizing;

const REMOTE_ADDRESS: &str = "REMOTE";

struct Args {
    name: String,
    validator: bool,
    block_time: Duration,
    keystore: Option<PathBuf>,
    authority: Option<PublicKey>,
    log_level: Level,
}

#[tokio::main]
async fn main() {
    let args = parse_args();
    log::set_level(args.log_level);

    let private_key = if args.validator {
        Some(load_validator_key(&args))
    } else {
        None
    };

    let authority = resolve_authority(&args, private_key.as_ref());
    info!("block producer is {}", authority.to_hex());

    let mut genesis = Block::genesis(0);
    if let Some(key) = &private_key
        && let Err(e) = genesis.sign(key)
    {
        error!("failed to sign genesis: {e}");
        process::exit(1);
    }

    let validator = BlockValidator::with_authority(authority);
    let chain = match Blockchain::with_validator(&genesis, MemoryStorage::new(), validator) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            error!("failed to initialize the ledger: {e}");
            process::exit(1);
        }
    };

    let local = LocalTransport::new(&args.name);
    let remote = LocalTransport::new(REMOTE_ADDRESS);
    if let Err(e) = connect_pair(&local, &remote) {
        error!("failed to connect transports: {e}");
        process::exit(1);
    }

    spawn_remote(remote).await;

    let options = ServerOptions {
        transports: vec![local.clone() as Arc<dyn Transport>],
        block_time: args.block_time,
        private_key,
        ..ServerOptions::default()
    };
    let server = Server::new(options, chain);
    let (quit_tx, quit_rx) = oneshot::channel();
    let server_handle = tokio::spawn(server.run(quit_rx));

    info!(
        "node '{}' started (validator={}, block time {:?})",
        args.name, args.validator, args.block_time
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {e}");
    }
    info!("Ctrl+C received, shutting down...");
    let _ = quit_tx.send(());
    if let Err(e) = server_handle.await {
        error!("server task error: {e}");
    }
}

fn connect_pair(
    local: &Arc<LocalTransport>,
    remote: &Arc<LocalTransport>,
) -> Result<(), ledger_node::network::transport::TransportError> {
    local.connect(remote.clone())?;
    remote.connect(local.clone())?;
    Ok(())
}

/// Drives the simulated peer: drains what the node gossips back and submits
/// a signed random transaction every second.
async fn spawn_remote(remote: Arc<LocalTransport>) {
    let mut inbox = match remote.consume().await {
        Ok(inbox) => inbox,
        Err(e) => {
            error!("remote transport: {e}");
            process::exit(1);
        }
    };
    tokio::spawn(async move {
        while let Some(rpc) = inbox.recv().await {
            debug!("{REMOTE_ADDRESS} received {} bytes from {}", rpc.payload().len(), rpc.from());
        }
    });

    tokio::spawn(async move {
        let key = PrivateKey::new();
        loop {
            let mut data = [0u8; 32];
            OsRng.fill_bytes(&mut data);

            let mut tx = Transaction::new(data.as_slice());
            match tx.sign(&key) {
                Ok(()) => {
                    let payload = Message::transaction(&tx).to_bytes();
                    if let Err(e) = remote.broadcast(payload).await {
                        warn!("{REMOTE_ADDRESS} failed to submit a transaction: {e}");
                    }
                }
                Err(e) => warn!("{REMOTE_ADDRESS} failed to sign a transaction: {e}"),
            }

            sleep(Duration::from_secs(1)).await;
        }
    });
}

/// A validator is its own authority; a follower must be told whose blocks to accept.
fn resolve_authority(args: &Args, private_key: Option<&PrivateKey>) -> PublicKey {
    match (private_key.map(PrivateKey::public_key), &args.authority) {
        (Some(own), Some(given)) if own != *given => {
            error!(
                "--authority {} does not match the validator key {}",
                given.to_hex(),
                own.to_hex()
            );
            process::exit(1);
        }
        (Some(own), _) => own,
        (None, Some(given)) => given.clone(),
        (None, None) => {
            error!("a follower needs --authority <hex> to know which blocks to accept");
            process::exit(1);
        }
    }
}

fn load_validator_key(args: &Args) -> PrivateKey {
    let keystore = match &args.keystore {
        Some(path) => Keystore::new(path.clone()),
        None => Keystore::default_for(&args.name).unwrap_or_else(|e| {
            error!("{e}");
            process::exit(1);
        }),
    };

    let passphrase = Zeroizing::new(env::var("NODE_PASSPHRASE").unwrap_or_else(|_| {
        prompt_password(format!("Enter passphrase for node '{}': ", args.name)).unwrap_or_else(
            |e| {
                error!("{e}");
                process::exit(1);
            },
        )
    }));

    if passphrase.is_empty() {
        eprintln!("Passphrase cannot be empty");
        process::exit(1);
    }

    keystore
        .load_or_create(passphrase.as_bytes())
        .unwrap_or_else(|e| {
            error!("failed to load validator key from {}: {e}", keystore.path().display());
            process::exit(1);
        })
}

fn parse_args() -> Args {
    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("ledger_node");

    let mut args = Args {
        name: "LOCAL".to_string(),
        validator: false,
        block_time: Duration::from_secs(5),
        keystore: None,
        authority: None,
        log_level: Level::Info,
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "-h" | "--help" => {
                print_usage(program);
                process::exit(0);
            }
            "--validator" => args.validator = true,
            "--name" => args.name = value_of(&argv, &mut i, "--name"),
            "--keystore" => args.keystore = Some(value_of(&argv, &mut i, "--keystore").into()),
            "--authority" => {
                let raw = value_of(&argv, &mut i, "--authority");
                args.authority = match PublicKey::from_hex(&raw) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        eprintln!("Invalid authority: {e}");
                        process::exit(1);
                    }
                };
            }
            "--block-time" => {
                let raw = value_of(&argv, &mut i, "--block-time");
                args.block_time = match raw.parse::<u64>() {
                    Ok(secs) if secs > 0 => Duration::from_secs(secs),
                    _ => {
                        eprintln!("Invalid block time: {raw}");
                        process::exit(1);
                    }
                };
            }
            "--log-level" => {
                let raw = value_of(&argv, &mut i, "--log-level");
                args.log_level = raw.parse().unwrap_or_else(|e| {
                    eprintln!("{e}");
                    process::exit(1);
                });
            }
            other => {
                eprintln!("Unexpected argument: {other}\n");
                print_usage(program);
                process::exit(1);
            }
        }
        i += 1;
    }

    args
}

/// Consumes the value following the flag at `argv[*i]`.
fn value_of(argv: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    match argv.get(*i) {
        Some(value) => value.clone(),
        None => {
            eprintln!("{flag} requires an argument");
            process::exit(1);
        }
    }
}

const USAGE: &str = "\
Ledger Node

USAGE:
    {program} [OPTIONS]

OPTIONS:
    --name <name>          Node identifier (default LOCAL)
    --validator            Produce blocks, signing with the keystore key
    --authority <hex>      Compressed public key of the block producer
                           (required for followers; printed by the validator at startup)
    --block-time <secs>    Block interval in seconds (default 5)
    --keystore <path>      Validator key file
    --log-level <level>    debug, info, warn or error (default info)
    -h, --help             Print this help message

ENVIRONMENT:
    NODE_PASSPHRASE    Passphrase for the validator keystore (prompted interactively if not set)

EXAMPLES:
    # Follow the chain of a known validator and accept transactions
    {program} --authority 02a1...

    # Produce a block every two seconds
    {program} --validator --block-time 2

FILES:
    ~/.ledger_node/<name>/validator.key
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
