use clap::{Parser, Subcommand};
use query_history::{ChainRpcProvider, FetchProviderRef, SyncChain, fetch_history};
use query_util::{ChainConfig, LogConfig, QueryError};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[macro_use]
extern crate log;

#[derive(Parser, Debug)]
#[command(name = "query-history")]
#[command(version = "0.1.0")]
#[command(about = "Blocking blockchain queries and per-address transaction history", long_about = None)]
struct QueryHistoryCli {
    #[command(subcommand)]
    command: QueryHistoryCommands,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
enum QueryHistoryCommands {
    /// Resolve the full transaction history of an address
    History { address: String },

    /// Fetch a block header by depth or block hash
    Header { key: String },

    /// Fetch the transaction hashes of a block by depth or block hash
    TxHashes { key: String },

    /// Fetch the depth of a block by hash
    Depth { hash: String },

    /// Fetch the depth of the last block in the chain
    LastDepth,

    /// Fetch a full transaction by hash
    Tx { txid: String },

    /// Fetch the confirming depth and intra-block offset of a transaction
    TxIndex { txid: String },

    /// Fetch the input that spends the given output point
    Spend { txid: String, vout: u32 },

    /// Fetch the output points owned by an address
    Outputs { address: String },
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize result: {}", e),
    }
}

// Header and tx-hashes lookups accept either form of key
enum BlockKey {
    Depth(u64),
    Hash(bitcoincore_rpc::bitcoin::BlockHash),
}

fn parse_block_key(key: &str) -> Result<BlockKey, QueryError> {
    if let Ok(depth) = key.parse::<u64>() {
        return Ok(BlockKey::Depth(depth));
    }
    query_util::parse_block_hash(key).map(BlockKey::Hash)
}

fn run(cli: QueryHistoryCli, config: &ChainConfig, runtime: &Runtime) -> Result<(), QueryError> {
    let provider: FetchProviderRef = Arc::new(ChainRpcProvider::new(
        config.rpc_url(),
        config.auth(),
        runtime.handle().clone(),
    ));

    let mut facade = SyncChain::new(provider.clone());
    if let Some(timeout) = config.fetch_timeout() {
        facade = facade.with_timeout(timeout);
    }

    match cli.command {
        QueryHistoryCommands::History { address } => {
            let address = query_util::parse_address(&address, config.network())?;
            info!("Looking up {}", address);
            let history = fetch_history(
                runtime.handle(),
                provider,
                config.network(),
                address,
                config.fetch_timeout(),
            )?;
            print_json(&history);
        }
        QueryHistoryCommands::Header { key } => {
            let header = match parse_block_key(&key)? {
                BlockKey::Depth(depth) => facade.block_header_by_depth(depth)?,
                BlockKey::Hash(hash) => facade.block_header_by_hash(hash)?,
            };
            print_json(&header);
        }
        QueryHistoryCommands::TxHashes { key } => {
            let hashes = match parse_block_key(&key)? {
                BlockKey::Depth(depth) => facade.block_transaction_hashes_by_depth(depth)?,
                BlockKey::Hash(hash) => facade.block_transaction_hashes_by_hash(hash)?,
            };
            print_json(&hashes);
        }
        QueryHistoryCommands::Depth { hash } => {
            let depth = facade.block_depth(query_util::parse_block_hash(&hash)?)?;
            print_json(&depth);
        }
        QueryHistoryCommands::LastDepth => {
            let depth = facade.last_depth()?;
            print_json(&depth);
        }
        QueryHistoryCommands::Tx { txid } => {
            let tx = facade.transaction(query_util::parse_txid(&txid)?)?;
            print_json(&tx);
        }
        QueryHistoryCommands::TxIndex { txid } => {
            let index = facade.transaction_index(query_util::parse_txid(&txid)?)?;
            print_json(&index);
        }
        QueryHistoryCommands::Spend { txid, vout } => {
            let outpoint = bitcoincore_rpc::bitcoin::OutPoint {
                txid: query_util::parse_txid(&txid)?,
                vout,
            };
            let inpoint = facade.spend(outpoint)?;
            print_json(&inpoint);
        }
        QueryHistoryCommands::Outputs { address } => {
            let address = query_util::parse_address(&address, config.network())?;
            let outpoints = facade.outputs(address)?;
            print_json(&outpoints);
        }
    }

    Ok(())
}

fn main() {
    let cli = QueryHistoryCli::parse();

    let log_config =
        LogConfig::new(query_util::QUERY_HISTORY_SERVICE_NAME).enable_console(false);
    query_util::init_log(log_config);

    let root_dir = query_util::get_service_dir(query_util::QUERY_HISTORY_SERVICE_NAME);
    info!("Using service directory: {}", root_dir.display());

    let config = match ChainConfig::load(&root_dir) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config: {}", e);
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {}", e);
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli, &config, &runtime) {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
