//! Chainsync node CLI
//!
//! Inspect a persistent chain, mine blocks locally, or run a node that
//! syncs with peers over TCP.

use chainsync_node::config::{ClientMode, NodeConfig, CONFIG_FILE};
use chainsync_node::consensus::BlockChain;
use chainsync_node::core::{Address, Block};
use chainsync_node::mining::{Mempool, Miner};
use chainsync_node::network::{self, NodeContext};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chainsync")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Peer-to-peer proof-of-work chain sync node", long_about = None)]
struct Cli {
    /// Data directory for chain storage
    #[arg(short, long, default_value = ".chainsync_data")]
    data_dir: PathBuf,

    /// Override the client mode from the config file
    #[arg(short, long, value_enum)]
    mode: Option<ClientMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory with a default config and the genesis block
    Init,
    /// Display chain information
    Info,
    /// List the most recent headers of the proof chain
    Headers {
        /// Number of headers to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
    /// Re-check every block on the main chain
    Verify,
    /// Mine new blocks on the local chain
    Mine {
        /// Name the miner address is derived from
        #[arg(long, default_value = "miner")]
        miner: String,
        /// Number of blocks to mine
        #[arg(short, long, default_value = "1")]
        count: u32,
    },
    /// Run a node
    Run {
        /// Address to accept peers on (host:port)
        #[arg(short, long)]
        listen: Option<String>,
        /// Peers to connect to (comma-separated host:port)
        #[arg(short, long)]
        connect: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Info => cmd_info(&config),
        Commands::Headers { count } => cmd_headers(&config, count),
        Commands::Verify => cmd_verify(&config),
        Commands::Mine { miner, count } => cmd_mine(&config, &miner, count),
        Commands::Run { listen, connect } => cmd_run(config, listen, connect),
    }
}

fn load_config(cli: &Cli) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let path = cli.data_dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        NodeConfig::load(&path)?
    } else {
        NodeConfig::default()
    };
    config.data_dir = cli.data_dir.clone();
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_init(config: &NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.data_dir)?;
    if !config.config_file().exists() {
        config.save(config.config_file())?;
    }
    let chain = BlockChain::persistent(config)?;

    println!("Initialized chain in {}", config.data_dir.display());
    println!("  Mode:    {:?}", config.mode);
    println!("  Genesis: {}", Block::genesis_hash());
    println!("  Height:  {}", chain.height());
    Ok(())
}

fn cmd_info(config: &NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let chain = BlockChain::persistent(config)?;
    let proofchain = chain.proofchain();

    println!("Chain information");
    println!("  Mode:              {:?}", chain.mode());
    println!("  Block height:      {}", chain.height());
    println!("  Head:              {}", chain.head_hash());
    println!("  Blocks on path:    {}", chain.path().len());
    println!("  Header height:     {}", proofchain.height());
    println!("  Next difficulty:   {}", proofchain.next_difficulty()?);
    println!("  Accounts complete: {}", chain.accounts_complete());
    println!("  Accounts hash:     {}", chain.accounts_hash());
    Ok(())
}

fn cmd_headers(config: &NodeConfig, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let chain = BlockChain::persistent(config)?;
    let proofchain = chain.proofchain();
    let path = proofchain.path().as_slice();

    let start = path.len().saturating_sub(count);
    for hash in path[start..].iter().rev() {
        if let Some(entry) = proofchain.get(hash)? {
            println!(
                "#{:<6} {}  difficulty {:>3}  time {}",
                entry.height,
                hash,
                entry.data.difficulty(),
                entry.data.timestamp()
            );
        }
    }
    Ok(())
}

fn cmd_verify(config: &NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let chain = BlockChain::persistent(config)?;
    let checked = chain.verify()?;
    println!("Chain is valid ({} blocks checked)", checked);
    Ok(())
}

fn cmd_mine(config: &NodeConfig, name: &str, count: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut chain = BlockChain::persistent(config)?;
    let miner = Miner::new(Address::from_seed(name.as_bytes()));
    println!("Mining {} block(s) to {}", count, miner.address.to_hex());

    for _ in 0..count {
        let (block, stats) = miner.mine_block(&mut chain, Vec::new())?;
        println!(
            "  #{} {} ({} attempts, {}ms)",
            chain.height(),
            block.hash(),
            stats.hash_attempts,
            stats.time_ms
        );
    }
    Ok(())
}

fn cmd_run(
    config: NodeConfig,
    listen: Option<String>,
    connect: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let chain = BlockChain::persistent(&config)?;
    log::info!(
        "Starting {:?} node at height {} ({})",
        config.mode,
        chain.height(),
        chain.head_hash()
    );
    let ctx = NodeContext::new(chain, Mempool::new(), config.consensus.clone());

    let peers: Vec<String> = connect
        .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        for peer in peers {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = network::connect(&peer, ctx).await {
                    log::warn!("Connection to {} failed: {}", peer, e);
                }
            });
        }

        match listen {
            Some(addr) => {
                tokio::select! {
                    result = network::listen(&addr, ctx) => result?,
                    _ = tokio::signal::ctrl_c() => log::info!("Shutting down node..."),
                }
            }
            None => {
                tokio::signal::ctrl_c().await?;
                log::info!("Shutting down node...");
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
