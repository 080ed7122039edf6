#![forbid(unsafe_code)]
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use utxochain::blockchain::ProofOfWork;
use utxochain::cli;
use utxochain::config::{load_config, Config};
use utxochain::error::ChainError;
use utxochain::network::{self, TcpTransport};
use utxochain::node::{Node, SendOutcome};

#[derive(Parser)]
#[command(author, version, about = "A minimal proof-of-work UTXO ledger", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,
    /// Chain id; selects the chain and wallet files
    #[arg(long, global = true, default_value = "3000")]
    node_id: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates a chain whose genesis reward goes to ADDRESS
    Createblockchain {
        #[arg(long)]
        address: String,
    },
    /// Generates a new key pair and stores it in the wallet file
    Createwallet,
    /// Lists the addresses in the wallet file
    Listaddresses,
    /// Prints the spendable balance of ADDRESS
    Getbalance {
        #[arg(long)]
        address: String,
    },
    /// Sends AMOUNT from FROM to TO
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction locally instead of forwarding it
        #[arg(long)]
        mine: bool,
    },
    /// Prints every block of the active chain
    Printchain,
    /// Rebuilds the UTXO set from the chain
    Reindexutxo,
    /// Starts the node listener
    Startnode {
        /// Enables mining with rewards paid to this address
        #[arg(long)]
        miner: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = match load_config(&cli.config) {
        Ok(config) => run(config, &cli.node_id, cli.command).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(mut config: Config, node_id: &str, command: Commands) -> Result<(), ChainError> {
    match command {
        Commands::Createblockchain { address } => {
            let genesis = cli::create_blockchain(&config, node_id, &address)?;
            println!("{}", "✅ Blockchain created".bright_green().bold());
            println!("Genesis: {}", hex::encode(genesis).bright_white());
        }
        Commands::Createwallet => {
            let address = cli::create_wallet(&config, node_id)?;
            println!("Your new address: {}", address.bright_yellow());
        }
        Commands::Listaddresses => {
            for address in cli::list_addresses(&config, node_id)? {
                println!("{}", address);
            }
        }
        Commands::Getbalance { address } => {
            let balance = cli::get_balance(&config, node_id, &address)?;
            println!("Balance of '{}': {}", address.bright_yellow(), balance.to_string().bright_green());
        }
        Commands::Send { from, to, amount, mine } => {
            match cli::send(&config, node_id, &from, &to, amount, mine)? {
                SendOutcome::Mined(hash) => {
                    println!("{}", "✅ Success!".bright_green().bold());
                    println!("Mined block {}", hex::encode(hash).bright_white());
                }
                SendOutcome::Forwarded { peer, txid } => {
                    println!("{}", "📤 Transaction forwarded".bright_cyan());
                    println!("{} -> {}", hex::encode(txid).bright_white(), peer);
                }
            }
        }
        Commands::Printchain => {
            for block in cli::print_chain(&config, node_id)? {
                println!("{}", format!("============ Block {} ============", block.hash_hex()).bright_cyan());
                println!("Height: {}", block.height);
                println!("Prev. block: {}", hex::encode(block.prev_block_hash));
                println!("Timestamp: {}", block.timestamp);
                println!("Nonce: {}", block.nonce);
                println!("PoW: {}", ProofOfWork::validate(&block));
                for tx in &block.transactions {
                    println!("--- Transaction {}:", tx.id_hex().bright_white());
                    for (i, input) in tx.inputs.iter().enumerate() {
                        if tx.is_coinbase() {
                            println!("     Input {}: coinbase", i);
                        } else {
                            println!("     Input {}: {}:{}", i, hex::encode(input.txid), input.vout);
                        }
                    }
                    for (i, output) in tx.outputs.iter().enumerate() {
                        println!(
                            "     Output {}: {} to {}",
                            i,
                            output.value,
                            hex::encode(output.pub_key_hash)
                        );
                    }
                }
                println!();
            }
        }
        Commands::Reindexutxo => {
            let count = cli::reindex_utxo(&config, node_id)?;
            println!("Done! There are {} transactions in the UTXO set.", count);
        }
        Commands::Startnode { miner } => {
            if let Some(address) = miner {
                Node::check_address(&address)?;
                println!("Mining is on. Address to receive rewards: {}", address.bright_yellow());
                config.mining.reward_address = Some(address);
            }
            let listen_addr = config.node.listen_addr.clone();
            let node = Arc::new(cli::open_node(&config, node_id, Arc::new(TcpTransport::new()))?);
            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            println!("{} {}", "🌐 Node listening on".bright_cyan(), listen_addr.bright_white());
            network::serve(node, listener).await?;
        }
    }
    Ok(())
}
