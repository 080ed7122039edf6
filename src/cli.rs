//! Command implementations shared by the `utxochain` binary and tests.
//! Each command opens what it needs for one chain id and returns a typed result;
//! printing is left to the caller.

use crate::blockchain::{Block, Blockchain};
use crate::config::Config;
use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use crate::network::{TcpTransport, Transport};
use crate::node::{Node, SendOutcome};
use crate::persistence::Database;
use crate::wallet::{validate_address, Wallets};
use std::fs;
use std::sync::Arc;

fn ensure_data_dir(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.node.data_dir)?;
    Ok(())
}

/// Creates the chain file for `chain_id` with a genesis block paying `address`.
/// An invalid address leaves nothing behind on disk.
pub fn create_blockchain(config: &Config, chain_id: &str, address: &str) -> Result<Sha256Hash> {
    if !validate_address(address) {
        return Err(ChainError::InvalidAddress(address.to_string()));
    }
    let path = config.db_path(chain_id);
    if path.exists() {
        return Err(ChainError::ChainAlreadyExists(chain_id.to_string()));
    }

    ensure_data_dir(config)?;
    let store = Arc::new(Database::open(&path)?);
    let chain = Blockchain::create(store, address, chain_id)?;
    Ok(chain.tip())
}

pub fn create_wallet(config: &Config, chain_id: &str) -> Result<String> {
    ensure_data_dir(config)?;
    let path = config.wallet_path(chain_id);
    let mut wallets = Wallets::load(&path)?;
    let address = wallets.create_wallet()?;
    wallets.save(&path)?;
    Ok(address)
}

pub fn list_addresses(config: &Config, chain_id: &str) -> Result<Vec<String>> {
    Ok(Wallets::load(&config.wallet_path(chain_id))?.addresses())
}

pub fn get_balance(config: &Config, chain_id: &str, address: &str) -> Result<u128> {
    if !validate_address(address) {
        return Err(ChainError::InvalidAddress(address.to_string()));
    }
    open_node(config, chain_id, Arc::new(TcpTransport::new()))?.balance(address)
}

pub fn send(
    config: &Config,
    chain_id: &str,
    from: &str,
    to: &str,
    amount: u64,
    mine_now: bool,
) -> Result<SendOutcome> {
    send_with(config, chain_id, from, to, amount, mine_now, Arc::new(TcpTransport::new()))
}

/// [`send`] with an explicit transport for forwarding.
pub fn send_with(
    config: &Config,
    chain_id: &str,
    from: &str,
    to: &str,
    amount: u64,
    mine_now: bool,
    transport: Arc<dyn Transport>,
) -> Result<SendOutcome> {
    if !validate_address(from) {
        return Err(ChainError::InvalidAddress(from.to_string()));
    }
    if !validate_address(to) {
        return Err(ChainError::InvalidAddress(to.to_string()));
    }
    if from == to {
        return Err(ChainError::SameAddress);
    }

    let node = open_node(config, chain_id, transport)?;
    let wallets = Wallets::load(&config.wallet_path(chain_id))?;
    let wallet = wallets.get_wallet(from)?;
    node.send(wallet, to, amount, mine_now)
}

/// Rebuilds the UTXO set; returns the number of transactions with unspent outputs.
pub fn reindex_utxo(config: &Config, chain_id: &str) -> Result<usize> {
    open_node(config, chain_id, Arc::new(TcpTransport::new()))?.reindex()
}

/// Blocks of the active chain, newest first.
pub fn print_chain(config: &Config, chain_id: &str) -> Result<Vec<Block>> {
    open_node(config, chain_id, Arc::new(TcpTransport::new()))?.blocks()
}

pub fn open_node(config: &Config, chain_id: &str, transport: Arc<dyn Transport>) -> Result<Node> {
    Node::open(config.clone(), chain_id, transport)
}
