use crate::blockchain::{validate_block_transactions, Block, BlockOutcome, Blockchain, ProofOfWork};
use crate::config::Config;
use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use crate::network::Transport;
use crate::persistence::Database;
use crate::transaction::Transaction;
use crate::wallet::{pub_key_hash_from_address, validate_address, Wallet};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`Node::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transaction was mined locally into this block.
    Mined(Sha256Hash),
    /// The transaction was handed to the designated peer; local state is unchanged.
    Forwarded { peer: String, txid: Sha256Hash },
}

/// Everything a running node owns: the chain behind one lock, the mempool,
/// the peer list and the outbound transport.
pub struct Node {
    config: Config,
    chain_id: String,
    chain: RwLock<Blockchain>,
    mempool: Mutex<BTreeMap<Sha256Hash, Transaction>>,
    peers: RwLock<Vec<String>>,
    transport: Arc<dyn Transport>,
    mining: Mutex<()>,
}

impl Node {
    /// Opens the on-disk chain for `chain_id`.
    pub fn open(config: Config, chain_id: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let path = config.db_path(chain_id);
        if !path.exists() {
            return Err(ChainError::ChainNotFound(chain_id.to_string()));
        }
        let store = Arc::new(Database::open(&path)?);
        let chain = Blockchain::open(store, chain_id)?;
        Ok(Self::with_chain(config, chain_id, chain, transport))
    }

    pub fn with_chain(
        config: Config,
        chain_id: &str,
        chain: Blockchain,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let peers = config.node.known_peers.clone();
        Node {
            config,
            chain_id: chain_id.to_string(),
            chain: RwLock::new(chain),
            mempool: Mutex::new(BTreeMap::new()),
            peers: RwLock::new(peers),
            transport,
            mining: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Runs `f` under the chain read lock.
    pub fn read_chain<R>(&self, f: impl FnOnce(&Blockchain) -> R) -> R {
        f(&self.chain.read())
    }

    pub fn tip(&self) -> Sha256Hash {
        self.chain.read().tip()
    }

    pub fn height(&self) -> u64 {
        self.chain.read().height()
    }

    pub fn balance(&self, address: &str) -> Result<u128> {
        let pub_key_hash = pub_key_hash_from_address(address)?;
        Ok(self.chain.read().utxo().balance(&pub_key_hash))
    }

    /// The first known peer; the only one unmined transactions are sent to.
    pub fn designated_peer(&self) -> Option<String> {
        self.peers.read().first().cloned()
    }

    pub fn add_peer(&self, addr: &str) {
        let mut peers = self.peers.write();
        if !peers.iter().any(|p| p == addr) {
            peers.push(addr.to_string());
        }
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn mempool_contains(&self, txid: &Sha256Hash) -> bool {
        self.mempool.lock().contains_key(txid)
    }

    /// Rebuilds the UTXO set and returns how many transactions still have unspent outputs.
    pub fn reindex(&self) -> Result<usize> {
        let mut chain = self.chain.write();
        chain.reindex_utxo()?;
        Ok(chain.utxo().count_transactions())
    }

    /// Active chain from the tip back to genesis.
    pub fn blocks(&self) -> Result<Vec<Block>> {
        self.chain.read().iter().collect()
    }

    /// Mines a block paying the subsidy and fees to `reward_address` and
    /// appends it. The nonce search runs without holding the chain lock and
    /// gives up with `StaleParent` once the tip moves.
    pub fn mine_block(&self, transactions: Vec<Transaction>, reward_address: &str) -> Result<Block> {
        let template = self.block_template(transactions, reward_address)?;
        self.seal(template)
    }

    /// An unmined block on the current tip, checked against the UTXO set.
    fn block_template(&self, transactions: Vec<Transaction>, reward_address: &str) -> Result<Block> {
        let coinbase = Transaction::new_coinbase(reward_address, "")?;
        let chain = self.chain.read();
        let utxo = chain.utxo();
        let mut fees: u128 = 0;
        for tx in &transactions {
            let input_total: u128 = tx
                .inputs
                .iter()
                .filter_map(|input| utxo.find_output(&input.txid, input.vout))
                .map(|output| u128::from(output.value))
                .sum();
            fees += input_total.saturating_sub(tx.output_total());
        }
        let coinbase = if fees > 0 {
            let mut coinbase = coinbase;
            coinbase.outputs[0].value = coinbase.outputs[0]
                .value
                .saturating_add(u64::try_from(fees).unwrap_or(u64::MAX));
            coinbase.id = coinbase.hash();
            coinbase
        } else {
            coinbase
        };

        let mut block_txs = Vec::with_capacity(transactions.len() + 1);
        block_txs.push(coinbase);
        block_txs.extend(transactions);

        let template = Block::new(chain.tip(), chain.height() + 1, block_txs);
        validate_block_transactions(&template, |txid, vout| utxo.find_output(txid, vout))?;
        Ok(template)
    }

    /// Runs proof-of-work on `template` outside the chain lock and appends the
    /// result. Fails with `StaleParent` if the tip moves away from the template's parent.
    fn seal(&self, template: Block) -> Result<Block> {
        let parent = template.prev_block_hash;
        debug!(
            "Mining block at height {} on {} with {} transactions",
            template.height,
            hex::encode(parent),
            template.transactions.len()
        );
        let block = ProofOfWork::new(template)
            .run(|| self.chain.read().tip() != parent)
            .ok_or(ChainError::StaleParent)?;

        self.chain.write().append(block.clone())?;
        self.prune_mempool();
        info!("Mined block {} at height {}", block.hash_hex(), block.height);
        Ok(block)
    }

    /// Whether a miner node has enough pending transactions to mine.
    pub fn should_mine(&self) -> bool {
        self.config.mining.reward_address.is_some()
            && self.mempool_len() >= self.config.mining.mempool_threshold
    }

    /// Mines the mempool when [`Node::should_mine`] holds. Transactions that no
    /// longer verify or conflict with an earlier one are dropped first.
    /// Returns `None` when there was nothing to do or another mining run is
    /// already in progress.
    pub fn mine_pending(&self) -> Result<Option<Block>> {
        let Some(reward_address) = self.config.mining.reward_address.clone() else {
            return Ok(None);
        };
        let Some(_guard) = self.mining.try_lock() else {
            return Ok(None);
        };
        if !self.should_mine() {
            return Ok(None);
        }

        self.prune_mempool();
        let pending: Vec<Transaction> = self.mempool.lock().values().cloned().collect();
        if pending.is_empty() {
            return Ok(None);
        }
        self.mine_block(pending, &reward_address).map(Some)
    }

    /// Builds and signs a transfer. With `mine_now` the transaction is mined
    /// locally together with a coinbase paying the sender; otherwise it is
    /// forwarded to the designated peer and nothing changes locally.
    pub fn send(&self, wallet: &Wallet, to: &str, amount: u64, mine_now: bool) -> Result<SendOutcome> {
        let tx = {
            let chain = self.chain.read();
            Transaction::new_utxo(wallet, to, amount, chain.utxo())?
        };

        if mine_now {
            let block = self.mine_block(vec![tx], &wallet.address())?;
            return Ok(SendOutcome::Mined(block.hash));
        }

        let peer = self
            .designated_peer()
            .ok_or_else(|| ChainError::NetworkError("No known peer to forward to".to_string()))?;
        self.transport.send_transaction(&peer, &tx)?;
        info!("Forwarded transaction {} to {}", tx.id_hex(), peer);
        Ok(SendOutcome::Forwarded { peer, txid: tx.id })
    }

    /// Validates a block from the network and applies it under the write lock.
    pub fn on_receive_block(&self, block: Block) -> Result<BlockOutcome> {
        let outcome = self.chain.write().accept_block(block)?;
        if matches!(outcome, BlockOutcome::Appended | BlockOutcome::Reorganized) {
            self.prune_mempool();
        }
        Ok(outcome)
    }

    /// Validates a transaction from the network and queues it. Returns `false`
    /// when it was already queued.
    pub fn on_receive_transaction(&self, tx: Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Err(ChainError::InvalidTransaction(
                "coinbase transactions are only valid inside blocks".to_string(),
            ));
        }
        tx.validate_size()?;
        tx.validate_id()?;
        {
            let chain = self.chain.read();
            let utxo = chain.utxo();
            tx.verify(|txid, vout| utxo.find_output(txid, vout))?;
            let input_total: u128 = tx
                .inputs
                .iter()
                .filter_map(|input| utxo.find_output(&input.txid, input.vout))
                .map(|output| u128::from(output.value))
                .sum();
            if input_total < tx.output_total() {
                return Err(ChainError::InvalidTransaction(format!(
                    "Transaction {} spends more than its inputs",
                    tx.id_hex()
                )));
            }
        }

        let mut mempool = self.mempool.lock();
        if mempool.contains_key(&tx.id) {
            return Ok(false);
        }
        let claimed: HashSet<(Sha256Hash, u32)> = mempool
            .values()
            .flat_map(|pending| pending.inputs.iter().map(|input| (input.txid, input.vout)))
            .collect();
        if let Some(input) = tx.inputs.iter().find(|input| claimed.contains(&(input.txid, input.vout))) {
            return Err(ChainError::InvalidTransaction(format!(
                "Output {}:{} is already spent by a pending transaction",
                hex::encode(input.txid),
                input.vout
            )));
        }
        mempool.insert(tx.id, tx);
        Ok(true)
    }

    /// Drops pending transactions that no longer verify against the UTXO set,
    /// which covers everything a new block has already spent.
    fn prune_mempool(&self) {
        let chain = self.chain.read();
        let utxo = chain.utxo();
        let mut mempool = self.mempool.lock();
        mempool.retain(|id, tx| match tx.verify(|txid, vout| utxo.find_output(txid, vout)) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping pending transaction {}: {}", hex::encode(id), e);
                false
            }
        });
    }

    /// Checks an address supplied by an operator, e.g. a mining reward address.
    pub fn check_address(address: &str) -> Result<()> {
        if !validate_address(address) {
            warn!("Rejected address {}", address);
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        Ok(())
    }
}
