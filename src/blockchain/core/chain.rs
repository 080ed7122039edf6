use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use crate::persistence::{Store, WriteBatch};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use super::state::UtxoSet;
use super::validation::validate_block_transactions;

/// Fixed proof-of-work difficulty: a block hash must be below 2^(256 - TARGET_BITS).
pub const TARGET_BITS: u32 = 16;

/// How many nonces are tried between two cancellation checks.
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

pub const TIP_KEY: &[u8] = b"l";
pub const BLOCK_PREFIX: &[u8] = b"b:";

pub fn block_key(hash: &Sha256Hash) -> Vec<u8> {
    let mut key = BLOCK_PREFIX.to_vec();
    key.extend_from_slice(hash);
    key
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub timestamp: i64,
    pub prev_block_hash: Sha256Hash,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash: Sha256Hash,
}

impl Block {
    /// An unmined block; `nonce` and `hash` are filled in by [`ProofOfWork::run`].
    pub fn new(prev_block_hash: Sha256Hash, height: u64, transactions: Vec<Transaction>) -> Self {
        Block {
            height,
            timestamp: chrono::Utc::now().timestamp_millis(),
            prev_block_hash,
            transactions,
            nonce: 0,
            hash: [0u8; 32],
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash == [0u8; 32]
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn transactions_digest(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        for tx in &self.transactions {
            hasher.update(tx.id);
        }
        hasher.finalize().into()
    }

    pub fn header_hash(&self, transactions_digest: &Sha256Hash, nonce: u64) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_block_hash);
        hasher.update(transactions_digest);
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().into()
    }

    pub fn compute_hash(&self) -> Sha256Hash {
        self.header_hash(&self.transactions_digest(), self.nonce)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Big-endian target 2^(256 - bits).
pub const fn hash_to_target(bits: u32) -> Sha256Hash {
    let shift = 256 - bits;
    let mut target = [0u8; 32];
    target[31 - (shift / 8) as usize] = 1 << (shift % 8);
    target
}

/// Big-endian comparison; byte arrays order the same way as the integers they encode.
pub fn meets_target(hash: &Sha256Hash) -> bool {
    *hash < hash_to_target(TARGET_BITS)
}

pub struct ProofOfWork {
    block: Block,
    target: Sha256Hash,
}

impl ProofOfWork {
    pub fn new(block: Block) -> Self {
        ProofOfWork {
            block,
            target: hash_to_target(TARGET_BITS),
        }
    }

    /// Searches nonces upward from zero. Returns `None` once `cancelled` reports
    /// true; it is polled every [`CANCEL_CHECK_INTERVAL`] nonces.
    pub fn run<F>(mut self, cancelled: F) -> Option<Block>
    where
        F: Fn() -> bool,
    {
        let digest = self.block.transactions_digest();
        let mut nonce: u64 = 0;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                debug!("Mining on {} cancelled at nonce {}", hex::encode(self.block.prev_block_hash), nonce);
                return None;
            }
            let hash = self.block.header_hash(&digest, nonce);
            if hash < self.target {
                self.block.nonce = nonce;
                self.block.hash = hash;
                return Some(self.block);
            }
            nonce = nonce.checked_add(1)?;
        }
    }

    pub fn validate(block: &Block) -> bool {
        block.compute_hash() == block.hash && meets_target(&block.hash)
    }
}

/// Outcome of feeding a block from the network into the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Extended the active chain.
    Appended,
    /// Already stored.
    Duplicate,
    /// Stored on a branch that is not longer than the active chain.
    SideChain,
    /// Its branch became the longest; the tip moved and the UTXO set was rebuilt.
    Reorganized,
}

/// The persisted chain plus its UTXO set. Callers serialize mutation through a
/// single lock; every mutation writes one store batch before touching memory.
pub struct Blockchain {
    store: Arc<dyn Store>,
    tip: Sha256Hash,
    height: u64,
    utxo: UtxoSet,
}

impl Blockchain {
    /// Creates a chain whose genesis block pays the subsidy to `address`.
    pub fn create(store: Arc<dyn Store>, address: &str, chain_id: &str) -> Result<Self> {
        if store.get(TIP_KEY)?.is_some() {
            return Err(ChainError::ChainAlreadyExists(chain_id.to_string()));
        }

        let coinbase = Transaction::new_coinbase(address, GENESIS_COINBASE_DATA)?;
        let genesis = ProofOfWork::new(Block::new([0u8; 32], 0, vec![coinbase]))
            .run(|| false)
            .ok_or_else(|| ChainError::InvalidBlock("nonce space exhausted".to_string()))?;

        let mut batch = WriteBatch::new();
        batch.put(block_key(&genesis.hash), genesis.serialize()?);
        batch.put(TIP_KEY.to_vec(), genesis.hash.to_vec());
        store.write(batch)?;
        info!("Created chain {} with genesis {}", chain_id, genesis.hash_hex());

        let mut chain = Blockchain {
            store,
            tip: genesis.hash,
            height: 0,
            utxo: UtxoSet::new(),
        };
        chain.reindex_utxo()?;
        Ok(chain)
    }

    /// Opens an existing chain, loading the tip and the persisted UTXO set.
    pub fn open(store: Arc<dyn Store>, chain_id: &str) -> Result<Self> {
        let tip_bytes = store
            .get(TIP_KEY)?
            .ok_or_else(|| ChainError::ChainNotFound(chain_id.to_string()))?;
        let tip: Sha256Hash = tip_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::Serialization("Malformed tip pointer".to_string()))?;

        let tip_block = load_block(store.as_ref(), &tip)?
            .ok_or_else(|| ChainError::Serialization(format!("Tip block {} missing", hex::encode(tip))))?;
        let utxo = UtxoSet::load(store.as_ref())?;

        Ok(Blockchain {
            store,
            tip,
            height: tip_block.height,
            utxo,
        })
    }

    pub fn tip(&self) -> Sha256Hash {
        self.tip
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn get_block(&self, hash: &Sha256Hash) -> Result<Option<Block>> {
        load_block(self.store.as_ref(), hash)
    }

    /// Iterates the active chain from the tip back to genesis.
    pub fn iter(&self) -> BlockIter<'_> {
        self.iter_from(self.tip)
    }

    pub fn iter_from(&self, hash: Sha256Hash) -> BlockIter<'_> {
        BlockIter {
            store: self.store.as_ref(),
            next: Some(hash),
        }
    }

    /// Extends the active chain. The block, the tip pointer and the UTXO
    /// changes are written in one batch; memory is only updated afterwards.
    pub fn append(&mut self, block: Block) -> Result<()> {
        if block.prev_block_hash != self.tip {
            return Err(ChainError::StaleParent);
        }
        if block.height != self.height + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block height. Expected {}, but got {}.",
                self.height + 1,
                block.height
            )));
        }

        let mut next_utxo = self.utxo.clone();
        let mut batch = WriteBatch::new();
        next_utxo.update(&block, &mut batch)?;
        batch.put(block_key(&block.hash), block.serialize()?);
        batch.put(TIP_KEY.to_vec(), block.hash.to_vec());
        self.store.write(batch)?;

        info!(
            "Appended block {} at height {} ({} txs)",
            block.hash_hex(),
            block.height,
            block.transactions.len()
        );
        self.tip = block.hash;
        self.height = block.height;
        self.utxo = next_utxo;
        Ok(())
    }

    /// Rebuilds the UTXO set from the active chain and replaces the persisted copy.
    pub fn reindex_utxo(&mut self) -> Result<()> {
        let rebuilt = UtxoSet::rebuild(self.iter())?;
        let mut batch = WriteBatch::new();
        rebuilt.stage_replace(self.store.as_ref(), &mut batch)?;
        self.store.write(batch)?;

        debug!(
            "Reindexed UTXO set: {} transactions with unspent outputs",
            rebuilt.count_transactions()
        );
        self.utxo = rebuilt;
        Ok(())
    }

    /// Validates and stores a block received from elsewhere. Blocks on the tip
    /// are checked against the UTXO set; blocks on other branches against the
    /// UTXO set rebuilt along their own branch. The longer branch wins, ties keep the
    /// current tip.
    pub fn accept_block(&mut self, block: Block) -> Result<BlockOutcome> {
        if !ProofOfWork::validate(&block) {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} fails proof-of-work",
                block.hash_hex()
            )));
        }
        if self.get_block(&block.hash)?.is_some() {
            return Ok(BlockOutcome::Duplicate);
        }

        if block.prev_block_hash == self.tip {
            validate_block_transactions(&block, |txid, vout| self.utxo.find_output(txid, vout))?;
            self.append(block)?;
            return Ok(BlockOutcome::Appended);
        }

        let parent = self
            .get_block(&block.prev_block_hash)?
            .ok_or_else(|| ChainError::OrphanBlock(hex::encode(block.prev_block_hash)))?;
        if block.height != parent.height + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block height. Expected {}, but got {}.",
                parent.height + 1,
                block.height
            )));
        }

        // Outputs already spent earlier on the branch must not resolve.
        let branch_utxo = UtxoSet::rebuild(self.iter_from(parent.hash))?;
        validate_block_transactions(&block, |txid, vout| branch_utxo.find_output(txid, vout))?;

        if block.height > self.height {
            let mut next_utxo = branch_utxo;
            next_utxo.update(&block, &mut WriteBatch::new())?;

            let mut batch = WriteBatch::new();
            batch.put(block_key(&block.hash), block.serialize()?);
            batch.put(TIP_KEY.to_vec(), block.hash.to_vec());
            next_utxo.stage_replace(self.store.as_ref(), &mut batch)?;
            self.store.write(batch)?;

            info!(
                "Reorganized to block {} at height {} (previous tip height {})",
                block.hash_hex(),
                block.height,
                self.height
            );
            self.tip = block.hash;
            self.height = block.height;
            self.utxo = next_utxo;
            Ok(BlockOutcome::Reorganized)
        } else {
            self.store.put(&block_key(&block.hash), &block.serialize()?)?;
            debug!("Stored side-chain block {} at height {}", block.hash_hex(), block.height);
            Ok(BlockOutcome::SideChain)
        }
    }
}

fn load_block(store: &dyn Store, hash: &Sha256Hash) -> Result<Option<Block>> {
    store
        .get(&block_key(hash))?
        .map(|bytes| Block::deserialize(&bytes))
        .transpose()
}

/// Walks `prev_block_hash` links until the genesis block has been yielded.
pub struct BlockIter<'a> {
    store: &'a dyn Store,
    next: Option<Sha256Hash>,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match load_block(self.store, &hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.next = Some(block.prev_block_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(ChainError::Serialization(format!(
                "Block {} referenced but not stored",
                hex::encode(hash)
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
