use crate::crypto::{PubKeyHash, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::persistence::{Store, WriteBatch};
use crate::transaction::{Transaction, TxOutput};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;

use super::chain::Block;

/// Key prefix of persisted UTXO entries; the rest of the key is the txid.
pub const UTXO_PREFIX: &[u8] = b"u:";

pub fn utxo_key(txid: &Sha256Hash) -> Vec<u8> {
    let mut key = UTXO_PREFIX.to_vec();
    key.extend_from_slice(txid);
    key
}

/// An output that is still spendable, remembered with its position in the
/// transaction that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

/// Index of unspent outputs grouped by the id of the creating transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<Sha256Hash, Vec<UnspentOutput>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every persisted entry.
    pub fn load(store: &dyn Store) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (key, value) in store.iterate(UTXO_PREFIX)? {
            let txid: Sha256Hash = key[UTXO_PREFIX.len()..].try_into().map_err(|_| {
                ChainError::Serialization(format!("Malformed UTXO key {}", hex::encode(&key)))
            })?;
            let outputs: Vec<UnspentOutput> = bincode::deserialize(&value)?;
            entries.insert(txid, outputs);
        }
        Ok(UtxoSet { entries })
    }

    /// Rebuilds the set from blocks yielded newest first.
    pub fn rebuild<I>(blocks: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Block>>,
    {
        let mut entries: BTreeMap<Sha256Hash, Vec<UnspentOutput>> = BTreeMap::new();
        let mut spent: HashMap<Sha256Hash, HashSet<u32>> = HashMap::new();

        for block in blocks {
            let block = block?;
            for tx in block.transactions.iter().rev() {
                let spent_here = spent.get(&tx.id);
                let unspent: Vec<UnspentOutput> = tx
                    .outputs
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| {
                        !spent_here.is_some_and(|indices| indices.contains(&(*index as u32)))
                    })
                    .map(|(index, output)| UnspentOutput {
                        index: index as u32,
                        output: output.clone(),
                    })
                    .collect();
                if !unspent.is_empty() {
                    entries.insert(tx.id, unspent);
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.entry(input.txid).or_default().insert(input.vout);
                    }
                }
            }
        }
        Ok(UtxoSet { entries })
    }

    /// Applies one appended block: spends referenced outputs, then records new
    /// ones. Every touched entry is staged into `batch`.
    pub fn update(&mut self, block: &Block, batch: &mut WriteBatch) -> Result<()> {
        let mut touched = BTreeSet::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    touched.insert(input.txid);
                    let Some(outputs) = self.entries.get_mut(&input.txid) else {
                        warn!(
                            "Block {} spends {}:{} which is not in the UTXO set",
                            hex::encode(block.hash),
                            hex::encode(input.txid),
                            input.vout
                        );
                        continue;
                    };
                    outputs.retain(|unspent| unspent.index != input.vout);
                    if outputs.is_empty() {
                        self.entries.remove(&input.txid);
                    }
                }
            }

            touched.insert(tx.id);
            self.insert_transaction(tx);
        }

        for txid in touched {
            match self.entries.get(&txid) {
                Some(outputs) => batch.put(utxo_key(&txid), bincode::serialize(outputs)?),
                None => batch.delete(utxo_key(&txid)),
            }
        }
        Ok(())
    }

    /// Records all outputs of `tx` as unspent. A transaction without outputs
    /// leaves no entry.
    pub fn insert_transaction(&mut self, tx: &Transaction) {
        let outputs: Vec<UnspentOutput> = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| UnspentOutput {
                index: index as u32,
                output: output.clone(),
            })
            .collect();
        if outputs.is_empty() {
            self.entries.remove(&tx.id);
        } else {
            self.entries.insert(tx.id, outputs);
        }
    }

    /// Stages a full replacement of the persisted set: stale keys are deleted,
    /// current entries written.
    pub fn stage_replace(&self, store: &dyn Store, batch: &mut WriteBatch) -> Result<()> {
        for (key, _) in store.iterate(UTXO_PREFIX)? {
            let stale = key[UTXO_PREFIX.len()..]
                .try_into()
                .map(|txid: Sha256Hash| !self.entries.contains_key(&txid))
                .unwrap_or(true);
            if stale {
                batch.delete(key);
            }
        }
        for (txid, outputs) in &self.entries {
            batch.put(utxo_key(txid), bincode::serialize(outputs)?);
        }
        Ok(())
    }

    /// Accumulates outputs locked to `pub_key_hash`, in enumeration order, until
    /// `amount` is reached. Returns the accumulated total and the chosen outputs.
    pub fn find_spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> (u128, Vec<(Sha256Hash, u32)>) {
        let target = u128::from(amount);
        let mut accumulated: u128 = 0;
        let mut chosen = Vec::new();

        'scan: for (txid, outputs) in &self.entries {
            for unspent in outputs {
                if accumulated >= target {
                    break 'scan;
                }
                if unspent.output.is_locked_with(pub_key_hash) {
                    accumulated += u128::from(unspent.output.value);
                    chosen.push((*txid, unspent.index));
                }
            }
        }
        (accumulated, chosen)
    }

    pub fn find_unspent(&self, pub_key_hash: &PubKeyHash) -> Vec<TxOutput> {
        self.entries
            .values()
            .flatten()
            .filter(|unspent| unspent.output.is_locked_with(pub_key_hash))
            .map(|unspent| unspent.output.clone())
            .collect()
    }

    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> u128 {
        self.find_unspent(pub_key_hash)
            .iter()
            .map(|output| u128::from(output.value))
            .sum()
    }

    pub fn find_output(&self, txid: &Sha256Hash, vout: u32) -> Option<TxOutput> {
        self.entries
            .get(txid)?
            .iter()
            .find(|unspent| unspent.index == vout)
            .map(|unspent| unspent.output.clone())
    }

    pub fn get(&self, txid: &Sha256Hash) -> Option<&[UnspentOutput]> {
        self.entries.get(txid).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Sha256Hash, &[UnspentOutput])> {
        self.entries
            .iter()
            .map(|(txid, outputs)| (txid, outputs.as_slice()))
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
