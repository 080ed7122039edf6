/// Transaction types for utxochain
use crate::blockchain::UtxoSet;
use crate::crypto::{PubKeyHash, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::wallet::{pub_key_hash_from_address, Wallet};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Value minted by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index carried by the sentinel input of a coinbase transaction.
pub const COINBASE_VOUT: u32 = u32::MAX;

/// Number of random bytes used as coinbase data when none is supplied.
const COINBASE_DATA_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub txid: Sha256Hash,
    pub vout: u32,
    pub signature: Vec<u8>,
    /// Raw public key of the spender; arbitrary data for a coinbase input.
    pub pub_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    /// Creates an output locked to the owner of `address`.
    pub fn new(value: u64, address: &str) -> Result<Self> {
        Ok(TxOutput {
            value,
            pub_key_hash: pub_key_hash_from_address(address)?,
        })
    }

    pub fn is_locked_with(&self, pub_key_hash: &PubKeyHash) -> bool {
        &self.pub_key_hash == pub_key_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Sha256Hash,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Mints [`SUBSIDY`] to `address`. Empty `data` is replaced with random bytes
    /// so two coinbases for the same address never share an id.
    pub fn new_coinbase(address: &str, data: &str) -> Result<Self> {
        let data = if data.is_empty() {
            let mut random = [0u8; COINBASE_DATA_LEN];
            rand::rngs::OsRng.fill_bytes(&mut random);
            hex::encode(random)
        } else {
            data.to_string()
        };

        let mut tx = Transaction {
            id: [0u8; 32],
            inputs: vec![TxInput {
                txid: [0u8; 32],
                vout: COINBASE_VOUT,
                signature: Vec::new(),
                pub_key: data.into_bytes(),
            }],
            outputs: vec![TxOutput::new(SUBSIDY, address)?],
        };
        tx.id = tx.hash();
        Ok(tx)
    }

    /// Builds and signs a transfer of `amount` from `wallet` to `to`, spending
    /// outputs in the cache's enumeration order and returning any surplus as change.
    pub fn new_utxo(wallet: &Wallet, to: &str, amount: u64, utxo: &UtxoSet) -> Result<Self> {
        let recipient = TxOutput::new(amount, to)?;
        if amount == 0 {
            return Err(ChainError::InvalidTransaction(
                "amount must be greater than zero".to_string(),
            ));
        }

        let sender_hash = wallet.pub_key_hash();
        let (accumulated, spendable) = utxo.find_spendable(&sender_hash, amount);
        if accumulated < u128::from(amount) {
            return Err(ChainError::InsufficientFunds {
                requested: amount,
                available: accumulated,
            });
        }

        let inputs = spendable
            .into_iter()
            .map(|(txid, vout)| TxInput {
                txid,
                vout,
                signature: Vec::new(),
                pub_key: wallet.public_key.clone(),
            })
            .collect();

        let mut outputs = vec![recipient];
        // The last selected output alone exceeds the shortfall, so change fits in u64.
        let change = (accumulated - u128::from(amount)) as u64;
        if change > 0 {
            outputs.push(TxOutput {
                value: change,
                pub_key_hash: sender_hash,
            });
        }

        let mut tx = Transaction {
            id: [0u8; 32],
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx.sign(wallet, |txid, vout| utxo.find_output(txid, vout))?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].txid == [0u8; 32]
            && self.inputs[0].vout == COINBASE_VOUT
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Content hash with every signature blanked; the id field itself is never hashed.
    pub fn hash(&self) -> Sha256Hash {
        let mut copy = self.clone();
        for input in &mut copy.inputs {
            input.signature.clear();
        }
        copy.digest()
    }

    /// Canonical length-prefixed encoding of inputs and outputs.
    fn digest(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update((self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.txid);
            hasher.update(input.vout.to_le_bytes());
            hasher.update((input.signature.len() as u64).to_le_bytes());
            hasher.update(&input.signature);
            hasher.update((input.pub_key.len() as u64).to_le_bytes());
            hasher.update(&input.pub_key);
        }
        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.value.to_le_bytes());
            hasher.update(output.pub_key_hash);
        }
        hasher.finalize().into()
    }

    /// Copy with every signature and public key blanked.
    pub(crate) fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    txid: input.txid,
                    vout: input.vout,
                    signature: Vec::new(),
                    pub_key: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Digest signed by input `index`: the trimmed copy with that input's
    /// signature slot holding the locking hash of the output it spends.
    pub(crate) fn signing_digest(
        trimmed: &Transaction,
        index: usize,
        locking_hash: &PubKeyHash,
    ) -> Sha256Hash {
        let mut view = trimmed.clone();
        view.inputs[index].signature = locking_hash.to_vec();
        view.digest()
    }

    /// Signs every input with `wallet`, resolving referenced outputs through `lookup`.
    pub fn sign<F>(&mut self, wallet: &Wallet, lookup: F) -> Result<()>
    where
        F: Fn(&Sha256Hash, u32) -> Option<TxOutput>,
    {
        if self.is_coinbase() {
            return Ok(());
        }

        let trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter_mut().enumerate() {
            let referenced =
                lookup(&input.txid, input.vout).ok_or_else(|| ChainError::MissingReferencedOutput {
                    txid: hex::encode(input.txid),
                    vout: input.vout,
                })?;
            let digest = Self::signing_digest(&trimmed, index, &referenced.pub_key_hash);
            input.signature = wallet.keypair.sign_digest(&digest).to_vec();
            input.pub_key = wallet.public_key.clone();
        }
        Ok(())
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<()> {
        let size = bincode::serialized_size(self)
            .map_err(|e| ChainError::InvalidTransaction(format!("Serialization failed: {}", e)))?;

        if size as usize > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }

    /// Sum of output values, widened so it cannot overflow.
    pub fn output_total(&self) -> u128 {
        self.outputs.iter().map(|o| u128::from(o.value)).sum()
    }
}
