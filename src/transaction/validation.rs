/// Validation logic for transactions separated from type definitions
use crate::crypto::{self, hash_pub_key, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::transaction::types::{Transaction, TxOutput};

impl Transaction {
    /// Verifies every input's authorization against the outputs it references.
    /// Coinbase transactions carry no authorization and always pass.
    pub fn verify<F>(&self, lookup: F) -> Result<()>
    where
        F: Fn(&Sha256Hash, u32) -> Option<TxOutput>,
    {
        if self.is_coinbase() {
            return Ok(());
        }

        let trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let referenced =
                lookup(&input.txid, input.vout).ok_or_else(|| ChainError::MissingReferencedOutput {
                    txid: hex::encode(input.txid),
                    vout: input.vout,
                })?;

            if hash_pub_key(&input.pub_key) != referenced.pub_key_hash {
                return Err(ChainError::InvalidSignature(format!(
                    "input {} of {} is not signed by the output owner",
                    index,
                    self.id_hex()
                )));
            }

            let digest = Self::signing_digest(&trimmed, index, &referenced.pub_key_hash);
            crypto::verify_digest(&input.pub_key, &digest, &input.signature).map_err(|e| {
                ChainError::InvalidSignature(format!("input {} of {}: {}", index, self.id_hex(), e))
            })?;
        }
        Ok(())
    }

    /// Checks that the stored id matches the content hash.
    pub fn validate_id(&self) -> Result<()> {
        if self.hash() != self.id {
            return Err(ChainError::InvalidTransaction(format!(
                "id {} does not match transaction content",
                self.id_hex()
            )));
        }
        Ok(())
    }
}
