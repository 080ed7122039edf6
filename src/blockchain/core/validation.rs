use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use crate::transaction::{Transaction, TxOutput, SUBSIDY};
use std::collections::HashMap;

use super::chain::Block;

pub fn validate_no_double_spend(block: &Block) -> Result<()> {
    let mut seen_inputs: HashMap<(Sha256Hash, u32), Sha256Hash> = HashMap::new();
    for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
        for input in &tx.inputs {
            if let Some(conflicting_tx_hash) = seen_inputs.get(&(input.txid, input.vout)) {
                return Err(ChainError::InvalidTransaction(format!(
                    "Double spend detected in block. UTXO {}:{} is spent by both {} and {}",
                    hex::encode(input.txid),
                    input.vout,
                    hex::encode(conflicting_tx_hash),
                    tx.id_hex()
                )));
            }
            seen_inputs.insert((input.txid, input.vout), tx.id);
        }
    }
    Ok(())
}

/// Checks the transactions of `block`. Referenced outputs are resolved first
/// against earlier transactions of the same block, then through `lookup`.
pub fn validate_block_transactions<F>(block: &Block, lookup: F) -> Result<()>
where
    F: Fn(&Sha256Hash, u32) -> Option<TxOutput>,
{
    let (coinbase, rest) = block.transactions.split_first().ok_or_else(|| {
        ChainError::InvalidBlock(format!("Block {} has no transactions", block.hash_hex()))
    })?;
    if !coinbase.is_coinbase() {
        return Err(ChainError::InvalidBlock(format!(
            "First transaction of block {} is not a coinbase",
            block.hash_hex()
        )));
    }
    if rest.iter().any(Transaction::is_coinbase) {
        return Err(ChainError::InvalidBlock(format!(
            "Block {} contains more than one coinbase",
            block.hash_hex()
        )));
    }

    validate_no_double_spend(block)?;

    let mut created: HashMap<Sha256Hash, &Transaction> = HashMap::new();
    created.insert(coinbase.id, coinbase);
    let mut fees: u128 = 0;

    for tx in rest {
        tx.validate_size()?;
        tx.validate_id()?;

        let resolve = |txid: &Sha256Hash, vout: u32| -> Option<TxOutput> {
            match created.get(txid) {
                Some(earlier) => earlier.outputs.get(vout as usize).cloned(),
                None => lookup(txid, vout),
            }
        };
        tx.verify(&resolve)?;

        let input_total: u128 = tx
            .inputs
            .iter()
            .filter_map(|input| resolve(&input.txid, input.vout))
            .map(|output| u128::from(output.value))
            .sum();
        let output_total = tx.output_total();
        if input_total < output_total {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} spends {} but only has {} in inputs",
                tx.id_hex(),
                output_total,
                input_total
            )));
        }
        fees += input_total - output_total;
        created.insert(tx.id, tx);
    }

    coinbase.validate_size()?;
    coinbase.validate_id()?;
    let allowed = u128::from(SUBSIDY) + fees;
    if coinbase.output_total() > allowed {
        return Err(ChainError::InvalidBlock(format!(
            "Coinbase of block {} pays {} but at most {} is allowed",
            block.hash_hex(),
            coinbase.output_total(),
            allowed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::UtxoSet;
    use crate::wallet::Wallet;

    fn funded(owner: &Wallet) -> (UtxoSet, Transaction) {
        let funding = Transaction::new_coinbase(&owner.address(), "").unwrap();
        let mut utxo = UtxoSet::new();
        utxo.insert_transaction(&funding);
        (utxo, funding)
    }

    #[test]
    fn test_valid_block_passes() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (utxo, _) = funded(&alice);

        let pay = Transaction::new_utxo(&alice, &bob.address(), 4, &utxo).unwrap();
        let coinbase = Transaction::new_coinbase(&bob.address(), "").unwrap();
        let block = Block::new([1u8; 32], 1, vec![coinbase, pay]);

        assert!(validate_block_transactions(&block, |id, vout| utxo.find_output(id, vout)).is_ok());
    }

    #[test]
    fn test_missing_coinbase_is_rejected() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (utxo, _) = funded(&alice);

        let pay = Transaction::new_utxo(&alice, &bob.address(), 4, &utxo).unwrap();
        let block = Block::new([1u8; 32], 1, vec![pay]);
        assert!(matches!(
            validate_block_transactions(&block, |id, vout| utxo.find_output(id, vout)),
            Err(ChainError::InvalidBlock(_))
        ));

        let empty = Block::new([1u8; 32], 1, vec![]);
        assert!(validate_block_transactions(&empty, |_, _| None).is_err());
    }

    #[test]
    fn test_second_coinbase_is_rejected() {
        let alice = Wallet::new().unwrap();
        let a = Transaction::new_coinbase(&alice.address(), "").unwrap();
        let b = Transaction::new_coinbase(&alice.address(), "").unwrap();
        let block = Block::new([1u8; 32], 1, vec![a, b]);
        assert!(matches!(
            validate_block_transactions(&block, |_, _| None),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_double_spend_within_block() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let carol = Wallet::new().unwrap();
        let (utxo, _) = funded(&alice);

        let to_bob = Transaction::new_utxo(&alice, &bob.address(), 4, &utxo).unwrap();
        let to_carol = Transaction::new_utxo(&alice, &carol.address(), 4, &utxo).unwrap();
        let coinbase = Transaction::new_coinbase(&alice.address(), "").unwrap();
        let block = Block::new([1u8; 32], 1, vec![coinbase, to_bob, to_carol]);

        let err = validate_no_double_spend(&block).unwrap_err();
        assert!(err.to_string().contains("Double spend"));
        assert!(validate_block_transactions(&block, |id, vout| utxo.find_output(id, vout)).is_err());
    }

    #[test]
    fn test_coinbase_may_claim_fees_only() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (utxo, _) = funded(&alice);

        // Alice pays 4 and gets 5 back, leaving a fee of 1.
        let mut pay = Transaction::new_utxo(&alice, &bob.address(), 4, &utxo).unwrap();
        pay.outputs[1].value = 5;
        pay.id = pay.hash();
        pay.sign(&alice, |id, vout| utxo.find_output(id, vout)).unwrap();

        let mut coinbase = Transaction::new_coinbase(&bob.address(), "").unwrap();
        coinbase.outputs[0].value = SUBSIDY + 1;
        coinbase.id = coinbase.hash();
        let block = Block::new([1u8; 32], 1, vec![coinbase.clone(), pay.clone()]);
        assert!(validate_block_transactions(&block, |id, vout| utxo.find_output(id, vout)).is_ok());

        coinbase.outputs[0].value = SUBSIDY + 2;
        coinbase.id = coinbase.hash();
        let greedy = Block::new([1u8; 32], 1, vec![coinbase, pay]);
        assert!(matches!(
            validate_block_transactions(&greedy, |id, vout| utxo.find_output(id, vout)),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_outputs_exceeding_inputs_are_rejected() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (utxo, _) = funded(&alice);

        let mut pay = Transaction::new_utxo(&alice, &bob.address(), 4, &utxo).unwrap();
        pay.outputs[0].value = 40;
        pay.id = pay.hash();
        pay.sign(&alice, |id, vout| utxo.find_output(id, vout)).unwrap();

        let coinbase = Transaction::new_coinbase(&bob.address(), "").unwrap();
        let block = Block::new([1u8; 32], 1, vec![coinbase, pay]);
        assert!(matches!(
            validate_block_transactions(&block, |id, vout| utxo.find_output(id, vout)),
            Err(ChainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_spending_an_output_created_earlier_in_the_block() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (utxo, _) = funded(&alice);

        let pay = Transaction::new_utxo(&alice, &bob.address(), 4, &utxo).unwrap();
        let mut staged = utxo.clone();
        staged.insert_transaction(&pay);
        let onward = Transaction::new_utxo(&bob, &alice.address(), 4, &staged).unwrap();

        let coinbase = Transaction::new_coinbase(&bob.address(), "").unwrap();
        let block = Block::new([1u8; 32], 1, vec![coinbase, pay, onward]);
        assert!(validate_block_transactions(&block, |id, vout| utxo.find_output(id, vout)).is_ok());
    }
}
