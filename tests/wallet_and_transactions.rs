//! Integration tests for wallet files, chain creation and local sends

use std::sync::Arc;
use tempfile::TempDir;
use utxochain::cli;
use utxochain::config::Config;
use utxochain::error::ChainError;
use utxochain::network::{TcpTransport, Transport};
use utxochain::node::SendOutcome;
use utxochain::transaction::SUBSIDY;
use utxochain::wallet::{validate_address, Wallets};

const CHAIN_ID: &str = "3000";

/// Helper to build a config rooted in a fresh temp directory
fn test_config() -> Result<(TempDir, Config), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let mut config = Config::default();
    config.node.data_dir = temp_dir.path().join("data").to_string_lossy().into_owned();
    Ok((temp_dir, config))
}

fn transport() -> Arc<dyn Transport> {
    Arc::new(TcpTransport::new())
}

#[test]
fn test_wallet_file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;

    let alice = cli::create_wallet(&config, CHAIN_ID)?;
    let bob = cli::create_wallet(&config, CHAIN_ID)?;
    assert!(validate_address(&alice));
    assert_ne!(alice, bob);

    let mut listed = cli::list_addresses(&config, CHAIN_ID)?;
    listed.sort();
    let mut expected = vec![alice.clone(), bob];
    expected.sort();
    assert_eq!(listed, expected);

    // Reloading reproduces the same key material.
    let first = Wallets::load(&config.wallet_path(CHAIN_ID))?;
    let second = Wallets::load(&config.wallet_path(CHAIN_ID))?;
    assert_eq!(first.get_wallet(&alice)?, second.get_wallet(&alice)?);
    assert_eq!(first.get_wallet(&alice)?.address(), alice);

    Ok(())
}

#[test]
fn test_wallets_are_per_chain() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;
    cli::create_wallet(&config, "3000")?;
    assert!(cli::list_addresses(&config, "3001")?.is_empty());
    Ok(())
}

#[test]
fn test_create_blockchain_with_invalid_address_creates_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;

    let result = cli::create_blockchain(&config, CHAIN_ID, "not-an-address");
    assert!(matches!(result, Err(ChainError::InvalidAddress(_))));
    assert!(!config.db_path(CHAIN_ID).exists());
    assert!(matches!(
        cli::print_chain(&config, CHAIN_ID),
        Err(ChainError::ChainNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_create_blockchain_pays_genesis_subsidy() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;
    let alice = cli::create_wallet(&config, CHAIN_ID)?;

    let genesis = cli::create_blockchain(&config, CHAIN_ID, &alice)?;

    let blocks = cli::print_chain(&config, CHAIN_ID)?;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].hash, genesis);
    assert_eq!(blocks[0].height, 0);

    let node = cli::open_node(&config, CHAIN_ID, transport())?;
    assert_eq!(node.read_chain(|chain| chain.utxo().count_transactions()), 1);
    assert_eq!(node.balance(&alice)?, u128::from(SUBSIDY));

    assert!(matches!(
        cli::create_blockchain(&config, CHAIN_ID, &alice),
        Err(ChainError::ChainAlreadyExists(_))
    ));

    Ok(())
}

#[test]
fn test_send_full_output_and_mine() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;
    let alice = cli::create_wallet(&config, CHAIN_ID)?;
    let bob = cli::create_wallet(&config, CHAIN_ID)?;
    cli::create_blockchain(&config, CHAIN_ID, &alice)?;

    let genesis_coinbase = cli::print_chain(&config, CHAIN_ID)?[0].transactions[0].id;

    let outcome = cli::send_with(&config, CHAIN_ID, &alice, &bob, 10, true, transport())?;
    let SendOutcome::Mined(tip) = outcome else {
        panic!("expected a mined block, got {:?}", outcome);
    };

    let blocks = cli::print_chain(&config, CHAIN_ID)?;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].hash, tip);
    assert_eq!(blocks[0].transactions.len(), 2);
    assert!(blocks[0].transactions[0].is_coinbase());

    let transfer = &blocks[0].transactions[1];
    assert_eq!(transfer.outputs.len(), 1, "an exact spend has no change output");
    assert_eq!(transfer.outputs[0].value, 10);

    // Balances come from a freshly opened store, so the persisted UTXO set is exercised.
    assert_eq!(cli::get_balance(&config, CHAIN_ID, &bob)?, 10);
    assert_eq!(cli::get_balance(&config, CHAIN_ID, &alice)?, u128::from(SUBSIDY));

    let node = cli::open_node(&config, CHAIN_ID, transport())?;
    assert!(node.read_chain(|chain| chain.utxo().get(&genesis_coinbase).is_none()));

    Ok(())
}

#[test]
fn test_send_rejects_bad_requests() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;
    let alice = cli::create_wallet(&config, CHAIN_ID)?;
    cli::create_blockchain(&config, CHAIN_ID, &alice)?;
    let stranger = utxochain::wallet::Wallet::new()?.address();

    assert!(matches!(
        cli::send_with(&config, CHAIN_ID, "bogus", &alice, 1, true, transport()),
        Err(ChainError::InvalidAddress(_))
    ));
    assert!(matches!(
        cli::send_with(&config, CHAIN_ID, &alice, "bogus", 1, true, transport()),
        Err(ChainError::InvalidAddress(_))
    ));
    assert!(matches!(
        cli::send_with(&config, CHAIN_ID, &alice, &alice, 1, true, transport()),
        Err(ChainError::SameAddress)
    ));
    assert!(matches!(
        cli::send_with(&config, CHAIN_ID, &stranger, &alice, 1, true, transport()),
        Err(ChainError::WalletNotFound(_))
    ));
    assert!(matches!(
        cli::send_with(&config, CHAIN_ID, &alice, &stranger, 11, true, transport()),
        Err(ChainError::InsufficientFunds { requested: 11, available: 10 })
    ));
    assert!(matches!(
        cli::send_with(&config, "4000", &alice, &stranger, 1, true, transport()),
        Err(ChainError::ChainNotFound(_))
    ));

    assert_eq!(cli::print_chain(&config, CHAIN_ID)?.len(), 1);
    Ok(())
}

#[test]
fn test_reindex_matches_persisted_set() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, config) = test_config()?;
    let alice = cli::create_wallet(&config, CHAIN_ID)?;
    let bob = cli::create_wallet(&config, CHAIN_ID)?;
    cli::create_blockchain(&config, CHAIN_ID, &alice)?;
    cli::send_with(&config, CHAIN_ID, &alice, &bob, 4, true, transport())?;

    let before = cli::open_node(&config, CHAIN_ID, transport())?.read_chain(|c| c.utxo().clone());
    let count = cli::reindex_utxo(&config, CHAIN_ID)?;
    let after = cli::open_node(&config, CHAIN_ID, transport())?.read_chain(|c| c.utxo().clone());

    assert_eq!(before, after);
    assert_eq!(count, after.count_transactions());
    assert_eq!(cli::get_balance(&config, CHAIN_ID, &alice)?, 16);
    assert_eq!(cli::get_balance(&config, CHAIN_ID, &bob)?, 4);
    Ok(())
}
