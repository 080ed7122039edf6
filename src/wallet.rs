//! Wallets, Base58Check addresses and key-material persistence.

use crate::crypto::{self, hash_pub_key, KeyPair, PubKeyHash};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Version byte prepended to the public-key hash.
pub const ADDRESS_VERSION: u8 = 0x00;
pub const ADDRESS_CHECKSUM_LEN: usize = 4;
/// Decoded address length: version + 20-byte hash + checksum.
pub const ADDRESS_PAYLOAD_LEN: usize = 1 + 20 + ADDRESS_CHECKSUM_LEN;

/// Current layout of [`KeyRecord`].
pub const KEY_RECORD_VERSION: u8 = 1;

/// Curves the key record can name. The token is persisted, so it must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Secp256k1,
}

impl Curve {
    const TABLE: [(&'static str, Curve); 1] = [("secp256k1", Curve::Secp256k1)];

    pub fn token(self) -> &'static str {
        match self {
            Curve::Secp256k1 => "secp256k1",
        }
    }

    pub fn from_token(token: &str) -> Result<Self> {
        Self::TABLE
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, curve)| *curve)
            .ok_or_else(|| ChainError::UnsupportedCurve(token.to_string()))
    }
}

/// On-disk form of a wallet's key material, fields in fixed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub version: u8,
    pub curve: String,
    pub private_scalar: Vec<u8>,
    pub public_x: Vec<u8>,
    pub public_y: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// First four bytes of SHA-256(SHA-256(payload)).
pub fn checksum(payload: &[u8]) -> [u8; ADDRESS_CHECKSUM_LEN] {
    let second = crypto::sha256(&crypto::sha256(payload));
    let mut out = [0u8; ADDRESS_CHECKSUM_LEN];
    out.copy_from_slice(&second[..ADDRESS_CHECKSUM_LEN]);
    out
}

/// Base58Check address of a raw public key.
pub fn address_from_pub_key(public_key: &[u8]) -> String {
    address_from_pub_key_hash(&hash_pub_key(public_key))
}

pub fn address_from_pub_key_hash(pub_key_hash: &PubKeyHash) -> String {
    let mut payload = Vec::with_capacity(ADDRESS_PAYLOAD_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pub_key_hash);
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);
    bs58::encode(payload).into_string()
}

/// True only when the address decodes to the expected length and its checksum matches.
pub fn validate_address(address: &str) -> bool {
    let payload = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if payload.len() != ADDRESS_PAYLOAD_LEN {
        return false;
    }
    let (versioned, actual) = payload.split_at(ADDRESS_PAYLOAD_LEN - ADDRESS_CHECKSUM_LEN);
    checksum(versioned) == actual
}

/// Extracts the public-key hash from a validated address.
pub fn pub_key_hash_from_address(address: &str) -> Result<PubKeyHash> {
    if !validate_address(address) {
        return Err(ChainError::InvalidAddress(address.to_string()));
    }
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|e| ChainError::InvalidAddress(format!("{}: {}", address, e)))?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..ADDRESS_PAYLOAD_LEN - ADDRESS_CHECKSUM_LEN]);
    Ok(hash)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub keypair: KeyPair,
    pub public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Self> {
        Ok(Self::from_keypair(KeyPair::generate()?))
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        let public_key = keypair.raw_public_key();
        Wallet {
            keypair,
            public_key,
        }
    }

    pub fn address(&self) -> String {
        address_from_pub_key(&self.public_key)
    }

    pub fn pub_key_hash(&self) -> PubKeyHash {
        hash_pub_key(&self.public_key)
    }

    pub fn to_record(&self) -> KeyRecord {
        let (x, y) = self.keypair.coordinates();
        KeyRecord {
            version: KEY_RECORD_VERSION,
            curve: Curve::Secp256k1.token().to_string(),
            private_scalar: self.keypair.secret_bytes().to_vec(),
            public_x: x.to_vec(),
            public_y: y.to_vec(),
            public_key: self.public_key.clone(),
        }
    }

    pub fn from_record(record: &KeyRecord) -> Result<Self> {
        if record.version != KEY_RECORD_VERSION {
            return Err(ChainError::Serialization(format!(
                "Unknown key record version {}",
                record.version
            )));
        }
        match Curve::from_token(&record.curve)? {
            Curve::Secp256k1 => {}
        }

        let keypair =
            KeyPair::from_parts(&record.private_scalar, &record.public_x, &record.public_y)?;
        if keypair.raw_public_key() != record.public_key {
            return Err(ChainError::Serialization(
                "Raw public key does not match its coordinates".to_string(),
            ));
        }
        Ok(Wallet {
            keypair,
            public_key: record.public_key.clone(),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.to_record())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record: KeyRecord = bincode::deserialize(bytes)?;
        Self::from_record(&record)
    }
}

/// All wallets of one chain, keyed by address.
#[derive(Debug, Default)]
pub struct Wallets {
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    /// Loads the wallet file, returning an empty collection if it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No wallet file at {:?}, starting empty", path);
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        let encoded: BTreeMap<String, Vec<u8>> = bincode::deserialize(&bytes)?;
        let mut wallets = BTreeMap::new();
        for (address, record) in encoded {
            wallets.insert(address, Wallet::decode(&record)?);
        }
        Ok(Wallets { wallets })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut encoded = BTreeMap::new();
        for (address, wallet) in &self.wallets {
            encoded.insert(address.clone(), wallet.encode()?);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, bincode::serialize(&encoded)?)?;
        Ok(())
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.address();
        info!("Created wallet {}", address);
        self.wallets.insert(address.clone(), wallet);
        Ok(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Result<&Wallet> {
        self.wallets
            .get(address)
            .ok_or_else(|| ChainError::WalletNotFound(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_validates() {
        for _ in 0..8 {
            let wallet = Wallet::new().unwrap();
            assert!(validate_address(&wallet.address()));
        }
    }

    #[test]
    fn test_address_is_deterministic() {
        let wallet = Wallet::new().unwrap();
        assert_eq!(wallet.address(), address_from_pub_key(&wallet.public_key));
        assert_eq!(wallet.address(), wallet.address());
    }

    #[test]
    fn test_address_starts_with_one() {
        // Version byte 0x00 encodes as a leading '1' in Base58.
        let wallet = Wallet::new().unwrap();
        assert!(wallet.address().starts_with('1'));
    }

    #[test]
    fn test_flipping_any_payload_byte_invalidates() {
        let wallet = Wallet::new().unwrap();
        let payload = bs58::decode(wallet.address()).into_vec().unwrap();

        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            let address = bs58::encode(&tampered).into_string();
            assert!(!validate_address(&address), "byte {} flip accepted", i);
        }
    }

    #[test]
    fn test_malformed_addresses_are_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address("1"));
        assert!(!validate_address("not an address"));

        let wallet = Wallet::new().unwrap();
        let mut payload = bs58::decode(wallet.address()).into_vec().unwrap();
        payload.push(0);
        assert!(!validate_address(&bs58::encode(payload).into_string()));
    }

    #[test]
    fn test_pub_key_hash_from_address() {
        let wallet = Wallet::new().unwrap();
        assert_eq!(
            pub_key_hash_from_address(&wallet.address()).unwrap(),
            wallet.pub_key_hash()
        );
        assert!(matches!(
            pub_key_hash_from_address("bogus"),
            Err(ChainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_key_record_round_trip_is_byte_identical() {
        let wallet = Wallet::new().unwrap();
        let bytes = wallet.encode().unwrap();
        let decoded = Wallet::decode(&bytes).unwrap();

        assert_eq!(decoded, wallet);
        assert_eq!(decoded.keypair.secret_bytes(), wallet.keypair.secret_bytes());
        assert_eq!(decoded.keypair.coordinates(), wallet.keypair.coordinates());
        assert_eq!(decoded.address(), wallet.address());
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_curve_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut record = wallet.to_record();
        record.curve = "P256".to_string();

        assert_eq!(
            Wallet::from_record(&record),
            Err(ChainError::UnsupportedCurve("P256".to_string()))
        );
    }

    #[test]
    fn test_unknown_record_version_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut record = wallet.to_record();
        record.version = 9;

        assert!(matches!(
            Wallet::from_record(&record),
            Err(ChainError::Serialization(_))
        ));
    }

    #[test]
    fn test_record_with_foreign_public_key_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut record = wallet.to_record();
        record.public_key = Wallet::new().unwrap().public_key;

        assert!(Wallet::from_record(&record).is_err());
    }

    #[test]
    fn test_wallets_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_test.dat");

        let mut wallets = Wallets::load(&path).unwrap();
        assert!(wallets.addresses().is_empty());
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();
        wallets.save(&path).unwrap();

        let reloaded = Wallets::load(&path).unwrap();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(reloaded.addresses(), expected);
        assert_eq!(
            reloaded.get_wallet(&first).unwrap(),
            wallets.get_wallet(&first).unwrap()
        );
        assert!(matches!(
            reloaded.get_wallet("missing"),
            Err(ChainError::WalletNotFound(_))
        ));
    }
}
