//! Cryptographic primitives for utxochain

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub type Sha256Hash = [u8; 32];

/// RIPEMD-160 of the SHA-256 of a raw public key.
pub type PubKeyHash = [u8; 20];

/// Length of one affine coordinate of a curve point.
pub const COORDINATE_SIZE: usize = 32;

/// Raw public key length: X followed by Y, no compression tag.
pub const RAW_PUBLIC_KEY_SIZE: usize = 2 * COORDINATE_SIZE;

/// SEC1 tag for an uncompressed point.
const UNCOMPRESSED_TAG: u8 = 0x04;

pub fn sha256(data: &[u8]) -> Sha256Hash {
    Sha256::digest(data).into()
}

/// Hashes a raw public key into the 20-byte locking hash used by outputs.
pub fn hash_pub_key(public_key: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    /// A failing OS entropy source aborts inside `OsRng`; there is no fallback.
    pub fn generate() -> Result<Self, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Rebuilds a KeyPair from its scalar and affine coordinates, rejecting
    /// material where the scalar does not derive the given point.
    pub fn from_parts(secret: &[u8], x: &[u8], y: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(secret).map_err(|e| {
            if secret.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    secret.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        let mut raw = Vec::with_capacity(RAW_PUBLIC_KEY_SIZE);
        raw.extend_from_slice(x);
        raw.extend_from_slice(y);
        let public_key = public_key_from_raw(&raw)?;

        let keypair = Self::from_secret_key(secret_key);
        if keypair.public_key != public_key {
            return Err(ChainError::CryptoError(
                "Public point does not match private scalar".to_string(),
            ));
        }
        Ok(keypair)
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.secret_key.secret_bytes()
    }

    /// Returns the (X, Y) coordinates of the public point.
    pub fn coordinates(&self) -> ([u8; COORDINATE_SIZE], [u8; COORDINATE_SIZE]) {
        let serialized = self.public_key.serialize_uncompressed();
        let mut x = [0u8; COORDINATE_SIZE];
        let mut y = [0u8; COORDINATE_SIZE];
        x.copy_from_slice(&serialized[1..1 + COORDINATE_SIZE]);
        y.copy_from_slice(&serialized[1 + COORDINATE_SIZE..]);
        (x, y)
    }

    /// Returns the public key as X ‖ Y.
    pub fn raw_public_key(&self) -> Vec<u8> {
        self.public_key.serialize_uncompressed()[1..].to_vec()
    }

    /// Signs a 32-byte digest and returns the compact signature bytes.
    pub fn sign_digest(&self, digest: &Sha256Hash) -> [u8; COMPACT_SIGNATURE_SIZE] {
        let message = Message::from_digest(*digest);
        SECP256K1_CONTEXT
            .sign_ecdsa(&message, &self.secret_key)
            .serialize_compact()
    }
}

fn public_key_from_raw(raw: &[u8]) -> Result<PublicKey, ChainError> {
    if raw.len() != RAW_PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (X ‖ Y), got {}",
            RAW_PUBLIC_KEY_SIZE,
            raw.len()
        )));
    }
    let mut tagged = [0u8; RAW_PUBLIC_KEY_SIZE + 1];
    tagged[0] = UNCOMPRESSED_TAG;
    tagged[1..].copy_from_slice(raw);
    PublicKey::from_slice(&tagged)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))
}

/// Verifies a compact ECDSA signature over a digest given a raw X ‖ Y public key.
pub fn verify_digest(
    raw_public_key: &[u8],
    digest: &Sha256Hash,
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = public_key_from_raw(raw_public_key)?;
    let message = Message::from_digest(*digest);
    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))
}
