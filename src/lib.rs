//! utxochain - A minimal proof-of-work ledger built on unspent transaction outputs
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, proof-of-work, fork choice and the UTXO set
//! - [`transaction`] - Transaction construction, signing and verification
//!
//! ## Cryptography
//! - [`crypto`] - Hashing and ECDSA signatures (secp256k1)
//! - [`wallet`] - Key records, Base58Check addresses and the wallet file
//!
//! ## State Management
//! - [`persistence`] - Key-value store (SQLite and in-memory)
//! - [`node`] - Node context owning the chain lock and mempool
//!
//! ## Networking
//! - [`network`] - Wire frames, transports and the inbound listener
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`cli`] - Command implementations

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;
pub mod wallet;

// ============================================================================
// State Management
// ============================================================================
pub mod node;
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod network;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod cli;
pub mod config;
pub mod error;
