// Thin re-export module: implementation lives in `blockchain/core.rs`, split
// into chain management, the UTXO set and block validation.

pub mod core;
pub use core::*;
