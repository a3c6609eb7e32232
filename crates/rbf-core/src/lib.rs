//! # rbf-core
//! Transaction types, signing, the confirmed-chain index and the mempool
//! model shared by the fee-bumping wallet.

pub mod chain_state;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod fee;
pub mod mempool;
pub mod traits;
pub mod types;
