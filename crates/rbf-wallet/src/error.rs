//! Wallet and fee-bump error types.

use rbf_core::error::{
    BroadcastError, ChainStateError, CoreError, CryptoError, MempoolError, TransactionError,
};
use rbf_core::types::{Hash256, OutPoint};
use thiserror::Error;

/// Errors from general wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("no spendable coins available")]
    NoUtxos,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("build error: {0}")]
    BuildError(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(Hash256),

    /// An input references an output that is neither confirmed-unspent nor
    /// created by a pool transaction.
    #[error("missing or spent input: {0}")]
    MissingInput(OutPoint),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    ChainState(#[from] ChainStateError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl From<CoreError> for WalletError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Transaction(e) => Self::Transaction(e),
            CoreError::Crypto(e) => Self::Crypto(e),
            CoreError::Mempool(e) => Self::Mempool(e),
            CoreError::ChainState(e) => Self::ChainState(e),
            CoreError::Broadcast(e) => Self::Broadcast(e),
        }
    }
}

/// Why a transaction cannot be bumped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReplaceableReason {
    #[error("not a wallet transaction")]
    Unknown,
    #[error("already confirmed")]
    Confirmed,
    #[error("not BIP 125 replaceable")]
    NotSignalling,
}

/// Fee-bump failures. Each precondition of the planner has its own kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BumpError {
    #[error("transaction {txid} cannot be bumped: {reason}")]
    NotReplaceable {
        txid: Hash256,
        reason: NotReplaceableReason,
    },

    #[error("transaction {txid} contains input {outpoint} that doesn't belong to this wallet")]
    ForeignInput { txid: Hash256, outpoint: OutPoint },

    #[error("transaction {txid} has {count} descendants in the wallet or pool")]
    HasDescendants { txid: Hash256, count: usize },

    #[error("transaction {txid} has already been bumped by {replacement}")]
    AlreadyBumped { txid: Hash256, replacement: Hash256 },

    #[error("change output is too small: {change} left after paying {fee_increase} more fee")]
    ChangeTooSmall { change: u64, fee_increase: u64 },

    #[error("signing failed: {0}")]
    SigningFailed(CryptoError),

    #[error("replacement rejected: {0}")]
    BroadcastRejected(String),

    #[error("transaction {0} has no change output to reduce")]
    NoChangeOutput(Hash256),

    #[error("transaction {txid} has {count} change outputs")]
    MultipleChangeOutputs { txid: Hash256, count: usize },

    #[error("invalid total fee {requested}: must be positive")]
    InsufficientFee { requested: u64 },

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl From<MempoolError> for BumpError {
    fn from(e: MempoolError) -> Self {
        Self::BroadcastRejected(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn from_core_error_unwraps_variant() {
        let core = CoreError::from(ChainStateError::MissingUtxo("x".into()));
        assert_eq!(
            WalletError::from(core),
            WalletError::ChainState(ChainStateError::MissingUtxo("x".into()))
        );
    }

    #[test]
    fn not_replaceable_names_reason() {
        let e = BumpError::NotReplaceable {
            txid: Hash256::ZERO,
            reason: NotReplaceableReason::NotSignalling,
        };
        assert!(e.to_string().contains("not BIP 125 replaceable"));
    }

    #[test]
    fn foreign_input_message() {
        let e = BumpError::ForeignInput {
            txid: Hash256::ZERO,
            outpoint: OutPoint::new(Hash256([1; 32]), 0),
        };
        assert!(e.to_string().contains("doesn't belong"));
    }

    #[test]
    fn mempool_error_becomes_broadcast_rejected() {
        let e: BumpError = MempoolError::PoolFull.into();
        assert_eq!(e, BumpError::BroadcastRejected("pool full".into()));
    }
}
